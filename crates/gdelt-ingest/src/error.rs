//! Run-level error reported by the pipeline

use std::fmt;

/// Phase of the run in which a fatal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Manifest,
    Fetch,
    Parse,
    Upload,
    Cleanup,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Manifest => "manifest",
            Phase::Fetch => "fetch",
            Phase::Parse => "parse",
            Phase::Upload => "upload",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First fatal error of a run, with the phase and the URL or file involved
#[derive(Debug)]
pub struct PipelineError {
    pub phase: Phase,
    pub subject: Option<String>,
    pub source: anyhow::Error,
}

impl PipelineError {
    pub fn new(phase: Phase, source: impl Into<anyhow::Error>) -> Self {
        Self {
            phase,
            subject: None,
            source: source.into(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{} failed for {}: {:#}", self.phase, subject, self.source),
            None => write!(f, "{} failed: {:#}", self.phase, self.source),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}
