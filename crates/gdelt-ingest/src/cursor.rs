//! In-memory progress cursor for one ingestion run

use gdelt_common::{GdeltError, Result};

/// Outcome of consuming one manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// The current download phase is full
    pub stop_batch: bool,
    /// The run limit has been reached
    pub stop_run: bool,
}

/// Counts consumed manifest entries against the batch size and run limit
///
/// Invariants: `1 <= batch_size <= limit`, `total_consumed` never decreases,
/// and a run built on this cursor performs at most
/// `ceil(limit / batch_size)` batches.
#[derive(Debug, Clone)]
pub struct BatchCursor {
    batch_size: usize,
    limit: usize,
    consumed_in_batch: usize,
    total_consumed: usize,
    batches_started: usize,
}

impl BatchCursor {
    pub fn new(batch_size: usize, limit: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(GdeltError::Config("batch size must be at least 1".to_string()));
        }
        if limit < batch_size {
            return Err(GdeltError::Config(format!(
                "run limit ({}) must not be smaller than batch size ({})",
                limit, batch_size
            )));
        }

        Ok(Self {
            batch_size,
            limit,
            consumed_in_batch: 0,
            total_consumed: 0,
            batches_started: 0,
        })
    }

    /// Start a new download phase
    pub fn begin_batch(&mut self) {
        self.consumed_in_batch = 0;
        self.batches_started += 1;
    }

    /// Record one consumed entry
    pub fn advance(&mut self) -> Advance {
        self.consumed_in_batch += 1;
        self.total_consumed += 1;

        let stop_run = self.total_consumed >= self.limit;
        Advance {
            stop_batch: stop_run || self.consumed_in_batch >= self.batch_size,
            stop_run,
        }
    }

    /// Whether the run limit has been reached
    pub fn is_exhausted(&self) -> bool {
        self.total_consumed >= self.limit
    }

    pub fn consumed_in_batch(&self) -> usize {
        self.consumed_in_batch
    }

    pub fn total_consumed(&self) -> usize {
        self.total_consumed
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn batches_started(&self) -> usize {
        self.batches_started
    }

    /// Upper bound on batches for this cursor's configuration
    pub fn max_batches(&self) -> usize {
        self.limit.div_ceil(self.batch_size)
    }
}
