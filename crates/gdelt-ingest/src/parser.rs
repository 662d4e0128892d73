//! GDELT 2.0 event export parser
//!
//! Export files are tab-delimited, one event per line, no header, with the
//! 61-column layout documented in the GDELT 2.0 event codebook. Columns are
//! addressed by position; rows may be shorter than the documented layout and
//! any column past the end of a row is treated as absent.
//!
//! # Failure handling
//! - an unparsable numeric field is omitted from the record
//! - a row with no identity (event id, date, source URL) or with a malformed
//!   `DATEADDED` timestamp is skipped with a warning
//! - an I/O failure reading the file aborts the whole file

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::borrow::Cow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::models::{Actor, EventRecord, GeoPoint, Geography};

/// Column positions in the export layout
pub mod columns {
    pub const GLOBAL_EVENT_ID: usize = 0;
    pub const SQL_DATE: usize = 1;
    pub const MONTH_YEAR: usize = 2;
    pub const YEAR: usize = 3;
    pub const FRACTION_DATE: usize = 4;

    /// First of the ten Actor1 columns (Code .. Type3Code)
    pub const ACTOR1: usize = 5;
    /// First of the ten Actor2 columns
    pub const ACTOR2: usize = 15;

    pub const IS_ROOT_EVENT: usize = 25;
    pub const EVENT_CODE: usize = 26;
    pub const EVENT_BASE_CODE: usize = 27;
    pub const EVENT_ROOT_CODE: usize = 28;
    pub const QUAD_CLASS: usize = 29;
    pub const GOLDSTEIN_SCALE: usize = 30;
    pub const NUM_MENTIONS: usize = 31;
    pub const NUM_SOURCES: usize = 32;
    pub const NUM_ARTICLES: usize = 33;
    pub const AVG_TONE: usize = 34;

    /// First of the eight Actor1Geo columns (Type .. FeatureID)
    pub const ACTOR1_GEO: usize = 35;
    pub const ACTOR2_GEO: usize = 43;
    pub const ACTION_GEO: usize = 51;

    pub const DATE_ADDED: usize = 59;
    pub const SOURCE_URL: usize = 60;

    /// Documented column count
    pub const COUNT: usize = 61;

    // Offsets inside an actor group
    pub const ACTOR_WIDTH: usize = 10;

    // Offsets inside a geography group
    pub const GEO_TYPE: usize = 0;
    pub const GEO_FULL_NAME: usize = 1;
    pub const GEO_COUNTRY_CODE: usize = 2;
    pub const GEO_ADM1_CODE: usize = 3;
    pub const GEO_ADM2_CODE: usize = 4;
    pub const GEO_LAT: usize = 5;
    pub const GEO_LONG: usize = 6;
    pub const GEO_FEATURE_ID: usize = 7;
    pub const GEO_WIDTH: usize = 8;
}

/// `DATEADDED` layout
const DATE_ADDED_FORMAT: &str = "%Y%m%d%H%M%S";

/// Records parsed from one export file
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub records: Vec<EventRecord>,
    /// Rows dropped because they were unidentifiable or had a bad timestamp
    pub rows_skipped: usize,
}

/// Positional field-mapping parser for export rows
#[derive(Debug, Clone)]
pub struct EventParser {
    /// Derive `Location` sub-documents from lat/long columns
    geo_points: bool,
}

impl EventParser {
    pub fn new() -> Self {
        Self { geo_points: true }
    }

    /// Toggle derivation of `Location` geo points
    pub fn with_geo_points(mut self, enabled: bool) -> Self {
        self.geo_points = enabled;
        self
    }

    /// Parse every row of a local export file
    pub fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open export file {}", path.display()))?;

        let parsed = self
            .parse_reader(file)
            .with_context(|| format!("Failed to read export file {}", path.display()))?;

        info!(
            "Parsed {} records from {} ({} rows skipped)",
            parsed.records.len(),
            path.display(),
            parsed.rows_skipped
        );

        Ok(parsed)
    }

    /// Parse rows from any reader
    pub fn parse_reader<R: std::io::Read>(&self, reader: R) -> Result<ParsedFile> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut parsed = ParsedFile::default();
        let mut row = csv::ByteRecord::new();
        let mut line_num = 0usize;

        loop {
            match csv_reader.read_byte_record(&mut row) {
                Ok(false) => break,
                Ok(true) => {},
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(e).context("I/O error while reading rows");
                },
                Err(e) => {
                    line_num += 1;
                    warn!("Skipping unreadable row {}: {}", line_num, e);
                    parsed.rows_skipped += 1;
                    continue;
                },
            }
            line_num = row.position().map(|p| p.line() as usize).unwrap_or(line_num + 1);

            let fields: Vec<Cow<'_, str>> = row.iter().map(String::from_utf8_lossy).collect();
            if fields.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            let fields: Vec<&str> = fields.iter().map(|f| f.as_ref()).collect();

            match self.parse_fields(&fields, line_num) {
                Ok(record) => parsed.records.push(record),
                Err(e) => {
                    warn!("Skipping row {}: {}", line_num, e);
                    parsed.rows_skipped += 1;
                },
            }
        }

        Ok(parsed)
    }

    /// Parse a single tab-delimited line
    pub fn parse_line(&self, line: &str, line_num: usize) -> Result<EventRecord> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        self.parse_fields(&fields, line_num)
    }

    /// Map positional fields onto an [`EventRecord`]
    pub fn parse_fields(&self, fields: &[&str], line_num: usize) -> Result<EventRecord> {
        if fields.len() < columns::COUNT {
            debug!(
                "Line {}: short row ({} of {} columns)",
                line_num,
                fields.len(),
                columns::COUNT
            );
        }
        let row = Row { fields, line_num };

        let date = match row.non_empty(columns::DATE_ADDED) {
            Some(raw) => Some(
                parse_date_added(raw)
                    .with_context(|| format!("Line {}: invalid DATEADDED {:?}", line_num, raw))?,
            ),
            None => None,
        };

        let record = EventRecord {
            global_event_id: row.number(columns::GLOBAL_EVENT_ID, "GlobalEventID"),
            date,
            source_url: row.text(columns::SOURCE_URL),
            actor1: row.actor(columns::ACTOR1),
            actor2: row.actor(columns::ACTOR2),
            is_root_event: row
                .number::<i64>(columns::IS_ROOT_EVENT, "IsRootEvent")
                .map(|v| v != 0),
            event_code: row.text(columns::EVENT_CODE),
            event_base_code: row.text(columns::EVENT_BASE_CODE),
            event_root_code: row.text(columns::EVENT_ROOT_CODE),
            quad_class: row.number(columns::QUAD_CLASS, "QuadClass"),
            goldstein_scale: row.decimal(columns::GOLDSTEIN_SCALE, "GoldsteinScale"),
            num_mentions: row.number(columns::NUM_MENTIONS, "NumMentions"),
            num_sources: row.number(columns::NUM_SOURCES, "NumSources"),
            num_articles: row.number(columns::NUM_ARTICLES, "NumArticles"),
            avg_tone: row.decimal(columns::AVG_TONE, "AvgTone"),
            actor1_geo: row.geography(columns::ACTOR1_GEO, self.geo_points),
            actor2_geo: row.geography(columns::ACTOR2_GEO, self.geo_points),
            action_geo: row.geography(columns::ACTION_GEO, self.geo_points),
        };

        if !record.is_identified() {
            bail!("Line {}: no GlobalEventID, DATEADDED or SourceURL", line_num);
        }

        Ok(record)
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a 14-digit `YYYYMMDDHHMMSS` stamp into UTC
pub fn parse_date_added(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        bail!("expected 14 digits (YYYYMMDDHHMMSS)");
    }
    let naive = NaiveDateTime::parse_from_str(raw, DATE_ADDED_FORMAT)
        .context("not a valid calendar timestamp")?;
    Ok(naive.and_utc())
}

/// Bounds-checked view over one row
struct Row<'a> {
    fields: &'a [&'a str],
    line_num: usize,
}

impl<'a> Row<'a> {
    fn get(&self, idx: usize) -> Option<&'a str> {
        self.fields.get(idx).copied()
    }

    /// String columns are copied verbatim, empty included
    fn text(&self, idx: usize) -> Option<String> {
        self.get(idx).map(str::to_string)
    }

    fn non_empty(&self, idx: usize) -> Option<&'a str> {
        self.get(idx).filter(|v| !v.trim().is_empty())
    }

    /// Numeric columns are decimal text; empty or malformed values are omitted
    fn number<T: FromStr>(&self, idx: usize, name: &str) -> Option<T> {
        let raw = self.non_empty(idx)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!("Line {}: dropping malformed {} {:?}", self.line_num, name, raw);
                None
            },
        }
    }

    /// `NaN` and infinities parse as `f64` but have no JSON form
    fn decimal(&self, idx: usize, name: &str) -> Option<f64> {
        let value: f64 = self.number(idx, name)?;
        if !value.is_finite() {
            debug!("Line {}: dropping non-finite {} {}", self.line_num, name, value);
            return None;
        }
        Some(value)
    }

    fn reaches(&self, start: usize) -> bool {
        self.fields.len() > start
    }

    fn actor(&self, start: usize) -> Option<Actor> {
        if !self.reaches(start) {
            return None;
        }
        let at = |offset: usize| {
            debug_assert!(offset < columns::ACTOR_WIDTH);
            self.text(start + offset)
        };
        Some(Actor {
            code: at(0),
            name: at(1),
            country_code: at(2),
            known_group_code: at(3),
            ethnic_code: at(4),
            religion1_code: at(5),
            religion2_code: at(6),
            type1_code: at(7),
            type2_code: at(8),
            type3_code: at(9),
        })
    }

    fn geography(&self, start: usize, geo_points: bool) -> Option<Geography> {
        if !self.reaches(start) {
            return None;
        }
        debug_assert!(columns::GEO_FEATURE_ID < columns::GEO_WIDTH);

        let location = if geo_points {
            self.geo_point(start + columns::GEO_LAT, start + columns::GEO_LONG)
        } else {
            None
        };

        Some(Geography {
            r#type: self.number(start + columns::GEO_TYPE, "Geo_Type"),
            full_name: self.text(start + columns::GEO_FULL_NAME),
            country_code: self.text(start + columns::GEO_COUNTRY_CODE),
            adm1_code: self.text(start + columns::GEO_ADM1_CODE),
            adm2_code: self.text(start + columns::GEO_ADM2_CODE),
            feature_id: self.text(start + columns::GEO_FEATURE_ID),
            location,
        })
    }

    fn geo_point(&self, lat_idx: usize, long_idx: usize) -> Option<GeoPoint> {
        let latitude = self.decimal(lat_idx, "Geo_Lat")?;
        let longitude = self.decimal(long_idx, "Geo_Long")?;
        let point = GeoPoint::from_lat_long(latitude, longitude);
        if point.is_none() {
            debug!(
                "Line {}: coordinates out of range ({}, {})",
                self.line_num, latitude, longitude
            );
        }
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with(values: &[(usize, &str)]) -> String {
        let mut fields = vec![""; columns::COUNT];
        for (idx, value) in values {
            fields[*idx] = *value;
        }
        fields.join("\t")
    }

    #[test]
    fn test_parse_date_added() {
        let date = parse_date_added("20150218230000").unwrap();
        assert_eq!(date.to_rfc3339(), "2015-02-18T23:00:00+00:00");
        assert!(parse_date_added("2015021823").is_err());
        assert!(parse_date_added("20151318230000").is_err());
        assert!(parse_date_added("2015021823000x").is_err());
    }

    #[test]
    fn test_empty_numeric_field_is_omitted() {
        let parser = EventParser::new();
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "410479387"),
            (columns::QUAD_CLASS, ""),
            (columns::NUM_MENTIONS, "397"),
        ]);

        let record = parser.parse_line(&line, 1).unwrap();
        assert_eq!(record.global_event_id, Some(410479387));
        assert_eq!(record.quad_class, None);
        assert_eq!(record.goldstein_scale, None);
        assert_eq!(record.num_mentions, Some(397));
        assert_eq!(record.is_root_event, None);
    }

    #[test]
    fn test_numbers_are_decimal_text() {
        let parser = EventParser::new();
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "1"),
            (columns::NUM_MENTIONS, "397"),
            (columns::NUM_SOURCES, "0012"),
            (columns::AVG_TONE, "-1.26582278481013"),
            (columns::IS_ROOT_EVENT, "0"),
        ]);

        let record = parser.parse_line(&line, 1).unwrap();
        assert_eq!(record.num_mentions, Some(397));
        assert_eq!(record.num_sources, Some(12));
        assert_eq!(record.avg_tone, Some(-1.26582278481013));
        assert_eq!(record.is_root_event, Some(false));
    }

    #[test]
    fn test_malformed_numeric_field_is_omitted() {
        let parser = EventParser::new();
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "42"),
            (columns::QUAD_CLASS, "four"),
            (columns::GOLDSTEIN_SCALE, "2.8"),
        ]);

        let record = parser.parse_line(&line, 1).unwrap();
        assert_eq!(record.quad_class, None);
        assert_eq!(record.goldstein_scale, Some(2.8));
    }

    #[test]
    fn test_non_finite_decimals_are_omitted() {
        let parser = EventParser::new();
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "42"),
            (columns::GOLDSTEIN_SCALE, "NaN"),
            (columns::AVG_TONE, "-infinity"),
            (columns::ACTOR1_GEO + columns::GEO_LAT, "inf"),
            (columns::ACTOR1_GEO + columns::GEO_LONG, "-98.5795"),
        ]);

        let record = parser.parse_line(&line, 1).unwrap();
        assert_eq!(record.goldstein_scale, None);
        assert_eq!(record.avg_tone, None);
        assert_eq!(record.actor1_geo.as_ref().unwrap().location, None);

        let doc = serde_json::to_value(&record).unwrap();
        assert!(doc.get("GoldsteinScale").is_none());
        assert!(doc.get("AvgTone").is_none());
    }

    #[test]
    fn test_empty_strings_are_kept() {
        let parser = EventParser::new();
        let line = row_with(&[(columns::GLOBAL_EVENT_ID, "42")]);

        let record = parser.parse_line(&line, 1).unwrap();
        let actor1 = record.actor1.unwrap();
        assert_eq!(actor1.code.as_deref(), Some(""));
        assert_eq!(record.event_code.as_deref(), Some(""));
        assert_eq!(record.source_url.as_deref(), Some(""));
    }

    #[test]
    fn test_short_row_omits_trailing_groups() {
        let parser = EventParser::new();
        let line = "42\t20150218\t201502\t2015\t2015.1315\tUSA\tUNITED STATES";

        let record = parser.parse_line(line, 1).unwrap();
        assert_eq!(record.global_event_id, Some(42));
        let actor1 = record.actor1.unwrap();
        assert_eq!(actor1.code.as_deref(), Some("USA"));
        assert_eq!(actor1.name.as_deref(), Some("UNITED STATES"));
        assert_eq!(actor1.country_code, None);
        assert!(record.actor2.is_none());
        assert!(record.action_geo.is_none());
        assert!(record.date.is_none());
        assert!(record.source_url.is_none());
    }

    #[test]
    fn test_geo_point_requires_both_coordinates() {
        let parser = EventParser::new();
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "42"),
            (columns::ACTOR1_GEO + columns::GEO_LAT, "39.828175"),
            (columns::ACTOR1_GEO + columns::GEO_LONG, "-98.5795"),
            (columns::ACTOR2_GEO + columns::GEO_LAT, "-1.28333"),
        ]);

        let record = parser.parse_line(&line, 1).unwrap();
        let point = record.actor1_geo.unwrap().location.unwrap();
        assert_eq!(point.coordinates, [-98.5795, 39.828175]);
        assert!(record.actor2_geo.unwrap().location.is_none());
        assert!(record.action_geo.unwrap().location.is_none());
    }

    #[test]
    fn test_geo_points_can_be_disabled() {
        let parser = EventParser::new().with_geo_points(false);
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "42"),
            (columns::ACTION_GEO + columns::GEO_TYPE, "4"),
            (columns::ACTION_GEO + columns::GEO_LAT, "9.03333"),
            (columns::ACTION_GEO + columns::GEO_LONG, "38.7"),
        ]);

        let geo = parser.parse_line(&line, 1).unwrap().action_geo.unwrap();
        assert_eq!(geo.r#type, Some(4));
        assert!(geo.location.is_none());
    }

    #[test]
    fn test_bad_date_rejects_row() {
        let parser = EventParser::new();
        let line = row_with(&[(columns::GLOBAL_EVENT_ID, "42"), (columns::DATE_ADDED, "2015-02-18")]);
        assert!(parser.parse_line(&line, 3).is_err());
    }

    #[test]
    fn test_unidentifiable_row_is_rejected() {
        let parser = EventParser::new();
        let line = row_with(&[(columns::GLOBAL_EVENT_ID, "not-a-number"), (columns::EVENT_CODE, "043")]);
        assert!(parser.parse_line(&line, 1).is_err());
    }

    #[test]
    fn test_parse_reader_skips_bad_rows() {
        let parser = EventParser::new();
        let good = row_with(&[(columns::GLOBAL_EVENT_ID, "1"), (columns::DATE_ADDED, "20150218230000")]);
        let bad_date = row_with(&[(columns::GLOBAL_EVENT_ID, "2"), (columns::DATE_ADDED, "yesterday")]);
        let anonymous = row_with(&[(columns::EVENT_CODE, "043")]);
        let short = "3";
        let content = format!("{good}\n{bad_date}\n\n{anonymous}\n{short}\n");

        let parsed = parser.parse_reader(content.as_bytes()).unwrap();
        let ids: Vec<_> = parsed.records.iter().map(|r| r.global_event_id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
        assert_eq!(parsed.rows_skipped, 2);
    }

    #[test]
    fn test_quotes_are_not_special() {
        let parser = EventParser::new();
        let line = row_with(&[
            (columns::GLOBAL_EVENT_ID, "7"),
            (columns::ACTOR1 + 1, "\"THE\" PRESIDENT"),
        ]);

        let parsed = parser.parse_reader(line.as_bytes()).unwrap();
        let actor1 = parsed.records[0].actor1.as_ref().unwrap();
        assert_eq!(actor1.name.as_deref(), Some("\"THE\" PRESIDENT"));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let parser = EventParser::new();
        assert!(parser
            .parse_file(Path::new("/nonexistent/20150218230000.export.CSV"))
            .is_err());
    }
}
