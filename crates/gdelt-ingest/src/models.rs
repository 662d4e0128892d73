//! Document model for GDELT 2.0 event records
//!
//! Field names follow the GDELT codebook so stored documents can be queried
//! with the names analysts already know (`GlobalEventID`, `Actor1.Code`,
//! `ActionGeo.Location`, ...). Every field is optional: values missing from
//! the source row are left out of the document instead of being defaulted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event row from an export file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    #[serde(rename = "GlobalEventID", skip_serializing_if = "Option::is_none")]
    pub global_event_id: Option<i64>,

    /// `DATEADDED`, when the event entered the database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,

    #[serde(rename = "SourceURL", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor1: Option<Actor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor2: Option<Actor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_root_event: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_base_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_root_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quad_class: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub goldstein_scale: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_mentions: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_sources: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_articles: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_tone: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor1_geo: Option<Geography>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor2_geo: Option<Geography>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_geo: Option<Geography>,
}

impl EventRecord {
    /// Whether the row carried anything that identifies the event
    pub fn is_identified(&self) -> bool {
        self.global_event_id.is_some()
            || self.date.is_some()
            || self.source_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Actor attributes (CAMEO codes and names)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Actor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_group_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethnic_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub religion1_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub religion2_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type1_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type2_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type3_code: Option<String>,
}

/// Geographic resolution of an actor or of the action itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Geography {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<i32>,
    #[serde(rename = "Fullname", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(rename = "ADM1Code", skip_serializing_if = "Option::is_none")]
    pub adm1_code: Option<String>,
    #[serde(rename = "ADM2Code", skip_serializing_if = "Option::is_none")]
    pub adm2_code: Option<String>,
    #[serde(rename = "FeatureID", skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

/// `{ "type": "point", "coordinates": [longitude, latitude] }`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: GeoPointKind,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoPointKind {
    Point,
}

impl GeoPoint {
    /// Build a point from a latitude/longitude pair
    ///
    /// Returns `None` for coordinates outside the WGS84 ranges or non-finite
    /// values, which document stores reject for geo indexes.
    pub fn from_lat_long(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        valid.then_some(Self {
            kind: GeoPointKind::Point,
            coordinates: [longitude, latitude],
        })
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}
