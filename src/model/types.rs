//! Catalog records, coordinates and search queries.

use serde::{Deserialize, Serialize};

/// A geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both coordinates fall inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// One catalog item. Immutable once ingested; a rebuild replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub location: Location,
    pub url: String,
    /// Ordered image references; empty, never absent.
    #[serde(rename = "imageRefs", default)]
    pub image_refs: Vec<String>,
}

/// A single inbound search: free text plus the point results are ranked around.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub search_term: String,
    pub origin: Location,
}

impl SearchQuery {
    pub fn new(search_term: impl Into<String>, origin: Location) -> Self {
        Self {
            search_term: search_term.into(),
            origin,
        }
    }
}
