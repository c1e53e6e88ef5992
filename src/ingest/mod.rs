//! Record ingestion from the flat catalog dump.
//!
//! The dump is a headerless CSV with five columns per row:
//!
//! ```text
//! name,latitude,longitude,url,["image-ref", ...]
//! ```
//!
//! Rows are validated in order and parsing stops at the first bad row. The
//! rows parsed before the failure are handed back together with the error so
//! the caller can decide whether a bad dump is fatal (process startup) or just
//! a failed case (test fixtures).

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Location, Record};

/// Columns every dump row must carry.
pub const DUMP_COLUMNS: usize = 5;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("row {row} has {fields} columns, expected {DUMP_COLUMNS}: {content}")]
    MalformedRow {
        row: usize,
        fields: usize,
        content: String,
    },
    #[error("row {row}: invalid coordinate {value:?}")]
    InvalidCoordinate { row: usize, value: String },
    #[error("row {row}: invalid image reference list {value:?}: {source}")]
    InvalidImageList {
        row: usize,
        value: String,
        source: serde_json::Error,
    },
    #[error("failed to read dump: {0}")]
    Read(#[from] csv::Error),
    #[error("failed to open dump at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A parse that stopped early. `records` holds every row accepted before `error`.
#[derive(Debug, Error)]
#[error("{error} ({} rows parsed before the failure)", .records.len())]
pub struct PartialParse {
    pub records: Vec<Record>,
    #[source]
    pub error: ParseError,
}

/// Parse a dump stream into records, failing fast on the first invalid row.
pub fn parse_dump<R: Read>(rdr: R) -> Result<Vec<Record>, PartialParse> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(rdr);

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let parsed = row
            .map_err(ParseError::from)
            .and_then(|row| parse_row(idx + 1, &row));
        match parsed {
            Ok(record) => records.push(record),
            Err(error) => return Err(PartialParse { records, error }),
        }
    }
    debug!(records = records.len(), "parsed dump");
    Ok(records)
}

/// Open and parse the dump at `path`.
pub fn read_dump_file(path: &Path) -> Result<Vec<Record>, PartialParse> {
    let file = File::open(path).map_err(|source| PartialParse {
        records: Vec::new(),
        error: ParseError::Open {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let records = parse_dump(file)?;
    info!(path = %path.display(), records = records.len(), "loaded catalog dump");
    Ok(records)
}

/// Serialize records back into the dump format accepted by [`parse_dump`].
pub fn write_dump<W: Write>(writer: W, records: &[Record]) -> Result<(), ParseError> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    for record in records {
        let images = serde_json::to_string(&record.image_refs).map_err(|source| {
            ParseError::InvalidImageList {
                row: 0,
                value: format!("{:?}", record.image_refs),
                source,
            }
        })?;
        let lat = record.location.lat.to_string();
        let lon = record.location.lon.to_string();
        out.write_record([
            record.name.as_str(),
            lat.as_str(),
            lon.as_str(),
            record.url.as_str(),
            images.as_str(),
        ])?;
    }
    out.flush().map_err(|e| ParseError::Read(e.into()))?;
    Ok(())
}

fn parse_row(row: usize, fields: &csv::StringRecord) -> Result<Record, ParseError> {
    if fields.len() != DUMP_COLUMNS {
        return Err(ParseError::MalformedRow {
            row,
            fields: fields.len(),
            content: fields.iter().collect::<Vec<_>>().join(","),
        });
    }
    // Ranges are deliberately not checked here; the store rejects impossible points.
    let lat = parse_coordinate(row, &fields[1])?;
    let lon = parse_coordinate(row, &fields[2])?;
    let image_refs: Vec<String> =
        serde_json::from_str(&fields[4]).map_err(|source| ParseError::InvalidImageList {
            row,
            value: fields[4].to_string(),
            source,
        })?;

    Ok(Record {
        name: fields[0].to_string(),
        location: Location::new(lat, lon),
        url: fields[3].to_string(),
        image_refs,
    })
}

fn parse_coordinate(row: usize, value: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidCoordinate {
            row,
            value: value.to_string(),
        })
}
