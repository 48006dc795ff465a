//! CSV Data Loader Module
//! Reads the `;`-delimited source, resolving Latin-1 / UTF-8 ambiguity.

use crate::data::schema::unique_labels;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_SEPARATOR: u8 = b';';

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("source file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not decode {} (tried {attempted:?}): {source}", .path.display())]
    DecodeFailure {
        path: PathBuf,
        attempted: Vec<SourceEncoding>,
        #[source]
        source: DecodeError,
    },
}

/// Why a single encoding attempt failed.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed delimited text: {0}")]
    Csv(#[from] csv::Error),
    #[error("no header row")]
    MissingHeader,
    #[error("failed to build table: {0}")]
    Polars(#[from] PolarsError),
    #[error("no encoding configured")]
    NoEncoding,
}

/// Text encodings the loader can try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceEncoding {
    Latin1,
    Utf8,
}

impl SourceEncoding {
    pub fn decode(self, bytes: &[u8]) -> Result<String, DecodeError> {
        match self {
            // Every byte maps to the code point of the same value. encoding_rs
            // resolves the "latin1" label to windows-1252, which remaps 0x80..0x9F.
            SourceEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            SourceEncoding::Utf8 => Ok(String::from_utf8(bytes.to_vec())?),
        }
    }
}

impl fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceEncoding::Latin1 => write!(f, "latin1"),
            SourceEncoding::Utf8 => write!(f, "utf8"),
        }
    }
}

impl FromStr for SourceEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "latin1" | "iso88591" => Ok(SourceEncoding::Latin1),
            "utf8" => Ok(SourceEncoding::Utf8),
            other => Err(format!("unsupported encoding '{}'", other)),
        }
    }
}

/// How the source file is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub separator: u8,
    /// Tried in order until one succeeds.
    pub encodings: Vec<SourceEncoding>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            encodings: vec![SourceEncoding::Latin1, SourceEncoding::Utf8],
        }
    }
}

/// Identity of a source file on disk, used to detect changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFingerprint {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

/// Stat the source, mapping a missing file to [`LoadError::NotFound`].
pub fn fingerprint(path: &Path) -> Result<SourceFingerprint, LoadError> {
    let metadata = std::fs::metadata(path).map_err(|e| io_error(path, e))?;
    Ok(SourceFingerprint {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}

fn io_error(path: &Path, source: io::Error) -> LoadError {
    if source.kind() == io::ErrorKind::NotFound {
        LoadError::NotFound(path.to_path_buf())
    } else {
        LoadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Handles CSV file loading into an all-text polars table.
#[derive(Debug, Clone, Default)]
pub struct DataLoader {
    options: LoadOptions,
}

impl DataLoader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load a delimited file, trying each configured encoding in turn.
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub fn load_csv(&self, path: &Path) -> Result<DataFrame, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

        let mut last_error = DecodeError::NoEncoding;
        for &encoding in &self.options.encodings {
            match self.parse(bytes, encoding) {
                Ok(df) => {
                    info!(
                        %encoding,
                        rows = df.height(),
                        columns = df.width(),
                        "Source loaded"
                    );
                    return Ok(df);
                }
                Err(e) => {
                    warn!(%encoding, error = %e, "Decode attempt failed");
                    last_error = e;
                }
            }
        }

        Err(LoadError::DecodeFailure {
            path: path.to_path_buf(),
            attempted: self.options.encodings.clone(),
            source: last_error,
        })
    }

    /// Decode `bytes` and split them into a table of nullable text columns.
    ///
    /// Records whose field count differs from the header are skipped.
    pub fn parse(&self, bytes: &[u8], encoding: SourceEncoding) -> Result<DataFrame, DecodeError> {
        let text = encoding.decode(bytes)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.options.separator)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.clone();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(DecodeError::MissingHeader);
        }

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut skipped = 0usize;

        for (index, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    debug!(record = index + 1, error = %e, "Skipping unreadable row");
                    skipped += 1;
                    continue;
                }
            };

            if record.len() != headers.len() {
                debug!(
                    record = index + 1,
                    fields = record.len(),
                    expected = headers.len(),
                    "Skipping malformed row"
                );
                skipped += 1;
                continue;
            }

            for (column, field) in cells.iter_mut().zip(record.iter()) {
                column.push(if field.is_empty() {
                    None
                } else {
                    Some(field.to_string())
                });
            }
        }

        if skipped > 0 {
            warn!(skipped, "Malformed rows skipped");
        }

        let names = unique_labels(headers.iter());
        let columns: Vec<Column> = names
            .into_iter()
            .zip(cells)
            .map(|(name, values)| Column::new(name.into(), values))
            .collect();

        Ok(DataFrame::new(columns)?)
    }
}

/// Load `path` with the given options.
pub fn load(path: &Path, options: &LoadOptions) -> Result<DataFrame, LoadError> {
    DataLoader::new(options.clone()).load_csv(path)
}
