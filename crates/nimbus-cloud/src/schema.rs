//! File formats and lightweight schema peeking
//!
//! Schema inference is deliberately shallow: a few KB of the object are
//! enough to name columns for CSV and JSON, and columnar formats defer to
//! the SQL engine's own readers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::EstimateSize;
use crate::error::{CloudError, Result};

/// Recognized file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Parquet,
    Csv,
    Json,
    Arrow,
}

impl FileFormat {
    /// Infer the format from the URL suffix, ignoring any query string
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".parquet") {
            Some(Self::Parquet)
        } else if path.ends_with(".csv") {
            Some(Self::Csv)
        } else if path.ends_with(".json") || path.ends_with(".jsonl") {
            Some(Self::Json)
        } else if path.ends_with(".arrow") {
            Some(Self::Arrow)
        } else {
            None
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_lowercase();
        if ct.contains("csv") {
            Some(Self::Csv)
        } else if ct.contains("json") {
            Some(Self::Json)
        } else if ct.contains("parquet") {
            Some(Self::Parquet)
        } else if ct.contains("arrow") {
            Some(Self::Arrow)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Arrow => "arrow",
        }
    }

    /// Whether the format is column-oriented binary (footer-carrying)
    pub fn is_columnar(&self) -> bool {
        matches!(self, Self::Parquet | Self::Arrow)
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse column types used by schema peeking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered column list plus format tag for one remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSchema {
    pub columns: Vec<ColumnDef>,
    pub format: FileFormat,
    pub row_count: Option<u64>,
}

impl EstimateSize for FileSchema {
    fn estimated_size(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.name.len() * 2 + 16)
            .sum::<usize>()
            + 32
    }
}

/// Column names from the first CSV line of a 4 KB prefix; types are all
/// strings at this depth.
pub fn infer_csv_schema(url: &str, sample: &[u8]) -> Result<FileSchema> {
    let text = String::from_utf8_lossy(sample);
    let header = text.lines().next().unwrap_or_default();
    if header.trim().is_empty() {
        return Err(CloudError::Schema {
            url: url.to_string(),
            reason: "empty CSV sample".to_string(),
        });
    }

    let columns = header
        .split(',')
        .map(|name| ColumnDef {
            name: name.trim().trim_matches('"').to_string(),
            column_type: ColumnType::String,
        })
        .collect();

    Ok(FileSchema {
        columns,
        format: FileFormat::Csv,
        row_count: None,
    })
}

/// Columns from the first object of a JSON array (or the first JSONL line)
/// in an 8 KB prefix, typed by JSON value kind.
pub fn infer_json_schema(url: &str, sample: &[u8]) -> Result<FileSchema> {
    let text = String::from_utf8_lossy(sample);

    let first_object = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => items.into_iter().find(|v| v.is_object()),
        Ok(value @ Value::Object(_)) => Some(value),
        // Truncated document or line-delimited records: try the first line.
        _ => text
            .lines()
            .next()
            .and_then(|line| serde_json::from_str::<Value>(line).ok())
            .filter(Value::is_object),
    };

    let Some(Value::Object(object)) = first_object else {
        return Err(CloudError::Schema {
            url: url.to_string(),
            reason: "sample is not an array of objects".to_string(),
        });
    };

    let columns = object
        .iter()
        .map(|(name, value)| ColumnDef {
            name: name.clone(),
            column_type: match value {
                Value::Number(_) => ColumnType::Number,
                Value::Bool(_) => ColumnType::Boolean,
                _ => ColumnType::String,
            },
        })
        .collect();

    Ok(FileSchema {
        columns,
        format: FileFormat::Json,
        row_count: None,
    })
}

/// Placeholder schema for columnar formats: footer parsing is left to the
/// SQL engine, so the peek reports a single opaque column.
pub fn placeholder_columnar_schema(format: FileFormat) -> FileSchema {
    FileSchema {
        columns: vec![ColumnDef {
            name: "data".to_string(),
            column_type: ColumnType::String,
        }],
        format,
        row_count: None,
    }
}
