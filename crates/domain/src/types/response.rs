//! Parsed upstream payloads and the response envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format an upstream body was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Json,
    Csv,
    Text,
}

/// A CSV document split into a header row and data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Value of `column` in row `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }
}

/// Upstream body, parsed once when it crosses the fetcher boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "payload", rename_all = "lowercase")]
pub enum ParsedResponse {
    Json(serde_json::Value),
    Csv(CsvTable),
    Text(String),
}

impl ParsedResponse {
    pub fn format(&self) -> ResponseFormat {
        match self {
            ParsedResponse::Json(_) => ResponseFormat::Json,
            ParsedResponse::Csv(_) => ResponseFormat::Csv,
            ParsedResponse::Text(_) => ResponseFormat::Text,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ParsedResponse::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Successful fetch from one upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedResponse {
    pub source_id: String,
    pub status: u16,
    /// Number of HTTP attempts it took, including the successful one.
    pub attempts: u32,
    /// Wall time from the first attempt to the parsed body, backoff included.
    pub elapsed_ms: u64,
    pub fetched_at: DateTime<Utc>,
    pub body: ParsedResponse,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parsed_response_serializes_with_format_tag() {
        let parsed = ParsedResponse::Json(json!({"price": 1.5}));
        let value = serde_json::to_value(&parsed).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["payload"]["price"], 1.5);

        let back: ParsedResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back.format(), ResponseFormat::Json);
    }

    #[test]
    fn csv_cell_lookup_by_column_name() {
        let table = CsvTable {
            headers: vec!["symbol".into(), "price".into()],
            rows: vec![vec!["BTC".into(), "64000".into()]],
        };
        assert_eq!(table.cell(0, "price"), Some("64000"));
        assert_eq!(table.cell(0, "volume"), None);
        assert_eq!(table.cell(1, "price"), None);
    }
}
