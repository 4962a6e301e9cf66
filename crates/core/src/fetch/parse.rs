//! Response body parsing
//!
//! Bodies are parsed exactly once, when the fetcher hands a response back.
//! The `content-type` header wins when it names JSON or CSV; otherwise the
//! body is probed as JSON, then CSV, and finally kept as text.

use tributary_domain::{CsvTable, ParsedResponse};

/// Parse a response body into its structured form
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> ParsedResponse {
    let declared = content_type.map(|ct| ct.to_ascii_lowercase()).unwrap_or_default();

    if declared.contains("json") {
        if let Some(value) = parse_json(body) {
            return ParsedResponse::Json(value);
        }
    } else if declared.contains("csv") {
        if let Some(table) = parse_csv(body) {
            return ParsedResponse::Csv(table);
        }
    }

    if let Some(value) = parse_json(body) {
        return ParsedResponse::Json(value);
    }
    if let Some(table) = parse_csv(body).filter(looks_tabular) {
        return ParsedResponse::Csv(table);
    }
    ParsedResponse::Text(String::from_utf8_lossy(body).into_owned())
}

fn parse_json(body: &[u8]) -> Option<serde_json::Value> {
    serde_json::from_slice(body).ok()
}

fn parse_csv(body: &[u8]) -> Option<CsvTable> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(false).from_reader(body);

    let headers: Vec<String> = reader.headers().ok()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return None;
    }

    let rows = reader
        .records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
        .collect::<Result<Vec<Vec<String>>, _>>()
        .ok()?;

    Some(CsvTable { headers, rows })
}

/// An undeclared body only counts as CSV when it has more than one column
/// and at least one data row; plain prose parses as a one-column table.
fn looks_tabular(table: &CsvTable) -> bool {
    table.headers.len() > 1 && !table.rows.is_empty()
}
