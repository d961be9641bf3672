//! CSV row source with encoding and delimiter auto-detection.
//!
//! Turns a CSV file into a typed [`RowStream`]: the header line fixes the
//! run schema, each data line is coerced once against the declared field
//! types. No dimension logic lives here.

use std::path::Path;

use crate::error::{CsvError, CsvResult};
use crate::row::{Row, RowStream, Schema, ValueType};

/// Parsed input with detection metadata.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Column headers from the first line.
    pub headers: Vec<String>,
    /// Raw string records, one per data line.
    pub records: Vec<Vec<String>>,
    /// Detected or used encoding.
    pub encoding: String,
    /// Detected or used delimiter.
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to a string using the detected encoding.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.to_string(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
        _ => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// Detect the delimiter by counting occurrences in the first line.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [';', ',', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

fn split_line(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter)
        .map(|s| s.trim().trim_matches('"').to_string())
        .collect()
}

/// Parse CSV text with an explicit delimiter.
pub fn parse_content(content: &str, delimiter: char, encoding: String) -> CsvResult<ParseResult> {
    let mut lines = content.lines();

    let header_line = lines.next().ok_or(CsvError::NoHeaders)?;
    let headers = split_line(header_line, delimiter);
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(CsvError::NoHeaders);
    }

    let mut records = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        records.push(split_line(line, delimiter));
    }

    Ok(ParseResult {
        headers,
        records,
        encoding,
        delimiter,
    })
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> CsvResult<ParseResult> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    parse_content(&content, delimiter, encoding)
}

/// Parse a CSV file with auto-detection of encoding and delimiter.
pub fn parse_file_auto<P: AsRef<Path>>(path: P) -> CsvResult<ParseResult> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_bytes_auto(&bytes)
}

// =============================================================================
// Row Source
// =============================================================================

/// A [`RowStream`] over a parsed CSV file.
///
/// Cells are coerced lazily, one row per `next_row` call, so a bad cell
/// surfaces with its line number at the row that carries it.
#[derive(Debug)]
pub struct CsvRowSource {
    schema: Schema,
    records: std::vec::IntoIter<Vec<String>>,
    line: usize,
}

impl CsvRowSource {
    /// Bind a parse result to a schema using the caller's type lookup.
    pub fn new(parsed: ParseResult, types: &dyn Fn(&str) -> ValueType) -> Self {
        let schema = Schema::from_headers(parsed.headers.iter().map(String::as_str), types);
        Self {
            schema,
            records: parsed.records.into_iter(),
            line: 1, // header line
        }
    }

    /// Open a CSV file with auto-detection and bind it to a schema.
    pub fn open<P: AsRef<Path>>(path: P, types: &dyn Fn(&str) -> ValueType) -> CsvResult<Self> {
        let parsed = parse_file_auto(path)?;
        Ok(Self::new(parsed, types))
    }
}

impl RowStream for CsvRowSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> CsvResult<Option<Row>> {
        match self.records.next() {
            None => Ok(None),
            Some(cells) => {
                self.line += 1;
                let row = self.schema.coerce_record(&cells, self.line)?;
                Ok(Some(row))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;

    fn all_text(_: &str) -> ValueType {
        ValueType::Text
    }

    #[test]
    fn test_simple_csv() {
        let parsed = parse_bytes_auto(b"name;age\nAlice;30\nBob;25").unwrap();
        assert_eq!(parsed.delimiter, ';');
        assert_eq!(parsed.headers, vec!["name", "age"]);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0], vec!["Alice", "30"]);
    }

    #[test]
    fn test_detect_delimiter_variants() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("a|b|c"), '|');
    }

    #[test]
    fn test_empty_lines_skipped() {
        let parsed = parse_bytes_auto(b"a,b\n1,2\n\n3,4\n").unwrap();
        assert_eq!(parsed.records.len(), 2);
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(parse_bytes_auto(b"").is_err());
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert!(decoded.contains("Soci"));
    }

    #[test]
    fn test_row_source_types_cells() {
        let parsed = parse_bytes_auto(b"id,name\n7,Alice\n8,Bob").unwrap();
        let mut source = CsvRowSource::new(parsed, &|name| {
            if name == "id" {
                ValueType::Integer
            } else {
                ValueType::Text
            }
        });

        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row[0], Value::Integer(7));
        assert_eq!(row[1], Value::Text("Alice".into()));

        source.next_row().unwrap().unwrap();
        assert!(source.next_row().unwrap().is_none());
    }

    #[test]
    fn test_bad_cell_carries_line_number() {
        let parsed = parse_bytes_auto(b"id\nok-not-a-number").unwrap();
        let mut source = CsvRowSource::new(parsed, &|_| ValueType::Integer);
        let err = source.next_row().unwrap_err();
        assert!(err.to_string().contains("Line 2"));
    }
}
