//! Spreadsheet extraction.
//!
//! Modern OOXML workbooks (.xlsx/.xlsm) are zip containers of XML parts:
//! we walk the shared-string table and every worksheet's cell grid, taking
//! the first row of each sheet as the header row. Files arriving with a
//! legacy `.xls` name are sniffed: vendors overwhelmingly ship mislabeled
//! XLSX or CSV under that extension, and both parse here; genuine BIFF
//! binaries are rejected with a parse error naming the limitation.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reportflow_core::{FileFormat, IngestError, Record, Result};
use std::io::Read;
use tracing::debug;
use zip::ZipArchive;

use super::{DelimitedExtractor, ExtractOptions, Extractor};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = &[0xd0, 0xcf, 0x11, 0xe0];

pub struct SpreadsheetExtractor;

impl SpreadsheetExtractor {
    pub fn new() -> Self {
        Self
    }

    fn parse_workbook(content: &[u8]) -> Result<Vec<Record>> {
        let cursor = std::io::Cursor::new(content);
        let mut archive = ZipArchive::new(cursor)
            .map_err(|e| IngestError::parse(format!("unreadable workbook container: {e}")))?;

        let shared = match read_zip_entry(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };

        let mut sheet_names: Vec<String> = archive
            .file_names()
            .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
            .map(|name| name.to_string())
            .collect();
        sheet_names.sort();
        if sheet_names.is_empty() {
            return Err(IngestError::parse("workbook contains no worksheets"));
        }

        let mut records = Vec::new();
        for name in &sheet_names {
            let xml = read_zip_entry(&mut archive, name)?
                .ok_or_else(|| IngestError::parse(format!("worksheet {name} vanished from archive")))?;
            let rows = parse_sheet(&xml, &shared)?;
            records.extend(rows_to_records(rows));
        }

        debug!(
            sheet_count = sheet_names.len(),
            record_count = records.len(),
            "workbook extracted"
        );
        Ok(records)
    }

    /// Whether bytes presented as a legacy spreadsheet are actually
    /// delimited text in disguise.
    fn looks_like_delimited(content: &[u8]) -> bool {
        let head = &content[..content.len().min(1024)];
        if head.contains(&0) {
            return false;
        }
        let text = String::from_utf8_lossy(head);
        text.lines()
            .next()
            .map(|line| [',', '\t', ';'].iter().any(|d| line.contains(*d)))
            .unwrap_or(false)
    }
}

impl Default for SpreadsheetExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for SpreadsheetExtractor {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    fn supported_formats(&self) -> Vec<FileFormat> {
        vec![FileFormat::SpreadsheetModern, FileFormat::SpreadsheetLegacy]
    }

    async fn extract_bytes(&self, content: &[u8], opts: &ExtractOptions) -> Result<Vec<Record>> {
        if content.starts_with(ZIP_MAGIC) {
            return Self::parse_workbook(content);
        }
        if content.starts_with(OLE2_MAGIC) {
            return Err(IngestError::parse(
                "legacy BIFF spreadsheets are not supported; re-export as .xlsx or .csv",
            ));
        }
        if Self::looks_like_delimited(content) {
            debug!("spreadsheet-named attachment is delimited text, delegating");
            return DelimitedExtractor::new().extract_bytes(content, opts).await;
        }
        Err(IngestError::parse("unrecognized spreadsheet container"))
    }
}

fn read_zip_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| IngestError::parse_with_source("workbook entry read failed", e))?;
            Ok(Some(buf))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(IngestError::parse(format!("workbook entry {name}: {e}"))),
    }
}

/// Parse `xl/sharedStrings.xml`: one entry per `<si>`, rich-text runs
/// concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                current.push_str(
                    &t.unescape()
                        .map_err(|e| IngestError::parse(format!("shared strings: {e}")))?,
                );
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::parse(format!("shared strings: {e}"))),
        }
        buf.clear();
    }

    Ok(strings)
}

/// Parse one worksheet's cell grid into dense rows.
fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<serde_json::Value>>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut current_row: Vec<serde_json::Value> = Vec::new();
    let mut cell_type = String::new();
    let mut cell_col: usize = 0;
    let mut next_col: usize = 0;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                cell_type = "n".to_string();
                cell_col = next_col;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"r" => {
                            if let Some(col) = column_index(&String::from_utf8_lossy(&attr.value))
                            {
                                cell_col = col;
                            }
                        }
                        b"t" => {
                            cell_type = String::from_utf8_lossy(&attr.value).into_owned();
                        }
                        _ => {}
                    }
                }
                next_col = cell_col + 1;
            }
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = Vec::new();
                    next_col = 0;
                }
                // Both <v> and inline-string <t> carry the cell payload.
                // Self-closing variants have no payload and no End event.
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t
                    .unescape()
                    .map_err(|e| IngestError::parse(format!("worksheet: {e}")))?;
                let value = cell_value(&cell_type, &raw, shared);
                if current_row.len() <= cell_col {
                    current_row.resize(cell_col + 1, serde_json::Value::Null);
                }
                current_row[cell_col] = value;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => rows.push(std::mem::take(&mut current_row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::parse(format!("worksheet: {e}"))),
        }
        buf.clear();
    }

    Ok(rows)
}

/// Zero-based column index from an A1-style cell reference.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

fn cell_value(cell_type: &str, raw: &str, shared: &[String]) -> serde_json::Value {
    match cell_type {
        "s" => raw
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| serde_json::Value::String(s.clone()))
            .unwrap_or(serde_json::Value::Null),
        "b" => serde_json::Value::Bool(raw == "1"),
        "str" | "inlineStr" => serde_json::Value::String(raw.to_string()),
        _ => {
            if let Ok(int) = raw.parse::<i64>() {
                serde_json::json!(int)
            } else if let Ok(float) = raw.parse::<f64>() {
                serde_json::json!(float)
            } else {
                serde_json::Value::String(raw.to_string())
            }
        }
    }
}

/// First row is the header; later rows become records keyed by it.
fn rows_to_records(rows: Vec<Vec<serde_json::Value>>) -> Vec<Record> {
    let mut iter = rows.into_iter();
    let headers: Vec<String> = match iter.next() {
        Some(header_row) => header_row
            .iter()
            .enumerate()
            .map(|(i, v)| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                serde_json::Value::Null => format!("column_{}", i + 1),
                other => other.to_string(),
            })
            .collect(),
        None => return Vec::new(),
    };

    iter.filter(|row| row.iter().any(|v| !v.is_null()))
        .map(|row| {
            let mut record = Record::new();
            for (i, header) in headers.iter().enumerate() {
                let value = row.get(i).cloned().unwrap_or(serde_json::Value::Null);
                record.insert(header.clone(), value);
            }
            record
        })
        .collect()
}
