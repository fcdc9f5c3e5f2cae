//! Portable-document text extraction.
//!
//! Tabular report PDFs from the vendors we ingest are simple enough to
//! read without a full PDF object model: every `stream ... endstream`
//! span whose dictionary names `/FlateDecode` is inflated, and the text
//! operators inside `BT`/`ET` blocks (`Tj`, `TJ`, `'`) are collected.
//! Each content stream yields one record with the page ordinal and its
//! concatenated text. Encrypted documents and exotic filters are out of
//! reach and surface as parse errors.

use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use reportflow_core::{FileFormat, IngestError, Record, Result};
use std::io::Read;
use tracing::debug;

use super::{ExtractOptions, Extractor};

const PDF_MAGIC: &[u8] = b"%PDF-";

pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Locate every stream body, paired with whether its dictionary
    /// declares flate compression.
    fn find_streams(content: &[u8]) -> Vec<(Vec<u8>, bool)> {
        let mut streams = Vec::new();
        let mut cursor = 0;

        while let Some(start) = find(content, b"stream", cursor) {
            let dict_start = rfind(content, b"<<", start).unwrap_or(0);
            let dict = &content[dict_start..start];
            let flate = contains(dict, b"/FlateDecode");

            // Body starts past "stream" and its EOL.
            let mut body_start = start + b"stream".len();
            if content.get(body_start) == Some(&b'\r') {
                body_start += 1;
            }
            if content.get(body_start) == Some(&b'\n') {
                body_start += 1;
            }

            let Some(end) = find(content, b"endstream", body_start) else {
                break;
            };
            let mut body_end = end;
            while body_end > body_start
                && matches!(content[body_end - 1], b'\r' | b'\n')
            {
                body_end -= 1;
            }

            streams.push((content[body_start..body_end].to_vec(), flate));
            cursor = end + b"endstream".len();
        }

        streams
    }

    fn inflate(data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| IngestError::parse_with_source("document stream inflate failed", e))?;
        Ok(out)
    }

    /// Collect the text shown by `Tj`, `TJ` and `'` operators inside
    /// `BT`/`ET` blocks. Operand strings are parenthesized literals
    /// (with escape handling) or hex strings.
    fn extract_text(stream: &[u8]) -> String {
        let mut text = String::new();
        let mut in_text_block = false;
        let mut pending: Vec<String> = Vec::new();
        let mut i = 0;

        while i < stream.len() {
            match stream[i] {
                b'(' if in_text_block => {
                    let (literal, next) = parse_literal_string(stream, i);
                    pending.push(literal);
                    i = next;
                }
                b'<' if in_text_block && stream.get(i + 1) != Some(&b'<') => {
                    let (literal, next) = parse_hex_string(stream, i);
                    pending.push(literal);
                    i = next;
                }
                b'B' if stream[i..].starts_with(b"BT") => {
                    in_text_block = true;
                    i += 2;
                }
                b'E' if stream[i..].starts_with(b"ET") => {
                    in_text_block = false;
                    pending.clear();
                    i += 2;
                }
                b'T' if in_text_block && stream[i..].starts_with(b"Tj") => {
                    for s in pending.drain(..) {
                        text.push_str(&s);
                    }
                    i += 2;
                }
                b'T' if in_text_block && stream[i..].starts_with(b"TJ") => {
                    for s in pending.drain(..) {
                        text.push_str(&s);
                    }
                    i += 2;
                }
                b'\'' if in_text_block => {
                    text.push('\n');
                    for s in pending.drain(..) {
                        text.push_str(&s);
                    }
                    i += 1;
                }
                b'T' if in_text_block && stream[i..].starts_with(b"Td") => {
                    // New line position; keep rows apart.
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    pending.clear();
                    i += 2;
                }
                _ => i += 1,
            }
        }

        text.trim().to_string()
    }
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for DocumentExtractor {
    fn name(&self) -> &'static str {
        "document"
    }

    fn supported_formats(&self) -> Vec<FileFormat> {
        vec![FileFormat::DocumentPortable]
    }

    async fn extract_bytes(&self, content: &[u8], _opts: &ExtractOptions) -> Result<Vec<Record>> {
        if !content.starts_with(PDF_MAGIC) {
            return Err(IngestError::parse("missing %PDF- header"));
        }
        if contains(content, b"/Encrypt") {
            return Err(IngestError::parse("encrypted documents are not supported"));
        }

        let mut records = Vec::new();
        let mut page = 0usize;
        for (body, flate) in Self::find_streams(content) {
            let data = if flate { Self::inflate(&body)? } else { body };
            let text = Self::extract_text(&data);
            if text.is_empty() {
                continue;
            }
            page += 1;
            let mut record = Record::new();
            record.insert("page".to_string(), serde_json::json!(page));
            record.insert("text".to_string(), serde_json::Value::String(text));
            records.push(record);
        }

        if records.is_empty() {
            return Err(IngestError::parse("document contains no extractable text"));
        }

        debug!(page_count = records.len(), "document text extracted");
        Ok(records)
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn rfind(haystack: &[u8], needle: &[u8], before: usize) -> Option<usize> {
    let end = before.min(haystack.len());
    haystack[..end]
        .windows(needle.len())
        .rposition(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle, 0).is_some()
}

/// Parse a `( ... )` literal starting at `open`. Returns the decoded text
/// and the index past the closing parenthesis. Bytes map through Latin-1.
fn parse_literal_string(stream: &[u8], open: usize) -> (String, usize) {
    let mut out = String::new();
    let mut depth = 1;
    let mut i = open + 1;

    while i < stream.len() && depth > 0 {
        match stream[i] {
            b'\\' if i + 1 < stream.len() => {
                let escaped = stream[i + 1];
                i += 2;
                match escaped {
                    b'n' => out.push('\n'),
                    b'r' => out.push('\r'),
                    b't' => out.push('\t'),
                    b'(' => out.push('('),
                    b')' => out.push(')'),
                    b'\\' => out.push('\\'),
                    b'0'..=b'7' => {
                        let mut code = (escaped - b'0') as u32;
                        let mut digits = 1;
                        while digits < 3
                            && i < stream.len()
                            && stream[i].is_ascii_digit()
                            && stream[i] <= b'7'
                        {
                            code = code * 8 + (stream[i] - b'0') as u32;
                            i += 1;
                            digits += 1;
                        }
                        out.push(char::from(code as u8));
                    }
                    other => out.push(char::from(other)),
                }
            }
            b'(' => {
                depth += 1;
                out.push('(');
                i += 1;
            }
            b')' => {
                depth -= 1;
                if depth > 0 {
                    out.push(')');
                }
                i += 1;
            }
            byte => {
                out.push(char::from(byte));
                i += 1;
            }
        }
    }

    (out, i)
}

/// Parse a `< ... >` hex string starting at `open`.
fn parse_hex_string(stream: &[u8], open: usize) -> (String, usize) {
    let mut digits = Vec::new();
    let mut i = open + 1;
    while i < stream.len() && stream[i] != b'>' {
        if stream[i].is_ascii_hexdigit() {
            digits.push(stream[i]);
        }
        i += 1;
    }
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }

    let mut out = String::new();
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char).to_digit(16).unwrap_or(0);
        let lo = (pair[1] as char).to_digit(16).unwrap_or(0);
        out.push(char::from((hi * 16 + lo) as u8));
    }
    (out, i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_pdf(streams: &[(&[u8], bool)]) -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        for (body, compress) in streams {
            let data = if *compress {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).unwrap();
                let compressed = encoder.finish().unwrap();
                pdf.extend_from_slice(
                    format!("<< /Filter /FlateDecode /Length {} >>\n", compressed.len())
                        .as_bytes(),
                );
                compressed
            } else {
                pdf.extend_from_slice(format!("<< /Length {} >>\n", body.len()).as_bytes());
                body.to_vec()
            };
            pdf.extend_from_slice(b"stream\n");
            pdf.extend_from_slice(&data);
            pdf.extend_from_slice(b"\nendstream\n");
        }
        pdf.extend_from_slice(b"%%EOF\n");
        pdf
    }

    async fn extract(content: &[u8]) -> Result<Vec<Record>> {
        DocumentExtractor::new()
            .extract_bytes(content, &ExtractOptions::new())
            .await
    }

    #[tokio::test]
    async fn test_plain_stream_text() {
        let pdf = build_pdf(&[(b"BT (Monthly Sales Report) Tj ET", false)]);
        let records = extract(&pdf).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["page"], 1);
        assert_eq!(records[0]["text"], "Monthly Sales Report");
    }

    #[tokio::test]
    async fn test_flate_stream_text() {
        let pdf = build_pdf(&[(b"BT (north) Tj (: 100) Tj ET", true)]);
        let records = extract(&pdf).await.unwrap();
        assert_eq!(records[0]["text"], "north: 100");
    }

    #[tokio::test]
    async fn test_multiple_pages() {
        let pdf = build_pdf(&[
            (b"BT (page one) Tj ET", false),
            (b"BT (page two) Tj ET", true),
        ]);
        let records = extract(&pdf).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["page"], 2);
        assert_eq!(records[1]["text"], "page two");
    }

    #[tokio::test]
    async fn test_escapes_and_tj_array() {
        let pdf = build_pdf(&[(br"BT [(a\(b\)) (c\\d)] TJ ET", false)]);
        let records = extract(&pdf).await.unwrap();
        assert_eq!(records[0]["text"], r"a(b)c\d");
    }

    #[tokio::test]
    async fn test_hex_string() {
        // 48 65 78 = "Hex"
        let pdf = build_pdf(&[(b"BT <486578> Tj ET", false)]);
        let records = extract(&pdf).await.unwrap();
        assert_eq!(records[0]["text"], "Hex");
    }

    #[tokio::test]
    async fn test_missing_header_rejected() {
        let err = extract(b"not a pdf").await.unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[tokio::test]
    async fn test_encrypted_rejected() {
        let mut pdf = b"%PDF-1.4\n<< /Encrypt 5 0 R >>\n".to_vec();
        pdf.extend_from_slice(b"stream\nBT (secret) Tj ET\nendstream\n");
        let err = extract(&pdf).await.unwrap_err();
        assert!(err.to_string().contains("encrypted"));
    }

    #[tokio::test]
    async fn test_no_text_rejected() {
        let pdf = build_pdf(&[(b"q 1 0 0 1 0 0 cm Q", false)]);
        let err = extract(&pdf).await.unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_literal_string_octal_escape() {
        let (text, _) = parse_literal_string(br"(caf\351)", 0);
        assert_eq!(text, "caf\u{e9}");
    }
}
