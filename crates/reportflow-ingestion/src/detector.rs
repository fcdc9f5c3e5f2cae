//! Attachment format detection.
//!
//! Detection is a pure function of the file name's extension. Vendors are
//! not reliable about extensions, so [`detect_with_content`] additionally
//! consults `mime_guess` and a few magic-byte signatures before settling on
//! [`FileFormat::Unknown`].

use reportflow_core::FileFormat;
use std::path::Path;

/// Classify a file by its extension, case-insensitively. Missing or
/// unrecognized extensions yield [`FileFormat::Unknown`]. No I/O, no
/// failure mode.
pub fn detect(file_name: &str) -> FileFormat {
    let ext = match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return FileFormat::Unknown,
    };

    match ext.as_str() {
        "csv" | "tsv" => FileFormat::Delimited,
        "xls" => FileFormat::SpreadsheetLegacy,
        "xlsx" | "xlsm" => FileFormat::SpreadsheetModern,
        "pdf" => FileFormat::DocumentPortable,
        "json" | "jsonl" | "ndjson" => FileFormat::StructuredText,
        _ => FileFormat::Unknown,
    }
}

/// Like [`detect`], falling back to MIME guessing and content sniffing for
/// files whose extension tells us nothing.
pub fn detect_with_content(file_name: &str, head: &[u8]) -> FileFormat {
    let by_extension = detect(file_name);
    if by_extension != FileFormat::Unknown {
        return by_extension;
    }

    if let Some(mime) = mime_guess::from_path(file_name).first() {
        match mime.essence_str() {
            "text/csv" | "text/tab-separated-values" => return FileFormat::Delimited,
            "application/vnd.ms-excel" => return FileFormat::SpreadsheetLegacy,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                return FileFormat::SpreadsheetModern
            }
            "application/pdf" => return FileFormat::DocumentPortable,
            "application/json" => return FileFormat::StructuredText,
            _ => {}
        }
    }

    sniff(head)
}

/// Magic-byte classification of the first bytes of the content.
fn sniff(head: &[u8]) -> FileFormat {
    if head.starts_with(b"%PDF-") {
        return FileFormat::DocumentPortable;
    }
    // OOXML spreadsheets are zip containers.
    if head.starts_with(b"PK\x03\x04") {
        return FileFormat::SpreadsheetModern;
    }
    // Legacy OLE2 compound files (real BIFF .xls).
    if head.starts_with(&[0xd0, 0xcf, 0x11, 0xe0]) {
        return FileFormat::SpreadsheetLegacy;
    }
    match head.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => FileFormat::StructuredText,
        _ => FileFormat::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(detect("sales.csv"), FileFormat::Delimited);
        assert_eq!(detect("sales.tsv"), FileFormat::Delimited);
        assert_eq!(detect("q3.xls"), FileFormat::SpreadsheetLegacy);
        assert_eq!(detect("q3.xlsx"), FileFormat::SpreadsheetModern);
        assert_eq!(detect("macro.xlsm"), FileFormat::SpreadsheetModern);
        assert_eq!(detect("summary.pdf"), FileFormat::DocumentPortable);
        assert_eq!(detect("feed.json"), FileFormat::StructuredText);
        assert_eq!(detect("feed.ndjson"), FileFormat::StructuredText);
    }

    #[test]
    fn test_detect_is_case_insensitive() {
        assert_eq!(detect("REPORT.CSV"), FileFormat::Delimited);
        assert_eq!(detect("Report.XlSx"), FileFormat::SpreadsheetModern);
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect("report.xyz"), FileFormat::Unknown);
        assert_eq!(detect("no_extension"), FileFormat::Unknown);
        assert_eq!(detect(""), FileFormat::Unknown);
    }

    #[test]
    fn test_detect_is_pure() {
        for _ in 0..3 {
            assert_eq!(detect("sales.csv"), FileFormat::Delimited);
            assert_eq!(detect("report.xyz"), FileFormat::Unknown);
        }
    }

    #[test]
    fn test_sniff_magic_bytes() {
        assert_eq!(
            detect_with_content("attachment.bin", b"%PDF-1.7 blah"),
            FileFormat::DocumentPortable
        );
        assert_eq!(
            detect_with_content("attachment.bin", b"PK\x03\x04rest"),
            FileFormat::SpreadsheetModern
        );
        assert_eq!(
            detect_with_content("attachment.bin", b"  {\"a\": 1}"),
            FileFormat::StructuredText
        );
        assert_eq!(
            detect_with_content("attachment.bin", b"plain text"),
            FileFormat::Unknown
        );
    }

    #[test]
    fn test_extension_wins_over_content() {
        // A named .csv stays delimited even if the head looks like JSON.
        assert_eq!(
            detect_with_content("rows.csv", b"[{\"a\": 1}]"),
            FileFormat::Delimited
        );
    }
}
