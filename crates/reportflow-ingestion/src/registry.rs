//! Format-keyed extractor registry.
//!
//! Maps every [`FileFormat`] an extractor claims to a shared instance of
//! it; lookups for unregistered formats fail with the registered set in
//! the error so callers can report what the deployment actually handles.
//! An optional [`DuplicateRegistry`] lets path-based callers run the
//! dedup gate before an extractor is handed out.

use reportflow_core::{FileFormat, IngestError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::dedup::DuplicateRegistry;
use crate::detector;
use crate::extractors::{
    DelimitedExtractor, DocumentExtractor, Extractor, SpreadsheetExtractor,
    StructuredTextExtractor,
};
use crate::hashing;

#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<FileFormat, Arc<dyn Extractor>>,
    duplicates: Option<Arc<DuplicateRegistry>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering every built-in format. The spreadsheet extractor
    /// claims both the modern and the legacy format.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DelimitedExtractor::new()));
        registry.register(Arc::new(SpreadsheetExtractor::new()));
        registry.register(Arc::new(DocumentExtractor::new()));
        registry.register(Arc::new(StructuredTextExtractor::new()));
        registry
    }

    pub fn with_duplicates(mut self, duplicates: Arc<DuplicateRegistry>) -> Self {
        self.duplicates = Some(duplicates);
        self
    }

    /// Register under every format the extractor claims; later
    /// registrations for a format replace earlier ones.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for format in extractor.supported_formats() {
            debug!(format = %format, extractor = extractor.name(), "extractor registered");
            self.extractors.insert(format, extractor.clone());
        }
    }

    /// Formats this registry can currently handle, in declaration order.
    pub fn registered_formats(&self) -> Vec<FileFormat> {
        FileFormat::all()
            .iter()
            .copied()
            .filter(|f| self.extractors.contains_key(f))
            .collect()
    }

    pub fn get(&self, format: FileFormat) -> Result<Arc<dyn Extractor>> {
        self.extractors.get(&format).cloned().ok_or_else(|| {
            IngestError::unsupported_format(format, self.registered_formats())
        })
    }

    /// Resolve an extractor from a file name alone.
    pub fn create_for(&self, file_name: &str) -> Result<Arc<dyn Extractor>> {
        self.get(detector::detect(file_name))
    }

    /// Resolve an extractor for a file on disk, running the duplicate gate
    /// first when one is configured. Duplicate content is rejected before
    /// any extractor is handed out.
    pub async fn create_for_with_dedup(
        &self,
        path: &Path,
        metadata: serde_json::Value,
    ) -> Result<Arc<dyn Extractor>> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let format = detector::detect(&file_name);

        if let Some(duplicates) = &self.duplicates {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|_| IngestError::file_not_found(path.to_string_lossy()))?;
            let digest = hashing::hash_file(path).await?;
            duplicates
                .check_and_record(&digest, format, &file_name, meta.len(), metadata)
                .await?;
        }

        self.get(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryDuplicateStore;

    #[test]
    fn test_defaults_cover_every_format() {
        let registry = ExtractorRegistry::with_defaults();
        for format in FileFormat::all() {
            assert!(registry.get(format).is_ok(), "no extractor for {format}");
        }
        assert!(registry.get(FileFormat::Unknown).is_err());
    }

    #[test]
    fn test_spreadsheet_formats_share_one_extractor() {
        let registry = ExtractorRegistry::with_defaults();
        let legacy = registry.get(FileFormat::SpreadsheetLegacy).unwrap();
        let modern = registry.get(FileFormat::SpreadsheetModern).unwrap();
        assert_eq!(legacy.name(), modern.name());
    }

    #[test]
    fn test_unregistered_format_names_the_registered_set() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(DelimitedExtractor::new()));

        let err = registry.get(FileFormat::DocumentPortable).err().unwrap();
        match err {
            IngestError::UnsupportedFormat { format, registered, .. } => {
                assert_eq!(format, FileFormat::DocumentPortable);
                assert_eq!(registered, vec![FileFormat::Delimited]);
            }
            other => panic!("expected unsupported format, got {other:?}"),
        }
    }

    #[test]
    fn test_create_for_uses_file_name_detection() {
        let registry = ExtractorRegistry::with_defaults();
        assert_eq!(registry.create_for("sales.csv").unwrap().name(), "delimited");
        assert_eq!(registry.create_for("report.pdf").unwrap().name(), "document");
        assert!(registry.create_for("blob.xyz").is_err());
    }

    #[tokio::test]
    async fn test_create_with_dedup_rejects_second_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        let duplicates = Arc::new(DuplicateRegistry::new(Arc::new(MemoryDuplicateStore::new())));
        let registry = ExtractorRegistry::with_defaults().with_duplicates(duplicates);

        let first = registry
            .create_for_with_dedup(&path, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(first.name(), "delimited");

        let err = registry
            .create_for_with_dedup(&path, serde_json::json!({}))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "DUPLICATE_FILE");
    }

    #[tokio::test]
    async fn test_create_with_dedup_missing_file() {
        let duplicates = Arc::new(DuplicateRegistry::new(Arc::new(MemoryDuplicateStore::new())));
        let registry = ExtractorRegistry::with_defaults().with_duplicates(duplicates);
        let err = registry
            .create_for_with_dedup(Path::new("/nope/sales.csv"), serde_json::json!({}))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_no_dedup_configured_skips_the_gate() {
        let registry = ExtractorRegistry::with_defaults();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        for _ in 0..2 {
            registry
                .create_for_with_dedup(&path, serde_json::json!({}))
                .await
                .unwrap();
        }
    }
}
