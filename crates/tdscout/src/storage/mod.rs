//! On-disk document storage.
//!
//! Downloaded files live under `{root}/prospects/{id}/tdm/`. Stored paths
//! are kept relative to the root so the archive survives relocation.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Strips characters that are hostile to filesystems from a filename.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct DocumentStorage {
    root: PathBuf,
}

impl DocumentStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The per-prospect document directory, created on demand.
    pub fn document_dir(&self, prospect_id: i64) -> Result<PathBuf, StorageError> {
        let dir = self
            .root
            .join("prospects")
            .join(prospect_id.to_string())
            .join("tdm");
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Destination path for a document, preferring the portal filename and
    /// falling back to the title. A `.pdf` suffix is enforced.
    pub fn dest_path(
        &self,
        prospect_id: i64,
        filename: &str,
        title: &str,
    ) -> Result<PathBuf, StorageError> {
        let base = if filename.trim().is_empty() {
            title
        } else {
            filename
        };
        let mut name = safe_filename(base);
        if name.is_empty() {
            name = "document".to_string();
        }
        if !name.to_lowercase().ends_with(".pdf") {
            name.push_str(".pdf");
        }
        Ok(self.document_dir(prospect_id)?.join(name))
    }

    /// A stored path relative to the root; falls back to the absolute path
    /// when the file lives elsewhere.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    /// Resolves a stored relative path back to an absolute one.
    pub fn absolute_path(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Writes document bytes to the destination.
    pub fn write_document(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        std::fs::write(path, bytes).map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("Surplus Claim/Affidavit"), "Surplus Claim_Affidavit");
        assert_eq!(safe_filename("a:b*c?d"), "a_b_c_d");
        assert_eq!(safe_filename("  plain.pdf "), "plain.pdf");
    }

    #[test]
    fn test_dest_path_enforces_pdf_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DocumentStorage::new(dir.path());

        let path = storage.dest_path(7, "affidavit.pdf", "").unwrap();
        assert!(path.ends_with("prospects/7/tdm/affidavit.pdf"));

        let path = storage.dest_path(7, "", "Surplus Claim/Affidavit").unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("Surplus Claim_Affidavit.pdf"));
    }

    #[test]
    fn test_relative_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DocumentStorage::new(dir.path());
        let path = storage.dest_path(3, "doc.pdf", "").unwrap();

        let relative = storage.relative_path(&path);
        assert!(!Path::new(&relative).is_absolute());
        assert_eq!(storage.absolute_path(&relative), path);
    }

    #[test]
    fn test_write_document() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DocumentStorage::new(dir.path());
        let path = storage.dest_path(1, "doc.pdf", "").unwrap();

        storage.write_document(&path, b"%PDF-1.4 test").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 test");
    }
}
