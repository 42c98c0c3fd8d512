//! Object storage for rasters and annotation CSVs.
//!
//! The store is an explicit value created by the entry point and passed to
//! whatever needs to upload; nothing reaches for a global client.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("local file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for pipeline artifacts.
pub trait ObjectStore {
    /// Store the file at `local_path` under `key` and return a reference
    /// (URL or path) to the stored object.
    fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;
}

/// Store backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    /// Report objects as `<base>/<key>` instead of local paths, e.g. when the
    /// directory is served over HTTP.
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if !local_path.is_file() {
            return Err(StorageError::MissingFile(local_path.to_path_buf()));
        }
        let dest = self.root.join(key);
        let upload_err = |source| StorageError::Upload {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(upload_err)?;
        }
        fs::copy(local_path, &dest).map_err(upload_err)?;
        info!("stored {} as {key}", local_path.display());
        Ok(match &self.public_base {
            Some(base) => format!("{base}/{key}"),
            None => dest.display().to_string(),
        })
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// File stem of an uploaded region file, sanitized for use in object keys.
pub fn stem_of(path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    sanitize_stem(&stem)
}

pub fn raster_key(stem: &str) -> String {
    format!("satellite-images/{stem}.tif")
}

pub fn annotation_key(stem: &str) -> String {
    format!("annotations/{stem}-annotations.csv")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_stems() {
        assert_eq!(sanitize_stem("my plot (v2).final"), "my_plot__v2__final");
        assert_eq!(stem_of(Path::new("/tmp/Farm #3.kml")), "Farm__3");
        assert_eq!(raster_key("Farm__3"), "satellite-images/Farm__3.tif");
        assert_eq!(annotation_key("Farm__3"), "annotations/Farm__3-annotations.csv");
    }

    #[test]
    fn local_store_copies_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.csv");
        fs::write(&src, "x\n1\n").unwrap();

        let store = LocalStore::new(dir.path().join("bucket")).with_public_base("https://example.org/bucket/");
        let url = store.put(&src, "annotations/a-annotations.csv").unwrap();
        assert_eq!(url, "https://example.org/bucket/annotations/a-annotations.csv");
        let copied = fs::read_to_string(dir.path().join("bucket/annotations/a-annotations.csv")).unwrap();
        assert_eq!(copied, "x\n1\n");
    }

    #[test]
    fn local_store_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            store.put(&dir.path().join("missing.tif"), "satellite-images/missing.tif"),
            Err(StorageError::MissingFile(_))
        ));
        let src = dir.path().join("a.tif");
        fs::write(&src, b"II*\0").unwrap();
        assert!(matches!(store.put(&src, "../escape.tif"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.put(&src, ""), Err(StorageError::InvalidKey(_))));
    }
}
