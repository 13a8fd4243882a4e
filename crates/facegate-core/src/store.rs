//! Directory-backed enrollment store.
//!
//! One reference image per user, named `<username>.jpg`. Inserts are
//! no-clobber: an existing username is never overwritten.

use crate::types::EnrollmentRecord;
use image::{ImageFormat, RgbImage};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Extension of stored reference images.
pub const REFERENCE_EXTENSION: &str = "jpg";

/// Extensions the matcher output parser strips from a reported name. A
/// username may not end in one, or its identity would parse as a different
/// user.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("username cannot be empty")]
    EmptyUsername,
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
    #[error("user {0} is already registered")]
    AlreadyExists(String),
    #[error("enrollment store unavailable: {}", .0.display())]
    StoreUnavailable(PathBuf),
    #[error("store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Key-value view of the enrollment store: username → reference image.
pub trait EnrollmentStore {
    fn exists(&self, username: &str) -> bool;
    fn put(&self, username: &str, image: &RgbImage) -> Result<EnrollmentRecord, StoreError>;
    fn list(&self) -> Vec<EnrollmentRecord>;
}

/// Trim a username and check it can name a file in the store.
pub fn validate_username(raw: &str) -> Result<&str, StoreError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StoreError::EmptyUsername);
    }
    let bad_char = |c: char| {
        c == '/' || c == '\\' || c == ',' || c.is_whitespace() || c.is_control()
    };
    if name.starts_with('.') || name.chars().any(bad_char) || has_image_extension(name) {
        return Err(StoreError::InvalidUsername(name.to_string()));
    }
    Ok(name)
}

/// True if the last `.`-suffix of `name` is an image extension (any case).
pub fn has_image_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Enrollment store backed by a single directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
    available: bool,
}

impl DirectoryStore {
    /// Create a handle without touching the filesystem. Call
    /// [`ensure_initialized`](Self::ensure_initialized) before use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            available: false,
        }
    }

    /// Create a handle and initialize the directory. Failure is logged and the
    /// store stays in its degraded, always-empty state.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(dir);
        if let Err(err) = store.ensure_initialized() {
            tracing::warn!(error = %err, "enrollment store degraded; enrollment disabled");
        }
        store
    }

    /// Create the backing directory if absent. Idempotent.
    pub fn ensure_initialized(&mut self) -> Result<(), StoreError> {
        match fs::create_dir_all(&self.dir) {
            Ok(()) if self.dir.is_dir() => {
                if !self.available {
                    tracing::info!(dir = %self.dir.display(), "enrollment store ready");
                }
                self.available = true;
                Ok(())
            }
            Ok(()) => {
                self.available = false;
                Err(StoreError::StoreUnavailable(self.dir.clone()))
            }
            Err(source) => {
                self.available = false;
                tracing::warn!(dir = %self.dir.display(), error = %source, "failed to create enrollment directory");
                Err(StoreError::StoreUnavailable(self.dir.clone()))
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Deterministic reference image path for a username.
    pub fn reference_path(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{username}.{REFERENCE_EXTENSION}"))
    }

    /// Number of enrolled users.
    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_reference(&self, username: &str, image: &RgbImage) -> Result<PathBuf, StoreError> {
        let path = self.reference_path(username);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        {
            let file = tmp.as_file_mut();
            let mut writer = BufWriter::new(&mut *file);
            image.write_to(&mut writer, ImageFormat::Jpeg)?;
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;

        tmp.persist_noclobber(&path).map_err(|err| {
            if err.error.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::AlreadyExists(username.to_string())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source: err.error,
                }
            }
        })?;

        Ok(path)
    }
}

impl EnrollmentStore for DirectoryStore {
    fn exists(&self, username: &str) -> bool {
        if !self.available {
            return false;
        }
        match validate_username(username) {
            Ok(name) => self.reference_path(name).is_file(),
            Err(_) => false,
        }
    }

    fn put(&self, username: &str, image: &RgbImage) -> Result<EnrollmentRecord, StoreError> {
        let name = validate_username(username)?;
        if !self.available {
            return Err(StoreError::StoreUnavailable(self.dir.clone()));
        }
        if self.exists(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }

        let image_path = self.write_reference(name, image)?;
        tracing::info!(user = name, path = %image_path.display(), "enrollment stored");

        Ok(EnrollmentRecord {
            username: name.to_string(),
            image_path,
        })
    }

    fn list(&self) -> Vec<EnrollmentRecord> {
        if !self.available {
            return Vec::new();
        }
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "failed to read enrollment directory");
                return Vec::new();
            }
        };

        let mut records: Vec<EnrollmentRecord> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(REFERENCE_EXTENSION)
            })
            .filter_map(|path| {
                let username = path.file_stem()?.to_str()?.to_string();
                validate_username(&username).ok()?;
                Some(EnrollmentRecord {
                    username,
                    image_path: path,
                })
            })
            .collect();

        records.sort_by(|a, b| a.username.cmp(&b.username));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image(seed: u8) -> RgbImage {
        RgbImage::from_fn(8, 8, |x, y| image::Rgb([seed, x as u8 * 16, y as u8 * 16]))
    }

    fn ready_store(tmp: &TempDir) -> DirectoryStore {
        let mut store = DirectoryStore::new(tmp.path().join("db"));
        store.ensure_initialized().unwrap();
        store
    }

    #[test]
    fn test_ensure_initialized_creates_dir_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut store = DirectoryStore::new(tmp.path().join("db"));
        assert!(!store.is_available());

        store.ensure_initialized().unwrap();
        store.ensure_initialized().unwrap();
        assert!(store.dir().is_dir());
        assert!(store.is_available());
    }

    #[test]
    fn test_put_then_exists() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);

        assert!(!store.exists("alice"));
        let record = store.put("alice", &image(1)).unwrap();
        assert!(store.exists("alice"));
        assert_eq!(record.username, "alice");
        assert_eq!(record.image_path, store.dir().join("alice.jpg"));
    }

    #[test]
    fn test_put_is_insert_only() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);

        store.put("alice", &image(1)).unwrap();
        let before = fs::read(store.reference_path("alice")).unwrap();

        let second = store.put("alice", &image(200));
        assert!(matches!(second, Err(StoreError::AlreadyExists(ref u)) if u == "alice"));

        let after = fs::read(store.reference_path("alice")).unwrap();
        assert_eq!(before, after);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_rejects_blank_and_invalid_names() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);

        assert!(matches!(store.put("", &image(1)), Err(StoreError::EmptyUsername)));
        assert!(matches!(store.put("   ", &image(1)), Err(StoreError::EmptyUsername)));
        assert!(matches!(
            store.put("../escape", &image(1)),
            Err(StoreError::InvalidUsername(_))
        ));
        assert!(matches!(
            store.put("two words", &image(1)),
            Err(StoreError::InvalidUsername(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_rejects_names_ending_in_image_extension() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);

        for name in ["bob.jpg", "bob.JPEG", "x.png"] {
            assert!(
                matches!(store.put(name, &image(1)), Err(StoreError::InvalidUsername(_))),
                "{name} accepted"
            );
        }
        store.put("bob.v2", &image(1)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_username_is_trimmed() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        store.put("  carol ", &image(3)).unwrap();
        assert!(store.exists("carol"));
    }

    #[test]
    fn test_unavailable_store_is_empty_and_rejects_put() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let mut store = DirectoryStore::new(blocker.join("db"));
        assert!(matches!(
            store.ensure_initialized(),
            Err(StoreError::StoreUnavailable(_))
        ));
        assert!(!store.exists("alice"));
        assert!(store.list().is_empty());
        assert!(matches!(
            store.put("alice", &image(1)),
            Err(StoreError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_list_sorted_and_ignores_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        store.put("bob", &image(2)).unwrap();
        store.put("alice", &image(1)).unwrap();
        fs::write(store.dir().join("notes.txt"), b"x").unwrap();
        fs::write(store.dir().join(".hidden.jpg"), b"x").unwrap();

        let names: Vec<String> = store.list().into_iter().map(|r| r.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_stored_image_decodes() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let record = store.put("dave", &image(9)).unwrap();
        let decoded = image::open(&record.image_path).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        store.put("erin", &image(4)).unwrap();
        let _ = store.put("erin", &image(5));
        let count = fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(count, 1);
    }
}
