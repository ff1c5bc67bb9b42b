use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::Context;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error, info};

/// JSON file backing one store. Saves go through a sibling temp file and a
/// rename so a crash mid-write never leaves a truncated file behind.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when the file does not exist yet.
    pub async fn load<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "store file does not exist yet; starting empty");
                return Ok(None);
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        debug!(path = %self.path.display(), size = bytes.len(), "read store file");
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(value))
    }

    pub async fn save<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(value).context("failed to serialize store")?;

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), size = bytes.len(), "store file saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.path.file_name().unwrap_or_default());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Where the stores report persistence failures. Callers of the stores never
/// see these errors; the in-memory state stays as mutated.
pub trait PersistFailureHandler: Send + Sync {
    fn load_failed(&self, path: &Path, error: &anyhow::Error);

    fn save_failed(&self, path: &Path, error: &anyhow::Error);
}

#[derive(Debug, Default)]
pub struct LogPersistFailures;

impl PersistFailureHandler for LogPersistFailures {
    fn load_failed(&self, path: &Path, error: &anyhow::Error) {
        error!(path = %path.display(), ?error, "failed to load store; starting empty");
    }

    fn save_failed(&self, path: &Path, error: &anyhow::Error) {
        error!(path = %path.display(), ?error, "failed to persist store");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistFailure {
    Load { path: PathBuf, message: String },
    Save { path: PathBuf, message: String },
}

/// Keeps every reported failure; lets tests assert on them.
#[derive(Debug, Default)]
pub struct CollectPersistFailures {
    failures: Mutex<Vec<PersistFailure>>,
}

impl CollectPersistFailures {
    pub fn failures(&self) -> Vec<PersistFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, failure: PersistFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }
}

impl PersistFailureHandler for CollectPersistFailures {
    fn load_failed(&self, path: &Path, error: &anyhow::Error) {
        self.push(PersistFailure::Load {
            path: path.to_path_buf(),
            message: format!("{error:#}"),
        });
    }

    fn save_failed(&self, path: &Path, error: &anyhow::Error) {
        self.push(PersistFailure::Save {
            path: path.to_path_buf(),
            message: format!("{error:#}"),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::JsonFile;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = JsonFile::new(dir.path().join("absent.json"));

        let loaded = file
            .load::<BTreeMap<u64, u32>>()
            .await
            .expect("missing file is not an error");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_creates_parent_dir_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let file = JsonFile::new(&path);

        let mut state = BTreeMap::new();
        state.insert(7_u64, 3_u32);
        file.save(&state).await.expect("save should succeed");

        let loaded = file
            .load::<BTreeMap<u64, u32>>()
            .await
            .expect("load should succeed")
            .expect("file should exist");
        assert_eq!(loaded, state);

        let names = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["state.json".to_owned()]);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("write");

        let result = JsonFile::new(&path).load::<BTreeMap<u64, u32>>().await;
        let message = result.err().map(|e| format!("{e:#}")).unwrap_or_default();
        assert!(message.contains("failed to parse"));
    }
}
