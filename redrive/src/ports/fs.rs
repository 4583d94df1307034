//! Filesystem-backed object store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use super::ObjectStore;
use crate::errors::{RedriveError, Result};

/// Object store laid out as `<root>/<bucket>/<key>`.
///
/// Used when the buckets are mounted locally. The filesystem has no
/// server-side encryption, so the `encrypted` flag is only logged.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes || bucket.is_empty() || bucket.contains('/') {
            return Err(RedriveError::Config(format!(
                "invalid object location {bucket}/{key}"
            )));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn map_io(bucket: &str, key: &str, err: &std::io::Error) -> RedriveError {
        match err.kind() {
            ErrorKind::NotFound => RedriveError::not_found(bucket, key),
            ErrorKind::AlreadyExists => RedriveError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => RedriveError::store(bucket, key, err.to_string()),
        }
    }

    async fn write(&self, bucket: &str, key: &str, body: &[u8], create_new: bool) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(bucket, key, &e))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| Self::map_io(bucket, key, &e))?;
        file.write_all(body)
            .await
            .map_err(|e| Self::map_io(bucket, key, &e))?;
        file.flush()
            .await
            .map_err(|e| Self::map_io(bucket, key, &e))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let bucket_dir = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // An absent bucket directory is an empty bucket.
                Err(e) if e.kind() == ErrorKind::NotFound && dir == bucket_dir => break,
                Err(e) => return Err(Self::map_io(bucket, "", &e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::map_io(bucket, "", &e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Self::map_io(bucket, "", &e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&bucket_dir) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    if prefix.map_or(true, |p| key.starts_with(p)) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        trace!(bucket, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Self::map_io(bucket, key, &e))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, encrypted: bool) -> Result<()> {
        self.write(bucket, key, &body, false).await?;
        debug!(bucket, key, bytes = body.len(), encrypted, "Wrote object");
        Ok(())
    }

    async fn put_new(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        encrypted: bool,
    ) -> Result<()> {
        self.write(bucket, key, &body, true).await?;
        debug!(bucket, key, bytes = body.len(), encrypted, "Created object");
        Ok(())
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.object_path(bucket, key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Self::map_io(bucket, key, &e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_put_list_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("map", "moi/run-1/FAILED_0.json", b"[]".to_vec(), false).await.unwrap();
        store.put("map", "moi/run-1/manifest.json", b"{}".to_vec(), false).await.unwrap();
        store.put("map", "sad/run-2/SUCCEEDED_0.json", b"[]".to_vec(), false).await.unwrap();

        let keys = store.list("map", None).await.unwrap();
        assert_eq!(
            keys,
            vec![
                "moi/run-1/FAILED_0.json".to_string(),
                "moi/run-1/manifest.json".to_string(),
                "sad/run-2/SUCCEEDED_0.json".to_string(),
            ]
        );

        let moi_only = store.list("map", Some("moi/")).await.unwrap();
        assert_eq!(moi_only.len(), 2);
        assert_eq!(store.get("map", "moi/run-1/FAILED_0.json").await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_missing_bucket_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list("absent", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_new_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put_new("json", "subset.json", b"[1]".to_vec(), true).await.unwrap();
        let err = store
            .put_new("json", "subset.json", b"[2]".to_vec(), true)
            .await
            .unwrap_err();

        assert!(matches!(err, RedriveError::AlreadyExists { .. }));
        assert_eq!(store.get("json", "subset.json").await.unwrap(), b"[1]");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get("json", "nope.json").await.unwrap_err();
        assert!(matches!(err, RedriveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.get("json", "../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_many_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("map", "a/manifest.json", b"{}".to_vec(), false).await.unwrap();

        store
            .delete_many("map", &["a/manifest.json".to_string(), "a/gone.json".to_string()])
            .await
            .unwrap();
        assert!(store.list("map", None).await.unwrap().is_empty());
    }
}
