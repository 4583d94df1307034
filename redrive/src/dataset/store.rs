//! Launch-pinned dataset reads.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{Dataset, DatasetFile};
use crate::errors::Result;

/// Reads dataset files from the directory the workflow launched with.
///
/// Each file is parsed at most once per store, so every module resolved
/// during a run sees the same version of a shared file.
#[derive(Debug)]
pub struct DatasetStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Dataset>>>,
}

impl DatasetStore {
    /// Creates a store over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The directory datasets are read from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pins an already parsed dataset under `name`; later loads return it.
    pub fn pin(&self, name: impl Into<String>, dataset: Dataset) {
        self.cache.lock().insert(name.into(), Arc::new(dataset));
    }

    /// Loads and parses a dataset file.
    pub async fn load(&self, file: &DatasetFile) -> Result<Arc<Dataset>> {
        let cached = self.cache.lock().get(&file.name).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let path = self.dir.join(&file.name);
        let bytes = tokio::fs::read(&path).await?;
        let dataset = Arc::new(Dataset::parse(file.shape, &bytes, &file.name)?);
        debug!(
            file = %file.name,
            shape = %file.shape,
            elements = dataset.len(),
            "Loaded dataset"
        );

        let mut cache = self.cache.lock();
        let entry = cache
            .entry(file.name.clone())
            .or_insert_with(|| Arc::clone(&dataset));
        Ok(Arc::clone(entry))
    }

    /// Reads a file verbatim, returning `None` when it does not exist.
    pub async fn read_raw(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
