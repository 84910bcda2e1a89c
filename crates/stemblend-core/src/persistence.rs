use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{keys::MatchDirection, model::AnalysisRecord};

/// Last match directions applied by `invert`, remembered per track pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvertMemento {
    pub bpm_match_direction: MatchDirection,
    pub key_match_direction: MatchDirection,
}

/// Unordered pair of track ids. Lookups try both orderings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    #[must_use]
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    #[must_use]
    pub fn orderings(&self) -> [(&str, &str); 2] {
        [
            (self.first.as_str(), self.second.as_str()),
            (self.second.as_str(), self.first.as_str()),
        ]
    }
}

pub trait MementoStore: Send + Sync {
    fn load(&self, pair: &PairKey) -> Result<Option<InvertMemento>>;
    fn save(&self, pair: &PairKey, memento: InvertMemento) -> Result<()>;
    fn clear(&self, pair: &PairKey) -> Result<()>;
}

/// One small JSON marker per pair inside `directory`.
#[derive(Debug, Clone)]
pub struct FileMementoStore {
    directory: PathBuf,
}

impl FileMementoStore {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn marker_path(&self, first: &str, second: &str) -> PathBuf {
        self.directory
            .join(format!("stemblend_invert_{first}_{second}.json"))
    }
}

impl MementoStore for FileMementoStore {
    #[instrument(skip(self), fields(directory = %self.directory.display()))]
    fn load(&self, pair: &PairKey) -> Result<Option<InvertMemento>> {
        for (first, second) in pair.orderings() {
            let path = self.marker_path(first, second);
            if !path.exists() {
                continue;
            }
            let content = fs::read(&path)
                .with_context(|| format!("failed to read invert marker: {}", path.display()))?;
            let memento = serde_json::from_slice(&content)
                .with_context(|| format!("invalid invert marker: {}", path.display()))?;
            debug!(path = %path.display(), "invert marker loaded");
            return Ok(Some(memento));
        }
        Ok(None)
    }

    #[instrument(skip(self), fields(directory = %self.directory.display()))]
    fn save(&self, pair: &PairKey, memento: InvertMemento) -> Result<()> {
        fs::create_dir_all(&self.directory).with_context(|| {
            format!(
                "failed to create marker directory: {}",
                self.directory.display()
            )
        })?;
        let [(first, second), _] = pair.orderings();
        let path = self.marker_path(first, second);

        let json = serde_json::to_vec_pretty(&memento).context("failed to serialize marker")?;
        let mut temp_file = tempfile::NamedTempFile::new_in(&self.directory)
            .context("failed to create temp marker file")?;
        temp_file
            .write_all(&json)
            .context("failed to write temp marker file")?;
        temp_file
            .persist(&path)
            .map_err(|error| anyhow!(error.error))
            .with_context(|| format!("failed to persist invert marker: {}", path.display()))?;

        info!(path = %path.display(), "invert marker saved");
        Ok(())
    }

    #[instrument(skip(self), fields(directory = %self.directory.display()))]
    fn clear(&self, pair: &PairKey) -> Result<()> {
        for (first, second) in pair.orderings() {
            let path = self.marker_path(first, second);
            if path.exists() {
                fs::remove_file(&path).with_context(|| {
                    format!("failed to remove invert marker: {}", path.display())
                })?;
                info!(path = %path.display(), "invert marker removed");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMementoStore {
    entries: Mutex<HashMap<(String, String), InvertMemento>>,
}

impl MemoryMementoStore {
    fn with_entries<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<(String, String), InvertMemento>) -> T,
    ) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memento store lock poisoned"))?;
        Ok(apply(&mut entries))
    }
}

impl MementoStore for MemoryMementoStore {
    fn load(&self, pair: &PairKey) -> Result<Option<InvertMemento>> {
        self.with_entries(|entries| {
            pair.orderings().into_iter().find_map(|(first, second)| {
                entries
                    .get(&(first.to_string(), second.to_string()))
                    .copied()
            })
        })
    }

    fn save(&self, pair: &PairKey, memento: InvertMemento) -> Result<()> {
        let [(first, second), _] = pair.orderings();
        self.with_entries(|entries| {
            entries.insert((first.to_string(), second.to_string()), memento);
        })
    }

    fn clear(&self, pair: &PairKey) -> Result<()> {
        self.with_entries(|entries| {
            for (first, second) in pair.orderings() {
                entries.remove(&(first.to_string(), second.to_string()));
            }
        })
    }
}

/// Path of the analysis record the BPM/key extractor writes for `id`.
#[must_use]
pub fn analysis_record_path(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join(format!("{id}.metadata.json"))
}

#[instrument(fields(path = %path.display()))]
pub fn load_analysis_record(path: &Path) -> Result<AnalysisRecord> {
    let content = fs::read(path)
        .with_context(|| format!("failed to read track metadata: {}", path.display()))?;
    let record = serde_json::from_slice(&content).context("invalid track metadata json")?;
    debug!("track metadata loaded");
    Ok(record)
}
