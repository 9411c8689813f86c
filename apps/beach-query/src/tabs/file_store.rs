use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::{DirtyFlags, PersistedTabs, StoreError, TabStore};
use crate::history::QueryInHistory;

const LAYOUT_FILE: &str = "tabs.toml";
const DIRTY_FILE: &str = "dirty.toml";
const HISTORY_FILE: &str = "history.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    queries: Vec<QueryInHistory>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirtyFile {
    #[serde(default)]
    tabs: DirtyFlags,
}

/// Stores tab state as TOML files in one directory.
#[derive(Debug, Clone)]
pub struct FileTabStore {
    dir: PathBuf,
}

impl FileTabStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.beach/query`
    pub fn default_location() -> Result<Self, StoreError> {
        let base = BaseDirs::new().ok_or(StoreError::NoStateDir)?;
        Ok(Self::new(base.home_dir().join(".beach").join("query")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = toml::from_str(&raw).map_err(|err| {
            warn!(
                target: "beach_query::tabs",
                path = %path.display(),
                error = %err,
                "stored state is unreadable"
            );
            err
        })?;
        Ok(Some(value))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let encoded = toml::to_string_pretty(value)?;
        let path = self.dir.join(name);
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)?;
        debug!(target: "beach_query::tabs", path = %path.display(), "state saved");
        Ok(())
    }
}

impl TabStore for FileTabStore {
    fn load_layout(&self) -> Result<Option<PersistedTabs>, StoreError> {
        self.read(LAYOUT_FILE)
    }

    fn save_layout(&self, layout: &PersistedTabs) -> Result<(), StoreError> {
        self.write(LAYOUT_FILE, layout)
    }

    fn load_dirty(&self) -> Result<Option<DirtyFlags>, StoreError> {
        Ok(self.read::<DirtyFile>(DIRTY_FILE)?.map(|file| file.tabs))
    }

    fn save_dirty(&self, dirty: &DirtyFlags) -> Result<(), StoreError> {
        self.write(
            DIRTY_FILE,
            &DirtyFile {
                tabs: dirty.clone(),
            },
        )
    }

    fn load_history(&self) -> Result<Option<Vec<QueryInHistory>>, StoreError> {
        Ok(self.read::<HistoryFile>(HISTORY_FILE)?.map(|file| file.queries))
    }

    fn save_history(&self, entries: &[QueryInHistory]) -> Result<(), StoreError> {
        self.write(
            HISTORY_FILE,
            &HistoryFile {
                queries: entries.to_vec(),
            },
        )
    }
}
