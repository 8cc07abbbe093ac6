pub mod completions;
pub mod config;
pub mod history;
pub mod init;
pub mod replay;

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use viewsync_core::config::{EngineConfig, load_config};
use viewsync_core::{FileStorage, HistoryStore};

/// Where history files live for this invocation.
#[derive(Debug, Clone, Default)]
pub struct StateLocation {
    /// Explicit `--state-dir`.
    pub dir: Option<PathBuf>,
    /// `--global`: use the per-user data directory.
    pub global: bool,
}

/// Project root, effective config, and resolved state directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: EngineConfig,
    pub state_dir: PathBuf,
}

impl Workspace {
    pub fn open(root: &Path, location: &StateLocation) -> Result<Self> {
        let config = load_config(root)?;
        let state_dir = resolve_state_dir(root, location)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            state_dir,
        })
    }

    pub fn storage(&self) -> FileStorage {
        FileStorage::new(&self.state_dir)
    }

    /// History for the configured key, loaded with the session partition
    /// unless `partition` overrides it.
    pub fn history(&self, partition: Option<&str>) -> HistoryStore {
        let mut store = HistoryStore::new(
            Box::new(self.storage()),
            self.config.history.storage_key.clone(),
            self.config.history.limit,
        );
        let partition = partition.or(self.config.session.partition.as_deref());
        store.load(partition);
        store
    }
}

pub fn resolve_state_dir(root: &Path, location: &StateLocation) -> Result<PathBuf> {
    if let Some(dir) = &location.dir {
        return Ok(dir.clone());
    }
    if location.global {
        let data = dirs::data_dir()
            .ok_or_else(|| anyhow!("no per-user data directory on this platform"))
            .context("resolving --global state directory")?;
        return Ok(data.join("viewsync"));
    }
    Ok(root.join(".viewsync/state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let location = StateLocation {
            dir: Some(PathBuf::from("/tmp/elsewhere")),
            global: true,
        };
        let dir = resolve_state_dir(Path::new("/proj"), &location).expect("resolve");
        assert_eq!(dir, PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn default_dir_is_under_project() {
        let dir = resolve_state_dir(Path::new("/proj"), &StateLocation::default()).expect("resolve");
        assert_eq!(dir, PathBuf::from("/proj/.viewsync/state"));
    }
}
