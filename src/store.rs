//! Durable record of blocked endpoints.
//!
//! The store is a single JSON array of address strings:
//! ```text
//! ["10.0.0.5", "192.168.1.200", "2001:db8::7"]
//! ```

use crate::error::{NetblockError, Result};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Operator intent: the endpoints that should be blocked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    entries: BTreeSet<IpAddr>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `ip` was already present.
    pub fn insert(&mut self, ip: IpAddr) -> bool {
        self.entries.insert(ip)
    }

    /// Returns `false` if `ip` was not present.
    pub fn remove(&mut self, ip: &IpAddr) -> bool {
        self.entries.remove(ip)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.entries.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.entries.iter()
    }
}

impl FromIterator<IpAddr> for BlockSet {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub struct BlockStore {
    path: PathBuf,
}

impl BlockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted set. A missing or unreadable file yields an
    /// empty set.
    pub fn load(&self) -> BlockSet {
        if !self.path.exists() {
            info!("No existing blocked IPs file found at {}", self.path.display());
            return BlockSet::new();
        }

        match self.read() {
            Ok(set) => {
                info!("Loaded {} blocked IPs from persistent storage", set.len());
                set
            }
            Err(e) => {
                error!("Error loading blocked IPs from {}: {}", self.path.display(), e);
                BlockSet::new()
            }
        }
    }

    fn read(&self) -> Result<BlockSet> {
        let content = std::fs::read_to_string(&self.path)?;
        let raw: Vec<String> = serde_json::from_str(&content)
            .map_err(|e| NetblockError::Persistence(format!("malformed store: {}", e)))?;

        Ok(raw
            .iter()
            .filter_map(|entry| match entry.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Dropping invalid stored address {:?}", entry);
                    None
                }
            })
            .collect())
    }

    /// Overwrites the backing file with `set`. The data is written to a
    /// sibling temp file first and renamed into place.
    pub fn save(&self, set: &BlockSet) -> Result<()> {
        let persistence = |e: std::io::Error| {
            NetblockError::Persistence(format!("{}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(persistence)?;
        }

        let entries: Vec<String> = set.iter().map(IpAddr::to_string).collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| NetblockError::Persistence(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json).map_err(persistence)?;
        std::fs::rename(&temp_path, &self.path).map_err(persistence)?;

        info!("Saved {} blocked IPs to persistent storage", set.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn ips(values: &[&str]) -> BlockSet {
        values.iter().map(|v| v.parse::<IpAddr>().unwrap()).collect()
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = BlockStore::new(dir.path().join("blocked_ips.json"));
        let set = ips(&["192.168.1.200", "10.0.0.5", "2001:db8::7"]);

        store.save(&set).unwrap();

        assert_eq!(store.load(), set);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = BlockStore::new(dir.path().join("absent.json"));

        assert!(store.load().is_empty());
    }

    #[traced_test]
    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocked_ips.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = BlockStore::new(&path);
        assert!(store.load().is_empty());
        // The unreadable file is left for the operator to inspect.
        assert!(path.exists());
        assert!(logs_contain("Error loading blocked IPs"));
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocked_ips.json");
        std::fs::write(&path, r#"["10.0.0.5", "not-an-ip", " 10.0.0.6 "]"#).unwrap();

        let loaded = BlockStore::new(&path).load();
        assert_eq!(loaded, ips(&["10.0.0.5", "10.0.0.6"]));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var").join("lib").join("blocked_ips.json");
        let store = BlockStore::new(&path);

        store.save(&ips(&["10.0.0.5"])).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, ["10.0.0.5"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn save_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, "").unwrap();
        let store = BlockStore::new(blocker.join("blocked_ips.json"));

        let result = store.save(&ips(&["10.0.0.5"]));
        assert!(matches!(result, Err(NetblockError::Persistence(_))));
    }

    #[test]
    fn set_deduplicates_equivalent_spellings() {
        let mut set = BlockSet::new();
        assert!(set.insert("::1".parse().unwrap()));
        assert!(!set.insert("0:0::1".parse().unwrap()));
        assert_eq!(set.len(), 1);
    }
}
