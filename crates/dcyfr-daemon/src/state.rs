// crates/dcyfr-daemon/src/state.rs
// The .dcyfr/ state directory: well-known paths and JSON persistence

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the hidden state directory under the workspace root.
pub const STATE_DIR_NAME: &str = ".dcyfr";

/// Well-known file layout under `<workspace>/.dcyfr/`.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            root: workspace_root.join(STATE_DIR_NAME),
        }
    }

    /// Create the state directory if missing. This is the one startup step
    /// whose failure is fatal.
    pub fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("daemon.log")
    }

    pub fn heartbeat_path(&self) -> PathBuf {
        self.root.join("daemon-state.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.root.join("queue.json")
    }

    pub fn schedules_path(&self) -> PathBuf {
        self.root.join("schedules.json")
    }

    pub fn health_path(&self) -> PathBuf {
        self.root.join("health.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join("health-history.json")
    }
}

/// Serialize `value` to `path` via a sibling temp file and rename, so
/// concurrent readers never observe a torn write.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| format!("write {}: {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("rename to {}: {}", path.display(), e))?;
    Ok(())
}

/// Read and deserialize a JSON state file. Missing and corrupt files both
/// yield `None`; corruption is logged since it means state was lost.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring corrupt state file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_state_dir_layout() {
        let dir = StateDir::new(Path::new("/workspace"));
        assert_eq!(dir.pid_path(), PathBuf::from("/workspace/.dcyfr/daemon.pid"));
        assert_eq!(
            dir.queue_path(),
            PathBuf::from("/workspace/.dcyfr/queue.json")
        );
        assert_eq!(
            dir.heartbeat_path(),
            PathBuf::from("/workspace/.dcyfr/daemon-state.json")
        );
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sample.json");
        let value = Sample {
            name: "x".into(),
            count: 7,
        };
        write_json(&path, &value).unwrap();
        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back, value);
        // No temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_missing_returns_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.json");
        assert!(read_json::<Sample>(&path).is_none());
    }

    #[test]
    fn test_read_corrupt_returns_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("corrupt.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(read_json::<Sample>(&path).is_none());
    }

    #[test]
    fn test_ensure_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = StateDir::new(temp.path());
        dir.ensure().unwrap();
        assert!(dir.root().is_dir());
        // Idempotent
        dir.ensure().unwrap();
    }
}
