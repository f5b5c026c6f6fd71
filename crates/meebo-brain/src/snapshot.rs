//! Archive of motion frames, one directory per client.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Writes `<dir>/<client>.jpg` (latest) and `<dir>/<client>/<stamp>.jpg` (history).
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    dir: PathBuf,
}

impl SnapshotArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store one frame. Returns the history path.
    pub async fn store(&self, client: &str, jpeg: &[u8], at: DateTime<Local>) -> std::io::Result<PathBuf> {
        let client = sanitize(client);
        let history_dir = self.dir.join(&client);
        tokio::fs::create_dir_all(&history_dir).await?;

        let latest = self.dir.join(format!("{client}.jpg"));
        tokio::fs::write(&latest, jpeg).await?;

        let history = history_dir.join(format!("{}.jpg", at.format("%Y%m%d%H%M%S")));
        tokio::fs::write(&history, jpeg).await?;
        Ok(history)
    }
}

/// Client names come off the wire; keep them to one path component.
fn sanitize(client: &str) -> String {
    let cleaned: String = client
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
