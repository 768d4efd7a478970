use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Persistence hook for refreshed artifacts. One artifact is one small file
/// (or equivalent) addressed by language and artifact name.
pub trait ArtifactStore {
    fn store(&mut self, lang: &str, name: &str, bytes: &[u8]) -> Result<()>;
    fn read(&self, lang: &str, name: &str) -> Result<Vec<u8>>;
}

/// Filesystem store laying artifacts out as `<root>/<lang>/<name>`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn artifact_path(&self, lang: &str, name: &str) -> PathBuf {
        self.root.join(lang).join(name)
    }

    pub fn read_text(&self, lang: &str, name: &str) -> Result<String> {
        let path = self.artifact_path(lang, name);
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}

impl ArtifactStore for FileStore {
    fn store(&mut self, lang: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.artifact_path(lang, name);
        ensure_parent_dir(&path)?;
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    fn read(&self, lang: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(lang, name);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))
}
