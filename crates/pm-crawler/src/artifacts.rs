//! Files produced by screenshot, toMarkdown and toPdf
//!
//! Artifacts live under a root directory that the HTTP server publishes at a
//! URL prefix, so every stored file has a filesystem path and a public URL.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use pm_core::ArtifactConfig;

use crate::error::{CrawlError, Result};

/// Artifact category, one subdirectory each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Markdown,
    Pdf,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Screenshot,
        ArtifactKind::Markdown,
        ArtifactKind::Pdf,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshots",
            ArtifactKind::Markdown => "markdown",
            ArtifactKind::Pdf => "pdfs",
        }
    }
}

/// Location of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub url: String,
}

/// Writes artifacts under the public root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    mount: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, mount: impl Into<String>) -> Self {
        let mount = mount.into();
        let mount = format!("/{}", mount.trim_matches('/'));
        Self {
            root: root.into(),
            mount,
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(config.root.clone(), config.mount.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL prefix the root is served under, always starting with `/`
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Create every artifact directory
    pub async fn ensure_dirs(&self) -> Result<()> {
        for kind in ArtifactKind::ALL {
            let dir = self.root.join(kind.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| CrawlError::Artifact(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    /// Write `bytes` as `name`, replacing an existing file of that name
    pub async fn write(&self, kind: ArtifactKind, name: &str, bytes: &[u8]) -> Result<StoredArtifact> {
        let dir = self.root.join(kind.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CrawlError::Artifact(format!("{}: {}", dir.display(), e)))?;

        let path = dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CrawlError::Artifact(format!("{}: {}", path.display(), e)))?;

        debug!("Stored {} bytes at {}", bytes.len(), path.display());

        let url = if self.mount == "/" {
            format!("/{}/{}", kind.dir_name(), name)
        } else {
            format!("{}/{}/{}", self.mount, kind.dir_name(), name)
        };

        Ok(StoredArtifact { path, url })
    }
}

fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic screenshot name, so repeated captures of the same target
/// overwrite each other
pub fn screenshot_file_name(url: &str, selector: Option<&str>, full_page: bool) -> String {
    let target = match selector.map(str::trim).filter(|s| !s.is_empty()) {
        Some(selector) => short_hash(selector),
        None if full_page => "full".to_string(),
        None => "viewport".to_string(),
    };
    format!("screenshot_{}_{}.png", short_hash(url), target)
}

/// Fresh name with the given extension
pub fn unique_file_name(extension: &str) -> String {
    format!("{}.{}", uuid::Uuid::new_v4(), extension.trim_start_matches('.'))
}
