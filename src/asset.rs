use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An asset: a blob of data the engine materializes on the interpreter's
/// behalf. The interpreter only carries the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    /// A file on the local filesystem.
    File { path: PathBuf },
    /// In-memory text content.
    Text { text: String },
    /// Content addressed by URI, fetched by the engine.
    Remote { uri: String },
}

/// An archive: a collection of assets, or a reference to an archive file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Archive {
    File { path: PathBuf },
    Remote { uri: String },
    /// Archive assembled from named assets and nested archives.
    Assets(BTreeMap<String, AssetOrArchive>),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetOrArchive {
    Asset(Asset),
    Archive(Archive),
}

impl Asset {
    /// Build a file asset, resolving relative paths against `base`.
    pub fn file(path: &str, base: &Path) -> Self {
        let p = Path::new(path);
        let resolved = if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        };
        Asset::File { path: resolved }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Asset::Text { text: text.into() }
    }

    pub fn remote(uri: impl Into<String>) -> Self {
        Asset::Remote { uri: uri.into() }
    }

    /// SHA-256 hash of local content, hex-encoded. Remote assets have no
    /// local content to hash.
    pub fn content_hash(&self) -> Result<Option<String>> {
        match self {
            Asset::File { path } => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read asset file: {}", path.display()))?;
                Ok(Some(hex::encode(Sha256::digest(&bytes))))
            }
            Asset::Text { text } => Ok(Some(hex::encode(Sha256::digest(text.as_bytes())))),
            Asset::Remote { .. } => Ok(None),
        }
    }
}

impl Archive {
    /// Build a file archive, resolving relative paths against `base`.
    pub fn file(path: &str, base: &Path) -> Self {
        let p = Path::new(path);
        let resolved = if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        };
        Archive::File { path: resolved }
    }

    pub fn remote(uri: impl Into<String>) -> Self {
        Archive::Remote { uri: uri.into() }
    }

    pub fn assets(entries: BTreeMap<String, AssetOrArchive>) -> Self {
        Archive::Assets(entries)
    }
}
