//! Scene files available for rendering.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::InfraError;

pub const DEFAULT_SCENE_EXTENSION: &str = "blend";

/// Body of `GET /render/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneListing {
    pub files: Vec<String>,
}

/// Scene identifiers are plain file names inside one directory.
#[derive(Debug, Clone)]
pub struct SceneCatalog {
    dir: PathBuf,
    extension: String,
}

impl SceneCatalog {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scene identifiers with the catalogue's extension, sorted.
    pub async fn list(&self) -> Result<SceneListing, InfraError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|err| InfraError::directory(&self.dir, err))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| InfraError::directory(&self.dir, err))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !self.has_scene_extension(&name) {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file() || kind.is_symlink())
                .unwrap_or(false);
            if is_file {
                files.push(name);
            }
        }
        files.sort();

        Ok(SceneListing { files })
    }

    /// Path of scene `id`, or `None` when `id` is not a plain file name.
    pub fn resolve(&self, id: &str) -> Option<PathBuf> {
        let plain = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\', '\0'])
            && Path::new(id).file_name().and_then(|name| name.to_str()) == Some(id);
        plain.then(|| self.dir.join(id))
    }

    fn has_scene_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == self.extension)
    }
}
