use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::document::StructureError;

/// Failures loading or saving the plugin and block-template registries.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed registry {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed registry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate {what} id `{id}`")]
    DuplicateId { what: &'static str, id: String },
    #[error("template `{id}` holds an invalid tree: {source}")]
    InvalidTemplate {
        id: String,
        #[source]
        source: StructureError,
    },
}

/// Read and deserialize a JSON registry file. A file that does not exist
/// yields `None`; every other failure is an error.
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RegistryError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "registry file missing, starting empty");
            return Ok(None);
        }
        Err(source) => {
            return Err(RegistryError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Pretty-print `value` to `path`, replacing any previous content.
pub(crate) fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RegistryError> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text).map_err(|source| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    })
}
