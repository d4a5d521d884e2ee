use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use questscript::config::{DiagnosticsConfig, ImportConfig};
use questscript::{PluginRegistry, TemplateRegistry};
use workbench::WorkbenchConfig;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_FILE: &str = "questscript.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Plugin definitions JSON. Relative to the settings file.
    pub plugins: Option<PathBuf>,
    /// Block templates JSON. Relative to the settings file.
    pub templates: Option<PathBuf>,
}

/// Contents of `questscript.toml`. Every section and key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub import: ImportConfig,
    pub diagnostics: DiagnosticsConfig,
    pub workbench: WorkbenchConfig,
    pub files: FileSettings,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Settings {
    /// Read settings from `path`, or from [`DEFAULT_FILE`] if it exists.
    /// An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_FILE), false),
        };
        if !required && !path.exists() {
            debug!("no {} found, using defaults", DEFAULT_FILE);
            return Ok(Settings::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read settings '{}'", path.display()))?;
        let mut settings = Settings::parse(&text)
            .with_context(|| format!("invalid settings in '{}'", path.display()))?;
        settings.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn plugins(&self) -> Result<PluginRegistry> {
        match &self.files.plugins {
            Some(path) => {
                let path = self.resolve(path);
                PluginRegistry::load(&path)
                    .with_context(|| format!("cannot load plugins from '{}'", path.display()))
            }
            None => Ok(PluginRegistry::new()),
        }
    }

    pub fn templates(&self) -> Result<TemplateRegistry> {
        match &self.files.templates {
            Some(path) => {
                let path = self.resolve(path);
                TemplateRegistry::load(&path)
                    .with_context(|| format!("cannot load templates from '{}'", path.display()))
            }
            None => Ok(TemplateRegistry::new()),
        }
    }
}
