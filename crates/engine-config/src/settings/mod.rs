use crate::error::SettingsError;
use sections::{
    DiffSettings, DispatcherSettings, ProcessingSettings, SourceSettings, StateSettings,
    WorkerSettings,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::info;

pub mod env;
pub mod sections;
pub mod validator;

/// Everything a run needs, loaded from TOML then overridden from the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub state: StateSettings,
    pub source: SourceSettings,
    pub dispatcher: DispatcherSettings,
    pub workers: WorkerSettings,
    pub processing: ProcessingSettings,
    pub diff: DiffSettings,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads `path` (defaults when absent), applies `RECONCILE_*` overrides from
    /// `vars`, then validates.
    pub fn load(
        path: Option<&Path>,
        vars: &HashMap<String, String>,
    ) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!(path = %path.display(), "Loaded configuration");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        settings.apply_env(vars)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn state_dir(&self) -> Result<PathBuf, SettingsError> {
        if let Some(dir) = &self.state.dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".reconcile/state"))
            .ok_or(SettingsError::NoStateDir)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state.dir = Some(dir.into());
        self
    }
}
