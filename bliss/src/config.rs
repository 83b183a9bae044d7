use crate::env::{config_path, BLISS_CATALOG, BLISS_DATA_DIR, BLISS_HOME, BLISS_LOG, BLISS_PORT};
use crate::err::HostErr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlissConfig {
    pub home: String,
    pub port: u16,
    pub data_dir: String,
    pub catalog: String,
    pub renderer_cache: usize,
    pub connection_cache: usize,
    pub log: String,
}

impl Default for BlissConfig {
    fn default() -> Self {
        Self {
            home: BLISS_HOME.to_string(),
            port: *BLISS_PORT,
            data_dir: BLISS_DATA_DIR.to_string(),
            catalog: BLISS_CATALOG.to_string(),
            renderer_cache: 32,
            connection_cache: 16,
            log: BLISS_LOG.to_string(),
        }
    }
}

impl BlissConfig {
    /// a config rooted at `home` with the data directory and catalog inside it
    pub fn with_home<P>(home: P) -> Self
    where
        P: AsRef<Path>,
    {
        let home = home.as_ref();
        Self {
            home: home.display().to_string(),
            data_dir: home.join("data").display().to_string(),
            catalog: home.join("prime.db").display().to_string(),
            ..Default::default()
        }
    }

    /// `$BLISS_HOME/config.yaml` when present, otherwise the defaults
    pub fn load() -> Result<Self, HostErr> {
        Self::load_from(config_path())
    }

    pub fn load_from<P>(path: P) -> Result<Self, HostErr>
    where
        P: Into<PathBuf>,
    {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::default());
        }
        let config = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(config.as_str()).map_err(|err| {
            HostErr::Config(format!(
                "config found at '{}' but it could not be processed: {}",
                path.display(),
                err
            ))
        })
    }

    pub fn save<P>(&self, path: P) -> Result<(), HostErr>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}
