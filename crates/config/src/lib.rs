mod error;
mod loader;
mod provider;

use std::{path::Path, str::FromStr};

use indexmap::IndexMap;
use serde::Deserialize;

pub use error::Error;
pub use provider::{ApiProviderConfig, GenerationDefaults, ProviderConfig, ProviderType};

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Configured providers, keyed by the name used to look them up.
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

impl Config {
    /// Reads, expands and validates the configuration file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        loader::load(path)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(content: &str) -> crate::Result<Self> {
        loader::parse(content)
    }
}
