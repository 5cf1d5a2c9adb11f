//! Wallet configuration.
//!
//! ```toml
//! chain_id = 9001
//! challenge_duration = 3600
//! block_confirmations = 5
//! asset_holder = "0x4ad3f07bee4e9d4a6f5a0d2f8e8f1e35bdd2b6a6"
//! ledger_app_definition = "0x8bb4e3d7b8e8ba24a7fc4c9c8fbb1e0c5f25c9a0"
//! ```
//!
//! Every key is optional.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::abiencode::types::Address;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalletConfig {
    pub chain_id: u64,
    /// Seconds a challenge stays open, used for channels we create.
    pub challenge_duration: u64,
    /// Blocks after which a deposit counts as final.
    pub block_confirmations: u64,
    /// Asset holder used when creating channels.
    pub asset_holder: Address,
    /// Address identifying the consensus app of ledger channels.
    pub ledger_app_definition: Address,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            chain_id: 9001,
            challenge_duration: 3600,
            block_confirmations: 5,
            asset_holder: Address([0; 20]),
            ledger_app_definition: Address([0; 20]),
        }
    }
}

impl WalletConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.challenge_duration == 0 {
            return Err(ConfigError::Invalid("challenge_duration must not be 0"));
        }
        Ok(())
    }
}
