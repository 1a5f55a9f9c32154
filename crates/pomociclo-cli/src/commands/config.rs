use clap::Subcommand;
use pomociclo_core::{Config, ConfigError, HttpSessionApi, SessionApi};
use tracing::info;

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Dot-separated key (e.g. "timer.study_duration", "api.base_url")
        key: String,
    },
    /// Set a config value
    Set {
        /// Dot-separated key
        key: String,
        /// New value (empty clears an optional value)
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
    /// Pull block lengths and the long break interval from the backend
    Sync,
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key).ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            print_json(&config)?;
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("config reset to defaults");
        }
        ConfigAction::Sync => {
            let mut config = Config::load()?;
            let api = HttpSessionApi::from_config(&config.api)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let remote = runtime.block_on(api.settings())?;
            info!(?remote, "backend settings fetched");

            config.timer.apply_remote(&remote);
            config.save()?;
            print_json(&config.timer)?;
        }
    }
    Ok(())
}
