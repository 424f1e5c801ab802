//! `config` subcommand

use std::error::Error;

use super::ConfigCommand;
use crate::core::config::data::path_display;
use crate::core::config::io::config_path;
use crate::core::config::UserConfig;

pub fn run(action: Option<&ConfigCommand>) -> Result<(), Box<dyn Error>> {
    match action.unwrap_or(&ConfigCommand::Show) {
        ConfigCommand::Show => {
            UserConfig::load()?.print_all();
        }
        ConfigCommand::Path => {
            println!("{}", path_display(config_path()?));
        }
        ConfigCommand::Set { key, value } => {
            let value = value.join(" ");
            let mut config = UserConfig::load()?;
            config.set(key, &value)?;
            let path = config.save()?;
            println!("✅ Set {key} to: {}", config.get(key)?);
            tracing::debug!(path = %path.display(), "Config updated");
        }
        ConfigCommand::Unset { key } => {
            let mut config = UserConfig::load()?;
            config.unset(key)?;
            config.save()?;
            println!("✅ Unset {key} (now: {})", config.get(key)?);
        }
    }
    Ok(())
}
