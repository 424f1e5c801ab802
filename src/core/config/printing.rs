use crate::core::config::data::UserConfig;
use crate::core::config::keys::KEYS;

impl UserConfig {
    pub fn print_all(&self) {
        println!("Current configuration:");
        for key in KEYS {
            match self.get(key) {
                Ok(value) => println!("  {key}: {value}"),
                Err(err) => println!("  {key}: ({err})"),
            }
        }
    }
}
