pub mod data;
pub mod io;
pub mod keys;
pub mod printing;

pub use data::UserConfig;
pub use io::ConfigError;
