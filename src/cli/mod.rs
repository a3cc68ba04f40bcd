pub mod args;
pub mod config;
pub mod loader;

pub use args::{Args, Command};
pub use config::ConfigFile;
pub use loader::{Settings, SettingsLoader};
