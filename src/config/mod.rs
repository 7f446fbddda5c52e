//! Configuration module

pub mod cli;
pub mod layout;
pub mod settings;

pub use cli::CliArgs;
pub use layout::GattLayout;
pub use settings::Settings;
