pub mod cli;
pub mod config;

pub use cli::{Cli, Commands};
pub use config::{Courier, FilesConfig};
