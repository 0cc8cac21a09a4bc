//! Settings loading for the crew fleet (`~/.crew.env` + process env).
//!
//! The env file is flat `KEY=VALUE` with shell-style quoting and `#`
//! comments. Process environment overrides the file. Settings are plain
//! data; the [`ConfigWatcher`] re-reads the file when its mtime changes so
//! an edited config takes effect without a daemon restart.

mod env_file;
pub mod paths;
mod settings;
mod watcher;

pub use env_file::parse_env_file;
pub use settings::{ModelPreference, SearchProvider, Settings};
pub use watcher::ConfigWatcher;
