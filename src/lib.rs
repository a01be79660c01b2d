pub mod apps;
pub mod config;
pub mod hooks;
pub mod host;
pub mod logger;
pub mod player;
pub mod plugin;
pub mod schema;
pub mod watcher;

pub use flowdeck_plugin;
