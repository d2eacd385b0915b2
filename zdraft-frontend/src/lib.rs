#[cfg(feature = "cli")]
pub mod cli;
pub mod errors;
pub mod loader;

#[cfg(feature = "cli")]
pub use cli::run_cli_demo;
