pub mod config;
pub mod console;
pub mod prompt_loader;
pub mod runtime;
