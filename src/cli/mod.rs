mod config;
mod render;
mod root;

pub use root::Cli;
