pub mod archive;
pub mod download;
pub mod engine;
pub mod error;
pub mod io;
pub mod manifest;
pub mod orchestrator;
pub mod paths;
pub mod platform;
pub mod preflight;
pub mod process;
pub mod steps;

pub use error::{ErrorKind, InstallError, Result};
