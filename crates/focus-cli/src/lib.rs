//! Operator command line for a FOCUS cache directory

pub mod commands;
pub mod logging;
pub mod router;

pub use commands::{execute, CommandOutput};
pub use router::{Cli, Commands};
