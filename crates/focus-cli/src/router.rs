// Command line definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// FOCUS - file-backed object cache
#[derive(Parser, Debug)]
#[command(name = "focus")]
#[command(bin_name = "focus")]
#[command(about = "Inspect and maintain a FOCUS object cache directory")]
#[command(version)]
#[command(author = "FOCUS Contributors")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache root directory (overrides configuration)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Tenant to operate on; implies multisite
    #[arg(long, global = true, value_name = "ID")]
    pub tenant: Option<u64>,

    /// Group the key belongs to
    #[arg(long, global = true, default_value = "default")]
    pub group: String,

    /// Register a group as shared by every tenant
    #[arg(long = "global-group", global = true, value_name = "NAME")]
    pub global_groups: Vec<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Remove every entry in every group and scope
    Flush,

    /// Show counters and the containers on disk
    Stats,

    /// Print a stored value as JSON
    Get {
        #[arg(value_name = "KEY")]
        key: String,

        /// Re-read from disk, ignoring the in-memory copy
        #[arg(long)]
        force: bool,
    },

    /// Store a JSON value
    Set {
        #[arg(value_name = "KEY")]
        key: String,

        /// Value as JSON; anything that does not parse is stored as a string
        #[arg(value_name = "JSON")]
        value: String,

        /// Expire after this many seconds
        #[arg(long, value_name = "SECONDS")]
        ttl: Option<u64>,
    },

    /// Remove a key
    Delete {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Remove every key of a group in the current scope
    DeleteGroup {
        #[arg(value_name = "GROUP")]
        group: String,
    },

    /// Increment a counter
    Incr {
        #[arg(value_name = "KEY")]
        key: String,

        #[arg(value_name = "BY", default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },

    /// Decrement a counter, stopping at zero
    Decr {
        #[arg(value_name = "KEY")]
        key: String,

        #[arg(value_name = "BY", default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_with_ttl() {
        let cli = Cli::try_parse_from([
            "focus", "--cache-dir", "/tmp/c", "set", "k", "{\"a\":1}", "--ttl", "60",
        ])
        .unwrap();

        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert_eq!(cli.group, "default");
        assert_eq!(
            cli.command,
            Commands::Set {
                key: "k".into(),
                value: "{\"a\":1}".into(),
                ttl: Some(60),
            }
        );
    }

    #[test]
    fn test_parse_repeated_global_groups() {
        let cli = Cli::try_parse_from([
            "focus", "--global-group", "users", "--global-group", "options", "get", "k",
        ])
        .unwrap();
        assert_eq!(cli.global_groups, vec!["users", "options"]);
    }

    #[test]
    fn test_parse_counter_defaults() {
        let cli = Cli::try_parse_from(["focus", "decr", "n"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Decr {
                key: "n".into(),
                by: 1
            }
        );

        let cli = Cli::try_parse_from(["focus", "incr", "n", "-3"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Incr {
                key: "n".into(),
                by: -3
            }
        );
    }
}
