use awsync_core::SelectionMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "awsync",
    version,
    about = "Relay ActivityWatch buckets and events from a remote host into Postgres"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP trigger server (default if no subcommand given).
    Serve {
        #[arg(long, env = "AWSYNC_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,
    },

    /// Run one extraction now and exit.
    Run {
        /// ALL, CURRENT_TIMESTAMP, PRESET_TIMESTAMP or TEST.
        #[arg(long, default_value = "ALL")]
        mode: SelectionMode,

        /// Anchor for PRESET_TIMESTAMP, in milliseconds since the Unix epoch.
        #[arg(long)]
        preset_ms: Option<i64>,

        /// Private key file; overrides SSH_PRIVATE_KEY_PATH / SSH_PRIVATE_KEY.
        #[arg(long)]
        key_path: Option<PathBuf>,
    },

    /// Print current configuration (redacted secrets).
    Config,

    /// Check that Postgres answers and an SSH session can be opened.
    Check,
}

impl Commands {
    pub fn default_serve() -> Self {
        Commands::Serve {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Attach `--preset-ms` to a PRESET_TIMESTAMP mode; other modes ignore it.
pub fn with_preset(mode: SelectionMode, preset_ms: Option<i64>) -> SelectionMode {
    match mode {
        SelectionMode::PresetTimestamp { timestamp_ms } => SelectionMode::PresetTimestamp {
            timestamp_ms: preset_ms.or(timestamp_ms),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_all() {
        let cli = Cli::try_parse_from(["awsync", "run"]).unwrap();
        match cli.command {
            Some(Commands::Run { mode, preset_ms, key_path }) => {
                assert_eq!(mode, SelectionMode::All);
                assert_eq!(preset_ms, None);
                assert_eq!(key_path, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_parses_mode_and_preset() {
        let cli = Cli::try_parse_from([
            "awsync",
            "run",
            "--mode",
            "preset_timestamp",
            "--preset-ms",
            "1700000000000",
        ])
        .unwrap();
        let Some(Commands::Run { mode, preset_ms, .. }) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            with_preset(mode, preset_ms),
            SelectionMode::PresetTimestamp {
                timestamp_ms: Some(1_700_000_000_000)
            }
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["awsync", "run", "--mode", "HOURLY"]).is_err());
    }

    #[test]
    fn no_subcommand_is_allowed() {
        assert!(Cli::try_parse_from(["awsync"]).unwrap().command.is_none());
    }
}
