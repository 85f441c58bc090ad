//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the bot over JSON-lines events on stdin (`run`)
//! - Converting a single local file (`convert`)
//! - Checking which conversion tools are installed (`doctor`)

mod convert;
mod doctor;
mod run;

pub use convert::{default_output_path, run_convert_command};
pub use doctor::run_doctor_command;
pub use run::{read_events, run_bot_command};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::ConfigError;
use crate::media::TargetKind;

#[derive(Parser, Debug)]
#[command(name = "stickerbot")]
#[command(about = "Turns chat media into platform-compliant stickers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output logs as JSON instead of human-readable
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Maximum number of events handled at once
    #[arg(long, global = true, env = "STICKERBOT_MAX_IN_FLIGHT")]
    pub max_in_flight: Option<usize>,

    /// Directory for uploaded stickers and images
    #[arg(long, global = true, env = "STICKERBOT_OUTBOX")]
    pub outbox: Option<PathBuf>,

    /// Deadline for one external tool invocation, in seconds
    #[arg(long, global = true, env = "STICKERBOT_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read inbound events as JSON lines from stdin and dispatch them
    Run,

    /// Convert one local file
    Convert {
        /// Input media file
        input: PathBuf,

        /// Output path (defaults next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output kind: static, animated or image
        #[arg(short, long, default_value = "static")]
        target: TargetKind,
    },

    /// Check conversion tools and configuration
    Doctor,
}

impl Cli {
    /// Apply flag overrides on top of the environment configuration.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(max_in_flight) = self.max_in_flight {
            config.dispatch.max_in_flight = max_in_flight;
        }
        if let Some(outbox) = &self.outbox {
            config.outbox = outbox.clone();
        }
        if let Some(secs) = self.tool_timeout_secs {
            config.encode.tool_timeout = std::time::Duration::from_secs(secs);
        }
        config.validate()
    }
}
