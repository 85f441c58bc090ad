use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use stickerbot::Config;
use stickerbot::cli::{Cli, Command, run_bot_command, run_convert_command, run_doctor_command};

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stickerbot=info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries sent messages, so logs go to stderr
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::from_env()?;
    cli.apply_overrides(&mut config)?;
    tracing::debug!(?config, "Configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async move {
        match cli.command {
            Command::Run => run_bot_command(&config).await,
            Command::Convert {
                input,
                output,
                target,
            } => run_convert_command(&config, &input, output, target).await,
            Command::Doctor => run_doctor_command(&config).await,
        }
    });

    // A pending stdin read would otherwise hold the runtime open after Ctrl-C
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
