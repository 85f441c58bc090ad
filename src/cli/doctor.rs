//! Doctor diagnostics CLI command.
//!
//! Checks every registered conversion tool and reports actionable fixes.

use std::time::Duration;

use crate::config::Config;
use crate::media::{ConversionKind, ExternalTool, TOOL_REGISTRY, ToolchainRunner};

/// Diagnostic check result.
struct Check {
    name: String,
    status: CheckStatus,
    message: String,
    fix: Option<String>,
}

enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl Check {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            message: message.into(),
            fix: None,
        }
    }

    fn warn(name: impl Into<String>, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warning,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn error(name: impl Into<String>, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warning => "[WARN]",
            CheckStatus::Error => "[ERR]",
        }
    }
}

/// Run diagnostics.
pub async fn run_doctor_command(config: &Config) -> anyhow::Result<()> {
    println!("stickerbot doctor");
    println!("=================\n");

    let mut checks = vec![Check::ok(
        "Version",
        format!("stickerbot v{}", env!("CARGO_PKG_VERSION")),
    )];
    checks.extend(check_tools(config.encode.tool_timeout));
    checks.extend(check_coverage(&ToolchainRunner::from_registry(
        config.encode.tool_timeout,
    )));
    checks.push(check_outbox(config).await);

    let mut errors = 0;
    let mut warnings = 0;
    for check in &checks {
        println!("  {} {}: {}", check.icon(), check.name, check.message);
        if let Some(ref fix) = check.fix {
            println!("       Fix: {}", fix);
        }
        match check.status {
            CheckStatus::Error => errors += 1,
            CheckStatus::Warning => warnings += 1,
            CheckStatus::Ok => {}
        }
    }

    println!();
    println!(
        "Summary: {} checks, {} passed, {} warnings, {} errors",
        checks.len(),
        checks.len() - errors - warnings,
        warnings,
        errors
    );
    if errors > 0 {
        println!("\nSome conversions will fail until the errors above are fixed.");
    } else if warnings > 0 {
        println!(
            "\nStill stickers work with the built-in encoder; install the tools above for the rest."
        );
    } else {
        println!("\nAll conversion tools found.");
    }
    Ok(())
}

fn check_tools(timeout: Duration) -> Vec<Check> {
    TOOL_REGISTRY
        .iter()
        .map(|descriptor| {
            let tool = ExternalTool::locate(descriptor, timeout);
            match tool.path() {
                Some(path) => Check::ok(descriptor.name, path.display().to_string()),
                None => Check::warn(
                    descriptor.name,
                    format!("none of {} on PATH", descriptor.binaries.join(", ")),
                    install_hint(descriptor.name),
                ),
            }
        })
        .collect()
}

/// One line per conversion kind. Kinds without any tool and without a
/// built-in fallback are errors.
fn check_coverage(runner: &ToolchainRunner) -> Vec<Check> {
    ConversionKind::ALL
        .iter()
        .map(|kind| {
            let names: Vec<String> = runner
                .candidates(*kind)
                .iter()
                .map(|tool| tool.name().to_string())
                .collect();
            let label = format!("Kind {kind}");
            if !names.is_empty() {
                return Check::ok(label, names.join(" -> "));
            }
            match kind {
                ConversionKind::StillToWebp | ConversionKind::WebpToPng => {
                    Check::ok(label, "built-in encoder only")
                }
                ConversionKind::GifToWebp => Check::warn(
                    label,
                    "no tool, GIFs become still stickers",
                    install_hint("gif2webp"),
                ),
                ConversionKind::VideoToWebp | ConversionKind::VideoFrame => Check::error(
                    label,
                    "no tool, videos cannot be converted",
                    install_hint("ffmpeg"),
                ),
            }
        })
        .collect()
}

async fn check_outbox(config: &Config) -> Check {
    let outbox = &config.outbox;
    match tokio::fs::create_dir_all(outbox).await {
        Ok(()) => match tempfile::tempfile_in(outbox) {
            Ok(_) => Check::ok("Outbox", format!("{} (writable)", outbox.display())),
            Err(e) => Check::error(
                "Outbox",
                format!("{} is not writable: {}", outbox.display(), e),
                "Set STICKERBOT_OUTBOX to a writable directory",
            ),
        },
        Err(e) => Check::error(
            "Outbox",
            format!("cannot create {}: {}", outbox.display(), e),
            "Set STICKERBOT_OUTBOX to a writable directory",
        ),
    }
}

fn install_hint(tool: &str) -> &'static str {
    match tool {
        "cwebp" | "gif2webp" | "dwebp" => "Install libwebp tools (e.g. 'apt install webp')",
        "ffmpeg" => "Install ffmpeg built with libwebp (e.g. 'apt install ffmpeg')",
        "imagemagick" => "Install ImageMagick (e.g. 'apt install imagemagick')",
        _ => "Install the tool and make sure it is on PATH",
    }
}
