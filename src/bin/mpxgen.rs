//! mpxgen - FM multiplex baseband generator
//!
//! # Usage
//!
//! ```bash
//! mpxgen --audio music.wav --output-file mpx.wav --wait 0
//! mpxgen --audio - --output-file - --ps "My Radio" --rt "Now playing" < in.raw > mpx.raw
//! mpxgen --ps RDSONLY --ctl /tmp/rds_ctl
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG` to change the level.

#[path = "mpxgen/cli.rs"]
mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::Args;
use mpxgen::{build_encoder, PipelineError, StopReason};

const EXIT_INVALID: u8 = 1;
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_INVALID)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = args.into_config()?;
    let encoder = build_encoder(&config)?;

    let ctx = Arc::clone(encoder.pipeline.context());
    ctrlc::set_handler(move || {
        if ctx.request_stop(StopReason::Signal) {
            info!("interrupted, shutting down");
        }
    })
    .context("failed to install signal handler")?;

    let reason = encoder.pipeline.run()?;
    info!(?reason, "encoder stopped");
    if reason.is_failure() {
        Ok(ExitCode::from(EXIT_FAILURE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Configuration mistakes exit 1; anything that went wrong at runtime exits 2.
fn exit_status(error: &anyhow::Error) -> u8 {
    let invalid = error.downcast_ref::<mpxgen::ConfigError>().is_some()
        || matches!(
            error.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        );
    if invalid {
        EXIT_INVALID
    } else {
        EXIT_FAILURE
    }
}
