//! Conductor CLI entry point.
//!
//! Binary name: `cndr`
//!
//! Parses CLI arguments, loads `config.toml` from the data directory, sets up
//! tracing, then dispatches to the command handler. Commands that only read
//! a definition file never open the state store.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;

use conductor_infra::config::load_engine_config;
use conductor_infra::filesystem::resolve_data_dir;
use conductor_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::execute::OutputMode;
use cli::output::report_error;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    let outcome = dispatch(cli).await;
    shutdown_tracing();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, json);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need config or state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cndr", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let config = load_engine_config(&data_dir).await?;

    init_tracing(&TracingOptions {
        json: config.logging.json,
        otel: config.logging.otel,
        verbosity: cli.verbose,
        quiet: cli.quiet,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mode = OutputMode {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Validate { file } => cli::definition::validate(&file, cli.json),
        Commands::Plan { file, format } => cli::definition::plan(&file, format, &config),
        Commands::Schema => cli::definition::schema(),
        Commands::Completions { .. } => Ok(()),
        command => {
            let state = AppState::init(&data_dir, &config).await?;
            match command {
                Commands::Run {
                    file,
                    id,
                    vars,
                    max_steps,
                    force,
                } => cli::execute::run(&state, &file, id, vars, max_steps, force, mode).await,
                Commands::Resume {
                    workflow_id,
                    latest: _,
                    skip_validation,
                    max_steps,
                    force,
                } => cli::execute::resume(&state, workflow_id, skip_validation, max_steps, force, mode).await,
                Commands::Status { workflow_id } => cli::inspect::status(&state, &workflow_id, cli.json).await,
                Commands::List => cli::inspect::list(&state, cli.json).await,
                Commands::Events { workflow_id, after } => {
                    cli::inspect::events(&state, &workflow_id, after, cli.json).await
                }
                Commands::Validate { .. }
                | Commands::Plan { .. }
                | Commands::Schema
                | Commands::Completions { .. } => Ok(()),
            }
        }
    }
}
