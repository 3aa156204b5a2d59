//! CLI command definitions for the `cndr` binary.
//!
//! Uses clap derive macros for argument parsing. Commands act on workflow
//! definition files (`run`, `validate`, `plan`) or on stored workflow
//! instances (`resume`, `status`, `list`, `events`).

pub mod definition;
pub mod execute;
pub mod inspect;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde_json::Value;

/// Run declarative agent workflows with retries, checkpoints and resume.
#[derive(Parser)]
#[command(name = "cndr", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding config.toml and workflow state.
    #[arg(long, global = true, env = "CONDUCTOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a workflow from a definition file.
    Run {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Instance id (default: `<definition-id>-<uuid>`). An id with
        /// history continues that workflow.
        #[arg(long)]
        id: Option<String>,

        /// Override a workflow variable (`key=value`; JSON values allowed).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Stop after dispatching this many steps.
        #[arg(long)]
        max_steps: Option<u32>,

        /// Take over the workflow even if another process holds its lease.
        #[arg(long)]
        force: bool,
    },

    /// Continue a paused, failed or interrupted workflow.
    Resume {
        /// Workflow instance id.
        #[arg(required_unless_present = "latest", conflicts_with = "latest")]
        workflow_id: Option<String>,

        /// Resume the most recently updated workflow.
        #[arg(long)]
        latest: bool,

        /// Do not re-validate the stored definition.
        #[arg(long)]
        skip_validation: bool,

        /// Stop after dispatching this many steps.
        #[arg(long)]
        max_steps: Option<u32>,

        /// Take over the workflow even if another process holds its lease.
        #[arg(long)]
        force: bool,
    },

    /// Check a definition file without running it.
    Validate {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Show the execution plan of a definition file.
    Plan {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },

    /// Show the state of a workflow instance.
    Status {
        /// Workflow instance id.
        workflow_id: String,
    },

    /// List stored workflow instances, most recent first.
    #[command(alias = "ls")]
    List,

    /// Show the event log of a workflow instance.
    Events {
        /// Workflow instance id.
        workflow_id: String,

        /// Only events after this sequence number.
        #[arg(long, default_value = "0")]
        after: u64,
    },

    /// Print the JSON Schema of workflow definitions.
    Schema,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    Text,
    Json,
    Dot,
}

/// Parse `key=value`. The value is read as JSON when it parses, otherwise
/// as a plain string.
pub fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn var_values_parse_as_json_when_possible() {
        assert_eq!(parse_var("retries=3").unwrap(), ("retries".into(), json!(3)));
        assert_eq!(parse_var("branch=main").unwrap(), ("branch".into(), json!("main")));
        assert_eq!(
            parse_var("paths=[\"src\",\"tests\"]").unwrap().1,
            json!(["src", "tests"])
        );
        assert_eq!(parse_var("expr=a=b").unwrap().1, json!("a=b"));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn resume_requires_id_or_latest() {
        assert!(Cli::try_parse_from(["cndr", "resume"]).is_err());
        assert!(Cli::try_parse_from(["cndr", "resume", "--latest"]).is_ok());
        assert!(Cli::try_parse_from(["cndr", "resume", "wf-1", "--latest"]).is_err());
        let cli = Cli::try_parse_from(["cndr", "resume", "wf-1", "--force", "--max-steps", "2"]).unwrap();
        match cli.command {
            Commands::Resume {
                workflow_id,
                force,
                max_steps,
                ..
            } => {
                assert_eq!(workflow_id.as_deref(), Some("wf-1"));
                assert!(force);
                assert_eq!(max_steps, Some(2));
            }
            _ => panic!("expected resume"),
        }
    }
}
