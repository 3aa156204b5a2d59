//! Subprocess capability.
//!
//! Each attempt spawns the configured command, writes the JSON-encoded
//! `CapabilityRequest` to its stdin and reads one JSON document from its
//! stdout:
//!
//! ```json
//! {"artifacts": {"lint-report": {...}}, "summary": "3 warnings"}
//! {"error": {"category": "external_dependency", "message": "registry down"}}
//! ```
//!
//! The child is killed when the attempt is dropped (step timeout,
//! cancellation).

use std::collections::BTreeMap;
use std::process::Stdio;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use conductor_core::capability::{Capability, CapabilityRequest};
use conductor_types::capability::CapabilityOutput;
use conductor_types::config::AgentCommandConfig;
use conductor_types::error::{CapabilityError, ErrorCategory};

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 512;

#[derive(Debug, Default, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    artifacts: BTreeMap<String, Value>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    error: Option<CapabilityError>,
}

/// An `[[agents]]` entry from `config.toml`.
#[derive(Debug, Clone)]
pub struct ShellCapability {
    config: AgentCommandConfig,
}

impl ShellCapability {
    pub fn new(config: AgentCommandConfig) -> Self {
        Self { config }
    }

    fn command(&self, request: &CapabilityRequest) -> Result<Command, CapabilityError> {
        let Some((program, args)) = self.config.command.split_first() else {
            return Err(CapabilityError::configuration(format!(
                "agent '{}' has an empty command",
                self.config.name
            )));
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.config.env)
            .env("CONDUCTOR_WORKFLOW_ID", &request.workflow_id)
            .env("CONDUCTOR_STEP_ID", &request.step_id)
            .env("CONDUCTOR_ACTION", &request.action)
            .env("CONDUCTOR_ATTEMPT", request.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

impl Capability for ShellCapability {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| CapabilityError::validation(format!("request not serializable: {e}")))?;

        let mut child = self.command(request)?.spawn().map_err(|e| spawn_error(&self.config, e))?;
        let stdin = child.stdin.take();
        let write = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| {
            CapabilityError::execution(format!("agent '{}' could not be awaited: {e}", self.config.name), true)
        })?;
        if let Err(e) = written {
            // An agent that ignores its input closes stdin early.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                tracing::debug!(agent = %self.config.name, error = %e, "failed writing request to agent stdin");
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(agent = %self.config.name, step_id = %request.step_id, stderr = %stderr.trim(), "agent stderr");
        }
        let response = parse_response(&output.stdout);

        if output.status.success() {
            let response = response.map_err(|e| {
                CapabilityError::execution(
                    format!("agent '{}' wrote invalid JSON to stdout: {e}", self.config.name),
                    false,
                )
            })?;
            if let Some(error) = response.error {
                return Err(error);
            }
            return Ok(CapabilityOutput {
                artifacts: response.artifacts,
                summary: response.summary,
            });
        }

        // Prefer the agent's own classification when it gave one.
        if let Ok(AgentResponse { error: Some(error), .. }) = response {
            return Err(error);
        }
        Err(exit_error(&self.config.name, output.status.code(), &stderr))
    }
}

fn parse_response(stdout: &[u8]) -> Result<AgentResponse, serde_json::Error> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(AgentResponse::default());
    }
    serde_json::from_str(text)
}

fn spawn_error(config: &AgentCommandConfig, err: std::io::Error) -> CapabilityError {
    let program = config.command.first().map_or("", String::as_str);
    match err.kind() {
        std::io::ErrorKind::NotFound => CapabilityError::configuration(format!(
            "agent '{}': command '{program}' not found",
            config.name
        )),
        std::io::ErrorKind::PermissionDenied => CapabilityError::permission(format!(
            "agent '{}': permission denied running '{program}'",
            config.name
        )),
        _ => CapabilityError::execution(format!("agent '{}' failed to start: {err}", config.name), true),
    }
}

fn exit_error(agent: &str, code: Option<i32>, stderr: &str) -> CapabilityError {
    let excerpt = excerpt(stderr);
    let detail = if excerpt.is_empty() {
        String::new()
    } else {
        format!(": {excerpt}")
    };
    match code {
        Some(126) => CapabilityError::permission(format!("agent '{agent}' is not executable (exit 126){detail}")),
        Some(127) => CapabilityError::configuration(format!("agent '{agent}' command not found (exit 127){detail}")),
        Some(code) => CapabilityError::new(
            ErrorCategory::Execution,
            format!("agent '{agent}' exited with status {code}{detail}"),
        ),
        None => CapabilityError::execution(format!("agent '{agent}' was terminated by a signal{detail}"), true),
    }
}

/// Last `STDERR_EXCERPT` bytes of stderr, on a char boundary.
fn excerpt(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_EXCERPT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn agent(script: &str) -> ShellCapability {
        ShellCapability::new(AgentCommandConfig {
            name: "scripted".into(),
            command: vec!["sh".into(), "-c".into(), script.into()],
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            working_dir: None,
        })
    }

    fn request() -> CapabilityRequest {
        CapabilityRequest {
            workflow_id: "wf".into(),
            step_id: "lint".into(),
            agent: "scripted".into(),
            action: "run".into(),
            attempt: 2,
            inputs: BTreeMap::from([("path".to_string(), json!("src/"))]),
            artifacts: BTreeMap::new(),
            variables: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn request_goes_in_artifacts_come_out() {
        let script = r#"input=$(cat); printf '{"artifacts":{"seen":%s,"env":"%s-%s"},"summary":"ok"}' "$input" "$GREETING" "$CONDUCTOR_ATTEMPT""#;
        let output = agent(script).execute(&request()).await.unwrap();
        assert_eq!(output.artifacts["seen"]["step_id"], "lint");
        assert_eq!(output.artifacts["seen"]["inputs"]["path"], "src/");
        assert_eq!(output.artifacts["env"], "hi-2");
        assert_eq!(output.summary.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn reported_error_keeps_its_category() {
        let script = r#"echo '{"error":{"category":"external_dependency","message":"registry down"}}'; exit 1"#;
        let err = agent(script).execute(&request()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::ExternalDependency);
        assert_eq!(err.message, "registry down");
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn exit_codes_map_to_categories() {
        let err = agent("exit 126").execute(&request()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Permission);

        let err = agent("exit 127").execute(&request()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Configuration);

        let err = agent("echo boom >&2; exit 3").execute(&request()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Execution);
        assert!(err.message.contains("status 3"));
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn missing_program_is_configuration_error() {
        let capability = ShellCapability::new(AgentCommandConfig {
            name: "ghost".into(),
            command: vec!["conductor-test-no-such-binary".into()],
            env: BTreeMap::new(),
            working_dir: None,
        });
        let err = capability.execute(&request()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn invalid_stdout_is_not_retried() {
        let err = agent("cat >/dev/null; echo not-json").execute(&request()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Execution);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn excerpt_keeps_tail_on_char_boundary() {
        let long = format!("{}é{}", "x".repeat(600), "tail");
        let cut = excerpt(&long);
        assert!(cut.len() <= STDERR_EXCERPT);
        assert!(cut.ends_with("tail"));
    }
}
