//! Instruction → argv/env translation per child CLI.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use crew_process::CommandSpec;
use crew_prompt::Instruction;
use tracing::debug;

use crate::Adapter;

/// Prompts beyond this ride on stdin (or a temp file) instead of argv.
pub const MAX_ARGV_PROMPT_LEN: usize = 100 * 1024;

/// Environment variables stripped from every child.
///
/// These are recursion guards set by coding CLIs; a child inheriting them
/// refuses to start.
const STRIPPED_ENV_VARS: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// Inputs to command construction that come from settings, not the plan.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Executable name or path (`CODE_BIN`).
    pub code_bin: String,
    /// Resolved model, if any.
    pub model: Option<String>,
    /// Provider credentials and similar pass-through env.
    pub extra_env: HashMap<String, String>,
}

impl Adapter {
    /// Build the concrete command for `instruction`.
    ///
    /// Interactive prompts and auto-commit behaviors are always disabled;
    /// the prompt travels by argv, stdin, or temp file depending on the
    /// child's abilities and the prompt size.
    pub fn build_command(
        &self,
        instruction: &Instruction,
        ctx: &BuildContext,
    ) -> Result<CommandSpec> {
        let mut spec = CommandSpec::new(
            vec![ctx.code_bin.clone()],
            instruction.repo_root.clone(),
        );
        spec.env = ctx.extra_env.clone();
        spec.env_remove = STRIPPED_ENV_VARS.iter().map(|s| s.to_string()).collect();

        let prompt = instruction.prompt.as_str();
        let argv_fits = prompt.len() <= MAX_ARGV_PROMPT_LEN;

        match self {
            Self::Claude => {
                spec.argv.push("--print".to_string());
                // Native JSON envelope carries the result text plus token
                // usage for the metrics log.
                spec.argv.push("--output-format".to_string());
                spec.argv.push("json".to_string());
                spec.argv.push("--dangerously-skip-permissions".to_string());
                if let Some(model) = &ctx.model {
                    spec.argv.push("--model".to_string());
                    spec.argv.push(model.clone());
                }
                if argv_fits {
                    spec.argv.push(prompt.to_string());
                } else {
                    spec.stdin_bytes = Some(prompt.as_bytes().to_vec());
                }
            }
            Self::Aider => {
                spec.argv.push("--yes-always".to_string());
                spec.argv.push("--no-auto-commits".to_string());
                spec.argv.push("--no-stream".to_string());
                if let Some(model) = &ctx.model {
                    spec.argv.push("--model".to_string());
                    spec.argv.push(model.clone());
                }
                // Aider reads the task from --message; oversized prompts go
                // through a message file it reads itself.
                if argv_fits {
                    spec.argv.push("--message".to_string());
                    spec.argv.push(prompt.to_string());
                } else {
                    let path = write_prompt_file(prompt)?;
                    spec.argv.push("--message-file".to_string());
                    spec.argv.push(path.to_string_lossy().into_owned());
                }
            }
            Self::Opencode => {
                spec.argv.push("run".to_string());
                if let Some(model) = &ctx.model {
                    spec.argv.push("--model".to_string());
                    spec.argv.push(namespaced_model(model));
                }
                // Opencode only takes the prompt as an argument.
                spec.argv.push(prompt.to_string());
            }
            Self::Gemini | Self::Qwen => {
                spec.argv.push("--yolo".to_string());
                if let Some(model) = &ctx.model {
                    spec.argv.push("--model".to_string());
                    spec.argv.push(model.clone());
                }
                if argv_fits {
                    spec.argv.push("--prompt".to_string());
                    spec.argv.push(prompt.to_string());
                } else {
                    spec.stdin_bytes = Some(prompt.as_bytes().to_vec());
                }
            }
            Self::Generic => {
                spec.stdin_bytes = Some(prompt.as_bytes().to_vec());
            }
        }

        debug!(
            adapter = self.name(),
            argv_len = spec.argv.len(),
            stdin = spec.stdin_bytes.is_some(),
            "built child command"
        );
        Ok(spec)
    }
}

/// Opencode addresses models as `provider/model`; bare names default to the
/// anthropic namespace.
fn namespaced_model(model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("anthropic/{model}")
    }
}

/// Persist an oversized prompt where the child can read it. The file is
/// left behind deliberately; the OS temp dir owns its lifetime.
fn write_prompt_file(prompt: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!(
        "crew-prompt-{}-{}.md",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    ));
    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create prompt file {}", path.display()))?;
    file.write_all(prompt.as_bytes())
        .with_context(|| format!("failed to write prompt file {}", path.display()))?;
    Ok(path)
}
