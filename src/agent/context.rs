//! Context builder for the system prompt.
//!
//! Extra instructions are read once at construction.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::Config;
use crate::tools::ToolRegistry;

/// Everything the system prompt is built from.
pub struct Context {
    tool_names: Vec<String>,
    work_dir: Option<PathBuf>,
    kubeconfig: Option<PathBuf>,
    /// Cached extra instructions (loaded at construction).
    cached_extra: String,
}

impl Context {
    /// Create a new context from configuration.
    pub fn new(config: &Config, tools: &ToolRegistry) -> Self {
        let cached_extra = config
            .extra_prompt_path
            .as_deref()
            .map(load_extra_instructions)
            .unwrap_or_default();

        Self {
            tool_names: tools.names(),
            work_dir: config.work_dir.clone(),
            kubeconfig: config.kubeconfig.clone(),
            cached_extra,
        }
    }

    /// Build the system prompt.
    pub fn build_system_prompt(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        parts.push(self.get_identity());
        parts.push(self.get_environment());

        if !self.cached_extra.trim().is_empty() {
            parts.push(format!("# Additional instructions\n\n{}", self.cached_extra.trim()));
        }

        parts.join("\n\n---\n\n")
    }

    fn get_identity(&self) -> String {
        let tools = if self.tool_names.is_empty() {
            "(none)".to_string()
        } else {
            self.tool_names
                .iter()
                .map(|name| format!("- `{}`", name))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"# Steward

You are Steward, an assistant that operates Kubernetes clusters and related
infrastructure on behalf of the operator.

## Tools
You have access to these tools:
{}

## How to work
- Gather facts with read-only commands before changing anything.
- Commands that modify resources are shown to the operator for approval.
  If the operator declines, do not retry the same command; explain what
  you would have done and ask how to proceed.
- Never use interactive commands (exec -it, edit, port-forward). Use
  their non-interactive equivalents.
- When a tool returns an error, read it and adjust rather than repeating
  the same call.
- Finish with a short answer in plain text once the task is done."#,
            tools
        )
    }

    fn get_environment(&self) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        let mut lines = vec![format!("## Current Time\n{}", now)];
        if let Some(dir) = &self.work_dir {
            lines.push(format!("## Working Directory\n`{}`", dir.display()));
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            lines.push(format!("## Kubeconfig\n`{}`", kubeconfig.display()));
        }
        lines.join("\n\n")
    }
}

fn load_extra_instructions(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), "failed to read extra prompt: {}", e);
            String::new()
        }
    }
}
