//! Shell tool - execute commands

use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::debug;

use super::{
    capture_output, classify_kubectl, command_arg, is_interactive_kubectl, ModifiesResource, Tool,
};
use crate::error::Error;
use crate::Result;

/// Programs that take over the terminal.
const INTERACTIVE_PATTERN: &str =
    r"(^|[;&|\n]\s*)(sudo\s+)?(vi|vim|nvim|nano|emacs|less|more|top|htop|watch|ssh|man)(\s|$)";

/// Execute shell commands
pub struct BashTool {
    kubeconfig: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    interactive: Regex,
    chained: Regex,
}

impl BashTool {
    pub fn new(kubeconfig: Option<PathBuf>, work_dir: Option<PathBuf>) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Tool(format!("invalid pattern: {}", e)))
        };
        Ok(Self {
            kubeconfig,
            work_dir,
            interactive: compile(INTERACTIVE_PATTERN)?,
            chained: compile(r"[;&|`<>\n\r]|\$\(")?,
        })
    }

    /// A lone kubectl invocation on one line, without pipes, chaining or
    /// redirection.
    fn single_kubectl<'a>(&self, command: &'a str) -> Option<&'a str> {
        let trimmed = command.trim();
        let first = trimmed.split_whitespace().next()?;
        let base = first.rsplit('/').next().unwrap_or(first);
        (base == "kubectl" && !self.chained.is_match(trimmed)).then_some(trimmed)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Executes a bash command. Use this for shell pipelines, file inspection \
         or tools other than kubectl. Interactive programs are not supported."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value> {
        let command = command_arg(args)?;
        debug!(command, "running bash");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }
        capture_output(cmd, self.work_dir.as_deref()).await
    }

    fn is_interactive(&self, args: &Map<String, Value>) -> Result<bool> {
        let command = command_arg(args)?;
        if let Some(kubectl) = self.single_kubectl(command) {
            return Ok(is_interactive_kubectl(kubectl));
        }
        Ok(self.interactive.is_match(command))
    }

    fn check_modifies_resource(&self, args: &Map<String, Value>) -> ModifiesResource {
        match command_arg(args) {
            Ok(command) => match self.single_kubectl(command) {
                Some(kubectl) => classify_kubectl(kubectl),
                None => ModifiesResource::Unknown,
            },
            Err(_) => ModifiesResource::Unknown,
        }
    }
}
