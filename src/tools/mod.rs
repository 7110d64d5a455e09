//! Tools module - agent capabilities
//!
//! Tools are external actions the agent can take against the cluster or
//! the local shell. Each tool reports whether a given invocation modifies
//! resources, which decides whether the operator is asked first.

mod bash;
mod kubectl;
mod registry;

pub use bash::BashTool;
pub use kubectl::{classify_kubectl, is_interactive_kubectl, KubectlTool};
pub use registry::ToolRegistry;

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::agent::llm::FunctionDefinition;
use crate::error::Error;
use crate::Result;

/// Whether an invocation changes external state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifiesResource {
    Yes,
    No,
    Unknown,
}

impl ModifiesResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModifiesResource::Yes => "yes",
            ModifiesResource::No => "no",
            ModifiesResource::Unknown => "unknown",
        }
    }

    /// Anything that is not a definite "no" goes through approval.
    pub fn needs_approval(&self) -> bool {
        !matches!(self, ModifiesResource::No)
    }
}

impl fmt::Display for ModifiesResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with decoded arguments
    async fn run(&self, args: &Map<String, Value>) -> Result<Value>;

    /// Tools that need a terminal cannot run in automated mode
    fn is_interactive(&self, _args: &Map<String, Value>) -> Result<bool> {
        Ok(false)
    }

    fn check_modifies_resource(&self, args: &Map<String, Value>) -> ModifiesResource;

    /// Convert to function definition for the model
    fn function_definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Fetch the required `command` argument.
pub(crate) fn command_arg(args: &Map<String, Value>) -> Result<&str> {
    args.get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Tool("Missing 'command' parameter".to_string()))
}

/// Run a prepared command and capture `{stdout, stderr, exit_code}`.
///
/// A non-zero exit is still a result: the model gets to read stderr.
pub(crate) async fn capture_output(mut command: Command, work_dir: Option<&Path>) -> Result<Value> {
    if let Some(dir) = work_dir {
        command.current_dir(dir);
    }
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Tool(format!("Failed to execute command: {}", e)))?;

    Ok(json!({
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "exit_code": output.status.code().unwrap_or(-1),
    }))
}

/// Split a command line into words, honouring single and double quotes.
pub(crate) fn split_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
pub use fake::FakeTool;
