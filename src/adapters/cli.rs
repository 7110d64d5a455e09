//! CLI adapter - interactive and single-query command line interface.
//!
//! Drives a running agent loop through its handle: renders what the
//! agent emits, prompts the operator for input and approvals, and
//! forwards the answers.

use indicatif::ProgressBar;
use inquire::{InquireError, Select, Text};
use tracing::debug;

use crate::agent::{AgentHandle, InboundMessage, MessageType, UserChoiceRequest};
use crate::error::Error;
use crate::ui;
use crate::Result;

/// CLI channel for agent sessions.
pub struct CliChannel {
    quiet: bool,
    spinner: Option<ProgressBar>,
}

impl CliChannel {
    /// Create a new CLI channel. Quiet mode prints only model output.
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            spinner: None,
        }
    }

    /// Serve the agent until it stops.
    pub async fn run(&mut self, mut handle: AgentHandle) -> Result<()> {
        while let Some(message) = handle.recv().await {
            self.stop_spinner();
            match message.message_type {
                MessageType::UserInputRequest => {
                    let query = match read_query().await? {
                        Some(query) => query,
                        None => "exit".to_string(),
                    };
                    if handle.send(InboundMessage::query(query)).await.is_err() {
                        break;
                    }
                    self.start_spinner();
                }
                MessageType::UserChoiceRequest => {
                    let Some(request) = message.payload_as::<UserChoiceRequest>() else {
                        debug!("malformed choice request");
                        continue;
                    };
                    let choice = read_choice(request).await?;
                    if handle.send(InboundMessage::choice(choice)).await.is_err() {
                        break;
                    }
                    self.start_spinner();
                }
                _ => ui::render_message(&message, self.quiet),
            }
        }
        self.stop_spinner();
        handle.join().await
    }

    fn start_spinner(&mut self) {
        if !self.quiet {
            self.spinner = Some(ui::thinking_spinner());
        }
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

fn prompt_error(e: InquireError) -> Error {
    Error::Other(format!("Prompt failed: {}", e))
}

/// `None` when the operator aborts the prompt.
async fn read_query() -> Result<Option<String>> {
    loop {
        let answer = tokio::task::spawn_blocking(|| Text::new(">>>").prompt())
            .await
            .map_err(|e| Error::Other(format!("input task failed: {}", e)))?;
        match answer {
            Ok(query) if query.trim().is_empty() => continue,
            Ok(query) => return Ok(Some(query)),
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                return Ok(None)
            }
            Err(e) => return Err(prompt_error(e)),
        }
    }
}

/// 1-based choice; aborting the prompt declines.
async fn read_choice(request: UserChoiceRequest) -> Result<usize> {
    let labels: Vec<String> = request.options.iter().map(|o| o.label.clone()).collect();
    let decline = labels.len();
    let answer = tokio::task::spawn_blocking(move || {
        Select::new(&request.prompt, labels).raw_prompt()
    })
    .await
    .map_err(|e| Error::Other(format!("input task failed: {}", e)))?;

    match answer {
        Ok(selected) => Ok(selected.index + 1),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(decline),
        Err(e) => Err(prompt_error(e)),
    }
}
