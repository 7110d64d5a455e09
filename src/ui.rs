use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use terminal_size::{terminal_size, Height, Width};

use crate::agent::{Message, MessageSource, MessageType, ToolCallRequest, ToolCallResponse};

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize)
}

pub fn print_header(title: &str) {
    let line = rule();
    println!("{}", line.black().bold());
    let name = "Steward".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}  {}", name, version, title.cyan());
    println!("{}", line.black().bold());
}

pub fn print_banner(model: &str, provider: &str, session: Option<&str>) {
    let line = rule();
    println!("{}", line.black().bold());

    let name = "Steward".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    // Model + Provider Info
    let info = format!("  {}  •  {}", model, provider).cyan();
    println!("{}", info);

    match session {
        Some(id) => println!("  {}", format!("session {}", id).black().bold()),
        None => println!("  {}", "no session (history is not saved)".black().bold()),
    }

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    eprintln!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "❌".red().bold(), msg.red());
}

/// Spinner shown while the model works.
pub fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("  {spinner:.magenta} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Print one agent message. Input and choice requests are handled by the
/// caller, not rendered here.
pub fn render_message(message: &Message, quiet: bool) {
    match message.message_type {
        MessageType::Text => {
            let Some(text) = message.payload_text() else {
                return;
            };
            match message.source {
                // The operator already sees what they typed.
                MessageSource::User => {}
                MessageSource::Agent if !quiet => println!("{}", text.cyan()),
                MessageSource::Agent => {}
                MessageSource::Model => println!("\n{}\n", text),
            }
        }
        MessageType::Error => {
            print_error(message.payload_text().unwrap_or("unknown error"));
        }
        MessageType::ToolCallRequest if !quiet => {
            if let Some(request) = message.payload_as::<ToolCallRequest>() {
                println!("  {} {}", "→".blue().bold(), request.description.bold());
            }
        }
        MessageType::ToolCallResponse if !quiet => {
            if let Some(response) = message.payload_as::<ToolCallResponse>() {
                render_tool_response(&response);
            }
        }
        _ => {}
    }
}

fn render_tool_response(response: &ToolCallResponse) {
    if response.declined {
        let reason = response.result["error"].as_str().unwrap_or("declined");
        println!("  {} {}", "✗".yellow().bold(), reason.yellow());
        return;
    }
    if let Some(error) = &response.error {
        println!("  {} {}", "✗".red().bold(), error.red());
        return;
    }
    match response.result.get("exit_code").and_then(|c| c.as_i64()) {
        Some(0) | None => println!("  {} {}", "✓".green(), "done".black().bold()),
        Some(code) => println!("  {} {}", "✗".red(), format!("exit code {}", code).red()),
    }
}
