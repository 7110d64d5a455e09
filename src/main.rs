//! Steward CLI entry point

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use steward::adapters::CliChannel;
use steward::agent::{AgentLoop, AgentOptions, ChatLogger, Context, ProviderRegistry, RetryPolicy};
use steward::config::{self, Config};
use steward::journal::{FileRecorder, JournalingClient, NoopRecorder, Recorder};
use steward::sessions::{ChatMessageStore, InMemoryChatStore, Metadata, Session, SessionManager};
use steward::tools::ToolRegistry;
use steward::ui;

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Steward - drive an LLM through infrastructure tasks with your approval")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Query to run; starts the REPL with it when not quiet
    query: Option<String>,

    /// Run the query once and print only the model's answer
    #[arg(short, long, requires = "query")]
    quiet: bool,

    /// LLM provider (openai, openai-compat, gemini)
    #[arg(long)]
    provider: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Maximum model calls per query
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Run resource-modifying commands without asking
    #[arg(long)]
    skip_permissions: bool,

    /// Resume a session by ID, or "latest"
    #[arg(long, value_name = "ID", conflicts_with_all = ["new_session", "no_session"])]
    resume_session: Option<String>,

    /// Start a fresh session (the default)
    #[arg(long, conflicts_with = "no_session")]
    new_session: bool,

    /// Keep history in memory only
    #[arg(long)]
    no_session: bool,

    /// Path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the configuration file
    Init,

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List saved sessions, newest first
    List,
    /// Show a session's metadata
    Show { id: String },
    /// Delete a session and its history
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so quiet output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);

    match &cli.command {
        Some(Commands::Init) => {
            config::onboard(&config_path)?;
        }
        Some(Commands::Sessions { action }) => {
            let config = config::load(&config_path)?;
            run_sessions(&config, action)?;
        }
        None => {
            let mut config = config::load(&config_path)?;
            apply_overrides(&mut config, &cli);
            run_agent(config, &cli).await?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(provider) = &cli.provider {
        config.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(max) = cli.max_iterations {
        config.max_iterations = max;
    }
    if cli.skip_permissions {
        config.skip_permissions = true;
    }
}

fn run_sessions(config: &Config, action: &SessionsCommand) -> Result<()> {
    let manager = SessionManager::new(&config.session_root)?;
    match action {
        SessionsCommand::List => {
            let sessions = manager.list_sessions()?;
            if sessions.is_empty() {
                ui::print_step(&format!(
                    "No sessions yet in {}",
                    manager.base_path().display()
                ));
            }
            for session in sessions {
                match session.load_metadata() {
                    Ok(meta) => println!(
                        "{}  {}/{}  {} messages  last used {}",
                        session.id,
                        meta.provider_id,
                        meta.model_id,
                        meta.message_count,
                        meta.last_accessed.format("%Y-%m-%d %H:%M")
                    ),
                    Err(e) => println!("{}  (unreadable metadata: {})", session.id, e),
                }
            }
        }
        SessionsCommand::Show { id } => {
            let (session, metadata) = manager.session_info(id)?;
            println!("ID: {}", session.id);
            println!("Path: {}", session.path.display());
            print!("{}", metadata);
        }
        SessionsCommand::Delete { id } => {
            manager.delete_session(id)?;
            ui::print_success(&format!("Deleted session {}", id));
        }
    }
    Ok(())
}

fn open_session(config: &Config, cli: &Cli, provider_id: &str) -> Result<Option<Arc<Session>>> {
    if cli.no_session {
        return Ok(None);
    }
    let manager = SessionManager::new(&config.session_root)
        .with_context(|| format!("cannot open {}", config.session_root.display()))?;

    let session = match cli.resume_session.as_deref() {
        Some("latest") => match manager.latest_session()? {
            Some(session) => session,
            None => bail!("no session to resume"),
        },
        Some(id) => manager.find_session_by_id(id)?,
        None => manager.new_session(Metadata::new(provider_id, &config.model))?,
    };
    session.update_last_accessed()?;
    Ok(Some(Arc::new(session)))
}

fn build_transport(config: &Config) -> Result<JournalingClient> {
    let recorder: Arc<dyn Recorder> = match &config.journal_path {
        Some(path) => Arc::new(
            FileRecorder::new(path)
                .with_context(|| format!("cannot open journal {}", path.display()))?,
        ),
        None => Arc::new(NoopRecorder),
    };
    Ok(JournalingClient::new(reqwest::Client::new(), recorder))
}

/// First Ctrl+C cancels the agent, a second within three seconds exits.
fn install_interrupt_handler(cancel: CancellationToken) {
    let armed = Arc::new(AtomicBool::new(false));
    let result = ctrlc::set_handler(move || {
        if armed.swap(true, Ordering::SeqCst) {
            eprintln!();
            std::process::exit(130);
        }
        cancel.cancel();
        ui::print_warning("Cancelled. Press Ctrl+C again to exit");

        let armed = armed.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            armed.store(false, Ordering::SeqCst);
        });
    });
    if let Err(e) = result {
        tracing::warn!("failed to install Ctrl+C handler: {}", e);
    }
}

async fn run_agent(config: Config, cli: &Cli) -> Result<()> {
    let tools = ToolRegistry::new_with_defaults(&config)?;
    let context = Context::new(&config, &tools);
    let client = ProviderRegistry::create(&config, build_transport(&config)?)?;
    let session = open_session(&config, cli, client.provider_id())?;

    let mut chat = client.start_chat(&context.build_system_prompt(), &config.model);
    let store: Arc<dyn ChatMessageStore> = match &session {
        Some(session) => {
            chat = Box::new(ChatLogger::new(chat, Arc::new(session.transcript_store())));
            session.clone() as Arc<dyn ChatMessageStore>
        }
        None => Arc::new(InMemoryChatStore::new()),
    };

    let options = AgentOptions {
        provider_id: client.provider_id().to_string(),
        model: config.model.clone(),
        max_iterations: config.max_iterations,
        skip_permissions: config.skip_permissions,
        run_once: cli.quiet,
        retry: RetryPolicy::from_config(&config.retry),
        pricing: config.pricing.clone(),
    };

    let mut agent = AgentLoop::new(chat, tools, store, options);
    if let Some(session) = &session {
        agent = agent.with_session(session.clone());
    }
    agent.init()?;

    if !cli.quiet {
        ui::print_banner(
            &config.model,
            client.provider_id(),
            session.as_ref().map(|s| s.id.as_str()),
        );
    }

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone());

    let handle = agent.run(cancel, cli.query.clone());
    CliChannel::new(cli.quiet).run(handle).await?;
    Ok(())
}
