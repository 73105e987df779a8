//! Main entry point for the Teletasker CLI.

use std::{io, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use client::view::{SortOrder, TaskFilter};
use dotenv::dotenv;
use shared::{
    config::{Config, ConfigOverrides},
    models::ChatId,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod commands;

/// Teletasker CLI
#[derive(Parser)]
#[command(name = "teletasker")]
#[command(about = "Command-line client for the Teletasker task extraction backend", long_about = None)]
struct Cli {
    /// Path to the configuration file (optional)
    #[arg(
        long,
        short,
        global = true,
        help = "Path to the configuration file (yaml, json or toml). If not provided, defaults and TELETASKER_* variables are used."
    )]
    config: Option<PathBuf>,

    /// Backend base URL overriding the configuration
    #[arg(
        long,
        global = true,
        help = "Backend base URL overriding the configuration (e.g., https://tasks.example.com)"
    )]
    server: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the Teletasker CLI
#[derive(Subcommand)]
enum Commands {
    /// Store the bearer token used for every backend call
    Login {
        #[arg(long, short, help = "Bearer token issued by the auth provider")]
        token: String,
    },
    /// Remove the stored bearer token
    Logout,
    /// Show whether the backend holds a logged-in Telegram session
    Account,
    /// List monitored chats
    Chats {
        #[arg(long, help = "List every chat the Telegram account can see; monitored ones are marked with *")]
        available: bool,
    },
    /// Start monitoring one or more chats
    Monitor {
        #[arg(required = true, allow_negative_numbers = true, value_parser = ChatId::from_str, help = "Chat identifiers to monitor")]
        chat_ids: Vec<ChatId>,
    },
    /// Stop monitoring a chat and drop its cached tasks
    Unmonitor {
        #[arg(allow_negative_numbers = true, value_parser = ChatId::from_str, help = "Chat identifier to stop monitoring")]
        chat_id: ChatId,
    },
    /// Show the processing status of a chat
    Status {
        #[arg(long, allow_negative_numbers = true, value_parser = ChatId::from_str, help = "Chat identifier to query")]
        chat: ChatId,
    },
    /// List extracted tasks, waiting for processing to finish
    Tasks {
        #[arg(long, allow_negative_numbers = true, value_parser = ChatId::from_str, help = "Only show tasks of this chat (default: all monitored chats)")]
        chat: Option<ChatId>,

        #[arg(long, short, default_value = "all", help = "Status filter: all, pending or completed")]
        filter: TaskFilter,

        #[arg(long, short, default_value = "newest", help = "Sort order: newest or oldest")]
        sort: SortOrder,

        #[arg(long, default_value_t = 120, help = "Seconds to wait for processing before printing what is available")]
        timeout: u64,
    },
    /// Mark a task as completed
    Complete {
        #[arg(help = "Task identifier")]
        task_id: String,

        #[arg(long, help = "Mark the task as pending again")]
        undo: bool,
    },
    /// Print tasks as a plain-text block for sharing
    Copy {
        #[arg(long, allow_negative_numbers = true, value_parser = ChatId::from_str, help = "Only copy tasks of this chat (default: all monitored chats)")]
        chat: Option<ChatId>,

        #[arg(long, default_value_t = 120, help = "Seconds to wait for processing before copying what is available")]
        timeout: u64,
    },
    /// Follow live updates until Ctrl+C
    Watch {
        #[arg(long, allow_negative_numbers = true, value_parser = ChatId::from_str, help = "Chat to select (default: all monitored chats)")]
        chat: Option<ChatId>,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: Shell,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml, json or toml). Defaults to yaml.
        #[arg(
            long,
            short,
            help = "Format of the configuration file to generate (yaml, json or toml). Defaults to yaml."
        )]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    // Commands that never reach the backend skip configuration loading.
    match cli.command {
        Commands::Login { token } => return commands::session::login(&token),
        Commands::Logout => return commands::session::logout(),
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
            return Ok(());
        }
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            return commands::config::generate_config(&format);
        }
        _ => {}
    }

    let config = Config::load_config(
        cli.config,
        ConfigOverrides {
            api_base_url: cli.server,
            log_level: None,
        },
    )
    .context("failed to load configuration")?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Account => commands::account::status(&config).await,
        Commands::Chats { available: false } => commands::chats::list(&config).await,
        Commands::Chats { available: true } => commands::chats::available(&config).await,
        Commands::Monitor { chat_ids } => commands::chats::monitor(&config, &chat_ids).await,
        Commands::Unmonitor { chat_id } => commands::chats::unmonitor(&config, &chat_id).await,
        Commands::Status { chat } => commands::chats::status(&config, &chat).await,
        Commands::Tasks {
            chat,
            filter,
            sort,
            timeout,
        } => {
            commands::tasks::list(&config, chat, filter, sort, Duration::from_secs(timeout)).await
        }
        Commands::Complete { task_id, undo } => {
            commands::tasks::complete(&config, &task_id, !undo).await
        }
        Commands::Copy { chat, timeout } => {
            commands::tasks::copy(&config, chat, Duration::from_secs(timeout)).await
        }
        Commands::Watch { chat } => commands::watch::run(&config, chat).await,
        Commands::Login { .. }
        | Commands::Logout
        | Commands::Completion { .. }
        | Commands::Config { .. } => Ok(()),
    }
}

/// Logs go to stderr so command output stays pipeable. `RUST_LOG` wins over
/// the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}
