use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hardcore_cards::config::{CardsConfig, CliOverrides};

mod cmd;

#[derive(Parser)]
#[command(name = "cards")]
#[command(version, about = "Terminal client for Hardcore Cards kanban boards")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to cards.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Service root URL. Overrides cards.toml and CARDS_BASE_URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account
    Register {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Sign in with a username and password
    Login {
        #[arg(short, long)]
        username: Option<String>,

        /// Captcha answer, when the service asks for one
        #[arg(long)]
        captcha: Option<String>,
    },
    /// Forget the saved session
    Logout,
    /// Show who the saved session belongs to
    Whoami,
    /// List your boards
    Boards,
    /// Print a board's columns and cards
    Show { board: i64 },
    /// Move a column to a new index
    MoveColumn { board: i64, from: usize, to: usize },
    /// Move a card within or across columns
    MoveCard {
        board: i64,
        from_column: i64,
        from_index: usize,
        to_column: i64,
        to_index: usize,
    },
    /// Full-text search across your boards and cards
    Search { text: String },
    /// List, send or answer board invitations
    Invitations {
        #[command(subcommand)]
        command: Option<InvitationCommands>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum InvitationCommands {
    /// Invitations you sent or received
    List,
    /// Invite someone to a board by their account email
    Send { board: i64, email: String },
    /// Join the board an invitation is for
    Accept { id: i64 },
    Decline { id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Check the configuration for mistakes
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CardsConfig::resolve(&CliOverrides {
        config_path: cli.config.clone(),
        base_url: cli.base_url.clone(),
        verbose: cli.verbose,
        json_logs: cli.json_logs,
    })?;
    let _log_guard =
        hardcore_cards::logging::init_tracing(&config.log_filter, config.json_logs, config.log_dir())?;

    match &cli.command {
        Commands::Register { username } => {
            cmd::cmd_register(&config, username.as_deref()).await?
        }
        Commands::Login { username, captcha } => {
            cmd::cmd_login(&config, username.as_deref(), captcha.as_deref()).await?
        }
        Commands::Logout => cmd::cmd_logout(&config)?,
        Commands::Whoami => cmd::cmd_whoami(&config)?,
        Commands::Boards => cmd::cmd_boards(&config).await?,
        Commands::Show { board } => cmd::cmd_show(&config, *board).await?,
        Commands::MoveColumn { board, from, to } => {
            cmd::cmd_move_column(&config, *board, *from, *to).await?
        }
        Commands::MoveCard {
            board,
            from_column,
            from_index,
            to_column,
            to_index,
        } => {
            cmd::cmd_move_card(
                &config,
                *board,
                (*from_column, *from_index),
                (*to_column, *to_index),
            )
            .await?
        }
        Commands::Search { text } => cmd::cmd_search(&config, text).await?,
        Commands::Invitations { command } => {
            cmd::cmd_invitations(&config, command.clone()).await?
        }
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
