//! # Refinery Eye CLI (`reye`)
//!
//! Runs the inspection server and manages saved reports.
//!
//! ## Usage
//!
//! ```bash
//! reye --config ./config/reye.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reye init` | Create the SQLite database and run schema migrations |
//! | `reye serve` | Start the HTTP server |
//! | `reye hash-password <pw>` | Print a salt and hash for `[auth]` |
//! | `reye inspect <video>` | Upload, analyze, and save against a running server |
//! | `reye reports list` | Newest saved reports |
//! | `reye reports get <id>` | Print one report |
//! | `reye reports delete <id>` | Delete one report |
//! | `reye reports export <id>` | Write a Markdown or JSON document |
//!
//! ## Logging
//!
//! Output goes through `tracing`. Set `RUST_LOG` to override the default
//! filter (`refinery_eye=info,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use refinery_eye::export::ExportFormat;
use refinery_eye::{client, config, migrate, reports_cmd, server, session};

/// Refinery Eye: AI-assisted video inspection of refinery instrumentation.
#[derive(Parser)]
#[command(name = "reye", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reye.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print `salt` and `password_hash` values for the `[auth]` section.
    HashPassword {
        password: String,

        /// Hex salt to reuse; a fresh one is generated when omitted.
        #[arg(long)]
        salt: Option<String>,
    },

    /// Run one inspection against a running server and save the report.
    Inspect {
        /// Walkthrough video to analyze.
        video: PathBuf,

        /// Reference standard (PDF). Repeatable.
        #[arg(long = "reference")]
        references: Vec<PathBuf>,

        /// Reference URL cited to the model. Repeatable.
        #[arg(long = "link")]
        links: Vec<String>,

        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Defaults to `[auth].username`.
        #[arg(long)]
        username: Option<String>,

        /// Environment variable holding the password.
        #[arg(long, default_value = "REYE_PASSWORD")]
        password_env: String,

        /// Analyze without references without asking.
        #[arg(long, short)]
        yes: bool,
    },

    /// Saved report management.
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },
}

#[derive(Subcommand)]
enum ReportsAction {
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Get {
        id: String,
    },
    Delete {
        id: String,
    },
    Export {
        id: String,

        /// `markdown` or `json`.
        #[arg(long, default_value = "markdown")]
        format: String,

        /// File to write; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("refinery_eye=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::HashPassword { password, salt } = &cli.command {
        let salt = salt.clone().unwrap_or_else(session::generate_salt);
        let hash = session::hash_password(password, &salt)?;
        println!("salt = \"{}\"", salt);
        println!("password_hash = \"{}\"", hash);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::HashPassword { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Inspect {
            video,
            references,
            links,
            server,
            username,
            password_env,
            yes,
        } => {
            let password = std::env::var(&password_env)
                .map_err(|_| anyhow::anyhow!("{} environment variable not set", password_env))?;
            client::run_inspect(client::InspectOptions {
                server: &server,
                username: username.as_deref().unwrap_or(&cfg.auth.username),
                password: &password,
                video: &video,
                references: &references,
                links: &links,
                max_video_bytes: cfg.uploads.max_video_bytes,
                assume_yes: yes,
            })
            .await?;
        }
        Commands::Reports { action } => match action {
            ReportsAction::List { limit } => {
                reports_cmd::run_list(&cfg, limit).await?;
            }
            ReportsAction::Get { id } => {
                reports_cmd::run_get(&cfg, &id).await?;
            }
            ReportsAction::Delete { id } => {
                reports_cmd::run_delete(&cfg, &id).await?;
            }
            ReportsAction::Export { id, format, output } => {
                let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
                reports_cmd::run_export(&cfg, &id, format, output.as_deref()).await?;
            }
        },
    }

    Ok(())
}
