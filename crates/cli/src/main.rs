use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::client::{ChatClient, GatewayClient};
use lib::store::StorageService;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "chatrelay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and the data directory.
    Init {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway (HTTP relay to the upstream completion API).
    Gateway {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 3001)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat through the gateway (interactive). Type /new for a fresh session, /exit to quit.
    Chat {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Optional existing session id to continue.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// List sessions, most recently updated first.
    Sessions {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the messages of a session.
    History {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(value_name = "ID")]
        session: String,
    },

    /// Delete a session and all of its messages.
    DeleteSession {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(value_name = "ID")]
        session: String,
    },

    /// Change the title of a session.
    RenameSession {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(value_name = "ID")]
        session: String,

        #[arg(value_name = "TITLE")]
        title: String,
    },

    /// Export every collection as JSON (stdout unless --output is given).
    Export {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Import collections from an exported JSON file.
    Import {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show message, session and library totals and the storage size.
    Stats {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Write a timestamped snapshot of every collection under <data dir>/backups.
    Backup {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Delete backups older than the retention period.
    PruneBackups {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Days to keep (default from storage.backupRetentionDays or 7)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("chatrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config).map_err(|e| ("init", e)),
        Some(Commands::Gateway { config, port }) => {
            run_gateway(config, port).await.map_err(|e| ("gateway", e))
        }
        Some(Commands::Chat { config, session }) => {
            run_chat(config, session).await.map_err(|e| ("chat", e))
        }
        Some(Commands::Sessions { config }) => run_sessions(config).map_err(|e| ("sessions", e)),
        Some(Commands::History { config, session }) => {
            run_history(config, &session).map_err(|e| ("history", e))
        }
        Some(Commands::DeleteSession { config, session }) => {
            run_delete_session(config, &session).map_err(|e| ("delete-session", e))
        }
        Some(Commands::RenameSession {
            config,
            session,
            title,
        }) => run_rename_session(config, &session, &title).map_err(|e| ("rename-session", e)),
        Some(Commands::Export { config, output }) => {
            run_export(config, output).map_err(|e| ("export", e))
        }
        Some(Commands::Import { config, file }) => {
            run_import(config, &file).map_err(|e| ("import", e))
        }
        Some(Commands::Stats { config }) => run_stats(config).map_err(|e| ("stats", e)),
        Some(Commands::Backup { config }) => run_backup(config).map_err(|e| ("backup", e)),
        Some(Commands::PruneBackups { config, days }) => {
            run_prune_backups(config, days).map_err(|e| ("prune-backups", e))
        }
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err((command, e)) = result {
        log::error!("{} failed: {:#}", command, e);
        std::process::exit(1);
    }
}

/// Load config and open the disk store under the resolved data directory.
fn open_store(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(lib::config::Config, PathBuf, StorageService)> {
    let (config, path) = lib::config::load_config(config_path)?;
    let data_dir = lib::config::resolve_data_dir(&config, &path);
    log::debug!("using data directory {}", data_dir.display());
    let store = StorageService::on_disk(&data_dir);
    Ok((config, data_dir, store))
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let data_dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    println!("data directory: {}", data_dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, _) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    lib::gateway::run_gateway(config).await
}

async fn run_chat(config_path: Option<PathBuf>, session: Option<String>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _, store) = open_store(config_path)?;
    let url = lib::config::resolve_gateway_url(&config);
    log::info!("chatting via {}", url);
    let client = ChatClient::new(store, GatewayClient::new(url))
        .with_context_window(config.client.context_window);

    let mut current_session = session;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/new") {
            current_session = None;
            println!("(new session)");
            continue;
        }

        match client.send(current_session.as_deref(), input).await {
            Ok(outcome) => {
                current_session = Some(outcome.session_id);
                match outcome.error {
                    Some(_) => eprintln!("! {}", outcome.reply.content),
                    None => println!("< {}", outcome.reply.content.trim()),
                }
            }
            Err(e) => eprintln!("chat error: {}", e.user_message()),
        }
    }

    Ok(())
}

fn run_sessions(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    let mut sessions = store.all_sessions();
    sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    if sessions.is_empty() {
        println!("no sessions");
    }
    for s in sessions {
        println!(
            "{}  {}  {} message(s)  {}",
            s.id,
            s.last_updated.format("%Y-%m-%d %H:%M"),
            s.message_count,
            s.title
        );
    }
    Ok(())
}

fn run_history(config_path: Option<PathBuf>, session: &str) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    let messages = store.messages_by_session(session);
    if messages.is_empty() {
        anyhow::bail!("no messages for session {}", session);
    }
    for m in messages {
        let who = if m.is_user { ">" } else { "<" };
        println!("[{}] {} {}", m.timestamp.format("%H:%M"), who, m.content);
    }
    Ok(())
}

fn run_delete_session(config_path: Option<PathBuf>, session: &str) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    if store.session(session).is_none() {
        anyhow::bail!("session not found: {}", session);
    }
    store.delete_session(session)?;
    println!("deleted session {}", session);
    Ok(())
}

fn run_rename_session(
    config_path: Option<PathBuf>,
    session: &str,
    title: &str,
) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    if !store.update_session_title(session, title)? {
        anyhow::bail!("session not found: {}", session);
    }
    println!("renamed session {}", session);
    Ok(())
}

fn run_export(config_path: Option<PathBuf>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    let json = store.export_data()?;
    match output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            println!("exported to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_import(config_path: Option<PathBuf>, file: &std::path::Path) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    let json =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    store.import_data(&json)?;
    println!("imported {}", file.display());
    Ok(())
}

fn run_stats(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, _, store) = open_store(config_path)?;
    let stats = store.data_stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_backup(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, data_dir, store) = open_store(config_path)?;
    let path = lib::store::create_backup(&store, &data_dir)?;
    println!("backup written to {}", path.display());
    Ok(())
}

fn run_prune_backups(config_path: Option<PathBuf>, days: Option<u32>) -> anyhow::Result<()> {
    let (config, data_dir, _) = open_store(config_path)?;
    let days = days.unwrap_or(config.storage.backup_retention_days);
    let removed = lib::store::clean_old_backups(&data_dir, days)?;
    println!("removed {} backup(s) older than {} day(s)", removed, days);
    Ok(())
}
