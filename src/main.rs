use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use worklog::accessor::MessageAccessor;
use worklog::config::Config;
use worklog::db::{call_blocking, StoredMessage};
use worklog::runtime::{self, AppState};
use worklog::{logging, migrations};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    name = "worklog",
    version = VERSION,
    about = "Maintenance tool for the work-log assistant's local chat history"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Apply pending schema migrations
    Migrate,
    /// Show binary and schema versions
    Version,
    /// Print a page of a user's history, counted from the newest message
    History {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Case-insensitive search over a user's messages
    Search {
        #[arg(long)]
        user: String,
        query: String,
    },
    /// Export a user's history as JSON (stdout unless --out is given)
    Export {
        #[arg(long)]
        user: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a JSON export into a user's history
    Import {
        #[arg(long)]
        user: String,
        file: PathBuf,
    },
    /// Delete one message owned by the user
    Delete {
        #[arg(long)]
        user: String,
        id: i64,
    },
    /// Delete all messages of a user
    Clear {
        #[arg(long)]
        user: String,
    },
    /// Delete the whole local store and recreate it empty
    Reset {
        /// Required; the operation cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Print the last lines of the log files
    Logs {
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
}

fn print_messages(messages: &[StoredMessage]) {
    if messages.is_empty() {
        println!("(no messages)");
        return;
    }
    for msg in messages {
        println!(
            "#{:<6} {} [{}] {}",
            msg.id,
            worklog::time::format_timestamp(&msg.created_at),
            msg.role,
            msg.content
        );
    }
}

async fn open_history(config: Config) -> anyhow::Result<AppState> {
    let state = runtime::bootstrap(config).await?;
    if !state.history_available {
        anyhow::bail!(
            "chat history store under {} is unavailable",
            state.config.data_dir
        );
    }
    Ok(state)
}

fn accessor_for(state: &AppState, user: &str) -> anyhow::Result<MessageAccessor> {
    Ok(MessageAccessor::new(state.db.clone(), user)?
        .with_max_messages(state.config.max_messages_per_user))
}

async fn print_version(config: &Config) -> anyhow::Result<()> {
    println!("worklog {VERSION}");
    let db = Arc::new(config.database());
    let current = call_blocking(db.clone(), |db| {
        db.open()?;
        migrations::current_version(db)
    })
    .await;
    match current {
        Ok(v) => println!(
            "schema v{v} (expected v{})",
            migrations::EXPECTED_SCHEMA_VERSION
        ),
        Err(e) => println!("schema unknown: {e}"),
    }
    db.close();
    Ok(())
}

async fn run_command(config: Config, command: MainCommand) -> anyhow::Result<()> {
    match command {
        MainCommand::Version => print_version(&config).await?,
        MainCommand::Logs { lines } => {
            let log_dir = logging::log_dir_for(&config.data_dir);
            for line in logging::read_last_lines_from_logs(&log_dir, lines)? {
                println!("{line}");
            }
        }
        MainCommand::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset chat history without --yes");
            }
            let db = Arc::new(config.database());
            let report = runtime::reset_history(db.clone()).await?;
            db.close();
            println!("Local chat history reset (schema v{}).", report.to);
        }
        MainCommand::Migrate => {
            let db = Arc::new(config.database());
            call_blocking(db.clone(), |db| db.open()).await?;
            let report = runtime::run_migrations(db.clone()).await?;
            if report.is_noop() {
                println!("Schema is up to date (v{}).", report.to);
            } else {
                println!("Migrated schema v{} -> v{}.", report.from, report.to);
            }
            db.close();
        }
        MainCommand::History {
            user,
            limit,
            offset,
        } => {
            let state = open_history(config).await?;
            let limit = limit.unwrap_or(state.config.default_page_size);
            let page = accessor_for(&state, &user)?
                .get_messages(limit, offset)
                .await?;
            print_messages(&page);
            state.db.close();
        }
        MainCommand::Search { user, query } => {
            let state = open_history(config).await?;
            let hits = accessor_for(&state, &user)?.search_messages(&query).await?;
            print_messages(&hits);
            state.db.close();
        }
        MainCommand::Export { user, out } => {
            let state = open_history(config).await?;
            let json = accessor_for(&state, &user)?.export_messages().await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    info!("Exported history of {user} to {}", path.display());
                    println!("Wrote {}", path.display());
                }
                None => println!("{json}"),
            }
            state.db.close();
        }
        MainCommand::Import { user, file } => {
            let state = open_history(config).await?;
            let payload = std::fs::read_to_string(&file)?;
            let count = accessor_for(&state, &user)?.import_messages(&payload).await?;
            info!("Imported {count} messages for {user} from {}", file.display());
            println!("Imported {count} messages.");
            state.db.close();
        }
        MainCommand::Delete { user, id } => {
            let state = open_history(config).await?;
            if accessor_for(&state, &user)?.delete_message(id).await? {
                println!("Deleted message #{id}.");
            } else {
                println!("No message #{id} for {user}.");
            }
            state.db.close();
        }
        MainCommand::Clear { user } => {
            let state = open_history(config).await?;
            let removed = accessor_for(&state, &user)?.clear_all_messages().await?;
            println!("Deleted {removed} messages.");
            state.db.close();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load()?;
    logging::init_logging(&config.log_settings())?;
    run_command(config, command).await
}
