//! # kb
//!
//! CLI front-end for the knowledge base pipeline (§6 External Interfaces).
//! There is no wire protocol at the core layer; this binary is one of
//! potentially several callers (a web/HTTP surface is out of scope).

use clap::{Parser, Subcommand};
use knowbase::app::AppContext;
use knowbase::models::MimeFamily;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kb", about = "knowbase — a personal knowledge base with grounded RAG", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    /// User id to operate as (spaces and items are scoped per user)
    #[arg(long, global = true, default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Space operations
    Space {
        #[command(subcommand)]
        action: SpaceAction,
    },
    /// Item operations
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Query operations
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
    /// Administrative operations
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum SpaceAction {
    /// Create a space
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List spaces
    List,
    /// Show a single space
    Get { space_id: String },
    /// Update a space's name and/or description
    Update {
        space_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a space and everything in it
    Delete { space_id: String },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Save a plain-text message
    SaveMessage {
        space_id: String,
        text: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Save a file from disk
    SaveFile {
        space_id: String,
        path: PathBuf,
        /// Declared MIME family: plain, pdf, docx, image, unknown
        #[arg(long, default_value = "plain")]
        mime_family: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List items in a space
    List {
        space_id: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Delete an item
    Delete { space_id: String, item_id: String },
}

#[derive(Subcommand)]
enum QueryAction {
    /// Ask a grounded question against a space
    Ask {
        space_id: String,
        question: String,
        #[arg(long)]
        k: Option<usize>,
    },
    /// List query history for a space
    List {
        space_id: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Search for items within a single space without asking the LLM
    SearchSpace {
        space_id: String,
        text: String,
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
    /// Search across every space owned by the user
    SearchGlobal {
        text: String,
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Rebuild a user's vector index from stored item text under the
    /// current embedding configuration (after an embedding-model change).
    Reindex,
}

fn parse_mime_family(s: &str) -> anyhow::Result<MimeFamily> {
    match s {
        "plain" => Ok(MimeFamily::Plain),
        "pdf" => Ok(MimeFamily::Pdf),
        "docx" => Ok(MimeFamily::Docx),
        "image" => Ok(MimeFamily::Image),
        "unknown" => Ok(MimeFamily::Unknown),
        other => anyhow::bail!("unknown mime family: {other} (expected plain, pdf, docx, image, or unknown)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = knowbase::config::load_config(&cli.config)?;
    let app = AppContext::new(config)?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Space { action } => match action {
            SpaceAction::Create { name, description } => {
                let space = app.create_space(user, &name, description).await?;
                println!("{}", serde_json::to_string_pretty(&space)?);
            }
            SpaceAction::List => {
                let spaces = app.list_spaces(user).await?;
                println!("{}", serde_json::to_string_pretty(&spaces)?);
            }
            SpaceAction::Get { space_id } => {
                let space = app.get_space(user, &space_id).await?;
                println!("{}", serde_json::to_string_pretty(&space)?);
            }
            SpaceAction::Update { space_id, name, description } => {
                let space = app.update_space(user, &space_id, name, description).await?;
                println!("{}", serde_json::to_string_pretty(&space)?);
            }
            SpaceAction::Delete { space_id } => {
                app.delete_space(user, &space_id).await?;
                println!("Space {space_id} deleted.");
            }
        },
        Commands::Item { action } => match action {
            ItemAction::SaveMessage { space_id, text, notes } => {
                let item = app.save_message(user, &space_id, &text, notes).await?;
                println!("{}", serde_json::to_string_pretty(&item)?);
            }
            ItemAction::SaveFile { space_id, path, mime_family, notes } => {
                let mime_family = parse_mime_family(&mime_family)?;
                let bytes = tokio::fs::read(&path).await?;
                let original_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("upload")
                    .to_string();
                let item = app.save_file(user, &space_id, &bytes, mime_family, &original_name, notes).await?;
                println!("{}", serde_json::to_string_pretty(&item)?);
            }
            ItemAction::List { space_id, limit, offset } => {
                let items = app.list_items(user, &space_id, limit, offset).await?;
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
            ItemAction::Delete { space_id, item_id } => {
                app.delete_item(user, &space_id, &item_id).await?;
                println!("Item {item_id} deleted.");
            }
        },
        Commands::Query { action } => match action {
            QueryAction::Ask { space_id, question, k } => {
                let query = app.query(user, &space_id, &question, k).await?;
                println!("{}", serde_json::to_string_pretty(&query)?);
            }
            QueryAction::List { space_id, limit, offset } => {
                let queries = app.list_queries(user, &space_id, limit, offset).await?;
                println!("{}", serde_json::to_string_pretty(&queries)?);
            }
            QueryAction::SearchSpace { space_id, text, k } => {
                let hits = app.search_in_space(user, &space_id, &text, k).await?;
                println!("{}", serde_json::to_string_pretty(&hits)?);
            }
            QueryAction::SearchGlobal { text, k } => {
                let hits = app.global_search(user, &text, k).await?;
                println!("{}", serde_json::to_string_pretty(&hits)?);
            }
        },
        Commands::Admin { action } => match action {
            AdminAction::Reindex => {
                let count = app.reindex(user).await?;
                println!("Reindexed {count} items.");
            }
        },
    }

    Ok(())
}
