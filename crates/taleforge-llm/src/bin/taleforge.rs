use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use taleforge_core::{CompleteStory, NodeId, SqliteStoryStore, StoryStore};
use taleforge_llm::generator::{PromptSettings, StoryRequest, generate_story, parse_story_response};
use taleforge_llm::{LlmConfig, RawContent};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "taleforge", about = "Generate, repair and inspect branching stories")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the model for a story and persist it
    Generate {
        /// Story theme
        #[arg(long, default_value = "fantasy")]
        theme: String,

        /// Session id to record (random when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Owning user id
        #[arg(long)]
        user: Option<i64>,

        /// SQLite database path
        #[arg(long, env = "TALEFORGE_DB", default_value = "taleforge.db")]
        db: PathBuf,

        /// Override model name
        #[arg(long)]
        model: Option<String>,

        /// Override service base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Override request timeout
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print a persisted story depth-first
    Show {
        story_id: i64,

        /// SQLite database path
        #[arg(long, env = "TALEFORGE_DB", default_value = "taleforge.db")]
        db: PathBuf,
    },

    /// Repair and validate a saved model reply without calling the model
    Repair {
        /// File holding the raw reply or response body
        file: PathBuf,
    },
}

// ── Logging ─────────────────────────────────────────────────────

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ── Commands ────────────────────────────────────────────────────

async fn run_generate(
    theme: String,
    session: Option<String>,
    user: Option<i64>,
    db: PathBuf,
    config: LlmConfig,
) -> Result<()> {
    let store = SqliteStoryStore::open(&db)
        .with_context(|| format!("Failed to open database: {}", db.display()))?;

    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut request = StoryRequest::new(session_id).theme(theme);
    if let Some(user_id) = user {
        request = request.user(user_id);
    }

    let story = generate_story(config, &store, &request, &PromptSettings::default())
        .await
        .context("Story generation failed")?;

    println!("Created story {} \"{}\"", story.id, story.title);
    let complete = store
        .complete_story(story.id)
        .context("Failed to reload generated story")?;
    print_story(&complete);
    Ok(())
}

fn run_show(story_id: i64, db: PathBuf) -> Result<()> {
    let store = SqliteStoryStore::open(&db)
        .with_context(|| format!("Failed to open database: {}", db.display()))?;
    let complete = store
        .complete_story(story_id)
        .with_context(|| format!("Failed to load story {story_id}"))?;
    print_story(&complete);
    Ok(())
}

fn run_repair(file: PathBuf) -> Result<()> {
    let body = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read: {}", file.display()))?;
    let parsed = parse_story_response(RawContent::from_body(body))
        .with_context(|| format!("Could not repair: {}", file.display()))?;
    eprintln!(
        "Repaired \"{}\": {} nodes, depth {}",
        parsed.tree.title,
        parsed.tree.root.node_count(),
        parsed.tree.root.depth()
    );
    let out = serde_json::to_string_pretty(&parsed.normalized)
        .context("Failed to serialize repaired story")?;
    println!("{out}");
    Ok(())
}

// ── Output ──────────────────────────────────────────────────────

fn print_story(complete: &CompleteStory) {
    println!("# {}", complete.story.title);
    println!(
        "session {} created {}",
        complete.story.session_id,
        complete.story.created_at.to_rfc3339()
    );
    print_node(complete, complete.root_node_id, None, 0);
}

fn print_node(complete: &CompleteStory, id: NodeId, choice: Option<&str>, depth: usize) {
    let indent = "  ".repeat(depth);
    let Some(node) = complete.node(id) else {
        println!("{indent}[missing node {id}]");
        return;
    };

    if let Some(choice) = choice {
        println!("{indent}> {choice}");
    }
    let marker = match (node.is_ending, node.is_winning_ending) {
        (true, true) => " [WIN]",
        (true, false) => " [END]",
        _ => "",
    };
    println!("{indent}({}){marker} {}", node.id, node.content);
    for option in &node.options {
        print_node(complete, option.node_id, Some(&option.text), depth + 1);
    }
}

// ── Main ────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Generate {
            theme,
            session,
            user,
            db,
            model,
            base_url,
            timeout_secs,
        } => {
            // Apply CLI overrides
            let mut config = LlmConfig::from_env();
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(base_url) = base_url {
                config.base_url = base_url;
            }
            if let Some(secs) = timeout_secs {
                config.timeout = Duration::from_secs(secs);
            }
            run_generate(theme, session, user, db, config).await
        }
        Command::Show { story_id, db } => run_show(story_id, db),
        Command::Repair { file } => run_repair(file),
    }
}
