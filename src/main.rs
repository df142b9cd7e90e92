use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};

use trivia_import::cli::add::{
    add_question, ManualQuestion, DEFAULT_CATEGORY, DEFAULT_DIFFICULTY, DEFAULT_KIND,
};
use trivia_import::cli::verify::{report, DEFAULT_SAMPLE_LIMIT};
use trivia_import::database_ops::db::Db;
use trivia_import::database_ops::importer::{
    ImportConfig, ImportSummary, Importer, ItemErrorPolicy, RunContext,
};
use trivia_import::database_ops::memory::MemoryStore;
use trivia_import::database_ops::opentdb::client::effective_amount;
use trivia_import::database_ops::opentdb::OpenTdbClient;
use trivia_import::database_ops::store::QuestionStore;
use trivia_import::tracing::{init_tracing, DEFAULT_FILTER};
use trivia_import::util::env;

const DEFAULT_ONCE_AMOUNT: u32 = 10;

#[derive(Parser, Debug)]
#[command(name = "trivia_import", version, about = "OpenTDB trivia importer")]
struct Cli {
    /// Override the database URL (defaults to DATABASE_URL / DB_* parts)
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ImportArgs {
    /// Session token to start with (defaults to OPENTDB_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// Questions per batch, clamped to 1..=50
    #[arg(long)]
    amount: Option<u32>,
    /// Use an in-memory store instead of Postgres
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Import until the catalog is exhausted, rotating session tokens as needed
    Run {
        #[command(flatten)]
        import: ImportArgs,
        /// Pause between rounds in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Token refreshes allowed after a round with no new questions
        #[arg(long)]
        max_rotations: Option<u32>,
        /// abort | skip
        #[arg(long)]
        on_item_error: Option<ItemErrorPolicy>,
    },
    /// Import a single batch without requesting or rotating tokens
    Once {
        #[command(flatten)]
        import: ImportArgs,
    },
    /// Insert one hand-written question
    Add {
        #[arg(long)]
        question: String,
        #[arg(long)]
        correct: String,
        /// Repeat for each incorrect answer
        #[arg(long = "incorrect", required = true)]
        incorrect: Vec<String>,
        #[arg(long, default_value = DEFAULT_CATEGORY)]
        category: String,
        #[arg(long, default_value = DEFAULT_DIFFICULTY)]
        difficulty: String,
        /// multiple | boolean
        #[arg(long = "type", default_value = DEFAULT_KIND)]
        kind: String,
    },
    /// Print the question count and the first few questions
    Verify {
        #[arg(long, default_value_t = DEFAULT_SAMPLE_LIMIT)]
        limit: i64,
    },
    /// Apply pending schema migrations
    Migrate,
}

fn resolve_database_url(cli_override: Option<String>) -> Result<String> {
    match cli_override {
        Some(url) => Ok(url),
        None => env::db_url().context("resolving database url"),
    }
}

async fn connect(cli_override: Option<String>) -> Result<Db> {
    let url = resolve_database_url(cli_override)?;
    Db::connect(&url, env::env_parse("DB_MAX_CONNS", 5u32)).await
}

async fn execute_import(
    store: &dyn QuestionStore,
    cfg: ImportConfig,
    token: Option<String>,
    single_batch: bool,
) -> Result<ImportSummary> {
    let client = OpenTdbClient::new_from_env()?;
    let mut ctx = RunContext::new(token);
    let mut importer = Importer::new(&client, store, cfg);
    let summary = if single_batch {
        importer.import_once(&mut ctx).await?
    } else {
        importer.run(&mut ctx).await?
    };
    Ok(summary)
}

async fn import(
    db_url: Option<String>,
    args: ImportArgs,
    cfg: ImportConfig,
    single_batch: bool,
) -> Result<()> {
    let token = args.token.or_else(|| env::env_opt("OPENTDB_TOKEN"));
    let summary = if args.dry_run {
        warn!("dry run: writing to an in-memory store");
        execute_import(&MemoryStore::new(), cfg, token, single_batch).await?
    } else {
        let db = connect(db_url).await?;
        execute_import(&db, cfg, token, single_batch).await?
    };

    info!(
        total_imported = summary.total_imported,
        rounds = summary.rounds,
        rotations = summary.rotations,
        skipped_seen = summary.skipped_seen,
        skipped_existing = summary.skipped_existing,
        failed_items = summary.failed_items,
        stop = %summary.stop,
        "import summary"
    );
    println!("total imported: {}", summary.total_imported);
    if summary.stop.is_fatal() {
        bail!("import stopped: {}", summary.stop);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            import: args,
            delay_ms,
            max_rotations,
            on_item_error,
        } => {
            env::preflight_check(
                "run",
                &[],
                &[
                    "DATABASE_URL",
                    "OPENTDB_BASE_URL",
                    "OPENTDB_TOKEN",
                    "OPENTDB_AMOUNT",
                    "OPENTDB_DELAY_MS",
                    "OPENTDB_MAX_ROTATIONS",
                    "OPENTDB_ON_ITEM_ERROR",
                ],
            )?;
            let mut cfg = ImportConfig::from_env()?;
            if let Some(amount) = args.amount {
                cfg.amount = effective_amount(amount);
            }
            if let Some(ms) = delay_ms {
                cfg.delay = Duration::from_millis(ms);
            }
            if let Some(max) = max_rotations {
                cfg.max_rotation_attempts = max;
            }
            if let Some(policy) = on_item_error {
                cfg.on_item_error = policy;
            }
            import(cli.db_url, args, cfg, false).await?;
        }
        Commands::Once { import: args } => {
            env::preflight_check(
                "once",
                &[],
                &["DATABASE_URL", "OPENTDB_BASE_URL", "OPENTDB_TOKEN"],
            )?;
            let mut cfg = ImportConfig::from_env()?;
            cfg.amount = effective_amount(args.amount.unwrap_or(DEFAULT_ONCE_AMOUNT));
            import(cli.db_url, args, cfg, true).await?;
        }
        Commands::Add {
            question,
            correct,
            incorrect,
            category,
            difficulty,
            kind,
        } => {
            let db = connect(cli.db_url).await?;
            let manual = ManualQuestion {
                question,
                correct_answer: correct,
                incorrect_answers: incorrect,
                category,
                difficulty,
                kind,
            };
            let id = add_question(&db, &manual).await?;
            println!("added question {id}");
        }
        Commands::Verify { limit } => {
            let db = connect(cli.db_url).await?;
            print!("{}", report(&db, limit).await?);
        }
        Commands::Migrate => {
            let db = connect(cli.db_url).await?;
            let applied = db.migrate().await?;
            println!("applied {applied} migration(s)");
        }
    }
    Ok(())
}
