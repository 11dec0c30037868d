use std::env;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;

use crate::config::Config;
use crate::store::{domains, history_v1, history_v2, mutable_state};
use crate::teardown::{self, TeardownMode};
use crate::types::{BranchInfo, DataBlob, ExecutionKey, HistoryEvent, HistoryPath};
use crate::{db, serialization, shard};

/// Highest event/node id the read commands scan to.
const MAX_EVENT_ID: i64 = 9999;

/// Rows fetched per page while scanning history.
const PAGE_SIZE: i64 = 1000;

#[derive(Parser)]
#[command(name = "ostinato-admin")]
#[command(about = "Administrative access to Ostinato execution history storage", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an execution's raw history batches and events
    Show {
        /// Domain ID owning the execution (flat-layout access)
        #[arg(long)]
        domain_id: Option<String>,

        /// Workflow ID (flat-layout access)
        #[arg(long)]
        workflow_id: Option<String>,

        /// Run ID (flat-layout access)
        #[arg(long)]
        run_id: Option<String>,

        /// Tree ID (direct branch-layout access)
        #[arg(long)]
        tree_id: Option<String>,

        /// Branch ID (direct branch-layout access)
        #[arg(long)]
        branch_id: Option<String>,

        /// Export all events as JSON to this file
        #[arg(short = 'o', long)]
        output: Option<String>,
    },

    /// Describe an execution's control snapshot and, for branched
    /// histories, its branch descriptor and event ids
    Describe {
        /// Domain name
        #[arg(long)]
        domain: Option<String>,

        /// Domain ID (skips the name lookup)
        #[arg(long)]
        domain_id: Option<String>,

        /// Workflow ID to describe
        #[arg(long)]
        workflow_id: String,

        /// Run ID (defaults to the current run)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Remove an execution: history, snapshot row, and current pointer
    Delete {
        /// Domain name
        #[arg(long)]
        domain: Option<String>,

        /// Domain ID (skips the name lookup)
        #[arg(long)]
        domain_id: Option<String>,

        /// Workflow ID to remove
        #[arg(long)]
        workflow_id: String,

        /// Run ID (defaults to the current run)
        #[arg(long)]
        run_id: Option<String>,

        /// Record step failures and keep going instead of aborting
        #[arg(long)]
        skip_errors: bool,
    },

    /// Compute the shard a workflow id routes to
    ShardId {
        /// Workflow ID to route
        #[arg(long)]
        workflow_id: String,

        /// Total shard count of the cluster
        #[arg(long)]
        shards: i32,
    },

    /// Map a domain name to its ID, or an ID to its name
    Domain {
        /// Domain name to resolve
        #[arg(long)]
        domain: Option<String>,

        /// Domain ID to resolve
        #[arg(long)]
        domain_id: Option<String>,
    },

    /// Run database migrations
    Migrate,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Apply CLI overrides to environment before any database operations
    if let Some(config_path) = &cli.config {
        env::set_var("OSTINATO_CONFIG_PATH", config_path);
    }
    if let Some(database_url) = &cli.database_url {
        env::set_var("OSTINATO_DATABASE_URL", database_url);
    }

    // Pure computation, no storage connection needed
    if let Commands::ShardId {
        workflow_id,
        shards,
    } = &cli.command
    {
        let shard_id = shard::compute_shard_id(workflow_id, *shards)?;
        println!("Shard for workflow {}: {}", workflow_id, shard_id);
        return Ok(());
    }

    // Eagerly load and validate configuration before executing any command
    let config = Config::load()?;
    let pool = db::connect(&config).await?;

    match cli.command {
        Commands::Show {
            domain_id,
            workflow_id,
            run_id,
            tree_id,
            branch_id,
            output,
        } => show(&pool, domain_id, workflow_id, run_id, tree_id, branch_id, output).await,

        Commands::Describe {
            domain,
            domain_id,
            workflow_id,
            run_id,
        } => describe(&pool, domain, domain_id, workflow_id, run_id).await,

        Commands::Delete {
            domain,
            domain_id,
            workflow_id,
            run_id,
            skip_errors,
        } => delete(&pool, domain, domain_id, workflow_id, run_id, skip_errors).await,

        Commands::Domain { domain, domain_id } => lookup_domain(&pool, domain, domain_id).await,

        Commands::Migrate => {
            println!("Running migrations...");
            db::migrate(&pool).await?;
            println!("Migrations complete!");
            Ok(())
        }

        Commands::ShardId { .. } => unreachable!("handled before connecting"),
    }
}

async fn show(
    pool: &PgPool,
    domain_id: Option<String>,
    workflow_id: Option<String>,
    run_id: Option<String>,
    tree_id: Option<String>,
    branch_id: Option<String>,
    output: Option<String>,
) -> Result<()> {
    let batches = if let Some(workflow_id) = workflow_id {
        let key = ExecutionKey {
            domain_id: domain_id.context("--domain-id is required with --workflow-id")?,
            workflow_id,
            run_id: run_id.context("--run-id is required with --workflow-id")?,
        };
        read_all_v1(pool, &key).await?
    } else if let Some(tree_id) = tree_id {
        let branch_id = branch_id.context("--branch-id is required with --tree-id")?;
        let branch = history_v2::get_branch(pool, &tree_id, &branch_id).await?;
        read_all_v2(pool, &branch).await?
    } else {
        bail!("specify either --workflow-id/--run-id for flat access, or --tree-id/--branch-id for branch access");
    };

    let mut all_events = Vec::new();
    let mut total_size = 0usize;
    for (idx, blob) in batches.iter().enumerate() {
        total_size += blob.len();
        println!("======== batch {}, blob len: {} ========", idx + 1, blob.len());
        let events = serialization::deserialize_batch(blob)?;
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        all_events.extend(events);
    }
    println!(
        "======== total batches {}, total blob len: {} ========",
        batches.len(),
        total_size
    );

    if let Some(path) = output {
        export_events(&path, &all_events)?;
    }
    Ok(())
}

async fn read_all_v1(pool: &PgPool, key: &ExecutionKey) -> Result<Vec<DataBlob>> {
    let mut batches = Vec::new();
    let mut token: Option<Vec<u8>> = None;
    loop {
        let page =
            history_v1::get_history(pool, key, 1, MAX_EVENT_ID, PAGE_SIZE, token.as_deref())
                .await?;
        batches.extend(page.batches);
        match page.next_page_token {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    Ok(batches)
}

async fn read_all_v2(pool: &PgPool, branch: &BranchInfo) -> Result<Vec<DataBlob>> {
    let mut batches = Vec::new();
    let mut token: Option<Vec<u8>> = None;
    loop {
        let page =
            history_v2::read_branch(pool, branch, 1, MAX_EVENT_ID, PAGE_SIZE, token.as_deref())
                .await?;
        batches.extend(page.batches);
        match page.next_page_token {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    Ok(batches)
}

fn export_events(path: &str, events: &[HistoryEvent]) -> Result<()> {
    let data = serde_json::to_vec(events).context("Failed to serialize history for export")?;
    std::fs::write(path, data)
        .with_context(|| format!("Failed to write history export to {}", path))?;
    println!("✓ Exported {} event(s) to {}", events.len(), path);
    Ok(())
}

async fn describe(
    pool: &PgPool,
    domain: Option<String>,
    domain_id: Option<String>,
    workflow_id: String,
    run_id: Option<String>,
) -> Result<()> {
    let key = resolve_key(pool, domain, domain_id, workflow_id, run_id).await?;
    let snapshot = mutable_state::get_snapshot(pool, &key).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if let HistoryPath::V2(branch) = teardown::resolve_history_path(&snapshot)? {
        println!("{}", serde_json::to_string_pretty(&branch)?);

        let mut token: Option<Vec<u8>> = None;
        loop {
            let page =
                history_v2::read_branch(pool, &branch, 1, MAX_EVENT_ID, PAGE_SIZE, token.as_deref())
                    .await?;
            let events = serialization::deserialize_batches(&page.batches)?;
            let ids: Vec<String> = events.iter().map(|e| e.event_id.to_string()).collect();
            println!("events: {}", ids.join(","));
            match page.next_page_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
    }
    Ok(())
}

async fn delete(
    pool: &PgPool,
    domain: Option<String>,
    domain_id: Option<String>,
    workflow_id: String,
    run_id: Option<String>,
    skip_errors: bool,
) -> Result<()> {
    let key = resolve_key(pool, domain, domain_id, workflow_id, run_id).await?;
    let mode = if skip_errors {
        TeardownMode::SkipAndContinue
    } else {
        TeardownMode::FailFast
    };

    let report = teardown::remove_execution(pool, &key, mode).await?;
    if let HistoryPath::V2(branch) = &report.path {
        println!("Deleted history branch:");
        println!("{}", serde_json::to_string_pretty(branch)?);
    }
    for step in &report.completed {
        println!("✓ deleted {}", step);
    }
    Ok(())
}

async fn lookup_domain(
    pool: &PgPool,
    domain: Option<String>,
    domain_id: Option<String>,
) -> Result<()> {
    match (domain_id, domain) {
        (Some(id), _) => {
            let name = domains::domain_name_by_id(pool, &id).await?;
            println!("Domain name for {}: {}", id, name);
        }
        (None, Some(name)) => {
            let id = domains::domain_id_by_name(pool, &name).await?;
            println!("Domain ID for {}: {}", name, id);
        }
        (None, None) => bail!("need either --domain or --domain-id"),
    }
    Ok(())
}

async fn resolve_key(
    pool: &PgPool,
    domain: Option<String>,
    domain_id: Option<String>,
    workflow_id: String,
    run_id: Option<String>,
) -> Result<ExecutionKey> {
    let domain_id = match (domain_id, domain) {
        (Some(id), _) => id,
        (None, Some(name)) => domains::domain_id_by_name(pool, &name).await?,
        (None, None) => bail!("need either --domain or --domain-id"),
    };
    let run_id = match run_id {
        Some(run_id) => run_id,
        None => mutable_state::get_current_run_id(pool, &domain_id, &workflow_id).await?,
    };
    Ok(ExecutionKey {
        domain_id,
        workflow_id,
        run_id,
    })
}
