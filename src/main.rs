use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use ledgerload_lib::import::{write_import_report, BundleState, LedgerEntry};
use ledgerload_lib::time::format_ms;
use ledgerload_lib::{
    db, logging, migrate, AppError, GitRefresher, ImportConfig, ImportEngine, ImportSummary,
    MigrationLedger, BUILD_HASH,
};

/// Exit code for a run that finished with at least one failed bundle.
const PARTIAL_FAILURE_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "ledgerload", about = "Apply JSON data bundles exactly once", version)]
struct Cli {
    /// SQLite database file. Overrides LEDGERLOAD_DB.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Local data root. Overrides LEDGERLOAD_DATA_DIR.
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import every pending bundle from the data root, or from --path.
    Import {
        /// Uploaded directory or single bundle file to import instead of the data root.
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
        /// Emit the run summary as JSON instead of the table view.
        #[arg(long)]
        json: bool,
        /// Skip refreshing the data root from the configured remote.
        #[arg(long)]
        no_refresh: bool,
    },
    /// List applied bundles.
    Ledger {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let app = AppError::from(err);
            eprintln!("{}", app.to_json());
            1
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = ImportConfig::from_env().context("load configuration")?;
    if let Some(db_path) = cli.db {
        config = config.with_db_path(db_path);
    }
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    let _guard = logging::init(config.log_dir.as_deref())?;
    tracing::info!(target: "ledgerload", event = "cli_start", build = %BUILD_HASH);

    let pool = db::open_pool(&config.db_path)
        .await
        .context("open database")?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply schema migrations")?;

    let code = match cli.command {
        Commands::Import {
            path,
            json,
            no_refresh,
        } => handle_import(pool.clone(), config, path, json, no_refresh).await?,
        Commands::Ledger { json } => handle_ledger(&pool, &config, json).await?,
    };
    pool.close().await;
    Ok(code)
}

async fn handle_import(
    pool: SqlitePool,
    mut config: ImportConfig,
    path: Option<PathBuf>,
    emit_json: bool,
    no_refresh: bool,
) -> Result<i32> {
    if no_refresh {
        config.sync_on_import = false;
    }
    let reports_dir = config.reports_dir.clone();
    let remote_url = config.remote_url.clone();

    let mut engine = ImportEngine::new(pool, config);
    if let Some(url) = remote_url {
        engine = engine.with_refresher(Arc::new(GitRefresher::new(url)));
    }

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(target: "ledgerload", event = "cli_interrupt");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let summary = match path {
        Some(path) => engine.import_path(&path).await?,
        None => engine.import_all().await?,
    };

    if let Some(dir) = reports_dir {
        if let Err(err) = write_import_report(&dir, &summary) {
            tracing::warn!(
                target: "ledgerload",
                event = "import_report_failed",
                error = %format!("{err:#}")
            );
        }
    }

    if emit_json {
        let json = serde_json::to_string_pretty(&summary).context("serialize import summary")?;
        println!("{json}");
    } else {
        print_summary(&summary);
    }

    Ok(if summary.is_clean() && !summary.cancelled {
        0
    } else {
        PARTIAL_FAILURE_EXIT_CODE
    })
}

async fn handle_ledger(pool: &SqlitePool, config: &ImportConfig, emit_json: bool) -> Result<i32> {
    let ledger = MigrationLedger::new(&config.data_dir);
    let entries = ledger.list_all(pool).await.context("list ledger entries")?;
    if emit_json {
        let json = serde_json::to_string_pretty(&entries).context("serialize ledger entries")?;
        println!("{json}");
    } else {
        print_ledger(&entries);
    }
    Ok(0)
}

fn print_summary(summary: &ImportSummary) {
    println!("Import run {}", summary.run_id);
    if summary.nothing_to_do() {
        println!("Nothing to do: no bundle files found.");
        return;
    }
    println!("Files discovered : {}", summary.files_discovered);
    println!("Applied          : {}", summary.applied_count);
    println!("Skipped          : {}", summary.skipped_count);
    println!("Failed           : {}", summary.failures.len());
    if summary.cancelled {
        println!("Run was cancelled before all files were processed.");
    }

    if summary.outcomes.is_empty() {
        return;
    }
    println!();
    println!("{:<9} {:>4}  {:<32} File", "State", "Pass", "Bundle");
    for outcome in &summary.outcomes {
        println!(
            "{:<9} {:>4}  {:<32} {}",
            outcome.state.as_str(),
            outcome.pass,
            outcome.bundle_name,
            outcome.file
        );
        if outcome.state == BundleState::Failed {
            if let Some(reason) = &outcome.reason {
                println!("          reason: {reason}");
            }
        }
    }
}

fn print_ledger(entries: &[LedgerEntry]) {
    if entries.is_empty() {
        println!("No bundles applied yet.");
        return;
    }
    println!(
        "{:>5}  {:<32} {:<6} {:<7} {:<21} Depends",
        "Id", "Name", "Kind", "Source", "Applied at"
    );
    for entry in entries {
        println!(
            "{:>5}  {:<32} {:<6} {:<7} {:<21} {}",
            entry.id,
            entry.name,
            entry.kind.as_str(),
            entry.source.as_str(),
            format_ms(entry.applied_at),
            entry.depends_on.join(", ")
        );
    }
}
