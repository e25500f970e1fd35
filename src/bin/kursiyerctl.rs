use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kursiyer::config::{AppConfig, StoreBackendConfig};
use kursiyer::storage::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
use kursiyer::sync::get_schools_data;
use kursiyer::{CoordinatorConfig, LocalAuthService, SyncCoordinator, ViewState};
use kursiyer_core::ClassKey;
use kursiyer_core::fees::{FeeSchedule, Report, format_lira, report, short_name};
use log::{error, warn};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::runtime;

const CLI_USER: &str = "kursiyerctl@localhost";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print candidate counts and fees for every school
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Replace the schools collection with the contents of a JSON file
    Seed {
        #[arg(value_name = "file")]
        file: PathBuf,
    },
    /// Change one class count for a school and wait for the write
    Bump {
        school: String,
        class: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Append a message document
    Message { from: String, text: String },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn ensure_workspace_dir(workspace_dir: &Path) -> Result<()> {
    if !workspace_dir.exists() {
        std::fs::create_dir_all(workspace_dir).context("Failed to create workspace directory")?;
    }
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.store_backend {
        StoreBackendConfig::Memory => {
            warn!("memory backend selected; nothing is kept after this command exits");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        StoreBackendConfig::Sqlite3 => {
            let path = config.store_db_path();
            let store = SqliteDocumentStore::open(&path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = ensure_workspace_dir(&config.workspace_dir) {
        error!("Failed to create workspace directory: {}", e);
        process::exit(1);
    }

    let rt = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            process::exit(1);
        }
    };
    let result = rt.block_on(async {
        match cli.command {
            Commands::Report { json } => print_report(&config, json).await,
            Commands::Seed { file } => seed(&config, &file).await,
            Commands::Bump {
                school,
                class,
                delta,
            } => bump(&config, &school, &class, delta).await,
            Commands::Message { from, text } => post_message(&config, &from, &text).await,
        }
    });
    if let Err(e) = result {
        error!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn print_report(config: &AppConfig, as_json: bool) -> Result<()> {
    let store = open_store(config)?;
    let schedule = FeeSchedule::default()
        .with_overrides(&config.fees)
        .context("Invalid fee override in configuration")?;
    let schools = get_schools_data(store.as_ref(), &config.schools_path)
        .await
        .context("Failed to read schools")?;
    let report = report(&schools, &schedule);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_table(&report);
    }
    Ok(())
}

fn print_report_table(report: &Report) {
    let mut header = format!("{:<24}", "Kurs");
    for class in ClassKey::ALL {
        header.push_str(&format!(" {:>6}", class.column_label()));
    }
    header.push_str(&format!(" {:>6} {:>7} {:>14}", "Fark", "Toplam", "Ücret"));
    println!("{}", header);

    for row in &report.rows {
        let mut line = format!("{:<24}", short_name(&row.name));
        for class in ClassKey::ALL {
            let count = row.class_counts.get(&class).copied().unwrap_or(0);
            line.push_str(&format!(" {:>6}", count));
        }
        line.push_str(&format!(
            " {:>6} {:>7} {:>14}",
            row.difference_total,
            row.totals.total_count,
            format_lira(row.totals.total_fee)
        ));
        println!("{}", line);
    }

    let mut footer = format!("{:<24}", "TOPLAM");
    for class in ClassKey::ALL {
        let count = report.class_totals.get(&class).copied().unwrap_or(0);
        footer.push_str(&format!(" {:>6}", count));
    }
    footer.push_str(&format!(
        " {:>6} {:>7} {:>14}",
        report.difference_total,
        report.totals.total_count,
        format_lira(report.totals.total_fee)
    ));
    println!("{}", footer);
}

async fn seed(config: &AppConfig, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", file.display()))?;
    if !document.is_object() {
        bail!("{} must hold an object keyed by school id", file.display());
    }
    let count = document.as_object().map(|o| o.len()).unwrap_or(0);

    let store = open_store(config)?;
    store
        .write(&config.schools_path, document)
        .await
        .context("Failed to write schools")?;
    println!("{} kurs yüklendi", count);
    Ok(())
}

async fn bump(config: &AppConfig, school_id: &str, class: &str, delta: i64) -> Result<()> {
    let class: ClassKey = class.parse()?;
    let store = open_store(config)?;
    let coordinator_config =
        CoordinatorConfig::from_app_config(config).context("Invalid fee override in configuration")?;
    let auth = Arc::new(LocalAuthService::new());
    auth.sign_in(CLI_USER);

    let mut coordinator = SyncCoordinator::new(store, auth, coordinator_config);
    coordinator.settle().await;
    if let ViewState::Failed { message } = coordinator.view() {
        bail!(message);
    }

    let candidates = coordinator.request_candidate_change(school_id, class, delta)?;
    coordinator.settle().await;
    if coordinator.consecutive_write_failures() > 0 {
        bail!(
            "{}",
            coordinator
                .notifications()
                .last()
                .map(|n| n.message.clone())
                .unwrap_or_default()
        );
    }
    println!("{} {} = {}", school_id, class, candidates.count(class));
    Ok(())
}

async fn post_message(config: &AppConfig, from: &str, text: &str) -> Result<()> {
    let store = open_store(config)?;
    let id = store
        .append(&config.messages_path, json!({ "from": from, "text": text }))
        .await
        .context("Failed to post message")?;
    println!("{}", id);
    Ok(())
}
