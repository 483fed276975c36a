use clap::{Parser, Subcommand};
use lib::api::{AnalysisResult, Backend, HttpBackend, PendingFile};
use lib::cache::ResultCache;
use lib::config::{load_config, resolve_cache_path, Config};
use lib::conversation::Conversation;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "dataprompt")]
#[command(about = "Chat with a data-analysis assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Interactive chat. Streams replies as they arrive and prints a compact
    /// view of the latest analysis result after each turn.
    Chat {
        /// Config file path (default: DATAPROMPT_CONFIG_PATH or ~/.dataprompt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Start with this previously uploaded dataset selected.
        #[arg(long, value_name = "ID")]
        dataset: Option<String>,
    },

    /// List previously uploaded datasets.
    Datasets {
        /// Config file path (default: DATAPROMPT_CONFIG_PATH or ~/.dataprompt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Upload a CSV file and print the new dataset id.
    Upload {
        /// Path of the file to upload.
        file: PathBuf,

        /// Config file path (default: DATAPROMPT_CONFIG_PATH or ~/.dataprompt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("dataprompt {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Chat { config, dataset }) => {
            if let Err(e) = run_chat(config, dataset).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Datasets { config }) => {
            if let Err(e) = run_datasets(config).await {
                log::error!("datasets failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Upload { file, config }) => {
            if let Err(e) = run_upload(file, config).await {
                log::error!("upload failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn build_backend(config: &Config) -> HttpBackend {
    HttpBackend::new(Some(config.backend.base_url.clone())).with_timeouts(
        Duration::from_secs(config.backend.request_timeout_secs),
        Duration::from_secs(config.backend.stream_idle_timeout_secs),
    )
}

async fn run_datasets(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    let backend = build_backend(&config);
    let datasets = backend
        .list_datasets()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    if datasets.is_empty() {
        println!("No datasets uploaded yet.");
        return Ok(());
    }
    for d in datasets {
        println!(
            "{}  {}  {} rows  [{}]",
            d.id,
            d.filename,
            d.row_count,
            d.columns.join(", ")
        );
    }
    Ok(())
}

async fn run_upload(file: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    let backend = build_backend(&config);
    let pending = PendingFile::from_path(&file)?;
    let resp = backend
        .upload(&pending)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("Uploaded {} as dataset {}", resp.filename, resp.id);
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>, dataset: Option<String>) -> anyhow::Result<()> {
    let (config, config_path) = load_config(config_path)?;
    let backend = build_backend(&config);

    let mut conversation = Conversation::new();
    if config.cache.enabled {
        let cache_path = resolve_cache_path(&config, &config_path);
        conversation =
            conversation.with_cache(ResultCache::new(cache_path, config.cache.max_entries));
    }

    conversation.refresh_datasets(&backend).await;
    if let Some(id) = dataset {
        match conversation
            .known_datasets()
            .iter()
            .find(|d| d.id == id)
            .cloned()
        {
            Some(d) => {
                conversation.select_dataset(&d);
                if let Some(m) = conversation.messages().last() {
                    println!("{}", m.content);
                }
            }
            None => println!("Unknown dataset id {}; use /datasets to list.", id),
        }
    }

    println!("Type a question, /upload <path> to attach a CSV, /datasets, /select <id>, /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut staged_file: Option<PendingFile> = None;

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim().to_string();

        if line == "/quit" || line == "/exit" {
            break;
        }
        if line == "/datasets" {
            conversation.refresh_datasets(&backend).await;
            if conversation.known_datasets().is_empty() {
                println!("No datasets uploaded yet.");
            }
            for d in conversation.known_datasets() {
                println!("{}  {}  {} rows", d.id, d.filename, d.row_count);
            }
            continue;
        }
        if let Some(id) = line.strip_prefix("/select ") {
            let id = id.trim();
            match conversation
                .known_datasets()
                .iter()
                .find(|d| d.id == id)
                .cloned()
            {
                Some(d) => {
                    conversation.select_dataset(&d);
                    if let Some(m) = conversation.messages().last() {
                        println!("{}", m.content);
                    }
                }
                None => println!("Unknown dataset id {}; use /datasets to list.", id),
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("/upload ") {
            match PendingFile::from_path(std::path::Path::new(path.trim())) {
                Ok(f) => {
                    println!(
                        "Attached {} ({} bytes); it uploads with your next message.",
                        f.name,
                        f.bytes.len()
                    );
                    staged_file = Some(f);
                }
                Err(e) => println!("Could not read file: {}", e),
            }
            continue;
        }

        let file = staged_file.take();
        let mut streamed = String::new();
        let mut print_chunk = |chunk: &str| {
            streamed.push_str(chunk);
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        };
        conversation
            .submit_turn(&backend, &line, file, Some(&mut print_chunk))
            .await;
        if !streamed.is_empty() {
            println!();
        }
        // Sealed content that never went through the stream (entry guards,
        // synthesized errors, upload failures) still has to reach the terminal.
        if let Some(last) = conversation.messages().last() {
            if last.content != streamed {
                println!("{}", last.content);
            }
        }
        if conversation.sidebar_visible() {
            if let Some(result) = conversation.current_result() {
                print_result(result);
            }
        }
    }
    Ok(())
}

/// Compact terminal rendering of the structured result (the sidebar analog).
fn print_result(result: &AnalysisResult) {
    match result {
        AnalysisResult::Summary(s) => {
            println!("-- summary --");
            if let Some(info) = s.data.get("dataset_info") {
                let rows = info.get("rows").and_then(|v| v.as_u64()).unwrap_or(0);
                let cols = info.get("columns").and_then(|v| v.as_u64()).unwrap_or(0);
                println!("{} rows x {} columns", rows, cols);
            }
        }
        AnalysisResult::Forecast(f) => {
            println!("-- forecast --");
            if let Some(m) = &f.metrics {
                if let Some(mse) = m.mse {
                    println!("mse: {:.2}", mse);
                }
                if let Some(r2) = m.r2 {
                    println!("r2: {:.3}", r2);
                }
            }
            if let Some(v) = &f.visualization {
                if let Some(title) = &v.title {
                    println!("chart: {} ({} points)", title, v.data.len());
                }
            }
        }
        AnalysisResult::Aggregation(a) => {
            println!(
                "-- aggregation: {}({}) by {} --",
                a.agg_function.as_deref().unwrap_or("sum"),
                a.agg_column.as_deref().unwrap_or("?"),
                a.group_by_columns.join(", ")
            );
            println!("{} groups", a.data.len());
        }
        AnalysisResult::Filter(f) => {
            println!(
                "-- filter: {} matching rows ({} shown) --",
                f.row_count,
                f.data.len()
            );
        }
        AnalysisResult::Query(q) => {
            println!("-- query result --");
            if let Some(value) = q.value {
                println!("value: {:.2}", value);
            }
            if !q.data.is_empty() {
                println!("{} sample rows", q.data.len());
            }
        }
        AnalysisResult::Predict(p) => {
            println!("-- prediction: {} rows --", p.rows.len());
            if let Some(mae) = p.mae {
                println!("mae: {:.2}", mae);
            }
            if let Some(r2) = p.r2 {
                println!("r2: {:.3}", r2);
            }
        }
        AnalysisResult::WhatIf(w) => {
            println!("-- what-if --");
            if let Some(value) = w.value {
                println!("predicted value: {:.2}", value);
            }
            if let Some(note) = &w.note {
                println!("scenario: {}", note);
            }
        }
        AnalysisResult::Unknown(raw) => {
            println!("-- unrecognized result --");
            if let Ok(s) = serde_json::to_string_pretty(raw) {
                println!("{}", s);
            }
        }
    }
}
