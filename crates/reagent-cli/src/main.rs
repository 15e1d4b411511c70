use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reagent_core::{DelayPolicy, HistoryStore, SearchProvider};
use reagent_local::extract::{ExtractConfig, Extractor};
use reagent_local::history::{FsHistory, DEFAULT_HISTORY_DIR};
use reagent_local::ollama::{DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL};
use reagent_local::render_playwright::PlaywrightRenderer;
use reagent_local::search::GoogleCseProvider;
use reagent_local::session::{display_title, Orchestrator, SessionConfig};
use reagent_local::synth::Synthesizer;
use reagent_local::LocalFetcher;

#[derive(Parser, Debug)]
#[command(name = "reagent")]
#[command(
    about = "Interactive web research assistant: search, pick sources, extract, synthesize",
    long_about = None
)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Options for the default `research` loop when no subcommand is given.
    #[command(flatten)]
    research: ResearchCmd,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive research loop (the default).
    Research(ResearchCmd),
    /// Run result discovery only and print the URLs (json).
    Search(SearchCmd),
    /// Extract readable text from one or more URLs (json).
    Extract(ExtractCmd),
    /// List past research sessions, or show one.
    History(HistoryCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// How many search results to offer per question.
    #[arg(
        long,
        env = "REAGENT_NUM_RESULTS",
        default_value_t = 20,
        value_parser = clap::value_parser!(u64).range(1..=100)
    )]
    num_results: u64,

    /// Upper bound on how many results may be picked.
    #[arg(
        long,
        env = "REAGENT_MAX_SELECTION",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=10)
    )]
    max_selection: u64,

    /// Write extracted sources to a `url,content` CSV after extraction.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    save_csv: bool,

    /// CSV file name (default `scraped_content_<timestamp>.csv`).
    #[arg(long)]
    csv_name: Option<String>,

    /// Also write a `research_<date>.txt` bundle of the sources.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    save_text: bool,

    /// Directory for CSV and text exports.
    #[arg(long, env = "REAGENT_EXPORT_DIR", default_value = ".")]
    export_dir: PathBuf,

    #[arg(long, env = "REAGENT_HISTORY_DIR", default_value = DEFAULT_HISTORY_DIR)]
    history_dir: PathBuf,

    /// Do not record sessions in the history directory.
    #[arg(long)]
    no_history: bool,

    /// Print each source's extracted text (truncated) after the report.
    #[arg(long)]
    show_sources: bool,

    /// Skip the randomized pauses in the rendered path.
    #[arg(
        long,
        env = "REAGENT_NO_HUMAN_DELAYS",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    no_human_delays: bool,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    #[arg(long)]
    query: String,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=100))]
    num_results: u64,
}

#[derive(clap::Args, Debug)]
struct ExtractCmd {
    /// URL to extract (repeatable).
    #[arg(long = "url", required = true, num_args = 1..)]
    urls: Vec<String>,

    #[arg(
        long,
        env = "REAGENT_NO_HUMAN_DELAYS",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    no_human_delays: bool,
}

#[derive(clap::Args, Debug)]
struct HistoryCmd {
    #[arg(long, env = "REAGENT_HISTORY_DIR", default_value = DEFAULT_HISTORY_DIR)]
    history_dir: PathBuf,

    /// Show the N-th most recent session (1 = newest) in full.
    #[arg(long)]
    show: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    #[arg(long, env = "REAGENT_HISTORY_DIR", default_value = DEFAULT_HISTORY_DIR)]
    history_dir: PathBuf,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json (default) or text.
    #[arg(long, default_value = "json")]
    output: String,
}

fn env_truthy(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_falsey(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// `.env` loading. Never overrides variables already set in the process.
fn load_env_file() {
    if env_falsey("REAGENT_DOTENV") {
        return;
    }
    match std::env::var("REAGENT_ENV_FILE") {
        Ok(p) if !p.trim().is_empty() => {
            let _ = dotenvy::from_path(p.trim());
        }
        _ => {
            let _ = dotenvy::dotenv();
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("REAGENT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout belongs to the operator; logs go to stderr.
    let fmt = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if env_truthy("REAGENT_LOG_JSON") {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("reagent/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

fn build_extractor(no_human_delays: bool) -> Result<Extractor> {
    let delays = if no_human_delays {
        DelayPolicy::none()
    } else {
        DelayPolicy::default()
    };
    Ok(Extractor::new(
        Arc::new(PlaywrightRenderer::from_env()),
        Arc::new(LocalFetcher::new()?),
        ExtractConfig {
            delays,
            ..ExtractConfig::default()
        },
    ))
}

fn build_search(client: reqwest::Client) -> Result<Arc<dyn SearchProvider>> {
    Ok(Arc::new(GoogleCseProvider::from_env(client)?))
}

async fn run_research(args: ResearchCmd) -> Result<()> {
    let client = http_client()?;
    let search = build_search(client.clone())?;
    let llm = reagent_local::synth::language_model_from_env(client)?;
    let history: Option<Arc<dyn HistoryStore>> = if args.no_history {
        None
    } else {
        Some(Arc::new(FsHistory::new(args.history_dir.clone())))
    };
    let orch = Orchestrator::new(
        search,
        build_extractor(args.no_human_delays)?,
        Synthesizer::new(llm),
        history,
        SessionConfig {
            num_results: args.num_results as usize,
            max_selection: args.max_selection as usize,
        },
    );
    let opts = reagent::repl::ReplOptions {
        save_csv: args.save_csv,
        csv_name: args.csv_name,
        save_text: args.save_text,
        export_dir: args.export_dir,
        show_sources: args.show_sources,
    };
    tracing::info!(
        num_results = args.num_results,
        max_selection = args.max_selection,
        "starting research loop"
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    reagent::repl::run(&orch, &opts, stdin, &mut stdout).await
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        None => run_research(cli.research).await?,
        Some(Commands::Research(args)) => run_research(args).await?,
        Some(Commands::Search(args)) => {
            let search = build_search(http_client()?)?;
            let urls = reagent_local::discovery::discover(
                search.as_ref(),
                &args.query,
                args.num_results as usize,
            )
            .await;
            let v = serde_json::json!({
                "query": args.query,
                "urls": urls
                    .iter()
                    .map(|u| serde_json::json!({ "url": u, "title": display_title(u) }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Some(Commands::Extract(args)) => {
            let extractor = build_extractor(args.no_human_delays)?;
            let docs = extractor.extract_all(&args.urls).await;
            let v: Vec<serde_json::Value> = docs
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "url": d.url,
                        "path": d.path,
                        "chars": d.text.chars().count(),
                        "text": d.text,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Some(Commands::History(args)) => {
            let records = FsHistory::new(args.history_dir).list()?;
            match args.show {
                None => {
                    if records.is_empty() {
                        println!("No research history yet.");
                    }
                    for (i, r) in records.iter().enumerate() {
                        println!("{}. [{}] {}", i + 1, r.timestamp, r.query);
                    }
                }
                Some(n) => {
                    let Some(r) = n.checked_sub(1).and_then(|i| records.get(i)) else {
                        anyhow::bail!("no history entry {n} ({} recorded)", records.len());
                    };
                    println!("[{}] {}\n", r.timestamp, r.query);
                    println!("Sources:");
                    for u in &r.urls {
                        println!("- {u}");
                    }
                    println!("\nReport:\n{}", r.report);
                }
            }
        }
        Some(Commands::Doctor(args)) => {
            fn has_env(k: &str) -> bool {
                std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
            }
            fn env_or(k: &str, default: &str) -> String {
                std::env::var(k)
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| default.to_string())
            }

            let t0 = std::time::Instant::now();

            // Env presence (booleans only; never print values).
            let google_key = reagent_local::search::google_api_key_from_env().is_some();
            let google_cx = reagent_local::search::google_cse_id_from_env().is_some();

            let provider = env_or("REAGENT_LLM_PROVIDER", "ollama").to_ascii_lowercase();
            let llm = match provider.as_str() {
                "openai_compat" | "openai-compat" => serde_json::json!({
                    "provider": "openai_compat",
                    "base_url": std::env::var("REAGENT_OPENAI_COMPAT_BASE_URL").ok(),
                    "model": std::env::var("REAGENT_OPENAI_COMPAT_MODEL").ok(),
                    "api_key": has_env("REAGENT_OPENAI_COMPAT_API_KEY"),
                }),
                _ => serde_json::json!({
                    "provider": provider,
                    "base_url": env_or("REAGENT_OLLAMA_BASE_URL", DEFAULT_OLLAMA_BASE_URL),
                    "model": env_or("REAGENT_OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL),
                }),
            };

            let renderer = PlaywrightRenderer::from_env();

            let mut checks: Vec<serde_json::Value> = Vec::new();
            checks.push(serde_json::json!({
                "name": "search_configured",
                "ok": google_key && google_cx,
                "message": if google_key && google_cx {
                    "google custom search key and engine id are set"
                } else {
                    "set REAGENT_GOOGLE_API_KEY and REAGENT_GOOGLE_CSE_ID"
                },
            }));

            // History dir: creatable and writable.
            let history_ok = (|| -> anyhow::Result<()> {
                std::fs::create_dir_all(&args.history_dir)?;
                let probe = args.history_dir.join(format!(
                    ".reagent-doctor-{}.probe",
                    std::process::id()
                ));
                std::fs::write(&probe, b"ok")?;
                let _ = std::fs::remove_file(&probe);
                Ok(())
            })()
            .is_ok();
            checks.push(serde_json::json!({
                "name": "history_dir_writable",
                "ok": history_ok,
                "message": if history_ok {
                    "history dir is writable"
                } else {
                    "history dir is not writable"
                },
            }));

            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": checks.iter().all(|c| c["ok"].as_bool() == Some(true)),
                "name": "reagent",
                "version": env!("CARGO_PKG_VERSION"),
                "elapsed_ms": t0.elapsed().as_millis(),
                "configured": {
                    "search": {
                        "google_api_key": google_key,
                        "google_cse_id": google_cx,
                        "endpoint_override": has_env("REAGENT_GOOGLE_CSE_ENDPOINT"),
                    },
                    "llm": llm,
                    "render": {
                        "enabled": !renderer.is_disabled(),
                        "node_bin": renderer.node_bin(),
                    },
                    "history_dir": args.history_dir.display().to_string(),
                },
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Some(Commands::Version(args)) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "reagent",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("reagent {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}
