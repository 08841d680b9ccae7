use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tropeworks_common::{Config, OrchestratorConfig, OrchestratorOverrides};
use tropeworks_engine::devices::{DeviceCorpus, Tone, VarietyOptions, VarietySelector};
use tropeworks_engine::providers::{OpenAiEmbedder, OpenAiGenerator};
use tropeworks_engine::store::{InMemoryUsageStore, JsonlTrajectoryStore};
use tropeworks_engine::traits::{TrajectoryStore, UsageCounterStore};
use tropeworks_engine::{EngineDeps, GenerationInput, HybridGenerationOrchestrator};

#[derive(Parser)]
#[command(name = "tropeworks", about = "Generate scored advertising concepts from a brief")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline and print the variants as JSON
    Generate {
        #[arg(long)]
        brief: String,
        #[arg(long, default_value = "creative")]
        tone: String,
        #[arg(long, default_value_t = 3)]
        variants: usize,
        /// Rhetorical device to use; repeat for several
        #[arg(long = "device")]
        devices: Vec<String>,
        /// Enable progressive evolution of the selected seed
        #[arg(long)]
        evolve: bool,
        /// Skip divergent exploration
        #[arg(long)]
        no_explore: bool,
    },
    /// Print a variety-weighted device selection
    Devices {
        #[arg(long, default_value = "creative")]
        tone: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Print corpus exploration stats
    Stats,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("tropeworks=info"))?;
    if env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

/// Corpus commands run without model credentials, so the path is read
/// directly rather than through `Config`.
fn corpus_from_env() -> Arc<DeviceCorpus> {
    let path = env::var("TROPEWORKS_DEVICE_CORPUS").ok().map(PathBuf::from);
    Arc::new(DeviceCorpus::load(path.as_deref()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Generate {
            brief,
            tone,
            variants,
            devices,
            evolve,
            no_explore,
        } => {
            let config = Config::from_env()?;
            config.log_redacted();

            let corpus = Arc::new(DeviceCorpus::load(config.device_corpus_path.as_deref()));
            let usage_store: Arc<dyn UsageCounterStore> = Arc::new(InMemoryUsageStore::new());
            let trajectory_store = config
                .trajectory_log_path
                .clone()
                .map(|path| Arc::new(JsonlTrajectoryStore::new(path)) as Arc<dyn TrajectoryStore>);

            let deps = EngineDeps::builder()
                .generator(Arc::new(OpenAiGenerator::from_config(&config)?))
                .embedder(Arc::new(OpenAiEmbedder::from_config(&config)?))
                .usage_store(Some(usage_store))
                .trajectory_store(trajectory_store)
                .call_timeout(config.call_timeout)
                .build();
            let orchestrator = HybridGenerationOrchestrator::new(deps, corpus, OrchestratorConfig::default());

            let overrides = OrchestratorOverrides {
                enable_progressive_evolution: Some(evolve),
                enable_divergent_exploration: Some(!no_explore),
                ..OrchestratorOverrides::default()
            };
            let input = if devices.is_empty() {
                GenerationInput::builder()
                    .brief(brief)
                    .tone(tone)
                    .variant_count(variants)
                    .overrides(overrides)
                    .build()
            } else {
                GenerationInput::builder()
                    .brief(brief)
                    .tone(tone)
                    .variant_count(variants)
                    .requested_devices(devices)
                    .overrides(overrides)
                    .build()
            };

            info!(session_id = %input.session_id, "Generating concepts");
            let output = orchestrator.generate(&input).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Devices { tone, count } => {
            let selector = VarietySelector::new(corpus_from_env(), None);
            let options = VarietyOptions {
                tone: Tone::parse_lossy(&tone),
                ..VarietyOptions::with_count(count)
            };
            let selected = selector.select(&options).await;
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
        Command::Stats => {
            let selector = VarietySelector::new(corpus_from_env(), None);
            let stats = selector.exploration_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
