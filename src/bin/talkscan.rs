use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use talkscan::init_logging;
use talkscan::models::{Category, DetectionResult};
use talkscan::services::detection::DetectionError;
use talkscan::services::{
    analyze, format_batch_for_sheets, format_for_sheets, get_api_key, parse_provider, AppConfig, ConfigStore,
    DetectionBackend, ExportFormat, LabeledResult, OpenAiBackend, ProviderClient, ShortcutCatalog,
};

/// Find Wikipedia policy, guideline and essay shortcuts cited in talk-page discussions
#[derive(Parser, Debug)]
#[command(name = "talkscan", version, about, args_conflicts_with_subcommands = true, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config directory (defaults to the per-user talkscan config directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(flatten)]
    scan: ScanArgs,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Discussion text files, or "-" for stdin. Each one is analyzed separately.
    inputs: Vec<String>,

    /// Let the model report paraphrased invocations, not only literal shortcuts
    #[arg(long)]
    loose: bool,

    /// Skip the model backend entirely
    #[arg(long)]
    pattern_only: bool,

    /// Output format: tsv, csv or json
    #[arg(long, default_value = "tsv")]
    format: ExportFormat,

    /// JSON catalog replacing the built-in shortcut list
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Model provider override, `name[:model]` (only openai-compatible servers are supported)
    #[arg(long)]
    provider: Option<String>,

    /// Write the export here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a config file with default settings
    Init,
    /// Print the config file location and settings (API keys masked)
    Show,
    /// Store an API key for a provider
    SetKey {
        key: String,
        #[arg(long, default_value = "openai")]
        provider: String,
    },
    /// Remove a stored API key
    DeleteKey {
        #[arg(long, default_value = "openai")]
        provider: String,
    },
}

fn config_store(dir: Option<&PathBuf>) -> Option<ConfigStore> {
    dir.cloned()
        .or_else(ConfigStore::default_config_dir)
        .map(ConfigStore::new)
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{}", visible)
}

fn run_config(store: &ConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init => {
            if store.config_file().exists() {
                bail!("config already exists: {}", store.config_file().display());
            }
            store.save(&AppConfig::default()).map_err(anyhow::Error::msg)?;
            println!("Created {}", store.config_file().display());
        }
        ConfigAction::Show => {
            let mut config = store.load().map_err(anyhow::Error::msg)?;
            for key in config.api_keys.values_mut() {
                *key = mask_key(key);
            }
            println!("# {}", store.config_file().display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::SetKey { key, provider } => {
            store.set_api_key(&provider, key.trim()).map_err(anyhow::Error::msg)?;
            info!("[CLI] Stored API key for {}", provider);
            println!("Saved {} key to {}", provider, store.config_file().display());
        }
        ConfigAction::DeleteKey { provider } => {
            store.delete_api_key(&provider).map_err(anyhow::Error::msg)?;
            println!("Removed {} key", provider);
        }
    }
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read stdin failed")?;
        return Ok(text);
    }
    std::fs::read_to_string(input).with_context(|| format!("read file failed: {}", input))
}

fn load_catalog(path: Option<&Path>) -> Result<ShortcutCatalog, DetectionError> {
    match path {
        Some(path) => Ok(ShortcutCatalog::load(path)?),
        None => Ok(ShortcutCatalog::builtin()),
    }
}

fn build_backend(config: &AppConfig) -> Option<Arc<dyn DetectionBackend>> {
    let Some(api_key) = get_api_key("openai").or_else(|| config.api_keys.get("openai").cloned()) else {
        info!("[CLI] No OpenAI API key configured, model detection unavailable");
        return None;
    };

    let proxy = config
        .proxy
        .as_ref()
        .filter(|p| p.enabled)
        .and_then(|p| p.https.clone());

    let client = match proxy {
        Some(proxy_url) => match ProviderClient::with_proxy(config.provider.chat_url(), &proxy_url) {
            Ok(client) => client,
            Err(e) => {
                warn!("[CLI] Proxy setup failed ({}), model detection disabled", e);
                return None;
            }
        },
        None => ProviderClient::with_url(config.provider.chat_url()),
    };

    info!("[CLI] Model backend ready, model={}", config.provider.model);
    Some(Arc::new(OpenAiBackend::new(client, api_key, &config.provider)))
}

fn print_summary(input: &str, text: &str, result: &DetectionResult) {
    eprintln!("Input: {} ({} bytes, {} chunks)", input, text.len(), result.chunk_count);
    eprintln!(
        "Detector: {}{}",
        result.detector_used,
        if result.fell_back { " (fell back)" } else { "" }
    );
    for category in Category::ALL {
        eprintln!("{}: {}", category.plural(), result.of_category(category).count());
    }
}

async fn run_scan(store: Option<ConfigStore>, args: ScanArgs) -> Result<()> {
    if args.inputs.is_empty() {
        bail!("no input given; pass one or more files, or - for stdin");
    }

    let mut config = match &store {
        Some(store) => store.load().map_err(anyhow::Error::msg)?,
        None => AppConfig::default(),
    };
    if let Some(spec) = &args.provider {
        let provider = parse_provider(spec);
        if provider.name != "openai" {
            warn!("[CLI] Provider '{}' treated as openai-compatible", provider.name);
        }
        if !provider.model.is_empty() {
            config.provider.model = provider.model;
        }
    }

    let catalog_path = args.catalog.clone().or_else(|| config.detection.catalog_path.clone());
    let catalog = load_catalog(catalog_path.as_deref()).context("catalog load failed")?;
    let catalog = Arc::new(catalog);

    let backend = if args.pattern_only { None } else { build_backend(&config) };
    let mut options = config.detection.to_options(!args.pattern_only);
    options.loose_mode |= args.loose;

    let mut analyzed: Vec<(String, DetectionResult)> = Vec::with_capacity(args.inputs.len());
    for (idx, input) in args.inputs.iter().enumerate() {
        info!("[CLI] Analyzing discussion {}/{}: {}", idx + 1, args.inputs.len(), input);
        let text = read_input(input)?;
        let result = analyze(&text, catalog.clone(), &options, backend.clone()).await;
        print_summary(input, &text, &result);
        analyzed.push((text, result));
    }

    let exported = if analyzed.len() == 1 {
        format_for_sheets(&analyzed[0].1, &analyzed[0].0, args.format)
    } else {
        let items: Vec<LabeledResult> = args
            .inputs
            .iter()
            .zip(&analyzed)
            .map(|(source, (text, result))| LabeledResult { source, text, result })
            .collect();
        format_batch_for_sheets(&items, args.format)
    }
    .map_err(anyhow::Error::msg)?;

    match &args.out {
        Some(path) => {
            std::fs::write(path, &exported).with_context(|| format!("write output failed: {}", path.display()))?;
            eprintln!("Saved: {}", path.display());
        }
        None => println!("{}", exported),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let store = config_store(cli.config_dir.as_ref());
    match cli.command {
        Some(Command::Config { action }) => {
            let Some(store) = store else {
                bail!("no config directory available; pass --config-dir");
            };
            run_config(&store, action)
        }
        None => run_scan(store, cli.scan).await,
    }
}
