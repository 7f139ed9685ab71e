use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use package_search_loader::config::{
    find_config_file, get_config, load_config, ConfigFile, Config,
};
use package_search_loader::controller::{
    IncrementalListController, ListObserver, LoadOutcome, LoadRequest, TracingLogger,
};
use package_search_loader::loader::{ItemLoader, LoaderState};
use package_search_loader::models::{PackageItem, Query};
use package_search_loader::sources::SourceRegistry;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pkgsearch - Search packages across several package sources at once
#[derive(Parser, Debug)]
#[command(name = "pkgsearch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search packages across several package sources at once", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Automatic based on terminal (table if TTY, JSON otherwise)
    Auto,
    /// Table format (human-readable)
    Table,
    /// JSON format (machine-readable)
    Json,
    /// Plain text format
    Plain,
}

impl OutputFormat {
    fn resolve(self) -> Self {
        match self {
            OutputFormat::Auto if std::io::stdout().is_terminal() => OutputFormat::Table,
            OutputFormat::Auto => OutputFormat::Json,
            other => other,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search packages in the configured sources
    #[command(alias = "s")]
    Search {
        /// Search text
        query: String,

        /// Include prerelease versions
        #[arg(long)]
        prerelease: bool,

        /// Number of pages to load
        #[arg(long, short, default_value_t = 1)]
        pages: usize,

        /// Only search these source ids (repeatable)
        #[arg(long, short)]
        source: Vec<String>,

        /// Extra source filter as KEY=VALUE (repeatable)
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
    },

    /// List the configured sources
    #[command(alias = "ls")]
    Sources,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Where to write it (defaults to ./pkgsearch.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration from file if specified or found in default locations
    let config_path = cli.config.clone().or_else(find_config_file);
    let config = match &config_path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => get_config(),
    };

    // Initialize tracing based on verbosity
    let log_level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = if cli.quiet { "error" } else { log_level };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                format!("package_search_loader={0},pkgsearch={0}", env_filter)
            }),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    match cli.command {
        Commands::Search {
            query,
            prerelease,
            pages,
            source,
            filters,
        } => {
            let mut registry = SourceRegistry::from_config(&config)?;
            if !source.is_empty() {
                registry.retain_ids(&source)?;
            }
            if registry.is_empty() {
                bail!("No enabled sources; check the [[sources]] section of the configuration");
            }

            let mut search = Query::new(&query)
                .include_prerelease(prerelease || config.loader.include_prerelease);
            for (key, value) in filters {
                search = search.filter(key, value);
            }

            let items = run_search(search, &registry, pages.max(1), cli.quiet).await?;
            if let Some((items, state)) = items {
                print_items(&items, &state, cli.output.resolve());
            }
        }

        Commands::Sources => print_sources(&config, cli.output.resolve()),

        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                let path = path.unwrap_or_else(|| {
                    PathBuf::from(package_search_loader::config::file_config::LOCAL_CONFIG_FILE)
                });
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                ConfigFile::create_default(&path).save()?;
                println!("Wrote {}", path.display());
            }
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

/// Reports loader progress on stderr
struct ProgressObserver {
    quiet: bool,
}

impl ListObserver for ProgressObserver {
    fn loading_started(&self, _cycle: u64, message: &str) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }

    fn items_changed(&self, _cycle: u64, items: Arc<Vec<PackageItem>>, state: &LoaderState) {
        if !self.quiet {
            eprintln!("  {} packages ({})", items.len(), state.status);
        }
    }

    fn load_completed(&self, _cycle: u64, outcome: &LoadOutcome) {
        if let LoadOutcome::Cancelled = outcome {
            eprintln!("Search cancelled");
        }
    }
}

/// Run one search cycle plus `pages - 1` load-more requests.
///
/// Returns `None` when the search was cancelled.
async fn run_search(
    query: Query,
    registry: &SourceRegistry,
    pages: usize,
    quiet: bool,
) -> Result<Option<(Arc<Vec<PackageItem>>, LoaderState)>> {
    let loader = Arc::new(ItemLoader::from_registry(query.clone(), registry));
    let controller = IncrementalListController::inline(Arc::new(ProgressObserver { quiet }));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let request = LoadRequest::builder()
        .first_batch(loader.search_first_page(cancel.clone()))
        .loader(Arc::clone(&loader))
        .loading_message(format!(
            "Searching {} source(s) for '{}'...",
            registry.len(),
            query.search_text
        ))
        .logger(Arc::new(TracingLogger))
        .cancellation(cancel)
        .build()?;

    match controller.load_items(request)?.wait().await {
        LoadOutcome::Loaded(_) => {}
        LoadOutcome::Cancelled => return Ok(None),
        LoadOutcome::Failed(err) => return Err(err.into()),
    }

    // A failed or cancelled page keeps what was already loaded
    for _ in 1..pages {
        match controller.load_more().await {
            Ok(state) if !state.status.is_terminal() => {}
            Ok(_) => break,
            Err(err) => {
                tracing::warn!("Stopped loading more pages: {}", err);
                break;
            }
        }
    }

    Ok(Some((controller.items(), loader.state())))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn print_items(items: &[PackageItem], state: &LoaderState, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "status": state.status.to_string(),
                "items_count": state.items_count,
                "errors": state
                    .errors_by_source
                    .iter()
                    .map(|(id, err)| (id.clone(), err.to_string()))
                    .collect::<std::collections::BTreeMap<_, _>>(),
                "items": items,
            });
            match serde_json::to_string_pretty(&output) {
                Ok(text) => println!("{}", text),
                Err(err) => eprintln!("Failed to serialize results: {}", err),
            }
        }
        OutputFormat::Plain => {
            for item in items {
                println!("{} {} [{}]", item.id, item.version, item.source_id);
            }
        }
        OutputFormat::Table | OutputFormat::Auto => {
            use comfy_table::{Attribute, Cell, Table};
            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["Package", "Version", "Downloads", "Source", "Description"]);

            for item in items {
                table.add_row(vec![
                    Cell::new(truncate(&item.id, 40)).add_attribute(Attribute::Bold),
                    Cell::new(&item.version),
                    Cell::new(
                        item.metadata
                            .download_count
                            .map(|n| n.to_string())
                            .unwrap_or_default(),
                    ),
                    Cell::new(&item.source_id),
                    Cell::new(truncate(&item.metadata.description, 50)),
                ]);
            }

            println!("{table}");
            println!("{} packages, {}", state.items_count, state.status);
            for (source_id, error) in &state.errors_by_source {
                println!("  {} failed: {}", source_id, error);
            }
        }
    }
}

fn print_sources(config: &Config, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&config.sources) {
            Ok(text) => println!("{}", text),
            Err(err) => eprintln!("Failed to serialize sources: {}", err),
        },
        OutputFormat::Plain => {
            for source in &config.sources {
                println!("{}\t{:?}\t{}", source.id, source.kind, source.endpoint);
            }
        }
        OutputFormat::Table | OutputFormat::Auto => {
            use comfy_table::Table;
            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["Id", "Kind", "Endpoint", "Enabled"]);
            for source in &config.sources {
                table.add_row(vec![
                    source.id.clone(),
                    format!("{:?}", source.kind),
                    source.endpoint.clone(),
                    if source.enabled { "yes" } else { "no" }.to_string(),
                ]);
            }
            println!("{table}");
        }
    }
}
