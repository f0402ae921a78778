//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docimport_core::{
    ConcurrencySettings, ImportRequest, Importer, LocalSource, ProcessDispatcher, ProgressReporter,
    ctrl_c_cancellation, run_worker_stdio,
};
use docimport_planner::{AmbiguityResolver, ManifestOptions, OpenAiResolver, build_manifest};
use docimport_shared::{
    AppConfig, ImportManifest, ImportResult, LlmFallbackMode, SourceAdapter, StructureOrder, WriteMode,
    init_config, load_config, load_config_from,
};
use docimport_writer::{DocApi, FeishuClient, TenantTokenProvider, build_http_client};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

/// How many unresolved links and failures the summary prints.
const SUMMARY_LIMIT: usize = 20;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docimport: import a local markdown tree into Feishu docs and wiki.
#[derive(Parser)]
#[command(
    name = "docimport",
    version,
    about = "Import a local markdown tree into Feishu documents, folders, and wiki spaces.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docimport/docimport.toml.
    #[arg(long, global = true, env = "DOCIMPORT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import a markdown tree.
    Import(ImportArgs),

    /// Build and print the import manifest without touching the remote side.
    Plan(PlanArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run one worker process (reads payloads on stdin).
    #[command(hide = true)]
    Worker,
}

/// Ordering flags shared by `import` and `plan`.
#[derive(Args, Debug, Default)]
pub(crate) struct OrderingArgs {
    /// Manifest ordering: toc_first or path.
    #[arg(long)]
    pub structure_order: Option<StructureOrder>,

    /// Table-of-contents file, relative to the source root.
    #[arg(long)]
    pub toc_file: Option<String>,

    /// Ambiguous TOC links: off or toc_ambiguity.
    #[arg(long)]
    pub llm_fallback: Option<LlmFallbackMode>,

    /// Resolver call budget for the run.
    #[arg(long)]
    pub llm_max_calls: Option<usize>,

    /// Skip root-level README/index files.
    #[arg(long)]
    pub skip_root_readme: bool,
}

impl OrderingArgs {
    fn resolve(&self, config: &AppConfig) -> ManifestOptions {
        ManifestOptions {
            strategy: self.structure_order.unwrap_or(config.import.structure_order),
            toc_file: self.toc_file.clone().unwrap_or_else(|| config.import.toc_file.clone()),
            llm_fallback: self.llm_fallback.unwrap_or(config.import.llm_fallback),
            llm_max_calls: self.llm_max_calls.unwrap_or(config.import.llm_max_calls),
            skip_root_readme: self.skip_root_readme,
            ..ManifestOptions::default()
        }
    }
}

/// `docimport import` flags.
#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Root of the markdown tree.
    #[arg(long)]
    pub path: PathBuf,

    /// Destination: folder, wiki, or both.
    #[arg(long)]
    pub write_mode: Option<WriteMode>,

    /// Wiki space to find or create.
    #[arg(long, default_value = "")]
    pub space_name: String,

    /// Existing wiki space id; wins over --space-name.
    #[arg(long, default_value = "")]
    pub space_id: String,

    /// Root drive folder; overrides FEISHU_FOLDER_TOKEN.
    #[arg(long)]
    pub folder_token: Option<String>,

    /// Mirror source directories as drive folders.
    #[arg(long)]
    pub folder_subdirs: bool,

    #[command(flatten)]
    pub ordering: OrderingArgs,

    /// Do not write the navigation document.
    #[arg(long)]
    pub no_folder_nav_doc: bool,

    /// Title of the navigation document.
    #[arg(long)]
    pub folder_nav_title: Option<String>,

    /// Worker processes running at once.
    #[arg(long, value_parser = parse_positive)]
    pub max_workers: Option<usize>,

    /// Chunk writers per document.
    #[arg(long, value_parser = parse_positive)]
    pub chunk_workers: Option<usize>,

    /// Plan and count only.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the full result as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// `docimport plan` flags.
#[derive(Args, Debug)]
pub(crate) struct PlanArgs {
    /// Root of the markdown tree.
    #[arg(long)]
    pub path: PathBuf,

    #[command(flatten)]
    pub ordering: OrderingArgs,

    /// Print the manifest as JSON instead of a path list.
    #[arg(long)]
    pub json: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_positive(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// command output and, in worker processes, the result protocol.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docimport=info",
        1 => "docimport=debug",
        _ => "docimport=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let worker_args = worker_args(&cli);
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Import(ref args) => cmd_import(config_path, worker_args, args).await,
        Command::Plan(ref args) => cmd_plan(config_path, args).await,
        Command::Config { ref action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
        Command::Worker => cmd_worker(config_path).await,
    }
}

/// Global flags forwarded to worker processes so they log and configure
/// themselves like the parent.
fn worker_args(cli: &Cli) -> Vec<String> {
    let mut args = vec!["--log-format".to_string(), cli.log_format.as_str().to_string()];
    if cli.verbose > 0 {
        args.push(format!("-{}", "v".repeat(usize::from(cli.verbose))));
    }
    if let Some(path) = &cli.config {
        args.push("--config".into());
        args.push(path.display().to_string());
    }
    args
}

/// File (or defaults), then environment overrides.
fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.apply_env()?;
    Ok(config)
}

/// The remote API, when credentials are configured.
fn build_api(config: &AppConfig) -> Result<Option<Arc<dyn DocApi>>> {
    let Some(app_secret) = config.app_secret() else {
        debug!(env = %config.feishu.app_secret_env, "app secret not set");
        return Ok(None);
    };
    if config.feishu.app_id.is_empty() {
        debug!("app id not set");
        return Ok(None);
    }

    let client = build_http_client(&config.http)?;
    let auth = Arc::new(TenantTokenProvider::new(
        client.clone(),
        &config.feishu.base_url,
        &config.feishu.app_id,
        &app_secret,
    ));
    let api = FeishuClient::new(client, &config.feishu.base_url, auth, &config.http);
    Ok(Some(Arc::new(api)))
}

/// The TOC ambiguity resolver, when enabled and configured.
fn build_resolver(config: &AppConfig, ordering: &ManifestOptions) -> Result<Option<Arc<dyn AmbiguityResolver>>> {
    if ordering.llm_fallback == LlmFallbackMode::Off {
        return Ok(None);
    }
    if !config.llm_ready() {
        debug!("LLM resolver not configured, ambiguous links stay unresolved");
        return Ok(None);
    }
    let api_key = config.llm_api_key().unwrap_or_default();
    let resolver = OpenAiResolver::new(&config.llm.base_url, &api_key, &config.llm.model, config.http.timeout())?;
    Ok(Some(Arc::new(resolver)))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(config_path: Option<&Path>, worker_args: Vec<String>, args: &ImportArgs) -> Result<()> {
    let config = load_app_config(config_path)?;
    let ordering = args.ordering.resolve(&config);
    let request = ImportRequest {
        space_name: args.space_name.trim().to_string(),
        space_id: args.space_id.trim().to_string(),
        write_mode: args.write_mode.unwrap_or(config.import.write_mode),
        folder_subdirs: args.folder_subdirs,
        dry_run: args.dry_run,
        concurrency: ConcurrencySettings {
            max_workers: args.max_workers.unwrap_or(config.import.max_workers).max(1),
            chunk_workers: args.chunk_workers.unwrap_or(config.import.chunk_workers).max(1),
        },
        ordering,
        folder_nav_doc: !args.no_folder_nav_doc,
        folder_nav_title: args
            .folder_nav_title
            .clone()
            .unwrap_or_else(|| config.import.folder_nav_title.clone()),
    };

    let source = Arc::new(LocalSource::new(&args.path)?);
    let dispatcher = Arc::new(ProcessDispatcher::current_exe(worker_args)?);
    let mut importer =
        Importer::new(source, dispatcher).with_convert_max_bytes(config.feishu.convert_max_bytes);
    if let Some(api) = build_api(&config)? {
        let root_folder = args
            .folder_token
            .clone()
            .unwrap_or_else(|| config.feishu.folder_token.clone());
        importer = importer.with_api(api, root_folder);
    }
    if let Some(resolver) = build_resolver(&config, &request.ordering)? {
        importer = importer.with_resolver(resolver);
    }

    info!(
        path = %args.path.display(),
        write_mode = %request.write_mode,
        max_workers = request.concurrency.max_workers,
        dry_run = request.dry_run,
        "starting import"
    );

    let reporter = CliProgress::new();
    let result = importer.run(&request, &reporter, ctrl_c_cancellation()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, request.dry_run);
    }

    if result.failed > 0 {
        return Err(eyre!("{} of {} documents failed", result.failed, result.total));
    }
    Ok(())
}

async fn cmd_plan(config_path: Option<&Path>, args: &PlanArgs) -> Result<()> {
    let config = load_app_config(config_path)?;
    let ordering = args.ordering.resolve(&config);
    let resolver = build_resolver(&config, &ordering)?;

    let source = LocalSource::new(&args.path)?;
    let paths = source.list_markdown()?;
    let manifest = build_manifest(&paths, &ordering, &source, resolver.as_deref()).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    } else {
        print_manifest(&manifest);
    }
    Ok(())
}

async fn cmd_worker(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let api = build_api(&config)?
        .ok_or_else(|| eyre!("worker needs FEISHU_APP_ID and {} to be set", config.feishu.app_secret_env))?;
    run_worker_stdio(api).await?;
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_manifest(manifest: &ImportManifest) {
    for item in &manifest.items {
        if item.toc_label.is_empty() {
            println!("{:>4}  {}", item.order, item.path);
        } else {
            println!("{:>4}  {}  ({})", item.order, item.path, item.toc_label);
        }
    }
    println!();
    println!(
        "  {} documents, {} skipped, {}/{} TOC links matched, {} ambiguous, {} LLM calls",
        manifest.items.len(),
        manifest.skipped_items.len(),
        manifest.matched_links,
        manifest.toc_links,
        manifest.ambiguous_links,
        manifest.llm_calls,
    );
    for line in manifest.unresolved_links.iter().take(SUMMARY_LIMIT) {
        println!("  unresolved: {line}");
    }
}

fn print_result(result: &ImportResult, dry_run: bool) {
    println!();
    if dry_run {
        println!("  Dry run complete, nothing was written.");
    } else {
        println!("  Import finished.");
    }
    println!("  Run:      {}", result.run_id);
    println!("  Total:    {}", result.total);
    println!("  Success:  {}", result.success);
    println!("  Failed:   {}", result.failed);
    println!("  Skipped:  {}", result.skipped);
    println!(
        "  Time:     {:.1}s",
        (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0
    );
    for failure in result.failures.iter().take(SUMMARY_LIMIT) {
        println!("  failed: {} ({})", failure.path, failure.reason);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        match ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            Ok(style) => spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])),
            Err(e) => warn!(error = %e, "progress template rejected"),
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn planned(&self, manifest: &ImportManifest) {
        self.spinner.set_message(format!(
            "Planned {} documents ({} skipped)",
            manifest.items.len(),
            manifest.skipped_items.len()
        ));
    }

    fn done(&self, _result: &ImportResult) {
        self.spinner.finish_and_clear();
    }
}
