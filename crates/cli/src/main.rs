//! notemerge command-line tool.
//!
//! Provides subcommands for generating and validating configuration, serving
//! the resolution API, inspecting the conflicts of a merge result, replaying
//! recorded decisions offline, and running the merge producer.

mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

use notemerge_core::config::AppConfig;
use notemerge_core::conflict::ConflictSite;
use notemerge_core::engine::{ResolutionEngine, ResolveCommand};
use notemerge_core::producer::{MergeProducer, ProcessProducer};
use notemerge_web::WebServer;

/// Config file looked up in the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "notemerge.toml";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// notemerge command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "notemerge",
    version,
    about = "Resolve the conflicts left in merged structured notes"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults to ./notemerge.toml,
    /// then the user config directory, then built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./notemerge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Serve the resolution API and live-update socket.
    Serve {
        /// Override the listen address from the config file.
        #[arg(long)]
        listen: Option<String>,
    },

    /// List the conflict sites of a merge-result file.
    Conflicts {
        /// Merge-result JSON file.
        file: PathBuf,
    },

    /// Replay a list of resolution commands against a merge result.
    Apply {
        /// Merge-result JSON file.
        file: PathBuf,

        /// JSON file holding an array of resolution commands.
        #[arg(short, long)]
        decisions: PathBuf,

        /// Write the resolved text here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the final output (text and resolution map) as JSON.
        #[arg(long)]
        audit: Option<PathBuf>,

        /// Fail if any conflict is left without a decision.
        #[arg(long)]
        require_complete: bool,
    },

    /// Run the merge producer and list the conflicts it reports.
    Fetch {
        /// Extra arguments passed to the producer, typically note files.
        inputs: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref());

    if let Commands::Serve { listen } = cli.command {
        let config = load_config(config_path.as_deref())?;
        init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.log_level), true);
        return cmd_serve(config, config_path.as_deref(), listen).await;
    }

    // Minimal logging for one-shot commands
    init_tracing(cli.log_level.as_deref().unwrap_or("warn"), false);

    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => {
            let path = config_path.context("no configuration file found; pass --config")?;
            cmd_validate(&path)
        }
        Commands::Conflicts { file } => {
            let config = load_config(config_path.as_deref())?;
            cmd_conflicts(&config, &file)
        }
        Commands::Apply {
            file,
            decisions,
            output,
            audit,
            require_complete,
        } => {
            let config = load_config(config_path.as_deref())?;
            cmd_apply(
                &config,
                &file,
                &decisions,
                output.as_deref(),
                audit.as_deref(),
                require_complete,
            )
        }
        Commands::Fetch { inputs } => {
            let config = load_config(config_path.as_deref())?;
            cmd_fetch(&config, &inputs).await
        }
        Commands::Serve { .. } => unreachable!(),
    }
}

fn init_tracing(level: &str, with_target: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(with_target)
        .with_writer(std::io::stderr);
    if with_target {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("notemerge").join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_and_validate(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn load_engine(config: &AppConfig, file: &Path) -> Result<ResolutionEngine> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read merge result {}", file.display()))?;
    let mut engine = ResolutionEngine::from_config(&config.engine);
    let summary = engine
        .load(&raw)
        .with_context(|| format!("failed to load merge result {}", file.display()))?;
    if summary.unanchored > 0 {
        eprintln!(
            "{}",
            style::warn(&format!(
                "{} conflict site(s) not found in merged_text; they cannot be resolved",
                summary.unanchored
            ))
        );
    }
    Ok(engine)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# notemerge configuration
# Every section is optional; the values below are the defaults.

[engine]
# first_only: incoming/both always take the first alternative.
# per_alternative: commands may pick an alternative by index or text.
alternative_policy = "first_only"
event_capacity = 256

[producer]
command = "python3"
args = ["merging/test_client.py"]
# working_dir = "/path/to/notes"
# Read the payload from this file after a successful run (relative paths are
# resolved against working_dir). Set to "" to read stdout instead.
output_file = "merged_results.json"
timeout_secs = 300

[web]
listen = "127.0.0.1:5001"
max_body_bytes = 2097152

[logging]
log_level = "info"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Point [producer] at your merge script");
    println!("  2. Validate with: notemerge validate --config {}", output.display());
    println!("  3. Start the server: notemerge serve --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All values are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Policy        : {}", config.engine.alternative_policy);
    println!(
        "  Producer      : {} {}",
        config.producer.command,
        config.producer.args.join(" ")
    );
    println!(
        "  Working dir   : {}",
        config
            .producer
            .working_dir
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string())
    );
    println!(
        "  Output file   : {}",
        config
            .producer
            .payload_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".to_string())
    );
    println!("  Timeout       : {}s", config.producer.timeout_secs);
    println!("  Web listen    : {}", config.web.listen);
    println!("  Log level     : {}", config.logging.log_level);
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}

async fn cmd_serve(
    mut config: AppConfig,
    config_path: Option<&Path>,
    listen: Option<String>,
) -> Result<()> {
    if let Some(listen) = listen {
        config.web.listen = listen;
        config.validate().context("invalid --listen address")?;
    }

    info!("========================================");
    info!("  notemerge v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!(
        "Config file   : {}",
        config_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string())
    );
    info!("Producer      : {} {}", config.producer.command, config.producer.args.join(" "));
    info!("Policy        : {}", config.engine.alternative_policy);
    info!("Web listen    : {}", config.web.listen);
    info!("========================================");

    WebServer::new(config)
        .start(signals::wait_for_shutdown())
        .await
        .context("web server error")?;

    info!("notemerge stopped.");
    Ok(())
}

fn cmd_conflicts(config: &AppConfig, file: &Path) -> Result<()> {
    let engine = load_engine(config, file)?;
    print_sites(&engine.pending_conflicts()?);
    Ok(())
}

fn cmd_apply(
    config: &AppConfig,
    file: &Path,
    decisions: &Path,
    output: Option<&Path>,
    audit: Option<&Path>,
    require_complete: bool,
) -> Result<()> {
    let mut engine = load_engine(config, file)?;

    let raw = std::fs::read_to_string(decisions)
        .with_context(|| format!("failed to read decisions {}", decisions.display()))?;
    let commands: Vec<ResolveCommand> =
        serde_json::from_str(&raw).context("decisions must be a JSON array of resolution commands")?;

    for (i, cmd) in commands.iter().enumerate() {
        engine
            .resolve_command(cmd)
            .with_context(|| format!("decision #{} failed", i))?;
    }

    let pending = engine.pending_conflicts()?;
    if !pending.is_empty() {
        let keys: Vec<String> = pending.iter().map(|s| s.key.to_string()).collect();
        if require_complete {
            anyhow::bail!("{} conflict(s) left unresolved: {}", keys.len(), keys.join(", "));
        }
        eprintln!(
            "{}",
            style::warn(&format!(
                "{} conflict(s) left unresolved: {}",
                keys.len(),
                keys.join(", ")
            ))
        );
    }

    let final_output = engine.finalize()?;

    if let Some(path) = audit {
        let json = serde_json::to_string_pretty(&final_output)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write audit file {}", path.display()))?;
    }

    match output {
        Some(path) => {
            std::fs::write(path, &final_output.text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{}",
                style::success(&format!(
                    "Applied {} decision(s); resolved text written to {}",
                    commands.len(),
                    path.display()
                ))
            );
        }
        None => println!("{}", final_output.text),
    }

    Ok(())
}

async fn cmd_fetch(config: &AppConfig, inputs: &[String]) -> Result<()> {
    let producer = ProcessProducer::new(&config.producer);
    let payload = producer
        .run_merge(inputs)
        .await
        .with_context(|| format!("merge producer '{}' failed", producer.command()))?;

    let mut engine = ResolutionEngine::from_config(&config.engine);
    engine
        .load_value(payload)
        .context("merge producer returned an unusable result")?;

    println!("{}", style::state(engine.state()));
    print_sites(&engine.pending_conflicts()?);
    Ok(())
}

fn print_sites(sites: &[ConflictSite]) {
    if sites.is_empty() {
        println!();
        println!("{}", style::success("No conflicts"));
        println!();
        return;
    }

    println!();
    println!("{}", style::header(&format!("Conflicts ({})", sites.len())));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Key", "Kind", "Original", "Incoming"]);

    for site in sites {
        let alternatives = site
            .alternatives
            .iter()
            .enumerate()
            .map(|(i, alt)| format!("#{} {}", i, alt))
            .collect::<Vec<_>>()
            .join("\n");

        table.add_row(vec![
            Cell::new(site.key.to_string()),
            Cell::new(site.kind),
            Cell::new(&site.agreed_value),
            Cell::new(alternatives),
        ]);
    }

    println!("{}", table);
    println!();
    println!(
        "{}",
        style::dim("Resolve with: notemerge apply <file> --decisions <decisions.json>")
    );
}
