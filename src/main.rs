use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wiz2md::utils::ConvertConfig;

/// Convert a WizNote data directory into Markdown files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// WizNote account data directory (the one containing index.db).
    #[arg(value_name = "WIZ_DIR")]
    wiz_dir: Option<PathBuf>,

    /// Directory to write markdown files to.
    /// Defaults to ./output/notes if not set in config.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Scratch directory for extracted note packages.
    #[arg(long, value_name = "PATH")]
    temp: Option<PathBuf>,

    /// Path to the conversion ledger database.
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/wiz2md/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Reconvert notes even if they are up to date.
    #[arg(short, long)]
    force: bool,

    /// Log every note, including skipped ones.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    wiz_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    #[serde(default)]
    always_convert: bool,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("wiz2md/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve the WizNote directory (CLI > Config)
    let wiz_dir = cli.wiz_dir.or(file_cfg.wiz_dir).ok_or_else(|| {
        eyre!("No WizNote directory given.\nPass WIZ_DIR, or set wiz_dir in config.toml.")
    })?;
    if !wiz_dir.is_dir() {
        return Err(eyre!("WizNote directory not found: {}", wiz_dir.display()));
    }

    // 3. Everything else falls back to the defaults
    let mut config = ConvertConfig::new(wiz_dir);
    if let Some(output_dir) = cli.output.or(file_cfg.output_dir) {
        config.output_dir = output_dir;
    }
    if let Some(temp_dir) = cli.temp.or(file_cfg.temp_dir) {
        config.temp_dir = temp_dir;
    }
    if let Some(ledger_path) = cli.ledger.or(file_cfg.ledger_path) {
        config.ledger_path = ledger_path;
    }
    config.always_convert = cli.force || file_cfg.always_convert;

    // 4. Run the conversion
    let summary = wiz2md::pipeline::execute(&config)?;
    if summary.failed > 0 {
        return Err(eyre!("{} note(s) failed to convert", summary.failed));
    }
    Ok(())
}
