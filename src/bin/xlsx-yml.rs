//! xlsx-yml CLI
//!
//! Convert spreadsheet packages to text documents and back, one file at a
//! time or as a repository hook.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use xlsx_yml::batch::{self, Direction};
use xlsx_yml::settings::{Settings, SETTINGS_FILE};
use xlsx_yml::{convert_to_package, convert_to_text, ConvertOptions};

#[derive(Parser, Debug)]
#[command(name = "xlsx-yml")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Version spreadsheet packages as text")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log each conversion step
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flatten an .xlsx/.xlsm package into <PATH>.yml
    #[command(name = "to-yml")]
    ToYml {
        /// Package to convert
        path: PathBuf,

        /// Also write macro source to <stem>.vba
        #[arg(long)]
        separate_vba: bool,

        /// Gzip binary entries before base64 encoding
        #[arg(long)]
        compress_binary: bool,
    },

    /// Rebuild a package from its .yml document
    #[command(name = "to-excel")]
    ToExcel {
        /// Document to convert
        path: PathBuf,
    },

    /// Convert every eligible file under a root, as a version control hook
    Run {
        /// convert_to_yml or convert_to_excel
        #[arg(value_parser = parse_direction)]
        direction: Direction,

        /// Settings file (default: <root>/version_sheet_settings.json)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Directory to search
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

fn parse_direction(name: &str) -> std::result::Result<Direction, String> {
    Direction::parse(name)
        .ok_or_else(|| format!("expected convert_to_yml or convert_to_excel, got {name}"))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::ToYml {
            path,
            separate_vba,
            compress_binary,
        } => {
            let options = ConvertOptions {
                separate_macro_file: separate_vba,
                compress_binary,
                scratch_parent: None,
            };
            let outcome = convert_to_text(&path, &options)
                .with_context(|| format!("Failed to convert: {}", path.display()))?;
            println!("{}", outcome.document.display());
            if let Some(macro_file) = outcome.macro_file {
                println!("{}", macro_file.display());
            }
        }
        Commands::ToExcel { path } => {
            let package = convert_to_package(&path, &ConvertOptions::default())
                .with_context(|| format!("Failed to convert: {}", path.display()))?;
            println!("{}", package.display());
        }
        Commands::Run {
            direction,
            settings,
            root,
        } => return run_hook(direction, settings, root),
    }

    Ok(ExitCode::SUCCESS)
}

fn run_hook(direction: Direction, settings: Option<PathBuf>, root: PathBuf) -> Result<ExitCode> {
    let settings_path = settings.unwrap_or_else(|| root.join(SETTINGS_FILE));
    let settings = if settings_path.exists() {
        Settings::load(&settings_path)?
    } else {
        log::info!("{} not found, using defaults", settings_path.display());
        Settings::default()
    };

    let report = batch::run(&root, direction, &settings)
        .with_context(|| format!("Failed to {} under {}", direction.as_str(), root.display()))?;

    let failures = report.failures();
    if failures > 0 {
        println!("Could not convert {} locked files.", failures);
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}
