//! macroconf CLI - Command-line interface for macroconf configuration files
//!
//! Usage:
//!   macroconf get instrument.yaml vis.spatial_psf.data_file --pathname
//!   macroconf dump instrument.yaml --resolve --format json
//!   macroconf check instrument.yaml detectors.yaml
//!   macroconf locate --package skconfig --group usask-arg --file instrument.yaml

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use macroconf_core::{
    Config, ConfigOptions, Delimiters, LocationClass, Locator, MacroScope, Precedence, Value,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// macroconf - YAML configuration with $( name )$ macro expansion
#[derive(Parser, Debug)]
#[command(name = "macroconf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that load a configuration
#[derive(clap::Args, Debug)]
struct LoadArgs {
    /// Root lookups at this key path
    #[arg(short, long)]
    subkey: Option<String>,

    /// Macro lookup order: int, env, int,env or env,int
    #[arg(short, long)]
    precedence: Option<Precedence>,

    /// Key path delimiter characters (default "./")
    #[arg(short, long)]
    delimiters: Option<Delimiters>,

    /// Resolve internal macros in the whole document or the subkey only
    #[arg(long, default_value = "document")]
    scope: MacroScope,
}

impl LoadArgs {
    fn options(&self) -> ConfigOptions {
        let mut options = ConfigOptions::default().with_macro_scope(self.scope);
        if let Some(subkey) = &self.subkey {
            options = options.with_subkey(subkey.clone());
        }
        if let Some(precedence) = &self.precedence {
            options = options.with_precedence(precedence.clone());
        }
        if let Some(delimiters) = &self.delimiters {
            options = options.with_delimiters(delimiters.clone());
        }
        options
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a specific value from the configuration
    Get {
        /// Configuration file
        file: PathBuf,

        /// Path to the value (e.g., vis.spatial_psf.data_file)
        path: String,

        #[command(flatten)]
        load: LoadArgs,

        /// Print the value as a normalized file path
        #[arg(long, conflicts_with = "raw")]
        pathname: bool,

        /// Print the value without expanding macros
        #[arg(long)]
        raw: bool,

        /// Output format: text, json, yaml
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Export the configuration
    Dump {
        /// Configuration file
        file: PathBuf,

        #[command(flatten)]
        load: LoadArgs,

        /// Expand macros
        #[arg(short, long)]
        resolve: bool,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load each file (with includes) and expand every macro in it
    Check {
        /// Configuration file(s) to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print where a configuration file is located
    Locate {
        /// Package name
        #[arg(long)]
        package: String,

        /// Group (organisation) name
        #[arg(long)]
        group: String,

        /// File name inside the package directory
        #[arg(long)]
        file: String,

        /// Location class: user, prefix
        #[arg(short, long, default_value = "user")]
        location: LocationClass,
    },
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Get {
            file,
            path,
            load,
            pathname,
            raw,
            format,
        } => cmd_get(&file, &path, &load, pathname, raw, &format),

        Commands::Dump {
            file,
            load,
            resolve,
            format,
            output,
        } => cmd_dump(&file, &load, resolve, &format, output),

        Commands::Check { files } => cmd_check(files),

        Commands::Locate {
            package,
            group,
            file,
            location,
        } => cmd_locate(Locator::new(package, group, file, location)),
    }
}

/// Default filter is `warn`; `RUST_LOG` takes precedence over `-v`
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
}

fn load_config(file: &Path, load: &LoadArgs) -> Result<Config, String> {
    Config::load_with_options(file, load.options())
        .map_err(|e| format!("Failed to load {}: {}", file.display(), e))
}

fn render(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| e.to_string()),
        "yaml" => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        _ => match value {
            Value::Sequence(_) | Value::Mapping(_) => {
                serde_yaml::to_string(value).map_err(|e| e.to_string())
            }
            scalar => Ok(format!("{}\n", scalar)),
        },
    }
}

fn cmd_get(
    file: &Path,
    path: &str,
    load: &LoadArgs,
    pathname: bool,
    raw: bool,
    format: &str,
) -> ExitCode {
    let config = match load_config(file, load) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let result = if pathname {
        config
            .get_pathname(path)
            .map(|p| Value::String(p.display().to_string()))
    } else if raw {
        config.get_raw(path).cloned()
    } else {
        config.get(path)
    };

    match result.map_err(|e| e.to_string()).and_then(|v| render(&v, format)) {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn cmd_dump(
    file: &Path,
    load: &LoadArgs,
    resolve: bool,
    format: &str,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(file, load) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let result = match format {
        "json" => config.to_json(resolve).map(|s| s + "\n"),
        _ => config.to_yaml(resolve),
    };

    match result {
        Ok(content) => {
            if let Some(output_path) = output {
                if let Err(e) = std::fs::write(&output_path, &content) {
                    eprintln!("{}: {}", "Error writing file".red(), e);
                    return ExitCode::from(2);
                }
                eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
            } else {
                print!("{}", content);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn cmd_check(files: Vec<PathBuf>) -> ExitCode {
    let mut load_failed = false;
    let mut resolve_failed = false;

    for file in files {
        let config = match Config::load(&file) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                load_failed = true;
                continue;
            }
        };

        match config.to_value(true) {
            Ok(_) => println!("{} {}: all macros resolve", "✓".green(), file.display()),
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                resolve_failed = true;
            }
        }
    }

    if load_failed {
        ExitCode::from(2)
    } else if resolve_failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn cmd_locate(locator: Locator) -> ExitCode {
    match locator.path() {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(2)
        }
    }
}
