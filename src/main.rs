//! Nest Templates CLI
//!
//! Usage:
//!   nest-templates [OPTIONS] <TEMPLATE>
//!
//! Options:
//!   -c, --config <FILE>    Registry config file (TOML format)
//!   -b, --base-dir <DIR>   Template directory, overrides the config
//!   -d, --data <FILE>      Render data as a TOML table
//!       --keep-newline     Keep the template's trailing newline
//!       --reload           Recompile changed template files on render
//!       --check            Compile every template under the base directory
//!   -v, --verbose          Increase log verbosity
//!   -h, --help             Print help

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use nest_templates::{
    FailurePolicy, RegistryConfig, TemplateError, TemplateRegistry, TrailingNewline,
};

#[derive(Parser)]
#[command(name = "nest-templates")]
#[command(about = "Render nested text templates from a template directory")]
struct Cli {
    /// Template to render, relative to the base directory
    template: Option<PathBuf>,

    /// Registry config file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Template directory, overrides the config
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Render data as a TOML table
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Keep the template's trailing newline
    #[arg(long)]
    keep_newline: bool,

    /// Recompile changed template files on render
    #[arg(long)]
    reload: bool,

    /// Compile every template under the base directory and report the first
    /// broken one
    #[arg(long)]
    check: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "nest_templates=info",
        _ => "nest_templates=debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Load config
    let mut config = match &cli.config {
        Some(path) => match RegistryConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => RegistryConfig::default(),
    };
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = base_dir.clone();
    }
    if cli.reload {
        config.reload_on_access = true;
    }
    let newline = if cli.keep_newline {
        TrailingNewline::Keep
    } else {
        config.newline()
    };

    let mut registry = TemplateRegistry::from_config(&config, None);

    if cli.check {
        match registry.load_directory(".", newline, FailurePolicy::Propagate) {
            Ok(templates) => {
                println!("{} templates OK", templates.len());
                return;
            }
            Err(e) => {
                report(&config.base_dir, &e);
                std::process::exit(1);
            }
        }
    }

    let Some(template) = &cli.template else {
        eprintln!("Error: no template given (see --help)");
        std::process::exit(2);
    };

    // Read render data
    let data = match &cli.data {
        Some(path) => match fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|s| {
            s.parse::<toml::Table>().map_err(|e| e.to_string())
        }) {
            Ok(table) => table,
            Err(e) => {
                eprintln!("Error reading data '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => toml::Table::new(),
    };

    let result = registry
        .load_file(template, newline, FailurePolicy::Propagate)
        .and_then(|t| t.execute(io::stdout().lock(), &data));
    if let Err(e) = result {
        report(&config.base_dir, &e);
        std::process::exit(1);
    }
}

/// Print an error, with a source excerpt when it is a parse failure
fn report(base_dir: &Path, err: &TemplateError) {
    if let (TemplateError::Parse { name, .. }, Some(compile)) = (err, err.compile_error()) {
        if let Ok(source) = fs::read_to_string(base_dir.join(name)) {
            eprint!("{}", compile.format(&source, name));
            return;
        }
    }
    eprintln!("Error: {}", err);
}
