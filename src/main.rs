mod host;
mod ignore;
mod orchestrator;
mod p4;
mod preferences;
mod server;
mod state;
mod types;
mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use preferences::{LiveToggle, Preferences};
use std::path::PathBuf;
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "p4guard", version, about = "Prompts to open, add and delete files in Perforce")]
struct Cli {
    /// Preferences file (defaults to ./p4guard.toml when present)
    #[arg(long, global = true, env = "P4GUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Speak the editor protocol on stdin/stdout (the default)
    Serve,
    /// Offer to add files created under ROOT, asking on the terminal
    Watch { root: PathBuf },
    /// Report whether each path is excluded by its ignore file
    CheckIgnore {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("P4GUARD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from(preferences::FILENAME);
        local.is_file().then_some(local)
    })
}

fn check_ignore(prefs: &Preferences, paths: &[PathBuf]) -> Result<()> {
    let file_name = prefs.ignore_file_name();
    for path in paths {
        let path = std::path::absolute(path)
            .with_context(|| format!("resolving {}", path.display()))?;
        match ignore::find_rules(&path, &file_name)? {
            Some(rules) if rules.matches(&path) => println!(
                "{}: ignored by {}",
                path.display(),
                rules.source().display()
            ),
            Some(_) | None => println!("{}: not ignored", path.display()),
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = config_path(cli.config);
    let prefs = match &config {
        Some(path) => Preferences::load(path)?,
        None => Preferences::default(),
    };
    if !prefs.enabled {
        info!("guards are disabled until `enabled` is set again");
    }
    let toggle = LiveToggle::new(config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => runtime.block_on(server::serve(&prefs, toggle)),
        Commands::Watch { root } => runtime.block_on(watch::watch(&prefs, toggle, &root)),
        Commands::CheckIgnore { paths } => check_ignore(&prefs, &paths),
    }
}

fn main() {
    init_logging();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("p4guard: {err:#}");
        process::exit(2);
    }
}
