mod acme;
mod app;
mod classify;
mod config;
mod logging;
mod matcher;
mod model;
mod ninep;
mod plumb;
mod runner;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};

use crate::acme::{AcmeEvents, AcmeWindow};
use crate::app::App;
use crate::config::Algorithm;
use crate::logging::{LogConfig, LogFormat};
use crate::matcher::MatchEngine;
use crate::model::Session;
use crate::plumb::PlumbPort;

#[derive(Debug, Parser)]
#[command(
    name = "afz",
    version,
    about = "Run a command and filter its output in an acme window"
)]
struct Cli {
    /// Override config path. If omitted, afz checks ./afz.toml, ./.afz.toml, and then ~/.config/afz/config.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fuzzy scorer, overriding the config file
    #[arg(short, long, value_enum)]
    algorithm: Option<Algorithm>,

    /// More logging on stderr; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Write an example config (to PATH or the global config path) and exit
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    init_config: Option<Option<PathBuf>>,

    /// Let --init-config overwrite an existing file
    #[arg(long, requires = "init_config")]
    force: bool,

    /// The command whose output is shown, with its arguments
    #[arg(
        value_name = "COMMAND",
        required_unless_present = "init_config",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..
    )]
    command: Vec<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig::from_cli(cli.verbose, cli.quiet, cli.log_format));

    if let Some(path) = cli.init_config {
        let path = match path {
            Some(path) => path,
            None => config::global_config_path()?,
        };
        config::write_example_config(&path, cli.force)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let cwd = env::current_dir().context("failed to resolve working directory")?;
    let loaded = config::load(&cwd, cli.config.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(algorithm) = cli.algorithm {
        cfg.matcher.algorithm = algorithm;
    }

    let ns = cfg.acme.namespace.clone().unwrap_or_else(ninep::namespace);
    info!(
        target: "afz::startup",
        "root {}, command {:?}, config {:?}, namespace {}",
        cwd.display(),
        cli.command,
        loaded.path,
        ns.display()
    );

    let window = AcmeWindow::create(&ns).context("failed to create acme window")?;
    let events = AcmeEvents::open(&ns, window.id())?;
    let engine = MatchEngine::from_config(&cfg.matcher);
    info!(target: "afz::startup", "fuzzy scorer: {}", engine.scorer_name());

    let session = Session::new(cwd, cli.command);
    let plumber = PlumbPort::new(ns, cfg.plumb.clone());
    let mut app = App::new(session, window, plumber, engine);
    app.open(&cfg.window)?;

    let (tx, rx) = mpsc::sync_channel(cfg.events.queue_capacity);
    let classifier = classify::spawn(events, tx).context("failed to start event thread")?;

    // On either exit the event thread has already hung up.
    let exit = app.run(rx)?;
    if classifier.join().is_err() {
        warn!(target: "afz::startup", "event thread panicked");
    }
    info!(target: "afz::startup", "exiting: {exit:?}, {:?}", app.stats());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_args_pass_through_verbatim() {
        let cli = Cli::try_parse_from(["afz", "-v", "ls", "-l", "--color", "src"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.command, vec!["ls", "-l", "--color", "src"]);
    }

    #[test]
    fn missing_command_is_a_usage_error() {
        let err = Cli::try_parse_from(["afz"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn algorithm_flag_parses() {
        let cli = Cli::try_parse_from(["afz", "-a", "clangd", "git", "log"]).unwrap();
        assert_eq!(cli.algorithm, Some(Algorithm::Clangd));
        assert_eq!(cli.command, vec!["git", "log"]);
    }

    #[test]
    fn init_config_needs_no_command() {
        let cli = Cli::try_parse_from(["afz", "--init-config"]).unwrap();
        assert_eq!(cli.init_config, Some(None));
        assert!(cli.command.is_empty());
    }
}
