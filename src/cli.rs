use std::env;
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, DEFAULT_CONFIG_ENV};
use crate::data::universe::{fetch_species_universe, Universe};
use crate::error::PipelineError;
use crate::index::layout::ArtifactLayout;
use crate::index::reindex::reindex;
use crate::pipeline::{run_fetch, run_verify, run_verify_catalog};
use crate::prices::update_price_history;
use crate::server;
use crate::upstream::HttpCardSource;
use crate::verify::{VerificationReport, STEP_SUMMARY_ENV};

const USAGE: &str =
    "usage: cardex <fetch|reindex|verify|prices|universe|serve> [--config <path.yaml>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Fetch,
    Reindex,
    Verify,
    Prices,
    Universe,
    Serve,
}

impl Command {
    fn label(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Reindex => "reindex",
            Self::Verify => "verify",
            Self::Prices => "prices",
            Self::Universe => "universe",
            Self::Serve => "serve",
        }
    }
}

pub fn parse_command(args: &[String]) -> Option<Command> {
    match args.get(1).map(String::as_str) {
        Some("fetch") => Some(Command::Fetch),
        Some("reindex") => Some(Command::Reindex),
        Some("verify") => Some(Command::Verify),
        Some("prices") => Some(Command::Prices),
        Some("universe") => Some(Command::Universe),
        Some("serve") => Some(Command::Serve),
        _ => None,
    }
}

/// `Err(())` when `--config` is given without a value.
pub fn config_path(args: &[String]) -> Result<Option<PathBuf>, ()> {
    match args.iter().position(|arg| arg == "--config") {
        Some(index) => match args.get(index + 1) {
            Some(path) if !path.starts_with("--") => Ok(Some(PathBuf::from(path))),
            _ => Err(()),
        },
        None => Ok(env::var(DEFAULT_CONFIG_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)),
    }
}

pub fn run_with_args(args: &[String]) -> i32 {
    let Some(command) = parse_command(args) else {
        eprintln!("{USAGE}");
        return 2;
    };
    let Ok(path) = config_path(args) else {
        eprintln!("{USAGE}");
        return 2;
    };

    let result = AppConfig::load(path.as_deref()).and_then(|config| {
        let runtime = tokio::runtime::Runtime::new().map_err(PipelineError::Runtime)?;
        runtime.block_on(dispatch(command, &config))
    });
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} failed: {err}", command.label());
            1
        }
    }
}

async fn dispatch(command: Command, config: &AppConfig) -> Result<(), PipelineError> {
    let layout = ArtifactLayout::new(&config.out_dir);
    match command {
        Command::Fetch => handle_fetch(config).await,
        Command::Reindex => {
            let universe = Universe::load(&config.universe_path)?;
            let report = reindex(&layout, &universe)?;
            println!(
                "reindex complete: files={}, routed={}, artifacts={}, write_failures={}",
                report.files_read,
                report.records_routed,
                report.persist.artifacts_written,
                report.persist.failures.len()
            );
            Ok(())
        }
        Command::Verify => {
            let universe = Universe::load(&config.universe_path)?;
            let source = HttpCardSource::new(&config.upstream).map_err(PipelineError::Client)?;
            let report = run_verify(source, config, &universe, step_summary_path().as_deref()).await?;
            print_verify(&report, &layout);
            Ok(())
        }
        Command::Prices => {
            let report = update_price_history(&layout, &config.prices).await?;
            println!(
                "prices complete: files={}, written={}, skipped={}, quotes={}, write_failures={}",
                report.files_read,
                report.cards_written,
                report.skipped,
                report.quotes,
                report.failures.len()
            );
            Ok(())
        }
        Command::Universe => handle_universe(config, &config.universe_path).await,
        Command::Serve => server::serve(&config.bind_addr, layout)
            .await
            .map_err(|source| PipelineError::Server {
                addr: config.bind_addr.clone(),
                source,
            }),
    }
}

async fn handle_fetch(config: &AppConfig) -> Result<(), PipelineError> {
    let universe = Universe::load(&config.universe_path)?;
    let source = HttpCardSource::new(&config.upstream).map_err(PipelineError::Client)?;
    let outcome = run_fetch(source.clone(), config, &universe).await?;
    println!(
        "fetch complete: keys={}, artifacts={}, failures={}, write_failures={}",
        outcome.persist.summary.len(),
        outcome.persist.artifacts_written,
        outcome.run.failures.len(),
        outcome.persist.failures.len()
    );
    if config.verify.after_fetch {
        let summary = step_summary_path();
        let report =
            run_verify_catalog(source, config, &universe, &outcome.catalog, summary.as_deref()).await?;
        print_verify(&report, &ArtifactLayout::new(&config.out_dir));
    }
    Ok(())
}

fn step_summary_path() -> Option<PathBuf> {
    env::var(STEP_SUMMARY_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

fn print_verify(report: &VerificationReport, layout: &ArtifactLayout) {
    println!(
        "verify complete: checked={}/{}, missing={}, report='{}'",
        report.checked,
        report.total_species,
        report.missing,
        layout.verify_path().display()
    );
}

async fn handle_universe(config: &AppConfig, out: &Path) -> Result<(), PipelineError> {
    let universe = fetch_species_universe(&config.species, &config.upstream.user_agent, &config.upstream.retry)
        .await
        .map_err(PipelineError::Client)?;
    universe.write(out).map_err(|source| PipelineError::Setup {
        path: out.to_path_buf(),
        source,
    })?;
    println!("universe complete: species={}, file='{}'", universe.len(), out.display());
    Ok(())
}
