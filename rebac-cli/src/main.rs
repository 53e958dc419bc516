//! Operator CLI for the relationship-based access engine
//!
//! Usage:
//!   rebac check --rules config/usersets.yaml --seed seed.txt 2 1 doc viewer
//!   rebac import --seed seed.txt
//!   rebac rules --rules config/usersets.yaml
//!
//! Every command builds a fresh in-memory engine: the rule table comes from
//! `--rules` (or `rules_path` in the config file), tuples from `--seed`.

use anyhow::Context;
use auth_rebac::{AuthorizationEngine, EngineConfig, ImportReport, InMemoryTupleStore, RewriteRules};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "rebac")]
#[command(about = "Relationship-based access checks over a tuple graph")]
struct Cli {
    /// Engine configuration file (YAML); REBAC_* environment variables override it
    #[arg(short, long, global = true, env = "REBAC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide whether a principal holds a relation on a resource
    Check(CheckArgs),
    /// Import a seed file and report lines that could not be applied
    Import(SourceArgs),
    /// Print the flattened rewrite rule table as JSON
    Rules(SourceArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Rewrite rule table (YAML)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Seed tuples, one `namespace:id#relation@subject` per line
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Principal id
    principal: String,

    /// Resource id
    resource: String,

    /// Resource namespace
    namespace: String,

    /// Requested relation
    relation: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Check(args) => {
            let engine = build_engine(&config, &args.source).await?;
            let request = auth_rebac::CheckRequest::parse(
                &args.principal,
                &args.resource,
                &args.namespace,
                &args.relation,
            )?;

            let start = Instant::now();
            let allowed = engine.check(&request).await?;
            let elapsed = start.elapsed();

            println!("{} ({:.3}ms)", allowed, elapsed.as_secs_f64() * 1000.0);
            Ok(ExitCode::SUCCESS)
        }
        Command::Import(args) => {
            let seed = args.seed.as_deref().context("--seed is required for import")?;
            let engine = build_engine(&config, &SourceArgs { rules: args.rules.clone(), seed: None }).await?;
            let report = import_seed(&engine, seed).await?;
            print_report(&report);
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Rules(args) => {
            let rules = load_rules(&config, args.rules.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&rules.flattened())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// `--rules` wins over `rules_path` from the configuration.
fn load_rules(config: &EngineConfig, rules: Option<&Path>) -> anyhow::Result<RewriteRules> {
    let path = rules
        .or(config.rules_path.as_deref())
        .context("no rule table given: pass --rules or set rules_path")?;
    RewriteRules::from_path(path).with_context(|| format!("failed to load rules from {}", path.display()))
}

async fn build_engine(config: &EngineConfig, source: &SourceArgs) -> anyhow::Result<AuthorizationEngine> {
    let config = EngineConfig {
        rules_path: source.rules.clone().or_else(|| config.rules_path.clone()),
        ..config.clone()
    };
    if config.rules_path.is_none() {
        warn!("No rule table configured; every check will be denied");
    }
    let engine = AuthorizationEngine::from_config(InMemoryTupleStore::new(), &config)?;

    if let Some(ref seed) = source.seed {
        let report = import_seed(&engine, seed).await?;
        if !report.is_clean() {
            print_report(&report);
        }
    }
    Ok(engine)
}

async fn import_seed(engine: &AuthorizationEngine, seed: &Path) -> anyhow::Result<ImportReport> {
    engine
        .mutations()
        .import_file(seed)
        .await
        .with_context(|| format!("failed to import {}", seed.display()))
}

fn print_report(report: &ImportReport) {
    eprintln!(
        "applied {}, unchanged {}, skipped {}, failed {}",
        report.applied,
        report.unchanged,
        report.skipped,
        report.failures.len()
    );
    for failure in &report.failures {
        eprintln!("  line {}: {} ({})", failure.line_number, failure.line, failure.error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_command() {
        let cli = Cli::try_parse_from([
            "rebac", "check", "--rules", "usersets.yaml", "--seed", "seed.txt", "2", "1", "doc", "viewer",
        ])
        .unwrap();

        let Command::Check(args) = cli.command else {
            panic!("expected check command");
        };
        assert_eq!(args.source.rules, Some(PathBuf::from("usersets.yaml")));
        assert_eq!(args.principal, "2");
        assert_eq!(args.relation, "viewer");
    }

    #[test]
    fn test_check_requires_all_fields() {
        assert!(Cli::try_parse_from(["rebac", "check", "2", "1", "doc"]).is_err());
    }

    #[test]
    fn test_rules_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let from_flag = dir.path().join("flag.yaml");
        std::fs::write(&from_flag, "doc:\n  viewer: owner\n").unwrap();

        let config = EngineConfig {
            rules_path: Some(dir.path().join("missing.yaml")),
            ..EngineConfig::default()
        };
        let rules = load_rules(&config, Some(&from_flag)).unwrap();
        assert_eq!(rules.len(), 1);

        assert!(load_rules(&config, None).is_err());
        assert!(load_rules(&EngineConfig::default(), None).is_err());
    }

    #[tokio::test]
    async fn test_build_engine_imports_seed() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("usersets.yaml");
        let seed = dir.path().join("seed.txt");
        std::fs::write(&rules, "doc:\n  viewer: viewer\ngroup:\n  member: member\n").unwrap();
        std::fs::write(&seed, "group:5#member@2\ndoc:1#viewer@group:5#member\n").unwrap();

        let source = SourceArgs {
            rules: Some(rules),
            seed: Some(seed),
        };
        let engine = build_engine(&EngineConfig::default(), &source).await.unwrap();
        assert!(engine.check_access(2, 1, "doc", "viewer").await.unwrap());
    }
}
