mod commands;
mod logging;
mod progress;

use std::fs;
use std::io::{self, Write};
use std::process;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, DiskArgs, RuleCommands};
use dotenv::dotenv;
use progress::CliReporter;
use sentinel_core::checkpoint::{CheckpointState, RestoreReport};
use sentinel_core::executor::Effect;
use sentinel_core::rules::RuleSpec;
use sentinel_core::types::{PriorityTier, SystemHealth};
use sentinel_core::{AnalysisReport, EngineConfig, ExecutionMode, Recommendation, SentinelEngine, SilentReporter};
use tracing::{error, info};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match sentinel_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Commands::PrintConfig = command {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(err) => error!("Error printing configuration: {}", err),
        }
        return;
    }

    if let Err(err) = run(config, command) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run(config: EngineConfig, command: Commands) -> Result<()> {
    let engine = SentinelEngine::open(config).context("opening engine")?;

    let result = match command {
        Commands::Analyze { json, limit, disk } => run_analyze(&engine, json, limit, &disk),
        Commands::Execute { index, commit, yes } => run_execute(&engine, index, commit, yes),
        Commands::Reject { index } => {
            let (_, recommendation) = pick(&engine, index)?;
            engine.reject(&recommendation)?;
            println!("Noted. Fewer {} suggestions like this one.", recommendation.kind());
            Ok(())
        }
        Commands::Undo { id, last } => {
            let report = match (id, last) {
                (_, true) => engine.undo_last()?,
                (Some(id), false) => engine.undo(&id)?,
                (None, false) => bail!("give a checkpoint id or --last"),
            };
            print_restore(&report);
            Ok(())
        }
        Commands::Checkpoints { all, limit } => run_checkpoints(&engine, all, limit),
        Commands::Sweep => {
            let report = engine.sweep(Utc::now())?;
            println!(
                "{} expired, {} busy, {} bytes released",
                report.expired.len().to_string().green(),
                report.skipped.len(),
                report.released_bytes
            );
            for err in &report.errors {
                println!("  {} {}", "!".red(), err);
            }
            Ok(())
        }
        Commands::Rules { command } => run_rules(&engine, command),
        Commands::Learning { reset } => {
            if reset && prompt_confirm("Forget everything learned so far?", Some(false))? {
                engine.learning().reset(Utc::now())?;
            }
            print!("{}", engine.learning_report());
            Ok(())
        }
        Commands::PrintConfig => Ok(()),
    };

    engine.shutdown()?;
    result
}

fn health_from(disk: &DiskArgs) -> Option<SystemHealth> {
    match (disk.disk_free_gb, disk.disk_total_gb) {
        (Some(free), Some(total)) => Some(SystemHealth {
            free_bytes: (free * GIB) as u64,
            total_bytes: (total * GIB) as u64,
            idle: false,
            cpu_percent: 0.0,
        }),
        _ => None,
    }
}

fn analyze(engine: &SentinelEngine, disk: &DiskArgs, quiet: bool) -> Result<AnalysisReport> {
    if engine.config().root_paths.is_empty() {
        bail!("no root paths configured; set root_paths in Sentinel.toml or SENTINEL_ROOT_PATHS");
    }
    let health = health_from(disk);
    let report = if quiet {
        let walk = engine.scan(&SilentReporter);
        engine.analyze(&walk.snapshots, health.as_ref(), &SilentReporter)?
    } else {
        let reporter = CliReporter::new();
        let walk = engine.scan(&reporter);
        engine.analyze(&walk.snapshots, health.as_ref(), &reporter)?
    };
    Ok(report)
}

fn pick(engine: &SentinelEngine, index: usize) -> Result<(AnalysisReport, Recommendation)> {
    let report = analyze(engine, &DiskArgs { disk_free_gb: None, disk_total_gb: None }, true)?;
    let recommendation = index
        .checked_sub(1)
        .and_then(|i| report.recommendations.get(i))
        .cloned()
        .with_context(|| format!("no recommendation #{} (run `sentinel analyze`)", index))?;
    Ok((report, recommendation))
}

fn tier_label(tier: PriorityTier) -> ColoredString {
    match tier {
        PriorityTier::High => "HIGH".red().bold(),
        PriorityTier::Medium => "MED ".yellow(),
        PriorityTier::Low => "LOW ".dimmed(),
    }
}

fn run_analyze(engine: &SentinelEngine, json: bool, limit: usize, disk: &DiskArgs) -> Result<()> {
    let report = analyze(engine, disk, json)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    for (i, rec) in report.recommendations.iter().take(limit).enumerate() {
        println!(
            "{:>3}. {} {:>3}% {:<9} {} ({} files)",
            i + 1,
            tier_label(rec.tier()),
            rec.confidence(),
            rec.kind().to_string().cyan(),
            rec.description(),
            rec.targets().len()
        );
        let reasons: Vec<String> = rec
            .rationale()
            .iter()
            .map(|f| format!("{} {}", f.name, f.score))
            .collect();
        println!("       {}", reasons.join(", ").dimmed());
    }

    let r = &report.relationships;
    info!(
        "{} files in {} folders: {} duplicate clusters, {} backup groups, {} series, {} projects",
        report.files, report.folders, r.duplicate_clusters, r.backup_groups, r.series, r.projects
    );
    if let Some(forecast) = &report.forecast {
        if let Some(days) = forecast.days_until_full {
            info!(
                "Disk {:.0}% used, about {} days until full ({:?})",
                forecast.used_percent, days, forecast.urgency
            );
        }
    }
    if !report.scan_errors.is_empty() {
        info!("{} files could not be read", format!("{}", report.scan_errors.len()).red());
    }
    for rejected in &report.rejected_rules {
        info!("Rule excluded: {}", rejected);
    }
    Ok(())
}

fn describe(effect: &Effect) -> String {
    match effect {
        Effect::Delete { path } => format!("delete   {}", path.display()),
        Effect::Move { from, to } => format!("move     {} -> {}", from.display(), to.display()),
        Effect::Compress { from, to } => format!("compress {} -> {}", from.display(), to.display()),
        Effect::Review { path } => format!("review   {}", path.display()),
    }
}

fn run_execute(engine: &SentinelEngine, index: usize, commit: bool, yes: bool) -> Result<()> {
    let (_, recommendation) = pick(engine, index)?;
    let options = engine.execute_options();

    let preview = engine.execute(&recommendation, ExecutionMode::DryRun, &options, &SilentReporter)?;
    println!("{}", recommendation.description().bold());
    for effect in &preview.effects {
        println!("  {}", describe(effect));
    }
    if !commit {
        println!("{}", "Dry run only. Re-run with --commit to apply.".dimmed());
        return Ok(());
    }
    if !yes && !prompt_confirm("Apply these changes?", Some(false))? {
        return Ok(());
    }

    let reporter = CliReporter::new();
    let result = engine.execute(&recommendation, ExecutionMode::Commit, &options, &reporter)?;
    for failure in &result.failures {
        println!("  {} {}: {}", "✗".red(), failure.path.display(), failure.reason);
    }
    println!(
        "{} succeeded, {} failed, {} bytes freed",
        result.succeeded.len().to_string().green(),
        result.failures.len().to_string().red(),
        result.bytes_freed
    );
    if let Some(id) = &result.checkpoint_id {
        println!("Undo with: sentinel undo {}", id);
    }
    Ok(())
}

fn print_restore(report: &RestoreReport) {
    for path in &report.restored {
        println!("  {} {}", "✓".green(), path.display());
    }
    for failure in &report.failures {
        println!("  {} {}: {}", "✗".red(), failure.path.display(), failure.reason);
    }
    println!(
        "Checkpoint {} is {} ({} restored, {} failed)",
        report.checkpoint_id,
        report.state,
        report.restored.len(),
        report.failures.len()
    );
}

fn run_checkpoints(engine: &SentinelEngine, all: bool, limit: usize) -> Result<()> {
    let checkpoints = if all {
        engine.history(limit)?
    } else {
        engine.undo_candidates(limit)?
    };
    if checkpoints.is_empty() {
        println!("No checkpoints.");
    }
    for cp in checkpoints {
        let state = match cp.state {
            CheckpointState::Committed => cp.state.to_string().green(),
            _ => cp.state.to_string().dimmed(),
        };
        println!(
            "{}  {}  {:<9} {:<9} {} files, {} bytes  {}",
            cp.id,
            cp.created_at.format("%Y-%m-%d %H:%M"),
            state,
            cp.kind,
            cp.file_count(),
            cp.total_bytes,
            cp.description
        );
    }
    Ok(())
}

fn run_rules(engine: &SentinelEngine, command: RuleCommands) -> Result<()> {
    let rules = engine.rules();
    match command {
        RuleCommands::List => {
            let (list, unreadable) = rules.list()?;
            for rule in list {
                let state = if rule.spec.enabled { "on ".green() } else { "off".dimmed() };
                println!(
                    "{:>4} {} p{:<3} {:<6} {}",
                    rule.id, state, rule.spec.priority, rule.match_count, rule.spec.name
                );
            }
            for err in unreadable {
                println!("     {} {}", "!".red(), err);
            }
            let summary = rules.summary()?;
            println!(
                "{} rules, {} enabled, {} rejected, {} total matches",
                summary.total, summary.enabled, summary.rejected, summary.total_matches
            );
        }
        RuleCommands::Add { definition } => {
            let body = match definition.strip_prefix('@') {
                Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path))?,
                None => definition,
            };
            let spec: RuleSpec = serde_json::from_str(&body).context("parsing rule JSON")?;
            let id = rules.add(&spec)?;
            println!("Added rule {}", id);
        }
        RuleCommands::Delete { id } => {
            rules.delete(id)?;
            println!("Deleted rule {}", id);
        }
        RuleCommands::Toggle { id } => {
            let enabled = rules.toggle(id)?;
            println!("Rule {} is now {}", id, if enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
