//! sitescan: deep malware scan of a web site tree.
//!
//! This is the main entry point for the CLI application.

use anyhow::Context;
use sitescan::core::config::Config;
use sitescan::core::error::{Error, Result};
use sitescan::core::types::{ScanAction, ScanKind, ScanSummary, Severity};
use sitescan::detection::entropy::{shannon_entropy, EntropyLevel};
use sitescan::detection::Classifier;
use sitescan::remote::{LocalConnector, RemoteCredentials};
use sitescan::service::ScanService;
use sitescan::ui::cli::{Cli, Commands, ConfigAction, OutputFormat};
use sitescan::utils::logging::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let config = load_config(cli.config.as_deref()).context("could not load configuration")?;

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::from_config(&config)
    };
    init_logging(log_config).context("could not initialise logging")?;

    log::debug!("sitescan v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Scan {
            mount,
            root,
            ticket,
            concurrency,
            quarantine,
            live,
        }) => {
            let mut config = config;
            if let Some(n) = concurrency {
                config.scan.concurrency = n;
            }
            let target = format!("{}{}", mount.display(), root);
            run_scan(config, mount, root, ticket, quarantine, live, cli.format)
                .await
                .with_context(|| format!("deep scan of {} failed", target))?;
        }
        Some(Commands::Classify { files }) => {
            run_classify(&config, &files, cli.format).context("classification failed")?;
        }
        Some(Commands::Config { action }) => {
            run_config(action, &config, cli.config.as_deref()).context("config command failed")?;
        }
        Some(Commands::Info) => run_info(&config)?,
        None => {
            println!("sitescan - Deep malware scan for web site trees");
            println!();
            println!("Use --help for usage information");
            println!();
            println!("Quick start:");
            println!("  sitescan scan --mount /srv/site --root /www       Scan a site copy");
            println!("  sitescan scan --mount /srv/site -q                Scan and plan quarantine");
            println!("  sitescan classify suspicious.php                  Classify one file");
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    config.validate()?;
    Ok(config)
}

/// Run a deep scan through the local adapter.
async fn run_scan(
    config: Config,
    mount: PathBuf,
    root: String,
    ticket: String,
    quarantine: bool,
    live: bool,
    format: OutputFormat,
) -> Result<()> {
    let connector = Arc::new(LocalConnector::new(&mount));
    let service = ScanService::new(config, connector)?;

    let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    let id = service.create_scan(&ticket, ScanKind::Deep)?;
    service.set_scan_config(
        &id,
        Some(root),
        Some(RemoteCredentials::password("localhost", user, "")),
    )?;

    let stream_logs = format == OutputFormat::Text;
    let handle = service.start_deep_scan(&id)?;

    let mut cursor = 0;
    loop {
        let finished = handle.is_finished();
        let page = service.get_logs(&id, cursor)?;
        cursor = page.cursor;
        if stream_logs {
            for line in page.lines {
                println!("{}", line);
            }
        }
        if finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let summary = handle.join().await?;

    let action = if quarantine {
        let outcome = service
            .run_action(&id, ScanAction::Quarantine, !live)
            .await?;
        let page = service.get_logs(&id, cursor)?;
        if stream_logs {
            for line in page.lines {
                println!("{}", line);
            }
        }
        Some(outcome)
    } else {
        None
    };

    let findings = service.get_findings(&id, None)?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "summary": summary,
                "findings": findings,
                "action": action,
                "logs": service.get_logs(&id, 0)?.lines,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            print_summary(&summary);
            if !findings.is_empty() {
                println!();
                println!("Findings:");
                for finding in &findings {
                    println!("  [{}] {} ({})", finding.severity, finding.path, finding.rule);
                }
            }
            if let Some(outcome) = action {
                println!();
                let verb = if outcome.dry_run { "Planned" } else { "Quarantined" };
                println!("{}: {} file(s)", verb, outcome.processed);
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    println!();
    println!("=== Scan Complete ===");
    println!("Scan ID:         {}", summary.id);
    println!("Status:          {}", summary.status);
    println!("Progress:        {}%", summary.progress);
    println!("Malicious:       {}", summary.counts.malicious);
    println!("Suspicious:      {}", summary.counts.suspicious);
    println!("Clean:           {}", summary.counts.clean);
    println!("Failed:          {}", summary.failed);
    println!("Bytes Scanned:   {}", summary.bytes_scanned);
    match summary.score {
        Some(score) => println!("Score:           {}", score),
        None => println!("Score:           -"),
    }
    if let Some(duration) = summary.duration_secs() {
        println!("Duration:        {} seconds", duration);
    }
}

/// Classify local files.
fn run_classify(config: &Config, files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let classifier = Classifier::with_default_rules(&config.detection)?;
    let mut results = Vec::new();

    for path in files {
        let data = std::fs::read(path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        let verdict = classifier.classify(&data);
        let entropy = shannon_entropy(&data);
        results.push((path, verdict, entropy));
    }

    match format {
        OutputFormat::Json => {
            let output: Vec<_> = results
                .iter()
                .map(|(path, verdict, entropy)| {
                    serde_json::json!({
                        "path": path,
                        "severity": verdict.severity,
                        "rule": verdict.rule,
                        "entropy": entropy,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for (path, verdict, entropy) in &results {
                println!(
                    "{:<10} {:<18} entropy {:.2} ({})  {}",
                    verdict.severity,
                    verdict.rule,
                    entropy,
                    EntropyLevel::from_value(*entropy),
                    path.display()
                );
            }
        }
    }

    if results.iter().any(|(_, v, _)| v.severity == Severity::Malicious) {
        log::warn!("Malicious content found");
    }
    Ok(())
}

/// Handle configuration commands.
fn run_config(action: ConfigAction, config: &Config, path: Option<&Path>) -> Result<()> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_config_path);

    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Reset => {
            log::info!("Resetting configuration to defaults...");
            Config::default().save(&config_path)?;
            println!("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}

/// Show application information.
fn run_info(config: &Config) -> Result<()> {
    let classifier = Classifier::with_default_rules(&config.detection)?;

    println!("sitescan - Deep malware scan for web site trees");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Config Path:      {}", Config::default_config_path().display());
    println!("Data Directory:   {}", Config::data_dir().display());
    println!();
    println!("Scan Settings:");
    println!("  Concurrency:    {}", config.scan.concurrency);
    println!("  Full Read Max:  {} bytes", config.scan.max_full_read_bytes);
    println!("  Sample Size:    {} bytes", config.scan.sample_bytes);
    println!("  Run Limit:      {} seconds", config.scan.max_run_secs);
    println!("  Excluded Dirs:  {}", config.scan.exclude_dirs.join(", "));
    println!();
    println!("Detection Rules:");
    for rule in classifier.rules() {
        println!(
            "  {:<18} {:<10} {}",
            rule.id,
            rule.severity,
            rule.description.as_deref().unwrap_or("")
        );
    }
    println!();
    println!("Quarantine:");
    println!("  Directory:      <root>/{}", config.quarantine.dir_name);
    println!("  File Mode:      {:o}", config.quarantine.file_mode);
    Ok(())
}
