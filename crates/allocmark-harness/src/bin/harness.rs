//! CLI entrypoint for the allocmark verification harness.

use std::path::PathBuf;
use std::time::Instant;

use allocmark_core::config::{self, InstanceConfig};
use allocmark_core::instance::stage_copies;
use allocmark_core::{CountingAllocator, InstanceSet, StrategyRegistry};
use allocmark_harness::report::InstanceInfo;
use allocmark_harness::structured_log::{ArtifactIndex, LogEmitter, LogEntry, LogLevel};
use allocmark_harness::{HarnessError, VerifyOptions, VerifyReport, verify_registry};
use clap::{Parser, Subcommand};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator::system();

/// Verification tooling for allocmark.
#[derive(Debug, Parser)]
#[command(name = "allocmark-harness")]
#[command(about = "Verification harness for allocmark allocation strategies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered strategies and their profiles.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        instances: InstanceArgs,
    },
    /// Run every (strategy, size) case and check the execution contract.
    Verify {
        /// Cycles per case.
        #[arg(long, default_value_t = 100)]
        iterations: usize,
        /// Only verify strategies whose name contains this string.
        #[arg(long)]
        strategy: Option<String>,
        /// Output report path (JSON).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output report path (markdown).
        #[arg(long)]
        markdown: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Artifact index path; requires at least one of the outputs above.
        #[arg(long)]
        artifact_index: Option<PathBuf>,
        /// Run identifier used in trace ids and reports.
        #[arg(long, default_value = "verify")]
        run_id: String,
        /// Fixed timestamp string for reproducible reports.
        #[arg(long)]
        timestamp: Option<String>,
        #[command(flatten)]
        instances: InstanceArgs,
    },
    /// Copy one allocator library into three distinctly named files.
    StageInstances {
        /// Library to copy.
        #[arg(long)]
        source: PathBuf,
        /// Destination directory.
        #[arg(long)]
        dir: PathBuf,
        /// File stem of the copies.
        #[arg(long, default_value = config::DEFAULT_STEM)]
        stem: String,
    },
}

/// Third-party instance selection; overrides `ALLOCMARK_*` variables.
#[derive(Debug, clap::Args)]
struct InstanceArgs {
    /// Allocator library path; give exactly three.
    #[arg(long = "lib", value_name = "PATH")]
    libs: Vec<PathBuf>,
    /// Directory holding `lib<stem>1..3` (platform naming).
    #[arg(long, conflicts_with = "libs")]
    instance_dir: Option<PathBuf>,
    /// Library stem and instance label prefix.
    #[arg(long)]
    stem: Option<String>,
    /// Entry point symbol prefix.
    #[arg(long)]
    symbol_prefix: Option<String>,
}

impl InstanceArgs {
    fn resolve(&self) -> Result<Option<InstanceConfig>, HarnessError> {
        let stem = self.stem.as_deref().unwrap_or(config::DEFAULT_STEM);
        let config = if !self.libs.is_empty() {
            Some(InstanceConfig::from_paths(self.libs.clone(), stem)?)
        } else if let Some(dir) = &self.instance_dir {
            Some(InstanceConfig::from_dir(dir, stem))
        } else {
            InstanceConfig::from_env()?
        };
        Ok(config.map(|config| match &self.symbol_prefix {
            Some(prefix) => config.with_symbol_prefix(prefix),
            None => config,
        }))
    }

    /// Loads the instances, if configured, and builds the registry over them.
    fn registry(&self) -> Result<(StrategyRegistry, Vec<InstanceInfo>), HarnessError> {
        match self.resolve()? {
            Some(config) => {
                eprintln!(
                    "Loading allocator instances from {}",
                    config
                        .libraries
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                let set = InstanceSet::load(&config)?;
                let info = set.iter().map(|i| InstanceInfo::from(&**i)).collect();
                Ok((StrategyRegistry::with_instances(&set), info))
            }
            None => Ok((StrategyRegistry::builtin(), Vec::new())),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::List { json, instances } => {
            let (registry, _) = instances.registry()?;
            if json {
                let listing: Vec<_> = registry
                    .iter()
                    .map(|s| serde_json::json!({ "name": s.name(), "profile": s.profile() }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for strategy in registry.iter() {
                    let profile = strategy.profile();
                    println!(
                        "{:<24} {:<24} {:<14} {}",
                        strategy.name(),
                        profile.family.as_str(),
                        format!("{:?}", profile.zeroing).to_lowercase(),
                        profile
                            .alignment
                            .map_or_else(|| "default".to_owned(), |a| a.to_string())
                    );
                }
            }
        }
        Command::Verify {
            iterations,
            strategy,
            report,
            markdown,
            log,
            artifact_index,
            run_id,
            timestamp,
            instances,
        } => {
            let (mut registry, instance_info) = instances.registry()?;
            if let Some(filter) = &strategy {
                registry.retain(|name| name.contains(filter.as_str()));
                if registry.is_empty() {
                    return Err(HarnessError::NoMatchingStrategy(filter.clone()).into());
                }
            }
            let options = VerifyOptions {
                iterations,
                ..VerifyOptions::default()
            };
            eprintln!(
                "Verifying {} strategies x {} sizes, {iterations} cycles each",
                registry.len(),
                options.sizes.len()
            );

            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, &run_id, "verify")?),
                None => None,
            };
            if let Some(emitter) = emitter.as_mut() {
                emitter.emit_entry(
                    LogEntry::new(String::new(), LogLevel::Info, "verify_start")
                        .with_iterations(iterations)
                        .with_details(serde_json::json!({
                            "strategies": registry.names().collect::<Vec<_>>(),
                            "sizes": options.sizes,
                        })),
                )?;
            }

            let started = Instant::now();
            let mut log_error = None;
            let cases = verify_registry(&registry, &options, |case| {
                if !case.passed() {
                    eprintln!(
                        "FAIL {} size={}: {}",
                        case.strategy,
                        case.size,
                        case.failures.join("; ")
                    );
                }
                let Some(emitter) = emitter.as_mut() else {
                    return;
                };
                let level = if case.passed() {
                    LogLevel::Info
                } else {
                    LogLevel::Error
                };
                let mut entry = LogEntry::new(String::new(), level, "case_result")
                    .with_strategy(case.strategy.as_str(), case.family.as_str())
                    .with_size(case.size)
                    .with_iterations(case.iterations)
                    .with_outcome(case.outcome)
                    .with_latency_ns(case.latency_ns);
                if !case.failures.is_empty() {
                    entry = entry.with_details(serde_json::json!({ "failures": case.failures }));
                }
                if let Err(err) = emitter.emit_entry(entry) {
                    log_error.get_or_insert(err);
                }
            });
            if let Some(err) = log_error {
                return Err(err.into());
            }

            let mut verify_report =
                VerifyReport::new(run_id.as_str(), &options, cases).with_instances(instance_info);
            if let Some(ts) = timestamp {
                verify_report = verify_report.with_timestamp(ts);
            }
            eprintln!(
                "{} passed, {} failed, {} errored of {} cases",
                verify_report.summary.passed,
                verify_report.summary.failed,
                verify_report.summary.errored,
                verify_report.summary.total
            );
            let unchecked = verify_report.cases.iter().filter(|c| !c.leak_checked).count();
            if unchecked > 0 {
                eprintln!("No counting allocator registered; {unchecked} cases not leak-checked");
            }

            let mut written = Vec::new();
            if let Some(path) = &report {
                verify_report.write_json(path)?;
                eprintln!("Report written to {}", path.display());
                written.push(path.display().to_string());
            }
            if let Some(path) = &markdown {
                std::fs::write(path, verify_report.to_markdown())?;
                eprintln!("Markdown report written to {}", path.display());
                written.push(path.display().to_string());
            }
            if let Some(mut emitter) = emitter {
                if unchecked > 0 {
                    emitter.emit_entry(
                        LogEntry::new(String::new(), LogLevel::Warn, "leak_check_skipped")
                            .with_details(serde_json::json!({ "cases": unchecked })),
                    )?;
                }
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                emitter.emit_entry(
                    LogEntry::new(String::new(), LogLevel::Info, "verify_end")
                        .with_outcome(verify_report.outcome)
                        .with_duration_ms(duration_ms)
                        .with_artifacts(written)
                        .with_details(serde_json::to_value(&verify_report.summary)?),
                )?;
                emitter.flush()?;
            }
            if let Some(index_path) = &artifact_index {
                let mut index = ArtifactIndex::new(run_id.as_str());
                if let Some(path) = &log {
                    index.add_file(path, "log")?;
                }
                if let Some(path) = &report {
                    index.add_file(path, "report")?;
                }
                if let Some(path) = &markdown {
                    index.add_file(path, "report_markdown")?;
                }
                std::fs::write(index_path, index.to_json()?)?;
                eprintln!("Artifact index written to {}", index_path.display());
            }

            if !verify_report.passed() {
                return Err(HarnessError::VerificationFailed {
                    failed: verify_report.failed(),
                    total: verify_report.summary.total,
                }
                .into());
            }
        }
        Command::StageInstances { source, dir, stem } => {
            let staged = stage_copies(&source, &dir, &stem)?;
            for path in &staged {
                eprintln!("Staged {}", path.display());
            }
            println!("export {}={}", config::INSTANCE_DIR_ENV, dir.display());
            println!("export {}={stem}", config::INSTANCE_STEM_ENV);
        }
    }

    Ok(())
}
