//! sieve CLI: run predicate pushdown and partition pruning over YAML plans.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sieve_core::config::PushdownConfig;
use sieve_planner::{optimize, parse_yaml_plan, prune_scan_partitions, ParsedPlan, PushdownReport};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Predicate pushdown and partition pruning for operator plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(clap::Args, Debug, Default)]
struct PassFlags {
    /// Never let storage enforce pushed predicates (overrides config)
    #[arg(long)]
    no_storage_pushdown: bool,

    /// Keep original filters even when fully pushed down (overrides config)
    #[arg(long)]
    keep_filters: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a plan file parses and forms a valid graph
    Validate {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Print the plan as written (EXPLAIN)
    Explain {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Run predicate pushdown and print the rewritten plan
    Optimize {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,

        #[command(flatten)]
        flags: PassFlags,
    },

    /// Run predicate pushdown, then prune each scan's listed partitions
    Prune {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,

        #[command(flatten)]
        flags: PassFlags,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { plan } => {
            match validate_plan(&plan) {
                Ok(summary) => println!("✓ Plan is valid ({summary})"),
                Err(e) => {
                    eprintln!("Validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Explain { plan } => {
            if let Err(e) = explain_plan(&plan) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Optimize {
            plan,
            format,
            flags,
        } => {
            if let Err(e) = optimize_plan(&plan, format, &flags) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Prune {
            plan,
            format,
            flags,
        } => {
            if let Err(e) = prune_plan(&plan, format, &flags) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load(plan_path: &PathBuf) -> Result<ParsedPlan, Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(plan_path)?;
    Ok(parse_yaml_plan(&yaml_content)?)
}

/// Flags win over the plan file, which wins over the environment.
fn apply_flags(cfg: &mut PushdownConfig, flags: &PassFlags) {
    if flags.no_storage_pushdown {
        cfg.storage_pushdown = false;
    }
    if flags.keep_filters {
        cfg.remove_redundant_filters = false;
    }
}

fn validate_plan(plan_path: &PathBuf) -> Result<String, Box<dyn std::error::Error>> {
    let parsed = load(plan_path)?;
    parsed.graph.validate()?;
    Ok(format!(
        "{} operators, {} roots",
        parsed.graph.len(),
        parsed.graph.roots().len()
    ))
}

fn explain_plan(plan_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(plan_path)?;
    print!("{}", parsed.graph.explain());
    Ok(())
}

#[derive(Serialize)]
struct OptimizeOutput<'a> {
    plan: String,
    fingerprint: String,
    fell_back: Option<&'a str>,
    report: &'a PushdownReport,
}

fn optimize_plan(
    plan_path: &PathBuf,
    format: Format,
    flags: &PassFlags,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut parsed = load(plan_path)?;
    apply_flags(&mut parsed.config, flags);
    let out = optimize(parsed.graph, &parsed.config)?;

    match format {
        Format::Json => {
            let doc = OptimizeOutput {
                plan: out.plan.explain(),
                fingerprint: out.plan.fingerprint().to_hex(),
                fell_back: out.fell_back.as_deref(),
                report: &out.report,
            };
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Format::Text => {
            if let Some(reason) = &out.fell_back {
                println!("Pushdown failed, plan unchanged: {reason}");
                println!();
            }
            println!("Optimized Plan");
            println!("==============");
            print!("{}", out.plan.explain());
            println!();
            println!("Pushdown:");
            println!("  Operators visited: {}", out.report.visited);
            println!("  Filters removed: {}", out.report.filters_removed);
            println!("  Filters rewritten: {}", out.report.filters_rewritten);
            println!("  Filters synthesized: {}", out.report.filters_synthesized);
            println!("  Conjuncts pinned: {}", out.report.conjuncts_pinned);
            for scan in &out.report.scans {
                match &scan.predicate {
                    Some(p) => println!(
                        "  Scan {} AS {}: {}{}",
                        scan.table,
                        scan.alias,
                        p,
                        if scan.enforced { " (storage)" } else { "" }
                    ),
                    None => println!("  Scan {} AS {}: -", scan.table, scan.alias),
                }
            }
            println!("  Fingerprint: {}", out.plan.fingerprint().short());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ScanPruning {
    table: String,
    alias: String,
    kept: Vec<String>,
    pruned: Vec<String>,
}

fn prune_plan(
    plan_path: &PathBuf,
    format: Format,
    flags: &PassFlags,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut parsed = load(plan_path)?;
    apply_flags(&mut parsed.config, flags);
    let out = optimize(parsed.graph, &parsed.config)?;
    if let Some(reason) = &out.fell_back {
        tracing::warn!(%reason, "pruning with predicates from the unoptimized plan");
    }

    let mut results = Vec::with_capacity(parsed.partitions.len());
    for (scan, parts) in &parsed.partitions {
        let pruned = prune_scan_partitions(
            &out.plan,
            *scan,
            &parts.partitions,
            &parts.columns,
            &parsed.config,
        )?;
        let (table, alias) = match &out.plan.node(*scan)?.op {
            sieve_core::dag::Op::Scan(s) => (s.table.clone(), s.alias.clone()),
            other => (other.to_string(), String::new()),
        };
        results.push(ScanPruning {
            table,
            alias,
            kept: pruned.kept.iter().map(|p| p.to_string()).collect(),
            pruned: pruned.pruned.iter().map(|p| p.to_string()).collect(),
        });
    }

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        Format::Text => {
            if results.is_empty() {
                println!("No scan lists partitions");
            }
            for r in &results {
                println!("Scan {} AS {}", r.table, r.alias);
                println!("  Kept ({}):", r.kept.len());
                for p in &r.kept {
                    println!("    {p}");
                }
                println!("  Pruned ({}):", r.pruned.len());
                for p in &r.pruned {
                    println!("    {p}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_planner::parse_yaml_plan_with;

    #[test]
    fn flags_override_plan_config() {
        let parsed = parse_yaml_plan_with(
            "config: { storage_pushdown: true }\noperators:\n  - { id: s, op: scan, table: t, alias: s, schema: [] }\n",
            PushdownConfig::default(),
        )
        .unwrap();
        let mut config = parsed.config;
        assert!(config.storage_pushdown);

        apply_flags(
            &mut config,
            &PassFlags {
                no_storage_pushdown: true,
                keep_filters: true,
            },
        );
        assert!(!config.storage_pushdown);
        assert!(!config.remove_redundant_filters);
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut config = PushdownConfig {
            remove_redundant_filters: false,
            ..Default::default()
        };
        apply_flags(&mut config, &PassFlags::default());
        assert!(!config.remove_redundant_filters);
        assert!(config.storage_pushdown);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
