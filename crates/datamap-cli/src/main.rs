use clap::{Parser, Subcommand};
use colored::Colorize;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use datamap_core::{Config, Diagnostic, DiagnosticCode, Report, Severity, SeverityThreshold};
use datamap_engine::{ArtifactStats, Auditor, HealthChecker, ObservedColumn, SchemaValidator};
use datamap_registry::{
    load_from_config, DependencyResolver, PathResolver, Registry, ResolveOptions, TemplateParams,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// datamap - Data mapping registry: where artifacts live and what depends on them
#[derive(Parser)]
#[command(name = "datamap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: $DATAMAP_CONFIG, then datamap.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the registry against artifacts on disk
    Audit {
        /// Output file for the JSON report
        #[arg(short, long, default_value = "audit-report.json")]
        output: PathBuf,

        /// Also output markdown report
        #[arg(short, long)]
        markdown: Option<PathBuf>,
    },

    /// Show pipelines, services and dashboards affected by a source
    Impact {
        /// Data source name
        source: String,
    },

    /// Show the sources a pipeline, service or dashboard depends on
    Deps {
        /// Pipeline, service or dashboard name
        consumer: String,
    },

    /// Resolve a source to its concrete location
    Path {
        /// Data source name
        source: String,

        /// Template parameter (repeatable), e.g. --param date=2024-05-01
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Fail unless the artifact exists
        #[arg(long)]
        must_exist: bool,

        /// Fail if the artifact is older than this many hours
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Validate the registry configuration and dependency graph
    Check,

    /// Validate observed columns against a source's declared schema
    Validate {
        /// Data source name
        source: String,

        /// Observed columns as name[:type], comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<ObservedColumn>,
    },

    /// Check artifact health against configured thresholds
    Health {
        /// Data source name
        source: String,

        /// JSON file with artifact stats (modified, row_count, null_fractions)
        #[arg(long)]
        stats: PathBuf,
    },

    /// List sources with no producer and no consumer
    Orphans,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Audit { output, markdown } => {
            audit_command(&config, &output, markdown.as_deref(), cli.verbose)
        }
        Commands::Impact { source } => impact_command(&config, &source),
        Commands::Deps { consumer } => deps_command(&config, &consumer),
        Commands::Path { source, params, must_exist, max_age_hours } => {
            path_command(&config, &source, params, must_exist, max_age_hours)
        }
        Commands::Check => check_command(&config, cli.verbose),
        Commands::Validate { source, columns } => validate_command(&config, &source, &columns),
        Commands::Health { source, stats } => health_command(&config, &source, &stats),
        Commands::Orphans => orphans_command(&config),
    }
}

/// Log to stderr; `RUST_LOG` wins, `--verbose` raises the default to debug
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::discover()?,
    };

    if verbose {
        if config.documents.is_empty() {
            eprintln!("{}", "No registry documents configured".yellow());
        }
        for doc in config.document_paths() {
            eprintln!("{} {}", "Registry document:".cyan(), doc.display());
        }
    }

    Ok(config)
}

fn load_registry(config: &Config) -> Result<Registry> {
    load_from_config(config).context("failed to load registry")
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn print_banner(title: &str) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", title.bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
}

/// Audit command - registry vs filesystem reconciliation
fn audit_command(
    config: &Config,
    output: &Path,
    markdown: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let registry = load_registry(config)?;

    if verbose {
        eprintln!(
            "{} {} (dirs: {})",
            "Scanning".cyan(),
            registry.data_root().display(),
            config.audit.scan_dirs.join(", ")
        );
    }

    let auditor = Auditor::new(&registry).with_timeout(config.resolver.existence_timeout());
    let audit = auditor.audit(&config.audit)?;
    let report = auditor.to_report(&audit, &config.severity);

    report.save_to_file(output)?;
    tracing::info!(
        output = %output.display(),
        diagnostics = report.summary.total,
        "audit report written"
    );
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    if let Some(md_path) = markdown {
        std::fs::write(md_path, generate_markdown_report(&report))?;
        if verbose {
            eprintln!("{} {}", "Markdown report saved to:".green(), md_path.display());
        }
    }

    print_banner("Registry Audit");

    println!("{} ({})", "Registered and present:".bold(), audit.registered_present.len());
    for source in &audit.registered_present {
        let count = audit.artifacts.get(source).map(Vec::len).unwrap_or_default();
        println!("  {} {} {}", "✓".green(), source, format!("({} artifacts)", count).dimmed());
    }
    println!();

    println!("{} ({})", "Registered but missing:".bold(), audit.registered_missing.len());
    for source in &audit.registered_missing {
        println!("  {} {}", "✗".red(), source.red());
    }
    println!();

    println!("{} ({})", "Present but unregistered:".bold(), audit.unregistered.len());
    for path in &audit.unregistered {
        println!("  {} {}", "?".yellow(), path.yellow());
    }
    println!();

    print_report_summary(&report);

    if audit.has_missing() {
        std::process::exit(1);
    }

    Ok(())
}

/// Impact command - what breaks if a source changes
fn impact_command(config: &Config, source: &str) -> Result<()> {
    let registry = load_registry(config)?;
    let resolver = DependencyResolver::new(&registry);
    let chain = resolver.get_impact_chain(source)?;

    print_banner("Impact Analysis");
    println!("{} {}", "Source:".bold(), source.green());
    println!("{} {}", "Affected:".bold(), chain.len());
    println!();

    if chain.is_empty() {
        println!("{}", "✓ Nothing depends on this source".green());
    } else {
        for (i, name) in chain.iter().enumerate() {
            let kind = registry
                .consumer_kind(name)
                .map(|k| k.to_string())
                .unwrap_or_default();
            println!("  {}. {} {}", i + 1, name.yellow(), format!("({})", kind).dimmed());
        }
        println!();
        println!("{}", "⚠ Changes to this source may break the consumers above!".yellow().bold());
    }

    Ok(())
}

/// Deps command - what a consumer reads, transitively
fn deps_command(config: &Config, consumer: &str) -> Result<()> {
    let registry = load_registry(config)?;
    let resolver = DependencyResolver::new(&registry);
    let chain = resolver.get_dependency_chain(consumer)?;

    print_banner("Dependency Chain");
    println!("{} {}", "Consumer:".bold(), consumer.green());
    println!("{} {}", "Sources:".bold(), chain.len());
    println!();

    for (i, name) in chain.iter().enumerate() {
        let location = registry
            .get_source(name)
            .map(|s| s.location.clone())
            .unwrap_or_default();
        println!("  {}. {} {}", i + 1, name.yellow(), location.dimmed());
    }

    Ok(())
}

/// Path command - resolve a location template
fn path_command(
    config: &Config,
    source: &str,
    params: Vec<(String, String)>,
    must_exist: bool,
    max_age_hours: Option<u64>,
) -> Result<()> {
    let registry = load_registry(config)?;
    let params: TemplateParams = params.into_iter().collect();

    let options = ResolveOptions {
        must_exist,
        max_age: max_age_hours.map(|h| Duration::from_secs(h * 3600)),
    };

    let path = PathResolver::new(&registry)
        .with_timeout(config.resolver.existence_timeout())
        .resolve_with(source, &params, &options)?;
    tracing::debug!(source, path = %path.display(), must_exist, "resolved source location");

    println!("{}", path.display());
    Ok(())
}

/// Check command - configuration, cycles and orphans
fn check_command(config: &Config, verbose: bool) -> Result<()> {
    let registry = load_registry(config)?;
    let resolver = DependencyResolver::new(&registry);

    print_banner("Registry Check");
    println!("  Sources:    {}", registry.sources().len());
    println!("  Pipelines:  {}", registry.pipelines().len());
    println!("  Services:   {}", registry.services().len());
    println!("  Dashboards: {}", registry.dashboards().len());
    println!("  Schemas:    {}", registry.schemas().len());
    println!("  Fingerprint: {}", registry.fingerprint().dimmed());
    println!();

    if verbose {
        if let Ok(order) = resolver.topological_order() {
            eprintln!("{}", "Build order:".cyan());
            for node in order {
                eprintln!("  {}", node);
            }
        }
    }

    let mut report = Report::from_diagnostics(graph_diagnostics(&resolver, &config.severity))
        .with_fingerprint(registry.fingerprint());
    report.summary.sources_checked = registry.sources().len();
    print_report_summary(&report);

    if report.has_errors() {
        anyhow::bail!("registry check failed with {} error(s)", report.summary.errors);
    }

    println!("{}", "✓ Registry configuration is valid".green().bold());
    Ok(())
}

/// Cycles (errors) and orphan sources (warnings) as diagnostics
fn graph_diagnostics(
    resolver: &DependencyResolver,
    severity: &SeverityThreshold,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for cycle in resolver.cycles() {
        tracing::debug!(cycle = %cycle.join(" -> "), "cycle found by check");
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::GraphCycle,
            severity.get_severity(DiagnosticCode::GraphCycle, Severity::Error),
            format!("Cyclic dependency: {}", cycle.join(" -> ")),
        ));
    }

    for orphan in resolver.find_orphans() {
        diagnostics.push(
            Diagnostic::new(
                DiagnosticCode::AuditOrphanSource,
                severity.get_severity(DiagnosticCode::AuditOrphanSource, Severity::Warn),
                format!("Source '{}' has no producer and no consumer", orphan),
            )
            .with_source(orphan),
        );
    }

    diagnostics
}

/// Validate command - observed columns vs declared schema
fn validate_command(config: &Config, source: &str, columns: &[ObservedColumn]) -> Result<()> {
    let registry = load_registry(config)?;
    let result = SchemaValidator::new(&registry).validate_schema(source, columns)?;

    let mut report = Report::from_diagnostics(result.to_diagnostics(&config.severity))
        .with_fingerprint(registry.fingerprint());
    report.summary.sources_checked = 1;
    print_report_summary(&report);

    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Health command - freshness, row count and null ratios
fn health_command(config: &Config, source: &str, stats_path: &Path) -> Result<()> {
    let registry = load_registry(config)?;

    let contents = std::fs::read_to_string(stats_path)
        .with_context(|| format!("failed to read {}", stats_path.display()))?;
    let stats: ArtifactStats = serde_json::from_str(&contents)
        .with_context(|| format!("invalid artifact stats in {}", stats_path.display()))?;

    let result = HealthChecker::new(&registry, &config.health)
        .check_health(source, &stats, chrono::Utc::now())?;

    print_banner("Artifact Health");
    let mark = |ok: bool| if ok { "✓".green() } else { "✗".red() };
    println!("  {} freshness", mark(result.freshness_ok));
    println!("  {} row count", mark(result.row_count_ok));
    println!("  {} null ratio", mark(result.null_ratio_ok));
    println!();

    let report = Report::from_diagnostics(result.to_diagnostics(&config.severity));
    print_report_summary(&report);

    if !result.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

/// Orphans command
fn orphans_command(config: &Config) -> Result<()> {
    let registry = load_registry(config)?;
    let orphans = DependencyResolver::new(&registry).find_orphans();

    if orphans.is_empty() {
        println!("{}", "✓ No orphan sources".green());
    }
    for orphan in orphans {
        println!("{}", orphan);
    }
    Ok(())
}

/// Print report summary to console
fn print_report_summary(report: &Report) {
    println!("{}", "Summary:".bold());
    println!("  Total diagnostics: {}", report.summary.total);

    if report.summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }

    println!("  Info:     {}", report.summary.info);
    println!();

    if report.diagnostics.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
        return;
    }

    println!("{}", "Diagnostics:".bold());
    for diag in &report.diagnostics {
        let severity_str = match diag.severity {
            Severity::Error => "ERROR".red().bold(),
            Severity::Warn => "WARN".yellow().bold(),
            Severity::Info => "INFO".cyan(),
        };

        println!("  [{}] {}: {}", severity_str, diag.code, diag.message);

        if !diag.impact.is_empty() {
            println!("    impacts: {}", diag.impact.join(", ").dimmed());
        }
    }
    println!();
}

/// Generate markdown report
fn generate_markdown_report(report: &Report) -> String {
    let mut md = String::new();

    md.push_str("# Registry Audit Report\n\n");
    md.push_str(&format!("**Version:** {}\n\n", report.version));
    md.push_str(&format!("**Timestamp:** {}\n\n", report.timestamp));
    if let Some(fingerprint) = &report.registry_fingerprint {
        md.push_str(&format!("**Registry:** `{}`\n\n", fingerprint));
    }

    md.push_str("## Summary\n\n");
    md.push_str(&format!("- Sources checked: {}\n", report.summary.sources_checked));
    md.push_str(&format!("- Errors: {}\n", report.summary.errors));
    md.push_str(&format!("- Warnings: {}\n", report.summary.warnings));
    md.push_str(&format!("- Info: {}\n", report.summary.info));
    md.push('\n');

    if report.diagnostics.is_empty() {
        md.push_str("✅ **No issues found!**\n");
        return md;
    }

    md.push_str("## Diagnostics\n\n");
    for diag in &report.diagnostics {
        let severity_emoji = match diag.severity {
            Severity::Error => "❌",
            Severity::Warn => "⚠️",
            Severity::Info => "ℹ️",
        };

        md.push_str(&format!("### {} {} - {}\n\n", severity_emoji, diag.severity, diag.code));
        md.push_str(&format!("{}\n\n", diag.message));

        if let Some(path) = &diag.path {
            md.push_str(&format!("**Path:** `{}`\n\n", path));
        }

        if !diag.impact.is_empty() {
            md.push_str(&format!("**Impact:** {} downstream consumers\n\n", diag.impact.len()));
            for consumer in &diag.impact {
                md.push_str(&format!("- {}\n", consumer));
            }
            md.push('\n');
        }
    }

    md
}
