use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use gl_redirect::config::TransformerConfig;
use gl_redirect::report::{build_invocation, build_sarif, dropped_frames_result, stubbed_call_result};
use gl_redirect::scan::scan_inputs;
use gl_redirect::transformer::Transformer;

/// CLI arguments for glredirect execution.
#[derive(Parser, Debug)]
#[command(
    name = "glredirect",
    about = "Rewrites JVM classes so legacy OpenGL calls reach a replacement renderer.",
    version
)]
struct Cli {
    /// Class file, jar, or directory of classes.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Where the rewritten classes go; omit for a dry run.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// JSON transformer configuration.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Sandbox class file whose methods become redirect targets.
    #[arg(long, value_name = "PATH")]
    sandbox: Vec<PathBuf>,
    /// SARIF report of stubbed calls and dropped frames; `-` for stdout.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli);
    run(cli)
}

fn init_logger(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.sandbox {
        if !entry.exists() {
            anyhow::bail!("sandbox class not found: {}", entry.display());
        }
    }

    let mut config = match &cli.config {
        Some(path) => TransformerConfig::from_path(path)?,
        None => TransformerConfig::default(),
    };
    config.sandbox_classes.extend(cli.sandbox.iter().cloned());

    let started_at = Instant::now();
    let transformer = Transformer::from_config(&config)?;
    let scan = scan_inputs(&cli.input, cli.output.as_deref(), &transformer)?;
    info!(
        "classes={} modified={} redirected={} stubbed={}",
        scan.class_count,
        scan.modified_count,
        scan.redirected,
        scan.stubbed.len()
    );

    if let Some(report) = cli.report.as_deref() {
        let mut results: Vec<_> = scan.stubbed.iter().map(stubbed_call_result).collect();
        results.extend(
            scan.dropped
                .iter()
                .map(|(class_name, dropped)| dropped_frames_result(class_name, dropped)),
        );
        let sarif = build_sarif(scan.artifacts, results, build_invocation());

        let mut writer = report_writer(report)?;
        serde_json::to_writer_pretty(&mut writer, &sarif)
            .context("failed to serialize SARIF output")?;
        writer
            .write_all(b"\n")
            .context("failed to write SARIF output")?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} modified={}",
            started_at.elapsed().as_millis(),
            scan.class_count,
            scan.modified_count
        );
    }

    Ok(())
}

fn report_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(
        File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
    ))
}
