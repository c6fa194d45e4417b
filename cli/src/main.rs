//! Command-line front end for quire.
//!
//! # Usage
//!
//! ```bash
//! # Show which renderer would be used and why
//! quire locate
//!
//! # Make sure a renderer is available, installing one if allowed
//! quire ensure
//!
//! # Print an HTML file or a URL to PDF
//! quire render invoice.html -o invoice.pdf --format a4 --margin 1cm
//! quire url https://example.com -o example.pdf --landscape
//! ```
//!
//! Set `RUST_LOG=quire=debug` to follow discovery and rendering in detail.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quire::{
    ChromiumEngine, EngineProbe, ExportOptions, Failure, LifecycleHooks, Length, Margins,
    PageFormat, ProgressSink, Quire, RendererConfig, RendererLocator, Stage,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status after an interrupt, following the shell convention.
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "quire", version, about = "Render HTML to PDF with a shared headless browser")]
struct Cli {
    #[command(flatten)]
    renderer: RendererArgs,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RendererArgs {
    /// Use this browser executable instead of searching for one.
    #[arg(long, global = true)]
    executable: Option<PathBuf>,

    /// Directory for downloaded renderers and the install marker.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Never download a renderer.
    #[arg(long, global = true)]
    no_install: bool,

    /// Renders served by one browser process before it is replaced.
    #[arg(long, global = true)]
    max_uses: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the discovery chain and report every attempt.
    Locate,
    /// Make sure a verified renderer is available.
    Ensure,
    /// Render a local HTML file.
    Render {
        /// HTML file to render.
        input: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Render a remote document.
    Url {
        /// http(s) or file URL.
        url: String,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Where to write the PDF.
    #[arg(short, long)]
    output: PathBuf,

    /// Page format such as a4, letter, or 210mmx297mm.
    #[arg(long)]
    format: Option<PageFormat>,

    /// Landscape orientation.
    #[arg(long)]
    landscape: bool,

    /// Margin applied to every side, e.g. 10mm or 0.5in.
    #[arg(long)]
    margin: Option<Length>,

    /// Skip CSS backgrounds.
    #[arg(long)]
    no_background: bool,
}

impl OutputArgs {
    fn export_options(&self) -> ExportOptions {
        let mut options = ExportOptions::new();
        if let Some(format) = self.format {
            options = options.with_page_format(format);
        }
        if self.landscape {
            options = options.with_landscape(true);
        }
        if let Some(margin) = self.margin {
            options = options.with_margins(Margins::uniform(margin));
        }
        if self.no_background {
            options = options.with_print_background(false);
        }
        options
    }
}

impl RendererArgs {
    fn config(&self) -> RendererConfig {
        let mut config = RendererConfig::from_env();
        if let Some(path) = &self.executable {
            config = config.with_executable(path);
        }
        if let Some(dir) = &self.cache_dir {
            config = config.with_cache_dir(dir);
        }
        if let Some(max_uses) = self.max_uses {
            config = config.with_max_uses(max_uses);
        }
        if self.no_install {
            config = config.with_install(false);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.renderer.config();

    let hooks = LifecycleHooks::new(config.timeouts.shutdown_grace);
    let quire = Quire::new(ChromiumEngine::new(), config);

    let work = async {
        match &cli.command {
            Command::Locate => locate(quire.config(), cli.json).await,
            Command::Ensure => ensure(&quire, cli.json).await,
            Command::Render { input, output } => {
                let html = tokio::fs::read_to_string(input)
                    .await
                    .with_context(|| format!("failed to read {}", input.display()))?;
                let pdf = quire
                    .render_html_to_pdf(&html, Some(output.export_options()))
                    .await;
                write_pdf(pdf, output, cli.json).await
            }
            Command::Url { url, output } => {
                let pdf = quire
                    .render_url_to_pdf(url, Some(output.export_options()))
                    .await;
                write_pdf(pdf, output, cli.json).await
            }
        }
    };

    let Ok(result) = hooks.run_until_signal(&quire, work).await else {
        return Ok(ExitCode::from(INTERRUPTED));
    };
    hooks.shutdown(&quire).await;
    result
}

async fn locate(config: &RendererConfig, json: bool) -> Result<ExitCode> {
    let probe = EngineProbe::new(ChromiumEngine::new(), config.timeouts.probe);
    let locator = RendererLocator::from_config(config, probe);
    let report = locator.locate_with_report(&ProgressSink::new()).await;

    if json {
        let outcome = match &report.outcome {
            Ok(candidate) => serde_json::to_value(candidate)?,
            Err(error) => serde_json::to_value(Failure::from(error))?,
        };
        let body = serde_json::json!({
            "attempts": report.attempts,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        for attempt in &report.attempts {
            println!("{attempt}");
        }
        match &report.outcome {
            Ok(candidate) => println!("using {} ({})", candidate.path.display(), candidate.source),
            Err(error) => eprintln!("no renderer: {}", Failure::from(error)),
        }
    }

    Ok(if report.outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn ensure(quire: &Quire<ChromiumEngine>, json: bool) -> Result<ExitCode> {
    let events = quire.subscribe_progress();
    let ensure = quire.ensure_renderer_ready();
    tokio::pin!(ensure);

    let outcome = loop {
        tokio::select! {
            outcome = &mut ensure => break outcome,
            Ok(stage) = events.recv() => print_stage(&stage, json),
        }
    };
    while let Ok(stage) = events.try_recv() {
        print_stage(&stage, json);
    }

    match outcome {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(failure) => {
            warn!(kind = ?failure.kind, remedy = ?failure.remedy, "renderer not ready");
            if !json {
                eprintln!("{failure}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_stage(stage: &Stage, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(stage) {
            println!("{line}");
        }
        return;
    }
    match stage {
        Stage::Checking => println!("checking for a renderer"),
        Stage::Locating { source } => println!("looking in {source}"),
        Stage::Installing { attempt } => println!("installing a renderer (attempt {attempt})"),
        Stage::Ready { path } => println!("ready: {}", path.display()),
        Stage::Error { failure } => println!("failed: {}", failure.message),
    }
}

async fn write_pdf(
    pdf: Result<Vec<u8>, Failure>,
    output: &OutputArgs,
    json: bool,
) -> Result<ExitCode> {
    let pdf = match pdf {
        Ok(pdf) => pdf,
        Err(failure) => {
            warn!(kind = ?failure.kind, retryable = failure.retryable, "render failed");
            if json {
                eprintln!("{}", serde_json::to_string(&failure)?);
            } else {
                eprintln!("render failed: {failure}");
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    tokio::fs::write(&output.output, &pdf)
        .await
        .with_context(|| format!("failed to write {}", output.output.display()))?;
    info!(bytes = pdf.len(), output = %output.output.display(), "pdf written");
    if !json {
        println!("wrote {} bytes to {}", pdf.len(), output.output.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_flag_accepts_named_and_custom_sizes() {
        let cli = Cli::try_parse_from([
            "quire", "render", "in.html", "-o", "out.pdf", "--format", "210mmx297mm",
        ])
        .unwrap();
        let Command::Render { output, .. } = cli.command else {
            panic!("expected render");
        };
        assert!(matches!(output.format, Some(PageFormat::Custom { .. })));

        let cli = Cli::try_parse_from(["quire", "url", "https://example.com", "-o", "x.pdf", "--format", "A4"])
            .unwrap();
        let Command::Url { output, .. } = cli.command else {
            panic!("expected url");
        };
        assert_eq!(output.format, Some(PageFormat::A4));
        assert!(
            Cli::try_parse_from(["quire", "render", "in.html", "-o", "o.pdf", "--format", "b5"]).is_err()
        );
    }
}
