//! agentic_inference - answer a benchmark file with the five-stage pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use scene_agent::batch::{self, BatchOptions};
use scene_agent::{OllamaClient, Pipeline, PipelineConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Agentic pipeline inference over a benchmark file")]
struct Args {
    /// Benchmark questions (JSON array).
    #[arg(long, default_value = "data/drivebench-test.json")]
    test_file: PathBuf,
    /// Where to write predictions.
    #[arg(long, default_value = "results/agentic_predictions.json")]
    output: PathBuf,
    /// Vision-language model (overrides config).
    #[arg(long)]
    vlm_model: Option<String>,
    /// Text model for planning and verification (overrides config).
    #[arg(long)]
    llm_model: Option<String>,
    /// Ollama server URL (overrides config).
    #[arg(long)]
    ollama_url: Option<String>,
    /// Skip the vision-model context request during perception.
    #[arg(long)]
    no_vlm: bool,
    /// Process at most this many questions.
    #[arg(long)]
    max_samples: Option<usize>,
    /// Questions answered concurrently.
    #[arg(long, default_value_t = 1)]
    jobs: usize,
    /// UI mode: auto, plain, pretty.
    #[arg(long, env = "SCENE_AGENT_UI", default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = PipelineConfig::load()?;
    if let Some(model) = &args.vlm_model {
        config.vlm_model = model.clone();
    }
    if let Some(model) = &args.llm_model {
        config.llm_model = model.clone();
    }
    if let Some(url) = &args.ollama_url {
        config.ollama.url = url.clone();
    }
    if args.no_vlm {
        config.use_vlm = false;
    }
    config.validate()?;

    let records = {
        let _stage = ui.stage("Load test data");
        batch::load_records(&args.test_file, args.max_samples)?
    };

    let pipeline = {
        let _stage = ui.stage("Initialize agentic pipeline");
        let detectors = config.build_detectors()?;
        let generator = Arc::new(OllamaClient::new(config.ollama_config()));
        Pipeline::new(detectors, generator, config.pipeline_settings())
    };
    log::info!(
        "vlm={} llm={} detector={:?} ollama={}",
        config.vlm_model,
        config.llm_model,
        config.detector.backend,
        config.ollama.url
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let progress = ui.progress(records.len() as u64, "Processing");
    let done = AtomicU64::new(0);
    let report = batch::run_batch(
        &pipeline,
        &records,
        BatchOptions { jobs: args.jobs },
        &stop,
        &|_| progress.tick(done.fetch_add(1, Ordering::SeqCst) + 1),
    );
    progress.finish(&format!(
        "{} answered, {} failed",
        report.predictions.len() - report.failures,
        report.failures
    ));
    if report.interrupted {
        log::warn!(
            "interrupted: writing {} of {} predictions",
            report.predictions.len(),
            records.len()
        );
    }

    batch::write_predictions(&args.output, &report.predictions)?;
    log::info!("Predictions saved to {}", args.output.display());
    Ok(())
}
