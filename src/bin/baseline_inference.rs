//! baseline_inference - answer a benchmark file with a single vision-model call per question.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use scene_agent::batch::{self, BatchOptions};
use scene_agent::{BaselineVlm, OllamaClient, PipelineConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Baseline VLM inference over a benchmark file")]
struct Args {
    #[arg(long, default_value = "data/drivebench-test.json")]
    test_file: PathBuf,
    #[arg(long, default_value = "results/baseline_predictions.json")]
    output: PathBuf,
    /// Vision-language model (overrides config).
    #[arg(long)]
    model: Option<String>,
    /// Ollama server URL (overrides config).
    #[arg(long)]
    ollama_url: Option<String>,
    #[arg(long)]
    max_samples: Option<usize>,
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
    if let Some(model) = &args.model {
        config.vlm_model = model.clone();
    }
    if let Some(url) = &args.ollama_url {
        config.ollama.url = url.clone();
    }
    config.validate()?;

    let records = {
        let _stage = ui.stage("Load test data");
        batch::load_records(&args.test_file, args.max_samples)?
    };
    let baseline = BaselineVlm::new(
        Arc::new(OllamaClient::new(config.ollama_config())),
        config.vlm_model.clone(),
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
        &baseline,
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
