//! ask - run the pipeline on one question and print the answer.
//!
//! Example:
//!   ask "Is it safe to turn left?" --image CAM_FRONT=front.jpg --image CAM_BACK=back.jpg

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;

use scene_agent::camera::ImagePaths;
use scene_agent::verify::build_reasoning_chain;
use scene_agent::{OllamaClient, Pipeline, PipelineConfig};

#[allow(dead_code)]
#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Answer one driving-scene question")]
struct Args {
    /// The question to answer.
    question: String,
    /// Camera image as CAMERA=PATH. Repeat for each camera.
    #[arg(long = "image", value_name = "CAMERA=PATH", value_parser = parse_image, required = true)]
    images: Vec<(String, String)>,
    /// Vision-language model (overrides config).
    #[arg(long)]
    vlm_model: Option<String>,
    /// Text model (overrides config).
    #[arg(long)]
    llm_model: Option<String>,
    /// Skip the vision-model context request during perception.
    #[arg(long)]
    no_vlm: bool,
    /// Print the full output record, including metadata, as JSON.
    #[arg(long)]
    json: bool,
    /// UI mode: auto, plain, pretty.
    #[arg(long, env = "SCENE_AGENT_UI", default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn parse_image(value: &str) -> std::result::Result<(String, String), String> {
    let (camera, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected CAMERA=PATH, got '{}'", value))?;
    if camera.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected CAMERA=PATH, got '{}'", value));
    }
    Ok((camera.trim().to_string(), path.trim().to_string()))
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
    if args.no_vlm {
        config.use_vlm = false;
    }
    config.keep_metadata = args.json;
    config.validate()?;

    let pipeline = Pipeline::new(
        config.build_detectors()?,
        Arc::new(OllamaClient::new(config.ollama_config())),
        config.pipeline_settings(),
    );
    let images: ImagePaths = args.images.iter().cloned().collect();

    let output = pipeline.process_with(&args.question, &images, |stage| ui.stage(stage.title()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    println!("Answer: {}", output.answer);
    println!("Confidence: {}", output.confidence);
    if !output.trace.is_empty() {
        println!("\nSteps:\n{}", build_reasoning_chain(&output.trace));
    }
    println!("\nReasoning:\n{}", output.reasoning_chain);
    Ok(())
}
