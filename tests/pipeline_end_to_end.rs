use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use scene_agent::batch::{self, BatchOptions, BenchmarkRecord};
use scene_agent::camera::ImagePaths;
use scene_agent::detect::StubBackend;
use scene_agent::{
    BackendRegistry, DetectorBackend, DetectorOutput, ExecutionResult, Executor, PerceptionResult, Pipeline,
    PipelineSettings, Plan, RawDetection, SceneGraph, ScriptedGenerator, PLACEHOLDER_ANSWER,
};

fn detectors() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(
        StubBackend::new()
            .with_output(
                "front.jpg",
                DetectorOutput {
                    width: 1920,
                    height: 1080,
                    candidates: vec![
                        RawDetection::new("car", 0.92, [910.0, 490.0, 1010.0, 590.0]),
                        RawDetection::new("traffic light", 0.3, [100.0, 10.0, 120.0, 60.0]),
                    ],
                },
            )
            .with_output(
                "back.jpg",
                DetectorOutput {
                    width: 1920,
                    height: 1080,
                    candidates: vec![RawDetection::new("truck", 0.81, [200.0, 300.0, 600.0, 1000.0])],
                },
            )
            .with_failure("broken.jpg"),
    );
    registry
}

fn scripted() -> Arc<ScriptedGenerator> {
    Arc::new(
        ScriptedGenerator::new("unused")
            .with_reply("additional insights", "- object: sedan, color: gray, position: front")
            .with_reply("Refine this answer", "The gray sedan ahead is stopped.")
            .with_reply(
                "Scene Description",
                "Step 1: count_objects(\"car\") - Count cars\n\
                 Step 2: levitate_object(obj_0) - Not a real method\n\
                 The referenced car is stopped ahead.",
            ),
    )
}

fn images(pairs: &[(&str, &str)]) -> ImagePaths {
    pairs
        .iter()
        .map(|(camera, path)| (camera.to_string(), path.to_string()))
        .collect()
}

#[test]
fn answers_question_with_reference_and_steps() {
    let generator = scripted();
    let pipeline = Pipeline::new(detectors(), generator.clone(), PipelineSettings::default());

    let output = pipeline
        .process(
            "What is <c1,CAM_FRONT,0.5,0.5> doing?",
            &images(&[("CAM_BACK", "back.jpg"), ("CAM_FRONT", "front.jpg")]),
        )
        .expect("pipeline run");

    assert_eq!(output.answer, "The gray sedan ahead is stopped.");
    assert_eq!(output.confidence, 80);
    assert!(output.reasoning_chain.starts_with("Step 1: count_objects"));
    assert_eq!(output.trace.len(), 2);
    assert_eq!(output.trace[0].result.to_string(), "1");
    assert_eq!(output.trace[1].result.to_string(), "sedan (gray) at front");

    let metadata = output.metadata.expect("metadata kept by default");
    let detections = metadata["perception"]["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 2, "0.3 confidence is discarded");
    assert_eq!(detections[0]["camera_view"], "front");
    assert_eq!(detections[0]["position"], "front-center");
    assert_eq!(detections[1]["camera_view"], "back");
    assert_eq!(detections[1]["distance"], "close");
    assert_eq!(metadata["scene_graph"]["edges"][0]["relation"], "in_front_of");
    assert_eq!(metadata["plan"]["reference"]["resolution"]["status"], "found");
    assert_eq!(metadata["plan"]["reference"]["resolution"]["node_id"], "obj_0");

    let calls = generator.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].prompt.contains("refers to obj_0: car at front-center"));
}

#[test]
fn empty_scene_is_described_explicitly() {
    let generator = Arc::new(ScriptedGenerator::new("Nothing to report."));
    let pipeline = Pipeline::new(
        detectors(),
        generator.clone(),
        PipelineSettings {
            use_vlm: false,
            ..PipelineSettings::default()
        },
    );
    let output = pipeline
        .process("Is <c1,CAM_FRONT,0.9,0.9> moving?", &images(&[("CAM_FRONT", "empty.jpg")]))
        .unwrap();

    let metadata = output.metadata.unwrap();
    assert_eq!(
        metadata["scene_graph"]["scene_description"],
        "No objects detected in the scene."
    );
    assert!(metadata["scene_graph"]["nodes"].as_array().unwrap().is_empty());
    assert!(metadata["scene_graph"]["edges"].as_array().unwrap().is_empty());
    assert_eq!(metadata["plan"]["reference"]["resolution"]["status"], "not_found");
    assert_eq!(generator.calls().len(), 2);
}

struct BrokenExecutor;

impl Executor for BrokenExecutor {
    fn execute(&self, _: &Plan, _: &SceneGraph<'_>, _: &PerceptionResult) -> Result<ExecutionResult> {
        Err(anyhow!("executor returned an unexpected shape"))
    }
}

struct BlankExecutor;

impl Executor for BlankExecutor {
    fn execute(&self, _: &Plan, _: &SceneGraph<'_>, _: &PerceptionResult) -> Result<ExecutionResult> {
        Ok(ExecutionResult {
            answer: "   ".to_string(),
            reasoning: String::new(),
            trace: Vec::new(),
        })
    }
}

#[test]
fn malformed_execution_falls_back_to_plan_reasoning() {
    let executors: Vec<Box<dyn Executor>> = vec![Box::new(BrokenExecutor), Box::new(BlankExecutor)];
    for executor in executors {
        let generator = scripted();
        let pipeline = Pipeline::new(detectors(), generator.clone(), PipelineSettings::default())
            .with_executor(executor);
        let output = pipeline
            .process("How many cars?", &images(&[("CAM_FRONT", "front.jpg")]))
            .expect("fallback keeps the question alive");

        assert_eq!(output.answer, "The gray sedan ahead is stopped.");
        assert!(output.reasoning_chain.ends_with("The referenced car is stopped ahead."));
        assert!(output.trace.is_empty());
        let metadata = output.metadata.unwrap();
        assert_eq!(metadata["execution"]["trace"].as_array().unwrap().len(), 0);
        assert_eq!(metadata["execution"]["answer"], metadata["plan"]["reasoning"]);

        let calls = generator.calls();
        assert!(calls[2].prompt.contains("Draft Answer: Step 1: count_objects"));
    }
}

fn record(i: usize, image: &str) -> BenchmarkRecord {
    BenchmarkRecord {
        scene_token: format!("scene-{}", i),
        frame_token: format!("frame-{}", i),
        question: "What are the important objects?".to_string(),
        question_type: "perception".to_string(),
        tag: serde_json::json!([2]),
        answer: "A gray sedan.".to_string(),
        image_path: ImagePaths::from([("CAM_FRONT".to_string(), image.to_string())]),
    }
}

#[test]
fn batch_isolates_failing_questions() {
    let pipeline = Pipeline::new(detectors(), scripted(), PipelineSettings::default());
    let records: Vec<BenchmarkRecord> = (0..5)
        .map(|i| record(i, if i == 3 { "broken.jpg" } else { "front.jpg" }))
        .collect();

    for jobs in [1, 4] {
        let stop = AtomicBool::new(false);
        let report = batch::run_batch(&pipeline, &records, BatchOptions { jobs }, &stop, &|_| {});
        assert_eq!(report.predictions.len(), 5);
        assert_eq!(report.failures, 1);
        for (i, prediction) in report.predictions.iter().enumerate() {
            assert_eq!(prediction.record, records[i]);
            if i == 3 {
                assert_eq!(prediction.pred, PLACEHOLDER_ANSWER);
            } else {
                assert_eq!(prediction.pred, "The gray sedan ahead is stopped.");
            }
        }
    }
}

struct CrashingDetector {
    inner: StubBackend,
}

impl DetectorBackend for CrashingDetector {
    fn name(&self) -> &'static str {
        "crashing"
    }

    fn detect(&mut self, image: &str, threshold: f64) -> Result<DetectorOutput> {
        if image == "boom.jpg" {
            panic!("detector crashed on {}", image);
        }
        self.inner.detect(image, threshold)
    }
}

#[test]
fn batch_survives_a_panicking_detector() {
    let mut registry = BackendRegistry::new();
    registry.register(CrashingDetector {
        inner: StubBackend::new().with_output(
            "front.jpg",
            DetectorOutput {
                width: 1920,
                height: 1080,
                candidates: vec![RawDetection::new("car", 0.92, [910.0, 490.0, 1010.0, 590.0])],
            },
        ),
    });
    let pipeline = Pipeline::new(registry, scripted(), PipelineSettings::default());
    let records: Vec<BenchmarkRecord> = (0..4)
        .map(|i| record(i, if i == 1 { "boom.jpg" } else { "front.jpg" }))
        .collect();

    let stop = AtomicBool::new(false);
    let report = batch::run_batch(&pipeline, &records, BatchOptions { jobs: 1 }, &stop, &|_| {});
    let preds: Vec<&str> = report.predictions.iter().map(|p| p.pred.as_str()).collect();
    assert_eq!(
        preds,
        vec![
            "The gray sedan ahead is stopped.",
            PLACEHOLDER_ANSWER,
            "The gray sedan ahead is stopped.",
            "The gray sedan ahead is stopped.",
        ]
    );
    assert_eq!(report.failures, 1);
}
