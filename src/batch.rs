//! Benchmark batches.
//!
//! Every question runs in isolation: an error (or panic) while answering one
//! record becomes a placeholder prediction and the batch moves on.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use crate::camera::ImagePaths;
use crate::pipeline::QuestionAnswerer;

/// Prediction text for a question that could not be answered.
pub const PLACEHOLDER_ANSWER: &str = "Error in processing";

/// One benchmark question with its ground truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub scene_token: String,
    pub frame_token: String,
    pub question: String,
    pub question_type: String,
    #[serde(default)]
    pub tag: Value,
    /// Ground-truth answer.
    #[serde(default)]
    pub answer: String,
    /// Camera name -> image reference.
    pub image_path: ImagePaths,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(flatten)]
    pub record: BenchmarkRecord,
    pub pred: String,
}

impl Prediction {
    pub fn is_placeholder(&self) -> bool {
        self.pred == PLACEHOLDER_ANSWER
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BatchOptions {
    /// Questions answered concurrently. Values below 1 are treated as 1.
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// Completed predictions in input order.
    pub predictions: Vec<Prediction>,
    pub failures: usize,
    /// True when the stop flag cut the batch short.
    pub interrupted: bool,
}

/// Load benchmark records, keeping at most `max_samples`.
pub fn load_records(path: &Path, max_samples: Option<usize>) -> Result<Vec<BenchmarkRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test file {}", path.display()))?;
    let mut records: Vec<BenchmarkRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse test file {}", path.display()))?;
    if let Some(max) = max_samples {
        records.truncate(max);
    }
    Ok(records)
}

/// Write predictions as pretty JSON, creating parent directories.
pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(predictions)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write predictions to {}", path.display()))?;
    Ok(())
}

/// Answer one record, converting any failure into the placeholder.
pub fn predict(answerer: &dyn QuestionAnswerer, record: &BenchmarkRecord) -> Prediction {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        answerer.answer_question(&record.question, &record.image_path)
    }))
    .unwrap_or_else(|_| Err(anyhow!("answerer panicked")));

    let pred = match outcome {
        Ok(answer) => answer,
        Err(err) => {
            log::warn!(
                "{} failed on frame {}: {:#}",
                answerer.name(),
                record.frame_token,
                err
            );
            PLACEHOLDER_ANSWER.to_string()
        }
    };
    Prediction {
        record: record.clone(),
        pred,
    }
}

/// Answer every record. `on_done` runs after each question; setting `stop`
/// prevents new questions from starting.
pub fn run_batch(
    answerer: &dyn QuestionAnswerer,
    records: &[BenchmarkRecord],
    options: BatchOptions,
    stop: &AtomicBool,
    on_done: &(dyn Fn(&Prediction) + Sync),
) -> BatchReport {
    let jobs = options.jobs.clamp(1, records.len().max(1));
    let slots: Mutex<Vec<Option<Prediction>>> = Mutex::new(vec![None; records.len()]);
    let next = AtomicUsize::new(0);

    let worker = || loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let index = next.fetch_add(1, Ordering::SeqCst);
        let Some(record) = records.get(index) else {
            break;
        };
        let prediction = predict(answerer, record);
        on_done(&prediction);
        if let Ok(mut slots) = slots.lock() {
            slots[index] = Some(prediction);
        }
    };

    if jobs == 1 {
        worker();
    } else {
        thread::scope(|scope| {
            for _ in 0..jobs {
                scope.spawn(worker);
            }
        });
    }

    let predictions: Vec<Prediction> = slots
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .flatten()
        .collect();
    let failures = predictions.iter().filter(|p| p.is_placeholder()).count();
    BatchReport {
        interrupted: predictions.len() < records.len(),
        predictions,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Echo;

    impl QuestionAnswerer for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn answer_question(&self, question: &str, _: &ImagePaths) -> Result<String> {
            if question.contains("fail") {
                return Err(anyhow!("detector unavailable"));
            }
            if question.contains("panic") {
                panic!("unexpected shape");
            }
            Ok(question.to_uppercase())
        }
    }

    fn record(i: usize, question: &str) -> BenchmarkRecord {
        BenchmarkRecord {
            scene_token: format!("scene{}", i),
            frame_token: format!("frame{}", i),
            question: question.to_string(),
            question_type: "perception".to_string(),
            tag: serde_json::json!([0]),
            answer: "truth".to_string(),
            image_path: ImagePaths::from([("CAM_FRONT".to_string(), format!("{}.jpg", i))]),
        }
    }

    fn records() -> Vec<BenchmarkRecord> {
        (0..6)
            .map(|i| match i {
                2 => record(i, "please fail"),
                4 => record(i, "please panic"),
                _ => record(i, &format!("q{}", i)),
            })
            .collect()
    }

    #[test]
    fn failures_become_placeholders() {
        for jobs in [1, 3] {
            let records = records();
            let stop = AtomicBool::new(false);
            let done = AtomicUsize::new(0);
            let report = run_batch(&Echo, &records, BatchOptions { jobs }, &stop, &|_| {
                done.fetch_add(1, Ordering::SeqCst);
            });

            assert_eq!(report.predictions.len(), records.len());
            assert_eq!(report.failures, 2);
            assert!(!report.interrupted);
            assert_eq!(done.load(Ordering::SeqCst), records.len());
            for (prediction, record) in report.predictions.iter().zip(&records) {
                assert_eq!(&prediction.record, record);
            }
            assert_eq!(report.predictions[0].pred, "Q0");
            assert_eq!(report.predictions[2].pred, PLACEHOLDER_ANSWER);
            assert_eq!(report.predictions[4].pred, PLACEHOLDER_ANSWER);
            assert_eq!(report.predictions[5].pred, "Q5");
        }
    }

    #[test]
    fn stop_flag_prevents_new_questions() {
        let records = records();
        let stop = AtomicBool::new(true);
        let report = run_batch(&Echo, &records, BatchOptions::default(), &stop, &|_| {});
        assert!(report.predictions.is_empty());
        assert!(report.interrupted);
    }

    #[test]
    fn records_round_trip_through_files() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("test.json");
        std::fs::write(&input, serde_json::to_string(&records()).unwrap()).unwrap();

        let loaded = load_records(&input, Some(2)).unwrap();
        assert_eq!(loaded.len(), 2);

        let stop = AtomicBool::new(false);
        let report = run_batch(&Echo, &loaded, BatchOptions::default(), &stop, &|_| {});
        let output = dir.path().join("results/nested/predictions.json");
        write_predictions(&output, &report.predictions).unwrap();

        let written: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1]["pred"], "Q1");
        assert_eq!(written[1]["answer"], "truth");
        assert_eq!(written[1]["image_path"]["CAM_FRONT"], "1.jpg");
    }

    #[test]
    fn camera_order_survives_prediction_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("test.json");
        std::fs::write(
            &input,
            r#"[{
                "scene_token": "s",
                "frame_token": "f",
                "question": "Q",
                "question_type": "planning",
                "image_path": {
                    "CAM_FRONT": "f.jpg",
                    "CAM_BACK": "b.jpg",
                    "CAM_FRONT_LEFT": "fl.jpg"
                }
            }]"#,
        )
        .unwrap();

        let loaded = load_records(&input, None).unwrap();
        let stop = AtomicBool::new(false);
        let report = run_batch(&Echo, &loaded, BatchOptions::default(), &stop, &|_| {});
        let output = dir.path().join("predictions.json");
        write_predictions(&output, &report.predictions).unwrap();

        let written: Vec<Prediction> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        let cameras: Vec<&str> = written[0].record.image_path.keys().map(String::as_str).collect();
        assert_eq!(cameras, vec!["CAM_FRONT", "CAM_BACK", "CAM_FRONT_LEFT"]);
    }

    #[test]
    fn malformed_test_file_is_an_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("bad.json");
        std::fs::write(&input, "{\"not\": \"a list\"}").unwrap();
        assert!(load_records(&input, None).is_err());
    }
}
