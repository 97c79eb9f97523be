use std::sync::Mutex;

use tempfile::NamedTempFile;

use scene_agent::config::{DetectorKind, PipelineConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SCENE_AGENT_CONFIG",
        "OLLAMA_URL",
        "SCENE_AGENT_VLM_MODEL",
        "SCENE_AGENT_LLM_MODEL",
        "SCENE_AGENT_DETECTOR",
        "SCENE_AGENT_REPLAY_PATH",
        "SCENE_AGENT_MAX_RETRIES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let replay_path = file.path().with_extension("detections.json");
    let json = format!(
        r#"{{
            "ollama": {{
                "url": "http://gpu-box:11434",
                "timeout_secs": 120,
                "max_retries": 2,
                "retry_delay_secs": 1
            }},
            "models": {{
                "vlm": "llava:13b",
                "llm": "llama3:8b"
            }},
            "perception": {{ "use_vlm": false }},
            "detector": {{
                "backend": "replay",
                "replay_path": "{}"
            }},
            "output": {{ "keep_metadata": false }}
        }}"#,
        replay_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SCENE_AGENT_CONFIG", file.path());
    std::env::set_var("SCENE_AGENT_LLM_MODEL", "gpt-oss:20b");
    std::env::set_var("SCENE_AGENT_MAX_RETRIES", "3");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.ollama.url, "http://gpu-box:11434");
    assert_eq!(cfg.ollama.timeout.as_secs(), 120);
    assert_eq!(cfg.ollama.max_retries, 3);
    assert_eq!(cfg.ollama.retry_delay.as_secs(), 1);
    assert_eq!(cfg.vlm_model, "llava:13b");
    assert_eq!(cfg.llm_model, "gpt-oss:20b");
    assert!(!cfg.use_vlm);
    assert!(!cfg.keep_metadata);
    assert_eq!(cfg.detector.backend, Some(DetectorKind::Replay));
    assert_eq!(cfg.detector.replay_path.unwrap(), replay_path);

    let settings = PipelineConfig::load().unwrap().pipeline_settings();
    assert_eq!(settings.llm_model, "gpt-oss:20b");
    assert!(!settings.use_vlm);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load defaults");
    assert_eq!(cfg.ollama.url, "http://localhost:11434");
    assert_eq!(cfg.vlm_model, "llava:latest");
    assert_eq!(cfg.llm_model, "gpt-oss:20b");
    assert_eq!(cfg.detector.backend, None);
    assert!(cfg.use_vlm);
    assert!(cfg.build_detectors().is_err());

    clear_env();
}

#[test]
fn stub_detector_requires_explicit_choice() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCENE_AGENT_DETECTOR", "stub");
    let cfg = PipelineConfig::load().expect("load with stub detector");
    assert_eq!(cfg.detector.backend, Some(DetectorKind::Stub));
    let registry = cfg.build_detectors().expect("named stub builds");
    assert_eq!(registry.default_name(), Some("stub"));

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCENE_AGENT_MAX_RETRIES", "many");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("OLLAMA_URL", "ftp://localhost");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("SCENE_AGENT_DETECTOR", "replay");
    assert!(PipelineConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCENE_AGENT_CONFIG", "/nonexistent/scene-agent.json");
    let err = PipelineConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
