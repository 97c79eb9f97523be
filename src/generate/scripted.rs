use anyhow::{anyhow, Result};
use std::sync::Mutex;

use super::{GenerationRequest, Generator};

#[derive(Clone, Debug)]
enum Reply {
    Text(String),
    Fail(String),
}

/// A prompt seen by a `ScriptedGenerator`.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub temperature: f32,
}

/// Offline generator with canned completions.
///
/// Rules match on prompt substrings in registration order; the first match
/// wins. Unmatched prompts get the default reply. Every call is recorded.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    rules: Vec<(String, Reply)>,
    default_reply: String,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            default_reply: default_reply.into(),
            ..Self::default()
        }
    }

    /// Reply with `text` when the prompt contains `pattern`.
    pub fn with_reply(mut self, pattern: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), Reply::Text(text.into())));
        self
    }

    /// Fail when the prompt contains `pattern`.
    pub fn with_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), Reply::Fail(message.into())));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl Generator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("scripted generator call log poisoned"))?
            .push(RecordedCall {
                model: request.model.to_string(),
                prompt: request.prompt.to_string(),
                images: request.images.to_vec(),
                temperature: request.temperature,
            });

        let reply = self
            .rules
            .iter()
            .find(|(pattern, _)| request.prompt.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(anyhow!("{}", message)),
            None => Ok(self.default_reply.clone()),
        }
    }
}
