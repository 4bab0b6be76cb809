//! Scripted LLM provider. Replays queued replies in order and records
//! every prompt it receives.
//!
//! Used to drive the pipeline deterministically without network access.
//! Clones share the same queue and transcript.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::llm::{LlmResponse, ProviderError};

/// A prompt as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub system: Option<String>,
    pub content: String,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<String, String>>,
    prompts: Vec<RecordedPrompt>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    /// Provider that answers with `replies`, one per call.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let p = Self::default();
        for r in replies {
            p.push_reply(r);
        }
        p
    }

    /// Queue a successful reply. An empty string is reported as
    /// [`ProviderError::EmptyResponse`].
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock().replies.push_back(Ok(reply.into()));
    }

    /// Queue a transport-style failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().replies.push_back(Err(message.into()));
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.lock().prompts.clone()
    }

    /// Number of replies still queued.
    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }

    pub fn complete(&self, content: &str, system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        let mut script = self.lock();
        script.prompts.push(RecordedPrompt {
            system: system.map(str::to_string),
            content: content.to_string(),
        });
        match script.replies.pop_front() {
            Some(Ok(text)) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    Err(ProviderError::EmptyResponse)
                } else {
                    Ok(LlmResponse { text, usage: None })
                }
            }
            Some(Err(message)) => Err(ProviderError::Request(message)),
            None => Err(ProviderError::Request("scripted provider has no reply left".into())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
