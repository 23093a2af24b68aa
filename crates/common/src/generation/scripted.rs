//! Scripted language model for tests

use super::{LanguageModel, PromptContext};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return this draft
    Draft(String),
    /// Fail with a transient upstream error
    Unavailable,
    /// Sleep, then return the draft (exercises timeouts)
    Stall(Duration, String),
}

/// Replays drafts in order and records every prompt it was given.
/// Once the script runs out, every call fails as unavailable.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<ScriptStep>>,
    prompts: Mutex<Vec<PromptContext>>,
    judge_reply: String,
}

impl ScriptedModel {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            judge_reply: "YES".to_string(),
        }
    }

    /// Shorthand for a script of plain drafts
    pub fn drafts<S: Into<String>>(drafts: impl IntoIterator<Item = S>) -> Self {
        Self::new(drafts.into_iter().map(|d| ScriptStep::Draft(d.into())))
    }

    /// Reply used for free-form completions (entailment judgments)
    pub fn with_judge_reply(mut self, reply: impl Into<String>) -> Self {
        self.judge_reply = reply.into();
        self
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<PromptContext> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Ok(self.judge_reply.clone())
    }

    async fn generate(&self, prompt: &PromptContext) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.clone());

        match self.next_step() {
            Some(ScriptStep::Draft(draft)) => Ok(draft),
            Some(ScriptStep::Stall(delay, draft)) => {
                tokio::time::sleep(delay).await;
                Ok(draft)
            }
            Some(ScriptStep::Unavailable) => Err(AppError::GenerationUnavailable {
                message: "scripted outage".to_string(),
            }),
            None => Err(AppError::GenerationUnavailable {
                message: "script exhausted".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
