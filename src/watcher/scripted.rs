//! Scripted settlement source for replays and tests

use super::{PollReport, PollRequest, SettlementSource};
use crate::error::{TrackerError, TrackerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct Script {
    steps: Vec<PollReport>,
    cursor: usize,
    /// Steps swapped in when the intent is re-driven
    after_retry: Option<Vec<PollReport>>,
    /// Polls left to fail before the script continues
    failures: u32,
    polls: u64,
}

/// Hands out a fixed sequence of poll reports per intent id
///
/// Each poll returns the next step; once the script is exhausted the last
/// step repeats. Unknown ids fail like an unreachable source.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    scripts: DashMap<String, Script>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reports handed out for `id`, replacing any previous script
    pub fn script(&self, id: impl Into<String>, steps: Vec<PollReport>) {
        self.scripts.insert(
            id.into(),
            Script {
                steps,
                ..Script::default()
            },
        );
    }

    /// Set the reports handed out after a successful retry of `id`
    pub fn script_retry(&self, id: &str, steps: Vec<PollReport>) {
        self.scripts.entry(id.to_string()).or_default().after_retry = Some(steps);
    }

    /// Make the next `count` polls of `id` fail
    pub fn fail_next(&self, id: &str, count: u32) {
        self.scripts.entry(id.to_string()).or_default().failures = count;
    }

    /// Number of polls served for `id`, failed ones included
    pub fn poll_count(&self, id: &str) -> u64 {
        self.scripts.get(id).map(|s| s.polls).unwrap_or(0)
    }
}

#[async_trait]
impl SettlementSource for ScriptedSource {
    async fn poll(&self, request: &PollRequest) -> TrackerResult<PollReport> {
        let mut script = self
            .scripts
            .get_mut(&request.id)
            .ok_or_else(|| TrackerError::Source {
                id: request.id.clone(),
                message: "no script for intent".to_string(),
            })?;

        script.polls += 1;
        if script.failures > 0 {
            script.failures -= 1;
            return Err(TrackerError::Source {
                id: request.id.clone(),
                message: "scripted failure".to_string(),
            });
        }

        let last = script.steps.len().checked_sub(1).ok_or_else(|| TrackerError::Source {
            id: request.id.clone(),
            message: "empty script".to_string(),
        })?;
        let step = script.steps[script.cursor.min(last)].clone();
        script.cursor += 1;

        debug!(intent = %request.id, step = script.cursor, "Served scripted report");
        Ok(step)
    }

    async fn retry(&self, request: &PollRequest) -> TrackerResult<()> {
        let mut script = self
            .scripts
            .get_mut(&request.id)
            .ok_or_else(|| TrackerError::UnknownIntent {
                id: request.id.clone(),
            })?;

        if let Some(steps) = script.after_retry.take() {
            script.steps = steps;
        }
        script.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{fixtures, IntentKind};
    use crate::stage::StageValue;

    fn request(id: &str) -> PollRequest {
        PollRequest {
            id: id.to_string(),
            kind: IntentKind::Swap,
            descriptor: fixtures::swap(),
        }
    }

    fn step(stage: &str) -> PollReport {
        PollReport {
            stage: StageValue::atomic(stage),
            tx_hash: None,
            status: None,
            accepts: Vec::new(),
            terminal: false,
        }
    }

    #[tokio::test]
    async fn test_last_step_repeats() {
        let source = ScriptedSource::new();
        source.script("a", vec![step("finding"), step("signing")]);

        let req = request("a");
        assert_eq!(source.poll(&req).await.unwrap().stage, StageValue::atomic("finding"));
        assert_eq!(source.poll(&req).await.unwrap().stage, StageValue::atomic("signing"));
        assert_eq!(source.poll(&req).await.unwrap().stage, StageValue::atomic("signing"));
        assert_eq!(source.poll_count("a"), 3);
    }

    #[tokio::test]
    async fn test_failures_then_script() {
        let source = ScriptedSource::new();
        source.script("a", vec![step("finding")]);
        source.fail_next("a", 2);

        let req = request("a");
        assert!(source.poll(&req).await.unwrap_err().is_retryable());
        assert!(source.poll(&req).await.is_err());
        assert!(source.poll(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_switches_script() {
        let source = ScriptedSource::new();
        source.script("a", vec![step("error")]);
        source.script_retry("a", vec![step("finding"), step("complete")]);

        let req = request("a");
        source.poll(&req).await.unwrap();
        source.retry(&req).await.unwrap();
        assert_eq!(source.poll(&req).await.unwrap().stage, StageValue::atomic("finding"));
    }

    #[tokio::test]
    async fn test_unknown_intent_fails() {
        let source = ScriptedSource::new();
        assert!(source.poll(&request("missing")).await.is_err());
        assert!(source.retry(&request("missing")).await.is_err());
        assert_eq!(source.poll_count("missing"), 0);
    }
}
