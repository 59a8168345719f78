// Admission Gate
//
// Policy half of the start path: how many jobs may hold an active slot
// and how long a silent slot stays counted. The atomic check itself
// lives in the registry so no start can slip past the ceiling.

use crate::application::constants::EngineConfig;
use crate::application::registry::{JobRegistry, StartDecision};
use crate::error::Result;

pub struct AdmissionGate {
    max_active_jobs: usize,
    activity_window_millis: i64,
}

impl AdmissionGate {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_active_jobs: config.max_active_jobs,
            activity_window_millis: config.activity_window.as_millis() as i64,
        }
    }

    /// Claim an active slot for the job, or park it in Queued
    pub async fn try_start(
        &self,
        registry: &JobRegistry,
        job_id: &str,
    ) -> Result<StartDecision> {
        registry
            .admit_or_queue(job_id, self.max_active_jobs, self.activity_window_millis)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobInput};
    use crate::port::time_provider::mocks::MockClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn small_config() -> EngineConfig {
        EngineConfig {
            max_active_jobs: 2,
            activity_window: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn gate_uses_configured_ceiling() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = JobRegistry::new(clock.clone());
        let gate = AdmissionGate::new(&small_config());

        for name in ["a", "b", "c"] {
            let input = JobInput::Standard {
                model_id: 1,
                story_ids: vec![1],
                question_id: 1,
                params: serde_json::Map::new(),
            };
            registry
                .insert(Job::new(name, clock.now_millis(), input, None, None))
                .await;
        }

        assert!(matches!(
            gate.try_start(&registry, "a").await.unwrap(),
            StartDecision::Started(_)
        ));
        assert!(matches!(
            gate.try_start(&registry, "b").await.unwrap(),
            StartDecision::Started(_)
        ));
        assert!(matches!(
            gate.try_start(&registry, "c").await.unwrap(),
            StartDecision::Queued { active: 2 }
        ));
    }
}
