// Job Input - the work unit source captured at creation time

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::job::{ModelId, PromptId, QuestionId, StoryId};

/// One rerun entry, copied from a previously persisted prompt row.
///
/// The stored prompt remains authoritative for story, question and
/// parameters; the ids carried here let the driver resolve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerunPrompt {
    pub prompt_id: PromptId,
    pub model_id: ModelId,
    pub story_id: StoryId,
    pub question_id: QuestionId,
    /// Caller overrides; `None` means "use the stored values"
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

/// What a job was asked to do, snapshotted when it was created.
///
/// A standard job fans out one work unit per story against a single
/// question and model. A rerun job replays previously persisted prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobInput {
    Standard {
        model_id: ModelId,
        story_ids: Vec<StoryId>,
        question_id: QuestionId,
        #[serde(default)]
        params: Map<String, Value>,
    },
    Rerun {
        prompts: Vec<RerunPrompt>,
    },
}

impl JobInput {
    /// Number of work units this input expands to
    pub fn unit_count(&self) -> usize {
        match self {
            JobInput::Standard { story_ids, .. } => story_ids.len(),
            JobInput::Rerun { prompts } => prompts.len(),
        }
    }

    pub fn is_rerun(&self) -> bool {
        matches!(self, JobInput::Rerun { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_count_follows_the_batch() {
        let standard = JobInput::Standard {
            model_id: 1,
            story_ids: vec![10, 11, 12],
            question_id: 2,
            params: Map::new(),
        };
        assert_eq!(standard.unit_count(), 3);
        assert!(!standard.is_rerun());

        let rerun = JobInput::Rerun {
            prompts: vec![RerunPrompt {
                prompt_id: 99,
                model_id: 1,
                story_id: 10,
                question_id: 2,
                params: None,
            }],
        };
        assert_eq!(rerun.unit_count(), 1);
        assert!(rerun.is_rerun());
    }
}
