//! Boundaries to the external analysis, generation and speech services.
//!
//! Implementations validate whatever the backend returns and hand back typed
//! records, or fail with [`DebateError::Service`].

use async_trait::async_trait;

use crate::error::DebateError;
use crate::session::{AnalysisResult, AudioRef, ReasoningSkill, ResearchBundle, VerdictResult};

/// Everything the opponent needs to answer the latest user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterArgumentRequest {
    pub topic: String,
    /// Transcript including the turn being answered.
    pub formatted_transcript: String,
    pub opponent_skill: ReasoningSkill,
    pub user_role: Option<String>,
    pub ai_role: Option<String>,
}

/// Text services backing a debate.
#[async_trait]
pub trait DebateServices: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Critique a user argument.
    async fn analyze_argument(
        &self,
        argument: &str,
        topic: &str,
    ) -> Result<AnalysisResult, DebateError>;

    /// Produce the opponent's rebuttal text.
    async fn generate_counter_argument(
        &self,
        request: CounterArgumentRequest,
    ) -> Result<String, DebateError>;

    async fn judge_debate(
        &self,
        topic: &str,
        formatted_transcript: &str,
        user_role: Option<&str>,
    ) -> Result<VerdictResult, DebateError>;

    async fn research_topic(&self, topic: &str) -> Result<ResearchBundle, DebateError>;

    /// A ready-made argument the user can start from.
    async fn generate_argument(
        &self,
        topic: &str,
        skill: ReasoningSkill,
    ) -> Result<String, DebateError>;

    /// A short interjecting question aimed at an in-progress draft.
    async fn generate_poi(&self, topic: &str, draft: &str) -> Result<String, DebateError>;

    async fn suggest_topics(&self, category: Option<&str>) -> Result<Vec<String>, DebateError>;
}

/// Text-to-speech backend. Failures are tolerated by callers.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<AudioRef, DebateError>;
}

