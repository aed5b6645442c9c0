//! Session data model: turns, critique, verdicts and the session snapshot.
//!
//! A [`DebateSession`] is a plain value. Every operation that changes it
//! returns a new snapshot, so a reader holding an older copy never sees a
//! half-applied change.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::debate_format::FormatKind;
use crate::error::ValidationError;
use crate::store::PublishReceipt;

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

impl Speaker {
    pub fn label(&self) -> &str {
        match self {
            Speaker::User => "User",
            Speaker::Ai => "AI",
        }
    }
}

/// Reasoning level the AI opponent argues at.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReasoningSkill {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl fmt::Display for ReasoningSkill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReasoningSkill::Beginner => "Beginner",
            ReasoningSkill::Intermediate => "Intermediate",
            ReasoningSkill::Advanced => "Advanced",
        })
    }
}

impl FromStr for ReasoningSkill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" => Ok(ReasoningSkill::Beginner),
            "intermediate" => Ok(ReasoningSkill::Intermediate),
            "advanced" => Ok(ReasoningSkill::Advanced),
            other => Err(format!(
                "unknown skill '{}', expected beginner, intermediate or advanced",
                other
            )),
        }
    }
}

/// Critique of a single user argument.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResult {
    pub feedback: String,
    #[serde(default)]
    pub fallacies: Vec<String>,
    #[serde(default)]
    pub persuasive_techniques: Vec<String>,
    #[serde(default)]
    pub counterpoints: Vec<String>,
}

/// Opaque handle to playable audio (a file path or URL).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AudioRef(String);

impl AudioRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateTurn {
    pub speaker: Speaker,
    pub text: String,
    /// Sole ordering key within a session.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<AudioRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl DebateTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp,
            feedback: None,
            audio_ref: None,
            role: None,
        }
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    /// `User`, `AI`, or the label suffixed with the speaking role.
    pub fn speaker_label(&self) -> String {
        match &self.role {
            Some(role) => format!("{} ({})", self.speaker.label(), role),
            None => self.speaker.label().to_string(),
        }
    }

    pub fn formatted(&self) -> String {
        format!("{}: \"{}\"", self.speaker_label(), self.text)
    }
}

/// Render turns the way every transcript-aware service expects them.
pub fn format_transcript(turns: &[DebateTurn]) -> String {
    turns
        .iter()
        .map(DebateTurn::formatted)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    User,
    Ai,
    Tie,
}

impl Winner {
    /// Positive scores favour the user, negative ones the AI.
    pub fn from_score(score: i32) -> Self {
        match score.signum() {
            1 => Winner::User,
            -1 => Winner::Ai,
            _ => Winner::Tie,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Winner::User => "User",
            Winner::Ai => "AI",
            Winner::Tie => "Tie",
        }
    }
}

pub const MAX_CLASH_SCORE: i32 = 5;

/// A single point of contention scored by the jury.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Clash {
    pub point: String,
    pub summary: String,
    pub winner: Winner,
    /// -5 (decisive AI win) to +5 (decisive user win).
    pub winner_score: i32,
    pub reasoning: String,
}

/// Everything the jury reports besides the derived score and winner.
#[derive(Debug, Clone, Default)]
pub struct VerdictParts {
    pub overall_assessment: String,
    pub clashes: Vec<Clash>,
    pub user_strengths: Vec<String>,
    pub user_weaknesses: Vec<String>,
    pub ai_strengths: Vec<String>,
    pub ai_weaknesses: Vec<String>,
    pub advice_for_user: Option<String>,
}

/// Jury verdict. The final score is always the sum of the clash scores and
/// the winner always follows its sign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerdictResult {
    overall_assessment: String,
    clashes: Vec<Clash>,
    final_score: i32,
    winner: Winner,
    user_strengths: Vec<String>,
    user_weaknesses: Vec<String>,
    ai_strengths: Vec<String>,
    ai_weaknesses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    advice_for_user: Option<String>,
}

impl VerdictResult {
    pub fn new(parts: VerdictParts) -> Self {
        let clashes: Vec<Clash> = parts
            .clashes
            .into_iter()
            .map(|mut clash| {
                clash.winner_score = clash.winner_score.clamp(-MAX_CLASH_SCORE, MAX_CLASH_SCORE);
                clash.winner = Winner::from_score(clash.winner_score);
                clash
            })
            .collect();
        let final_score = clashes.iter().map(|c| c.winner_score).sum();

        Self {
            overall_assessment: parts.overall_assessment,
            clashes,
            final_score,
            winner: Winner::from_score(final_score),
            user_strengths: parts.user_strengths,
            user_weaknesses: parts.user_weaknesses,
            ai_strengths: parts.ai_strengths,
            ai_weaknesses: parts.ai_weaknesses,
            advice_for_user: parts.advice_for_user,
        }
    }

    pub fn overall_assessment(&self) -> &str {
        &self.overall_assessment
    }

    pub fn clashes(&self) -> &[Clash] {
        &self.clashes
    }

    pub fn final_score(&self) -> i32 {
        self.final_score
    }

    pub fn winner(&self) -> Winner {
        self.winner
    }

    pub fn user_strengths(&self) -> &[String] {
        &self.user_strengths
    }

    pub fn user_weaknesses(&self) -> &[String] {
        &self.user_weaknesses
    }

    pub fn ai_strengths(&self) -> &[String] {
        &self.ai_strengths
    }

    pub fn ai_weaknesses(&self) -> &[String] {
        &self.ai_weaknesses
    }

    pub fn advice_for_user(&self) -> Option<&str> {
        self.advice_for_user.as_deref()
    }
}

/// Topic research, independent of the transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchBundle {
    pub pro_points: Vec<String>,
    pub con_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_facts: Option<Vec<String>>,
}

/// Late-arriving audio for one AI turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPatch {
    pub session_key: Uuid,
    pub timestamp: DateTime<Utc>,
    pub audio_ref: AudioRef,
}

/// A debate session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateSession {
    /// Assigned by the store on first save, never changed afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// In-memory identity, minted whenever a new debate starts.
    #[serde(default = "Uuid::new_v4")]
    pub session_key: Uuid,
    pub topic: String,
    #[serde(default)]
    pub reasoning_skill: ReasoningSkill,
    #[serde(default)]
    pub format: FormatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_role: Option<String>,
    #[serde(default)]
    pub debate_log: Vec<DebateTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_bundle: Option<ResearchBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictResult>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_time_used_secs: Option<u64>,
}

impl DebateSession {
    pub fn new(topic: impl Into<String>, reasoning_skill: ReasoningSkill) -> Self {
        Self {
            id: None,
            session_key: Uuid::new_v4(),
            topic: topic.into(),
            reasoning_skill,
            format: FormatKind::default(),
            current_role: None,
            debate_log: Vec::new(),
            research_bundle: None,
            verdict: None,
            updated_at: Utc::now(),
            share_id: None,
            public_url: None,
            prep_time_used_secs: None,
        }
    }

    pub fn with_format(mut self, format: FormatKind) -> Self {
        self.format = format;
        self
    }

    /// Set the role the user speaks as. The role must exist in the session's
    /// format when that format models roles.
    pub fn with_role(mut self, role: impl Into<String>) -> Result<Self, ValidationError> {
        let role = role.into();
        let format = self.format.format();
        if format.roles().is_empty() {
            self.current_role = Some(role);
            return Ok(self);
        }
        match format.role(&role) {
            Some(known) => {
                self.current_role = Some(known.name.to_string());
                Ok(self)
            }
            None => Err(ValidationError::UnknownRole {
                format: format.name().to_string(),
                role,
            }),
        }
    }

    /// Start over on a new topic. Everything tied to the previous debate is
    /// dropped and the session gets a fresh identity, so late results for the
    /// old topic are recognised as stale.
    pub fn change_topic(&self, topic: impl Into<String>) -> Self {
        Self::new(topic, self.reasoning_skill).with_format(self.format)
    }

    pub fn is_same_session(&self, other: &DebateSession) -> bool {
        self.session_key == other.session_key
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.debate_log.last().map(|t| t.timestamp)
    }

    /// A timestamp at `now`, or just after the last turn when the clock has
    /// not moved past it.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_timestamp() {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        }
    }

    pub fn turn_at(&self, timestamp: DateTime<Utc>) -> Option<&DebateTurn> {
        self.debate_log.iter().find(|t| t.timestamp == timestamp)
    }

    pub fn formatted_transcript(&self) -> String {
        format_transcript(&self.debate_log)
    }

    /// The role the AI answers with, derived from the user's role.
    pub fn opponent_role(&self) -> Option<String> {
        let role = self.current_role.as_deref()?;
        self.format.format().opponent_role(role).map(str::to_string)
    }

    /// Whether timestamps strictly increase across the transcript.
    pub fn is_well_ordered(&self) -> bool {
        self.debate_log
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp)
    }

    pub(crate) fn with_turn(&self, turn: DebateTurn) -> Self {
        let mut next = self.clone();
        next.debate_log.push(turn);
        next
    }

    /// Patch the AI turn the audio was produced for. Returns `None` when the
    /// patch belongs to another session or the turn no longer exists.
    pub fn apply_audio_patch(&self, patch: &AudioPatch) -> Option<Self> {
        if patch.session_key != self.session_key {
            return None;
        }
        self.turn_at(patch.timestamp)?;

        let mut next = self.clone();
        next.debate_log = self
            .debate_log
            .iter()
            .map(|turn| {
                if turn.timestamp == patch.timestamp {
                    DebateTurn {
                        audio_ref: Some(patch.audio_ref.clone()),
                        ..turn.clone()
                    }
                } else {
                    turn.clone()
                }
            })
            .collect();
        Some(next)
    }

    pub fn with_research(&self, bundle: ResearchBundle) -> Self {
        let mut next = self.clone();
        next.research_bundle = Some(bundle);
        next
    }

    pub fn with_prep_time_used(&self, secs: u64) -> Self {
        let mut next = self.clone();
        next.prep_time_used_secs = Some(secs);
        next
    }

    pub fn with_verdict(&self, verdict: VerdictResult) -> Self {
        let mut next = self.clone();
        next.verdict = Some(verdict);
        next
    }

    pub fn mark_published(&self, receipt: &PublishReceipt) -> Self {
        let mut next = self.clone();
        next.share_id = Some(receipt.share_id.clone());
        next.public_url = Some(receipt.public_url.clone());
        next
    }

    pub fn is_published(&self) -> bool {
        self.share_id.is_some()
    }
}
