//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::debate_format::{Bench, FormatKind};
use crate::error::DebateError;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub service: ServiceConfig,
    pub voices: VoicesConfig,
    pub storage: StorageConfig,
    pub prompts: PromptsConfig,
}

/// Rules the orchestrator and the store enforce.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Turns required before a jury verdict can be requested.
    pub min_turns_for_jury: usize,
    /// Draft length (in characters) required before a POI can be requested.
    pub min_chars_for_poi: usize,
    /// Origin public share links are built on.
    pub share_origin: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_turns_for_jury: 4,
            min_chars_for_poi: 150,
            share_origin: "http://localhost:9002".to_string(),
        }
    }
}

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 900,
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
        }
    }
}

/// Voice configuration for TTS.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    pub opponent_voice: String,
    pub government_voice: String,
    pub opposition_voice: String,
    pub announcer_voice: String,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            opponent_voice: "bm_george".to_string(),
            government_voice: "bf_emma".to_string(),
            opposition_voice: "bm_george".to_string(),
            announcer_voice: "af_sky".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".argumentace"),
        }
    }
}

impl StorageConfig {
    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join("audio")
    }
}

/// System prompt templates. Placeholders are written as `{name}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub analyze: String,
    pub counter_argument: String,
    pub judge: String,
    pub research: String,
    pub generate_argument: String,
    pub poi: String,
    pub suggest_topics: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            analyze: DEFAULT_ANALYZE_PROMPT.to_string(),
            counter_argument: DEFAULT_COUNTER_PROMPT.to_string(),
            judge: DEFAULT_JUDGE_PROMPT.to_string(),
            research: DEFAULT_RESEARCH_PROMPT.to_string(),
            generate_argument: DEFAULT_ARGUMENT_PROMPT.to_string(),
            poi: DEFAULT_POI_PROMPT.to_string(),
            suggest_topics: DEFAULT_SUGGEST_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DebateError> {
        if self.engine.min_turns_for_jury < 2 {
            return Err(DebateError::ConfigError(
                "engine.min_turns_for_jury must be at least 2".to_string(),
            ));
        }
        if self.service.model.trim().is_empty() {
            return Err(DebateError::ConfigError(
                "service.model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Voice for the AI opponent speaking in `role` under `format`.
    pub fn voice_for_role(&self, format: FormatKind, role: Option<&str>) -> &str {
        let bench = role.and_then(|r| format.format().role(r).map(|known| known.bench));
        match bench {
            Some(Bench::Government) => &self.voices.government_voice,
            Some(Bench::Opposition) => &self.voices.opposition_voice,
            None => &self.voices.opponent_voice,
        }
    }
}

/// Replace `{key}` placeholders in a prompt template.
pub fn render_prompt(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_ANALYZE_PROMPT: &str = r#"You are an expert debate coach providing real-time feedback on arguments.

DEBATE TOPIC: {topic}

Analyze the user's argument. Identify logical fallacies, persuasion techniques used, and counterpoints the user should anticipate.

Respond with a single JSON object and nothing else:
{"feedback": string, "fallacies": [string], "persuasionTechniques": [string], "counterPoints": [string]}
"#;

const DEFAULT_COUNTER_PROMPT: &str = r#"You are an AI debate opponent with a {skill} skill level.

DEBATE TOPIC: {topic}
{roles}
Provide a strong, relevant, well-reasoned counter-argument to the user's latest point. Address their points directly where possible.

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words, no stage directions or markdown
- Respond with a single JSON object and nothing else: {"counterArgument": string}
"#;

const DEFAULT_JUDGE_PROMPT: &str = r#"You are an impartial, experienced debate judging panel.

DEBATE TOPIC: {topic}
{roles}
1. Identify the 2-4 main clashes where both sides engaged.
2. For each clash summarize it, pick a winner (user, ai or tie) and score it from -5 (decisive AI win) to +5 (decisive user win).
3. List 2-3 strengths and weaknesses for each side and one piece of advice for the user.

Respond with a single JSON object and nothing else:
{"overallAssessment": string, "clashes": [{"clashPoint": string, "summary": string, "winner": "user"|"ai"|"tie", "winnerScore": number, "reasoning": string}], "finalScore": number, "winner": "user"|"ai"|"tie", "userStrengths": [string], "userWeaknesses": [string], "aiStrengths": [string], "aiWeaknesses": [string], "adviceForUser": string}
"#;

const DEFAULT_RESEARCH_PROMPT: &str = r#"You are a research assistant preparing a case file for a debater.

DEBATE TOPIC: {topic}

Give 2-3 arguments for the motion, 2-3 against it, and 1-2 verifiable key facts.

Respond with a single JSON object and nothing else:
{"proPoints": [string], "conPoints": [string], "keyFacts": [string]}
"#;

const DEFAULT_ARGUMENT_PROMPT: &str = r#"You are an expert debater skilled at constructing arguments.

DEBATE TOPIC: {topic}

Write one well-reasoned opening argument on this topic, pitched at a {skill} reasoning level. Use plain spoken prose without markdown.

Respond with a single JSON object and nothing else: {"argument": string}
"#;

const DEFAULT_POI_PROMPT: &str = r#"You are an AI opponent in a parliamentary-style debate.

DEBATE TOPIC: {topic}

The user is mid-speech. Interrupt with a Point of Information: one short, sharp question (under 15 words) that challenges a point they just made.

Respond with a single JSON object and nothing else: {"poiQuestion": string}
"#;

const DEFAULT_SUGGEST_PROMPT: &str = r#"Suggest 3-5 balanced, debatable motions{category}.

Respond with a single JSON object and nothing else: {"topics": [string]}
"#;
