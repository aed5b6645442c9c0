//! [`DebateServices`] backed by an OpenAI-compatible chat completions API.
//!
//! Every reply is parsed strictly: the JSON object is extracted from the
//! model output, deserialized into a wire struct and validated before it is
//! turned into a typed record. Anything else is a service failure.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{PromptsConfig, ServiceConfig, render_prompt};
use crate::error::DebateError;
use crate::services::{CounterArgumentRequest, DebateServices};
use crate::session::{
    AnalysisResult, Clash, ReasoningSkill, ResearchBundle, VerdictParts, VerdictResult, Winner,
};

/// Chat-completions client for all text services.
pub struct OpenAiServices {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    prompts: PromptsConfig,
}

impl OpenAiServices {
    pub fn new(
        service: &ServiceConfig,
        prompts: PromptsConfig,
        api_key: &str,
    ) -> Result<Self, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs))
            .connect_timeout(Duration::from_secs(service.connect_timeout_secs))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&service.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            model: service.model.clone(),
            max_tokens: service.max_tokens,
            prompts,
        })
    }

    /// One system + user exchange. Failures are reported against `service`
    /// and never retried here.
    async fn complete(
        &self,
        service: &'static str,
        system: String,
        user: String,
    ) -> Result<String, DebateError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(self.max_tokens)
            .messages(vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: system.into(),
                    name: None,
                }),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: user.into(),
                    name: None,
                }),
            ])
            .build()?;

        debug!(service, model = %self.model, "Sending completion request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| DebateError::service(service, e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DebateError::service(service, "empty completion"))
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        system: String,
        user: String,
    ) -> Result<T, DebateError> {
        let raw = self.complete(service, system, user).await?;
        parse_reply(service, &raw)
    }
}

#[async_trait]
impl DebateServices for OpenAiServices {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze_argument(
        &self,
        argument: &str,
        topic: &str,
    ) -> Result<AnalysisResult, DebateError> {
        let system = render_prompt(&self.prompts.analyze, &[("topic", topic)]);
        let wire: AnalysisWire = self
            .complete_json("analysis", system, format!("Argument:\n{}", argument))
            .await?;
        wire.validate()
    }

    async fn generate_counter_argument(
        &self,
        request: CounterArgumentRequest,
    ) -> Result<String, DebateError> {
        let skill = request.opponent_skill.to_string();
        let roles = roles_line(request.user_role.as_deref(), request.ai_role.as_deref());
        let system = render_prompt(
            &self.prompts.counter_argument,
            &[("topic", &request.topic), ("skill", &skill), ("roles", &roles)],
        );
        let user = format!("Debate so far:\n{}", request.formatted_transcript);
        let wire: CounterWire = self.complete_json("counter-argument", system, user).await?;

        let text = sanitize_response(&wire.counter_argument);
        if text.len() <= 10 {
            return Err(DebateError::service(
                "counter-argument",
                "opponent returned an empty rebuttal",
            ));
        }
        Ok(text)
    }

    async fn judge_debate(
        &self,
        topic: &str,
        formatted_transcript: &str,
        user_role: Option<&str>,
    ) -> Result<VerdictResult, DebateError> {
        let roles = roles_line(user_role, None);
        let system = render_prompt(&self.prompts.judge, &[("topic", topic), ("roles", &roles)]);
        let user = format!("Debate transcript (User vs. AI):\n{}", formatted_transcript);
        let wire: VerdictWire = self.complete_json("verdict", system, user).await?;
        wire.validate()
    }

    async fn research_topic(&self, topic: &str) -> Result<ResearchBundle, DebateError> {
        let system = render_prompt(&self.prompts.research, &[("topic", topic)]);
        let wire: ResearchWire = self
            .complete_json("research", system, format!("Topic: {}", topic))
            .await?;
        wire.validate()
    }

    async fn generate_argument(
        &self,
        topic: &str,
        skill: ReasoningSkill,
    ) -> Result<String, DebateError> {
        let skill = skill.to_string();
        let system = render_prompt(
            &self.prompts.generate_argument,
            &[("topic", topic), ("skill", &skill)],
        );
        let wire: ArgumentWire = self
            .complete_json("argument", system, format!("Topic: {}", topic))
            .await?;

        let argument = sanitize_response(&wire.argument);
        if argument.is_empty() {
            return Err(DebateError::service("argument", "no argument generated"));
        }
        Ok(argument)
    }

    async fn generate_poi(&self, topic: &str, draft: &str) -> Result<String, DebateError> {
        let system = render_prompt(&self.prompts.poi, &[("topic", topic)]);
        let user = format!("User's argument so far:\n\"\"\"\n{}\n\"\"\"", draft);
        let wire: PoiWire = self.complete_json("poi", system, user).await?;

        let question = sanitize_response(&wire.poi_question);
        if question.is_empty() {
            return Err(DebateError::service("poi", "empty point of information"));
        }
        Ok(question)
    }

    async fn suggest_topics(&self, category: Option<&str>) -> Result<Vec<String>, DebateError> {
        let category = category
            .map(|c| format!(" about {}", c))
            .unwrap_or_default();
        let system = render_prompt(&self.prompts.suggest_topics, &[("category", &category)]);
        let wire: TopicsWire = self
            .complete_json("topics", system, "Suggest topics.".to_string())
            .await?;

        let topics: Vec<String> = wire
            .topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(DebateError::service("topics", "no topics suggested"));
        }
        Ok(topics)
    }
}

fn roles_line(user_role: Option<&str>, ai_role: Option<&str>) -> String {
    match (user_role, ai_role) {
        (Some(user), Some(ai)) => format!("The user speaks as {}. You speak as {}.\n", user, ai),
        (Some(user), None) => format!("The user speaks as {}.\n", user),
        (None, Some(ai)) => format!("You speak as {}.\n", ai),
        (None, None) => String::new(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisWire {
    feedback: String,
    #[serde(default)]
    fallacies: Vec<String>,
    #[serde(default, alias = "persuasiveTechniques")]
    persuasion_techniques: Vec<String>,
    #[serde(default, alias = "counterpoints")]
    counter_points: Vec<String>,
}

impl AnalysisWire {
    fn validate(self) -> Result<AnalysisResult, DebateError> {
        if self.feedback.trim().is_empty() {
            return Err(DebateError::service("analysis", "missing feedback text"));
        }
        Ok(AnalysisResult {
            feedback: self.feedback.trim().to_string(),
            fallacies: clean_list(self.fallacies),
            persuasive_techniques: clean_list(self.persuasion_techniques),
            counterpoints: clean_list(self.counter_points),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterWire {
    counter_argument: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClashWire {
    clash_point: String,
    #[serde(default)]
    summary: String,
    #[serde(default, deserialize_with = "stated_winner")]
    winner: Option<Winner>,
    winner_score: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerdictWire {
    #[serde(default)]
    overall_assessment: String,
    clashes: Vec<ClashWire>,
    #[serde(default)]
    final_score: Option<f64>,
    #[serde(default, deserialize_with = "stated_winner")]
    winner: Option<Winner>,
    #[serde(default)]
    user_strengths: Vec<String>,
    #[serde(default)]
    user_weaknesses: Vec<String>,
    #[serde(default)]
    ai_strengths: Vec<String>,
    #[serde(default)]
    ai_weaknesses: Vec<String>,
    #[serde(default)]
    advice_for_user: Option<String>,
}

impl VerdictWire {
    fn validate(self) -> Result<VerdictResult, DebateError> {
        if self.clashes.is_empty() {
            return Err(DebateError::service("verdict", "jury reported no clashes"));
        }

        let mut clashes = Vec::with_capacity(self.clashes.len());
        for clash in self.clashes {
            if !clash.winner_score.is_finite() {
                return Err(DebateError::service("verdict", "non-numeric clash score"));
            }
            let score = clash.winner_score.round() as i32;
            if clash.winner.is_some_and(|w| w != Winner::from_score(score)) {
                warn!(point = %clash.clash_point, stated = ?clash.winner, score, "Clash winner disagrees with its score");
            }
            clashes.push(Clash {
                point: clash.clash_point,
                summary: clash.summary,
                winner: Winner::from_score(score),
                winner_score: score,
                reasoning: clash.reasoning,
            });
        }

        let verdict = VerdictResult::new(VerdictParts {
            overall_assessment: self.overall_assessment,
            clashes,
            user_strengths: clean_list(self.user_strengths),
            user_weaknesses: clean_list(self.user_weaknesses),
            ai_strengths: clean_list(self.ai_strengths),
            ai_weaknesses: clean_list(self.ai_weaknesses),
            advice_for_user: self.advice_for_user.filter(|a| !a.trim().is_empty()),
        });

        let stated_score = self.final_score.map(|s| s.round() as i32);
        if stated_score.is_some_and(|s| s != verdict.final_score())
            || self.winner.is_some_and(|w| w != verdict.winner())
        {
            warn!(
                ?stated_score,
                computed = verdict.final_score(),
                "Jury arithmetic disagrees with its clashes, using the clash sum"
            );
        }
        Ok(verdict)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResearchWire {
    #[serde(default)]
    pro_points: Vec<String>,
    #[serde(default)]
    con_points: Vec<String>,
    #[serde(default)]
    key_facts: Option<Vec<String>>,
}

impl ResearchWire {
    fn validate(self) -> Result<ResearchBundle, DebateError> {
        let bundle = ResearchBundle {
            pro_points: clean_list(self.pro_points),
            con_points: clean_list(self.con_points),
            key_facts: self.key_facts.map(clean_list).filter(|f| !f.is_empty()),
        };
        if bundle.pro_points.is_empty() && bundle.con_points.is_empty() {
            return Err(DebateError::service("research", "no arguments for or against"));
        }
        Ok(bundle)
    }
}

#[derive(Debug, Deserialize)]
struct ArgumentWire {
    argument: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoiWire {
    poi_question: String,
}

#[derive(Debug, Deserialize)]
struct TopicsWire {
    topics: Vec<String>,
}

/// The jury's stated winner is only compared against the recomputed one, so
/// any casing is accepted and anything unrecognised reads as unstated.
fn stated_winner<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Winner>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let label = value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());
    Ok(match label.as_deref() {
        Some("user") => Some(Winner::User),
        Some("ai") => Some(Winner::Ai),
        Some("tie") => Some(Winner::Tie),
        _ => None,
    })
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .collect()
}

/// Extract and deserialize the JSON object in a model reply.
fn parse_reply<T: DeserializeOwned>(service: &'static str, raw: &str) -> Result<T, DebateError> {
    let cleaned = strip_reasoning(raw);
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            return Err(DebateError::service(
                service,
                "response did not contain a JSON object",
            ));
        }
    };

    serde_json::from_str(json)
        .map_err(|e| DebateError::service(service, format!("invalid response: {}", e)))
}

/// Reasoning/internal tags models sometimes emit around their answer.
const REASONING_TAGS: [&str; 15] = [
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratch",
    "scratchpad",
    "plan",
    "analysis",
    "analyze",
    "consider",
    "pondering",
    "deliberation",
];

/// Remove known reasoning tags together with their content.
fn strip_reasoning(response: &str) -> String {
    let mut result = response.to_string();

    for tag in &REASONING_TAGS {
        // Match <tag>...</tag> including with attributes and newlines
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    result
}

/// Sanitize spoken text: strip reasoning tags, leftover markup, markdown
/// emphasis and redundant whitespace.
fn sanitize_response(response: &str) -> String {
    let mut result = strip_reasoning(response);

    // Also remove any remaining orphaned opening/closing tags
    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
