//! Turn orchestration.
//!
//! Takes a user argument, fires the analysis and counter-argument calls
//! together, commits both resulting turns as one new session snapshot and
//! hands speech synthesis for the AI turn off to a background task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::debate_format::poi_window;
use crate::error::{DebateError, ValidationError};
use crate::services::{CounterArgumentRequest, DebateServices, SpeechSynthesizer};
use crate::session::{AudioPatch, DebateSession, DebateTurn, Speaker, Winner};
use crate::store::{PublishReceipt, SavedSession, SessionStore};
use crate::timer::ClockTimer;

/// Callback for debate events.
pub type DebateCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

/// Events emitted while a debate progresses.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// The user turn was appended optimistically, services are running.
    TurnSubmitted(DebateSession),
    /// Both service calls succeeded and the AI turn was appended.
    TurnCommitted(DebateSession),
    /// A service call failed and the optimistic turn was discarded.
    TurnRolledBack { session_key: Uuid, error: String },
    /// Audio for an AI turn is ready to be patched in.
    AudioReady(AudioPatch),
    VerdictReady {
        session_key: Uuid,
        final_score: i32,
        winner: Winner,
    },
}

/// Result of a committed turn.
pub struct TurnOutcome {
    /// Snapshot holding the user turn (with feedback) and the AI rebuttal.
    pub session: DebateSession,
    /// Audio for the AI turn, resolved in the background.
    pub audio: PendingAudio,
}

/// Handle to an in-progress speech synthesis for one AI turn.
pub struct PendingAudio {
    handle: Option<JoinHandle<Option<AudioPatch>>>,
}

impl PendingAudio {
    /// A handle that resolves to nothing, used when audio is switched off.
    pub fn none() -> Self {
        Self { handle: None }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the patch. `None` when synthesis failed or audio is off.
    pub async fn resolve(self) -> Option<AudioPatch> {
        let handle = self.handle?;
        match handle.await {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "Speech task did not complete");
                None
            }
        }
    }
}

/// A point of information aimed at an in-progress draft. Advisory only, it
/// never enters the transcript by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointOfInformation {
    pub question: String,
}

impl PointOfInformation {
    /// Append the question and the user's answer to a draft.
    pub fn fold_into(&self, draft: &str, response: &str) -> String {
        format!(
            "{}\n\n[POI: \"{}\"]\n[POI Response]: {}",
            draft.trim_end(),
            self.question,
            response.trim()
        )
    }
}

/// Sequences service calls per turn and enforces one mutation at a time per
/// session.
pub struct TurnOrchestrator {
    services: Arc<dyn DebateServices>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    store: Option<Arc<SessionStore>>,
    config: Config,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<Uuid>>,
    callback: Option<Arc<dyn Fn(DebateEvent) + Send + Sync>>,
}

/// Releases the session's slot in the in-flight set when dropped.
struct InFlightGuard<'a> {
    keys: &'a Mutex<HashSet<Uuid>>,
    key: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

impl TurnOrchestrator {
    pub fn new(services: Arc<dyn DebateServices>, config: Config) -> Self {
        Self {
            services,
            speech: None,
            store: None,
            config,
            clock: Arc::new(SystemClock),
            in_flight: Mutex::new(HashSet::new()),
            callback: None,
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set a callback for debate events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.callback = Some(Arc::from(callback));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a turn, verdict or save is running for this session.
    pub fn is_busy(&self, session_key: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&session_key)
    }

    fn acquire(&self, session_key: Uuid) -> Result<InFlightGuard<'_>, ValidationError> {
        let mut keys = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(session_key) {
            return Err(ValidationError::TurnInFlight);
        }
        Ok(InFlightGuard {
            keys: &self.in_flight,
            key: session_key,
        })
    }

    fn emit(&self, event: DebateEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }

    /// Submit a user argument and get back the snapshot with both new turns.
    ///
    /// On any service failure the caller's snapshot is the state to keep:
    /// nothing from the attempt is committed and nothing is retried.
    pub async fn submit_turn(
        &self,
        session: &DebateSession,
        user_text: &str,
    ) -> Result<TurnOutcome, DebateError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyArgument.into());
        }
        if session.topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        let _guard = self.acquire(session.session_key)?;

        let user_ts = session.next_timestamp(self.clock.now());
        let user_turn = DebateTurn::new(Speaker::User, text, user_ts)
            .with_role(session.current_role.clone());
        let optimistic = session.with_turn(user_turn);
        self.emit(DebateEvent::TurnSubmitted(optimistic.clone()));

        let ai_role = optimistic.opponent_role();
        let request = CounterArgumentRequest {
            topic: session.topic.clone(),
            formatted_transcript: optimistic.formatted_transcript(),
            opponent_skill: session.reasoning_skill,
            user_role: session.current_role.clone(),
            ai_role: ai_role.clone(),
        };

        info!(
            session = %session.session_key,
            turns = optimistic.debate_log.len(),
            services = self.services.name(),
            "Submitting turn"
        );
        let (analysis, rebuttal) = match tokio::try_join!(
            self.services.analyze_argument(text, &session.topic),
            self.services.generate_counter_argument(request),
        ) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(session = %session.session_key, error = %e, "Turn rolled back");
                self.emit(DebateEvent::TurnRolledBack {
                    session_key: session.session_key,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut committed = optimistic;
        if let Some(turn) = committed
            .debate_log
            .iter_mut()
            .find(|t| t.timestamp == user_ts)
        {
            turn.feedback = Some(analysis);
        }

        let ai_ts = committed.next_timestamp(self.clock.now());
        let ai_turn =
            DebateTurn::new(Speaker::Ai, rebuttal.clone(), ai_ts).with_role(ai_role.clone());
        let mut committed = committed.with_turn(ai_turn);
        committed.verdict = None;

        info!(
            session = %committed.session_key,
            turns = committed.debate_log.len(),
            "Turn committed"
        );
        self.emit(DebateEvent::TurnCommitted(committed.clone()));

        let voice = self
            .config
            .voice_for_role(committed.format, ai_role.as_deref())
            .to_string();
        let audio = self.spawn_speech(committed.session_key, ai_ts, rebuttal, voice);

        Ok(TurnOutcome {
            session: committed,
            audio,
        })
    }

    fn spawn_speech(
        &self,
        session_key: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
        text: String,
        voice: String,
    ) -> PendingAudio {
        let Some(speech) = self.speech.clone() else {
            return PendingAudio::none();
        };
        let callback = self.callback.clone();

        let handle = tokio::spawn(async move {
            match speech.synthesize(&text, Some(&voice)).await {
                Ok(audio_ref) => {
                    debug!(session = %session_key, audio = %audio_ref, "Audio ready");
                    let patch = AudioPatch {
                        session_key,
                        timestamp,
                        audio_ref,
                    };
                    if let Some(ref callback) = callback {
                        callback(DebateEvent::AudioReady(patch.clone()));
                    }
                    Some(patch)
                }
                Err(e) => {
                    warn!(session = %session_key, error = %e, "Speech synthesis failed, turn keeps no audio");
                    None
                }
            }
        });

        PendingAudio {
            handle: Some(handle),
        }
    }

    /// Ask the jury for a verdict on the current transcript.
    pub async fn request_verdict(
        &self,
        session: &DebateSession,
    ) -> Result<DebateSession, DebateError> {
        let required = self.config.engine.min_turns_for_jury;
        let actual = session.debate_log.len();
        if actual < required {
            return Err(ValidationError::NotEnoughTurns { required, actual }.into());
        }
        let _guard = self.acquire(session.session_key)?;

        let verdict = self
            .services
            .judge_debate(
                &session.topic,
                &session.formatted_transcript(),
                session.current_role.as_deref(),
            )
            .await?;

        info!(
            session = %session.session_key,
            final_score = verdict.final_score(),
            winner = verdict.winner().label(),
            "Verdict received"
        );
        self.emit(DebateEvent::VerdictReady {
            session_key: session.session_key,
            final_score: verdict.final_score(),
            winner: verdict.winner(),
        });
        Ok(session.with_verdict(verdict))
    }

    /// Generate a point of information against a draft the user is writing.
    ///
    /// `speech_elapsed_secs` is how long the current speech has run. In
    /// formats with timed speeches the request is refused outside the POI
    /// window.
    pub async fn request_point_of_information(
        &self,
        session: &DebateSession,
        draft: &str,
        speech_elapsed_secs: Option<u64>,
    ) -> Result<PointOfInformation, DebateError> {
        let timed = session.format.format().timed_speeches();
        if let Some(elapsed_secs) = speech_elapsed_secs.filter(|_| timed) {
            if !poi_window(elapsed_secs).is_open() {
                return Err(ValidationError::PoiWindowClosed { elapsed_secs }.into());
            }
        }
        let required = self.config.engine.min_chars_for_poi;
        let actual = draft.trim().chars().count();
        if actual < required {
            return Err(ValidationError::DraftTooShort { required, actual }.into());
        }
        if session.topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }

        let question = self.services.generate_poi(&session.topic, draft).await?;
        Ok(PointOfInformation { question })
    }

    /// Countdown for the format's preparation phase, `None` when the format
    /// has none.
    pub fn preparation_timer(&self, session: &DebateSession) -> Option<ClockTimer> {
        let secs = session.format.format().prep_secs();
        (secs > 0).then(|| ClockTimer::new(secs, self.clock.clone()))
    }

    /// Stop the preparation countdown and record how much of it was used.
    pub fn finish_preparation(
        &self,
        session: &DebateSession,
        timer: &mut ClockTimer,
    ) -> DebateSession {
        timer.pause();
        let used = timer.time_used_secs();
        info!(session = %session.session_key, used, "Preparation finished");
        session.with_prep_time_used(used)
    }

    /// Draft an argument for the user at the session's reasoning level. The
    /// session is left untouched; the caller decides whether to submit it.
    pub async fn suggest_argument(&self, session: &DebateSession) -> Result<String, DebateError> {
        if session.topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        self.services
            .generate_argument(&session.topic, session.reasoning_skill)
            .await
    }

    pub async fn research_topic(
        &self,
        session: &DebateSession,
    ) -> Result<DebateSession, DebateError> {
        if session.topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        let bundle = self.services.research_topic(&session.topic).await?;
        debug!(
            pro = bundle.pro_points.len(),
            con = bundle.con_points.len(),
            "Research attached"
        );
        Ok(session.with_research(bundle))
    }

    pub async fn suggest_topics(&self, category: Option<&str>) -> Result<Vec<String>, DebateError> {
        self.services.suggest_topics(category).await
    }

    fn store(&self) -> Result<&Arc<SessionStore>, DebateError> {
        self.store
            .as_ref()
            .ok_or_else(|| DebateError::ConfigError("no session store configured".to_string()))
    }

    /// Save through the store. Rejected while the session has a turn in flight.
    pub async fn save_session(&self, session: &DebateSession) -> Result<SavedSession, DebateError> {
        let store = self.store()?;
        let _guard = self.acquire(session.session_key)?;
        store.save(session).await
    }

    /// Publish once and return the caller's snapshot with the share fields set.
    pub async fn publish_session(
        &self,
        session: &DebateSession,
    ) -> Result<(DebateSession, PublishReceipt), DebateError> {
        let receipt = self.store()?.publish(session).await?;
        Ok((session.mark_published(&receipt), receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::debate_format::FormatKind;
    use crate::session::{
        AnalysisResult, AudioRef, Clash, ReasoningSkill, ResearchBundle, VerdictParts,
        VerdictResult,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, watch};

    #[derive(Default)]
    struct ScriptedServices {
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
        counter_gate: Option<Arc<Notify>>,
        fail_analysis: bool,
        fail_counter: bool,
        fail_research: bool,
        clash_scores: Vec<i32>,
    }

    impl ScriptedServices {
        async fn enter(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }

        fn leave(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DebateServices for ScriptedServices {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn analyze_argument(
            &self,
            argument: &str,
            _topic: &str,
        ) -> Result<AnalysisResult, DebateError> {
            self.enter().await;
            self.leave();
            if self.fail_analysis {
                return Err(DebateError::service("analysis", "scripted failure"));
            }
            Ok(AnalysisResult {
                feedback: format!("Feedback on: {}", argument),
                ..Default::default()
            })
        }

        async fn generate_counter_argument(
            &self,
            request: CounterArgumentRequest,
        ) -> Result<String, DebateError> {
            self.enter().await;
            if let Some(ref gate) = self.counter_gate {
                gate.notified().await;
            }
            self.leave();
            if self.fail_counter {
                return Err(DebateError::service("counter-argument", "scripted failure"));
            }
            let turns = request.formatted_transcript.split("\n\n").count();
            Ok(format!("Rebuttal to turn {}", turns))
        }

        async fn judge_debate(
            &self,
            _topic: &str,
            _formatted_transcript: &str,
            _user_role: Option<&str>,
        ) -> Result<VerdictResult, DebateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let clashes = self
                .clash_scores
                .iter()
                .map(|&score| Clash {
                    point: format!("Clash {}", score),
                    summary: String::new(),
                    winner: Winner::from_score(score),
                    winner_score: score,
                    reasoning: String::new(),
                })
                .collect();
            Ok(VerdictResult::new(VerdictParts {
                clashes,
                ..Default::default()
            }))
        }

        async fn research_topic(&self, _topic: &str) -> Result<ResearchBundle, DebateError> {
            if self.fail_research {
                return Err(DebateError::service("research", "scripted failure"));
            }
            Ok(ResearchBundle {
                pro_points: vec!["Pro".to_string()],
                con_points: vec!["Con".to_string()],
                key_facts: None,
            })
        }

        async fn generate_argument(
            &self,
            topic: &str,
            skill: ReasoningSkill,
        ) -> Result<String, DebateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("A {} case on {}", skill, topic))
        }

        async fn generate_poi(&self, _topic: &str, _draft: &str) -> Result<String, DebateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("Isn't that unfunded?".to_string())
        }

        async fn suggest_topics(&self, _category: Option<&str>) -> Result<Vec<String>, DebateError> {
            Ok(vec!["Ban homework".to_string()])
        }
    }

    /// Speech that waits until the gate opens.
    struct GatedSpeech {
        open: watch::Receiver<bool>,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for GatedSpeech {
        async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<AudioRef, DebateError> {
            let mut open = self.open.clone();
            let opened = open.wait_for(|o| *o).await.is_ok();
            if self.fail || !opened {
                return Err(DebateError::TtsError("scripted failure".to_string()));
            }
            Ok(AudioRef::new(format!("audio/{}.wav", text)))
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn orchestrator(services: ScriptedServices) -> TurnOrchestrator {
        TurnOrchestrator::new(Arc::new(services), Config::default())
            .with_clock(Arc::new(ManualClock::new(start())))
    }

    fn session() -> DebateSession {
        DebateSession::new("Homework should be banned", ReasoningSkill::Advanced)
    }

    fn with_turns(count: usize) -> DebateSession {
        let mut s = session();
        for i in 0..count {
            let speaker = if i % 2 == 0 { Speaker::User } else { Speaker::Ai };
            let ts = start() + chrono::Duration::seconds(i as i64);
            s = s.with_turn(DebateTurn::new(speaker, format!("Turn {}", i), ts));
        }
        s
    }

    #[tokio::test]
    async fn test_submit_turn_appends_user_then_ai() {
        let orch = orchestrator(ScriptedServices::default());
        let before = session()
            .with_format(FormatKind::AsianParliamentary)
            .with_role("prime minister")
            .unwrap();

        let outcome = orch.submit_turn(&before, "  Homework burns kids out.  ").await.unwrap();
        let after = outcome.session;

        assert!(before.debate_log.is_empty());
        assert_eq!(after.debate_log.len(), 2);
        assert!(after.is_well_ordered());

        let user = &after.debate_log[0];
        assert_eq!(user.speaker, Speaker::User);
        assert_eq!(user.text, "Homework burns kids out.");
        assert_eq!(user.role.as_deref(), Some("Prime Minister"));
        assert_eq!(
            user.feedback.as_ref().map(|f| f.feedback.as_str()),
            Some("Feedback on: Homework burns kids out.")
        );

        let ai = &after.debate_log[1];
        assert_eq!(ai.speaker, Speaker::Ai);
        assert_eq!(ai.text, "Rebuttal to turn 1");
        assert_eq!(ai.role.as_deref(), Some("Leader of Opposition"));
        assert!(ai.feedback.is_none());
        assert!(outcome.audio.resolve().await.is_none());
    }

    #[tokio::test]
    async fn test_analysis_and_counter_run_concurrently() {
        let services = Arc::new(ScriptedServices::default());
        let orch = TurnOrchestrator::new(services.clone(), Config::default());

        orch.submit_turn(&session(), "First point").await.unwrap();
        assert_eq!(services.max_active.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_call_rolls_back() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let orch = orchestrator(ScriptedServices {
            fail_counter: true,
            ..Default::default()
        })
        .with_callback(Box::new(move |event| {
            let name = match event {
                DebateEvent::TurnSubmitted(_) => "submitted",
                DebateEvent::TurnCommitted(_) => "committed",
                DebateEvent::TurnRolledBack { .. } => "rolled back",
                DebateEvent::AudioReady(_) => "audio",
                DebateEvent::VerdictReady { .. } => "verdict",
            };
            sink.lock().unwrap().push(name);
        }));

        let before = with_turns(2);
        let err = orch.submit_turn(&before, "Another point").await.err().unwrap();
        assert!(matches!(err, DebateError::Service { service: "counter-argument", .. }));

        assert_eq!(before.debate_log.len(), 2);
        assert_eq!(before.last_timestamp(), Some(start() + chrono::Duration::seconds(1)));
        assert_eq!(*events.lock().unwrap(), vec!["submitted", "rolled back"]);
        assert!(!orch.is_busy(before.session_key));
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_call() {
        let services = Arc::new(ScriptedServices::default());
        let orch = TurnOrchestrator::new(services.clone(), Config::default());

        let err = orch.submit_turn(&session(), "   ").await.err().unwrap();
        assert!(matches!(err, DebateError::Validation(ValidationError::EmptyArgument)));

        let untitled = DebateSession::new(" ", ReasoningSkill::Beginner);
        let err = orch.submit_turn(&untitled, "Point").await.err().unwrap();
        assert!(matches!(err, DebateError::Validation(ValidationError::EmptyTopic)));

        assert_eq!(services.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_mutation_rejected_while_turn_in_flight() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(SessionStore::new(Arc::new(MemoryStore::new()), "http://localhost"));
        let orch = Arc::new(
            orchestrator(ScriptedServices {
                counter_gate: Some(gate.clone()),
                ..Default::default()
            })
            .with_store(store),
        );
        let current = with_turns(4);

        let first = {
            let orch = orch.clone();
            let current = current.clone();
            tokio::spawn(async move { orch.submit_turn(&current, "First").await })
        };
        while !orch.is_busy(current.session_key) {
            tokio::task::yield_now().await;
        }

        let busy = |r: Result<(), DebateError>| {
            matches!(r, Err(DebateError::Validation(ValidationError::TurnInFlight)))
        };
        assert!(busy(orch.submit_turn(&current, "Second").await.map(|_| ())));
        assert!(busy(orch.request_verdict(&current).await.map(|_| ())));
        assert!(busy(orch.save_session(&current).await.map(|_| ())));

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.session.debate_log.len(), 6);
        assert!(!orch.is_busy(current.session_key));
    }

    #[tokio::test]
    async fn test_late_audio_lands_on_its_turn() {
        let (open, gate) = watch::channel(false);
        let orch = orchestrator(ScriptedServices::default()).with_speech(Arc::new(GatedSpeech {
            open: gate,
            fail: false,
        }));

        let first = orch.submit_turn(&session(), "One").await.unwrap();
        let first_ai_ts = first.session.debate_log[1].timestamp;
        let second = orch.submit_turn(&first.session, "Two").await.unwrap();
        assert!(!first.audio.is_finished());

        open.send(true).unwrap();
        let late = first.audio.resolve().await.unwrap();
        let patched = second.session.apply_audio_patch(&late).unwrap();

        assert_eq!(patched.debate_log.len(), 4);
        let target = patched.turn_at(first_ai_ts).unwrap();
        assert_eq!(
            target.audio_ref.as_ref().map(AudioRef::as_str),
            Some("audio/Rebuttal to turn 1.wav")
        );
        assert!(patched.debate_log[3].audio_ref.is_none());

        let own = second.audio.resolve().await.unwrap();
        let patched = patched.apply_audio_patch(&own).unwrap();
        assert_eq!(
            patched.debate_log[3].audio_ref.as_ref().map(AudioRef::as_str),
            Some("audio/Rebuttal to turn 3.wav")
        );
    }

    #[tokio::test]
    async fn test_audio_after_topic_change_is_discarded() {
        let (open, gate) = watch::channel(true);
        let orch = orchestrator(ScriptedServices::default()).with_speech(Arc::new(GatedSpeech {
            open: gate,
            fail: false,
        }));

        let outcome = orch.submit_turn(&session(), "One").await.unwrap();
        let fresh = outcome.session.change_topic("School uniforms");
        let patch = outcome.audio.resolve().await.unwrap();

        assert!(fresh.apply_audio_patch(&patch).is_none());
        drop(open);
    }

    #[tokio::test]
    async fn test_speech_failure_leaves_turn_without_audio() {
        let (_open, gate) = watch::channel(true);
        let orch = orchestrator(ScriptedServices::default()).with_speech(Arc::new(GatedSpeech {
            open: gate,
            fail: true,
        }));

        let outcome = orch.submit_turn(&session(), "One").await.unwrap();
        assert_eq!(outcome.session.debate_log.len(), 2);
        assert!(outcome.audio.resolve().await.is_none());
        assert!(outcome.session.debate_log[1].audio_ref.is_none());
    }

    #[tokio::test]
    async fn test_verdict_needs_four_turns() {
        let orch = orchestrator(ScriptedServices {
            clash_scores: vec![3, -1, 2],
            ..Default::default()
        });

        let err = orch.request_verdict(&with_turns(3)).await.err().unwrap();
        assert!(matches!(
            err,
            DebateError::Validation(ValidationError::NotEnoughTurns { required: 4, actual: 3 })
        ));

        let judged = orch.request_verdict(&with_turns(4)).await.unwrap();
        let verdict = judged.verdict.unwrap();
        let sum: i32 = verdict.clashes().iter().map(|c| c.winner_score).sum();
        assert_eq!(verdict.final_score(), sum);
        assert_eq!(verdict.final_score(), 4);
        assert_eq!(verdict.winner(), Winner::User);
    }

    #[tokio::test]
    async fn test_new_turn_clears_verdict() {
        let orch = orchestrator(ScriptedServices {
            clash_scores: vec![-2],
            ..Default::default()
        });
        let judged = orch.request_verdict(&with_turns(4)).await.unwrap();
        assert!(judged.verdict.is_some());

        let outcome = orch.submit_turn(&judged, "One more thing").await.unwrap();
        assert!(outcome.session.verdict.is_none());
        assert_eq!(outcome.session.debate_log.len(), 6);
        assert!(outcome.session.is_well_ordered());
    }

    #[tokio::test]
    async fn test_point_of_information() {
        let orch = orchestrator(ScriptedServices::default());

        let short = "x".repeat(149);
        let err = orch.request_point_of_information(&session(), &short, None).await.err().unwrap();
        assert!(matches!(
            err,
            DebateError::Validation(ValidationError::DraftTooShort { required: 150, actual: 149 })
        ));

        let draft = "y".repeat(150);
        let poi = orch.request_point_of_information(&session(), &draft, None).await.unwrap();
        assert_eq!(
            poi.fold_into("My draft.", "It is funded by the state."),
            "My draft.\n\n[POI: \"Isn't that unfunded?\"]\n[POI Response]: It is funded by the state."
        );
    }

    #[tokio::test]
    async fn test_point_of_information_respects_protected_minutes() {
        let services = Arc::new(ScriptedServices::default());
        let orch = TurnOrchestrator::new(services.clone(), Config::default());
        let draft = "y".repeat(150);
        let timed = session().with_format(FormatKind::AsianParliamentary);

        for elapsed in [0, 59, 361, 420] {
            let err = orch
                .request_point_of_information(&timed, &draft, Some(elapsed))
                .await
                .err()
                .unwrap();
            assert!(matches!(
                err,
                DebateError::Validation(ValidationError::PoiWindowClosed { elapsed_secs }) if elapsed_secs == elapsed
            ));
        }
        assert_eq!(services.calls.load(Ordering::SeqCst), 0);

        for elapsed in [60, 200, 360] {
            assert!(orch
                .request_point_of_information(&timed, &draft, Some(elapsed))
                .await
                .is_ok());
        }

        // Free-form debates have no protected minutes.
        assert!(orch
            .request_point_of_information(&session(), &draft, Some(5))
            .await
            .is_ok());
    }

    #[test]
    fn test_preparation_time_is_recorded() {
        let clock = Arc::new(ManualClock::new(start()));
        let orch = TurnOrchestrator::new(Arc::new(ScriptedServices::default()), Config::default())
            .with_clock(clock.clone());

        assert!(orch.preparation_timer(&session()).is_none());

        let ap = session().with_format(FormatKind::AsianParliamentary);
        let mut timer = orch.preparation_timer(&ap).unwrap();
        assert_eq!(timer.total_secs(), 900);
        timer.start();
        clock.advance_secs(250);
        let prepared = orch.finish_preparation(&ap, &mut timer);
        assert_eq!(prepared.prep_time_used_secs, Some(250));
        assert!(ap.prep_time_used_secs.is_none());

        // The paused countdown no longer moves.
        clock.advance_secs(100);
        assert_eq!(timer.time_used_secs(), 250);
    }

    #[tokio::test]
    async fn test_research_attaches_or_keeps_state() {
        let orch = orchestrator(ScriptedServices::default());
        let researched = orch.research_topic(&session()).await.unwrap();
        assert_eq!(researched.research_bundle.unwrap().pro_points, vec!["Pro"]);

        let failing = orchestrator(ScriptedServices {
            fail_research: true,
            ..Default::default()
        });
        let before = session();
        assert!(failing.research_topic(&before).await.is_err());
        assert!(before.research_bundle.is_none());
    }

    #[tokio::test]
    async fn test_suggested_argument_uses_session_skill() {
        let services = Arc::new(ScriptedServices::default());
        let orch = TurnOrchestrator::new(services.clone(), Config::default());

        let suggestion = orch.suggest_argument(&session()).await.unwrap();
        assert_eq!(suggestion, "A Advanced case on Homework should be banned");

        let untitled = DebateSession::new("  ", ReasoningSkill::Beginner);
        let err = orch.suggest_argument(&untitled).await.err().unwrap();
        assert!(matches!(err, DebateError::Validation(ValidationError::EmptyTopic)));
        assert_eq!(services.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_and_publish_through_store() {
        let store = Arc::new(SessionStore::new(Arc::new(MemoryStore::new()), "https://argue.example"));
        let orch = orchestrator(ScriptedServices::default()).with_store(store.clone());

        let saved = orch.save_session(&with_turns(2)).await.unwrap();
        let (published, receipt) = orch.publish_session(&saved.session).await.unwrap();

        assert_eq!(published.share_id.as_deref(), Some(receipt.share_id.as_str()));
        assert!(orch.publish_session(&published).await.is_err());
        assert!(store.fetch_public(&receipt.share_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_without_store_is_a_config_error() {
        let orch = orchestrator(ScriptedServices::default());
        let err = orch.save_session(&with_turns(2)).await.err().unwrap();
        assert!(matches!(err, DebateError::ConfigError(_)));
    }
}
