//! ArgumentAce Core Library
//!
//! Turn orchestration against an AI opponent, debate sessions and their
//! storage, the preparation timer and report layout.

pub mod clock;
pub mod config;
pub mod debate_format;
pub mod error;
pub mod openai;
pub mod orchestrator;
pub mod report;
pub mod services;
pub mod session;
pub mod store;
pub mod timer;
pub mod tts;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, default_config};
pub use debate_format::{DebateFormat, FormatKind, PoiWindow, poi_window};
pub use error::{DebateError, StorageError, ValidationError};
pub use openai::OpenAiServices;
pub use orchestrator::{
    DebateCallback, DebateEvent, PendingAudio, PointOfInformation, TurnOrchestrator, TurnOutcome,
};
pub use report::ReportDocument;
pub use services::{CounterArgumentRequest, DebateServices, SpeechSynthesizer};
pub use session::{
    AnalysisResult, AudioPatch, AudioRef, DebateSession, DebateTurn, ReasoningSkill,
    ResearchBundle, Speaker, VerdictResult, Winner,
};
pub use store::{FileStore, KvStore, MemoryStore, Namespace, PublishReceipt, SessionStore};
pub use timer::{ClockTimer, TimerPhase, TimerState};
pub use tts::KokoroSpeech;
