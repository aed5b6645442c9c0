//! ArgumentAce CLI - debate practice against an AI opponent
//!
//! A command-line front end for the ArgumentAce debate engine.

use argumentace_core::session::Clash;
use argumentace_core::{
    ClockTimer, Config, DebateEvent, DebateServices, DebateSession, DebateTurn, FileStore, FormatKind,
    KokoroSpeech, KvStore, OpenAiServices, PendingAudio, ReasoningSkill, SessionStore,
    SystemClock, TimerPhase, TurnOrchestrator, VerdictResult, report,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const WIDTH: usize = 70;
const PREP_TIMER_KEY: &str = "debate-prep";

#[derive(Parser)]
#[command(
    name = "argumentace",
    version,
    about = "ArgumentAce - practice debating against an AI opponent",
    long_about = "A CLI for debating an AI opponent with live coaching feedback, a jury verdict and shareable transcripts, using OpenAI-compatible APIs."
)]
struct Cli {
    /// Path to a TOML config file (defaults to ./argumentace.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive debate
    Debate {
        /// The topic to debate
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Opponent skill: beginner, intermediate or advanced
        #[arg(short, long, default_value = "intermediate")]
        skill: ReasoningSkill,

        /// Debate format to use
        #[arg(short, long, default_value = "standard")]
        format: FormatKind,

        /// Role you speak as (structured formats only)
        #[arg(short, long)]
        role: Option<String>,

        /// Skip speech synthesis for AI turns
        #[arg(long)]
        no_audio: bool,
    },
    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Show a published debate
    Share {
        #[arg(value_name = "SHARE_ID")]
        share_id: String,
    },
    /// Write a saved session's report to a file (.json for the layout, anything else for text)
    Export {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Run a resumable countdown timer
    Timer {
        #[arg(value_name = "SECONDS")]
        seconds: u64,

        /// Storage key, reuse it to resume an interrupted timer
        #[arg(long, default_value = "prep")]
        key: String,
    },
    /// Suggest debate topics
    Topics {
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List available debate formats
    Formats,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List saved sessions, most recent first
    List,
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Delete every saved session
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let kv: Arc<dyn KvStore> = Arc::new(FileStore::new(&config.storage.data_dir));
    let store = Arc::new(SessionStore::new(kv.clone(), &config.engine.share_origin));

    match cli.command {
        Command::Debate {
            topic,
            skill,
            format,
            role,
            no_audio,
        } => run_debate(config, store, kv.as_ref(), topic, skill, format, role, no_audio).await?,
        Command::Sessions { action } => run_sessions(&store, action).await?,
        Command::Share { share_id } => match store.fetch_public(&share_id).await? {
            Some(session) => print_session(&session),
            None => return Err(format!("No published debate '{}'", share_id).into()),
        },
        Command::Export { id, path } => {
            let session = store
                .load(&id)
                .await?
                .ok_or_else(|| format!("No saved session '{}'", id))?;
            export_report(&session, &path)?;
        }
        Command::Timer { seconds, key } => run_timer(kv.as_ref(), seconds, &key).await?,
        Command::Topics { category } => {
            let services = build_services(&config)?;
            for topic in services.suggest_topics(category.as_deref()).await? {
                println!("  {} {}", "•".bright_cyan(), topic);
            }
        }
        Command::Formats => print_formats(),
    }

    Ok(())
}

/// Config file (explicit, then ./argumentace.toml, then defaults) with
/// environment overrides applied.
fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None if Path::new("argumentace.toml").exists() => Config::load("argumentace.toml")?,
        None => argumentace_core::default_config(),
    };

    if let Ok(base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        config.service.api_base = base;
    }
    if let Ok(model) = env::var("ARGUMENTACE_MODEL") {
        config.service.model = model;
    }
    Ok(config)
}

fn build_services(config: &Config) -> Result<OpenAiServices, Box<dyn std::error::Error>> {
    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });
    Ok(OpenAiServices::new(
        &config.service,
        config.prompts.clone(),
        &api_key,
    )?)
}

#[allow(clippy::too_many_arguments)]
async fn run_debate(
    config: Config,
    store: Arc<SessionStore>,
    kv: &dyn KvStore,
    topic: String,
    skill: ReasoningSkill,
    format: FormatKind,
    role: Option<String>,
    no_audio: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = DebateSession::new(topic.trim(), skill).with_format(format);
    if let Some(role) = role {
        session = session.with_role(role)?;
    }

    let services = build_services(&config)?;
    let mut orchestrator = TurnOrchestrator::new(Arc::new(services), config.clone())
        .with_store(store)
        .with_callback(create_console_callback());

    if !no_audio {
        match KokoroSpeech::new(&config.voices, config.storage.audio_dir()).await {
            Ok(speech) => orchestrator = orchestrator.with_speech(Arc::new(speech)),
            Err(e) => {
                warn!(error = %e, "Speech disabled");
                eprintln!("{}", format!("Audio disabled: {}", e).yellow());
            }
        }
    }

    print_header(&session);
    print_help();

    let mut pending: Vec<PendingAudio> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Some(timer) = orchestrator.preparation_timer(&session) {
        session = run_preparation(&orchestrator, &session, timer, kv, &mut lines).await?;
    }
    let mut speech_started = chrono::Utc::now();

    loop {
        apply_finished_audio(&mut session, &mut pending).await;

        print!("{} ", "you>".bright_green().bold());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) if command.starts_with('/') => (command, rest.trim()),
            _ if line.starts_with('/') => (line, ""),
            _ => ("", line),
        };

        let result = match command {
            "" => submit(&orchestrator, &mut session, &mut pending, rest).await,
            "/poi" => {
                let elapsed = u64::try_from((chrono::Utc::now() - speech_started).num_seconds())
                    .unwrap_or(0);
                match orchestrator
                    .request_point_of_information(&session, rest, Some(elapsed))
                    .await
                {
                    Ok(poi) => {
                        println!(
                            "{} {}",
                            "POINT OF INFORMATION:".bright_magenta().bold(),
                            poi.question
                        );
                        print!("{} ", "your response>".bright_green());
                        std::io::stdout().flush()?;
                        let response = lines.next_line().await?.unwrap_or_default();
                        let folded = poi.fold_into(rest, &response);
                        submit(&orchestrator, &mut session, &mut pending, &folded).await
                    }
                    Err(e) => Err(e),
                }
            }
            "/suggest" => orchestrator.suggest_argument(&session).await.map(|argument| {
                println!("{}", "SUGGESTED ARGUMENT".bright_yellow().bold());
                for line in textwrap::wrap(&argument, WIDTH - 4) {
                    println!("  {}", line);
                }
                println!("{}", "  Paste or adapt it to submit it as your turn.".dimmed());
            }),
            "/research" => orchestrator.research_topic(&session).await.map(|next| {
                session = next;
                if let Some(ref research) = session.research_bundle {
                    print_list("For", &research.pro_points);
                    print_list("Against", &research.con_points);
                    if let Some(ref facts) = research.key_facts {
                        print_list("Key facts", facts);
                    }
                }
            }),
            "/verdict" => orchestrator.request_verdict(&session).await.map(|next| {
                session = next;
                if let Some(ref verdict) = session.verdict {
                    print_verdict(verdict);
                }
            }),
            "/save" => orchestrator.save_session(&session).await.map(|saved| {
                println!(
                    "{} {} ({:?})",
                    "Saved as".bright_green(),
                    saved.id().bold(),
                    saved.outcome
                );
                session = saved.session;
            }),
            "/publish" => orchestrator.publish_session(&session).await.map(|(next, receipt)| {
                println!("{} {}", "Shared at".bright_green(), receipt.public_url.bold());
                session = next;
            }),
            "/export" if !rest.is_empty() => {
                if let Err(e) = export_report(&session, Path::new(rest)) {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                }
                Ok(())
            }
            "/quit" | "/exit" => break,
            _ => {
                print_help();
                Ok(())
            }
        };

        match result {
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
            // A committed turn ends the user's speech; the next one starts now.
            Ok(()) if matches!(command, "" | "/poi") => speech_started = chrono::Utc::now(),
            Ok(()) => {}
        }
    }

    println!();
    println!("{}", "═".repeat(WIDTH).bright_blue());
    println!("{}", "  Debate concluded.".bright_green().bold());
    println!("{}", "═".repeat(WIDTH).bright_blue());
    Ok(())
}

/// Count down the format's preparation time until it runs out or the user
/// presses enter. The countdown is persisted so an interrupted run resumes it.
async fn run_preparation(
    orchestrator: &TurnOrchestrator,
    session: &DebateSession,
    timer: ClockTimer,
    kv: &dyn KvStore,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<DebateSession, Box<dyn std::error::Error>> {
    let mut timer = timer
        .on_complete(|| println!("\n{}", "  Preparation time is over.".bright_red().bold()))
        .restore(kv, PREP_TIMER_KEY)
        .await?;

    println!(
        "{}",
        format!(
            "Preparation: {} min on the clock. Press enter when you are ready to speak.",
            timer.total_secs() / 60
        )
        .bright_yellow()
    );
    timer.start();
    timer.persist(kv, PREP_TIMER_KEY).await?;

    tokio::select! {
        _ = timer.run_until_complete(Duration::from_secs(1), |remaining| {
            print!("\r  {} {:02}:{:02} ", "⏱".bright_cyan(), remaining / 60, remaining % 60);
            let _ = std::io::stdout().flush();
        }) => {}
        line = lines.next_line() => {
            line?;
        }
    }

    let prepared = orchestrator.finish_preparation(session, &mut timer);
    ClockTimer::forget(kv, PREP_TIMER_KEY).await?;
    if let Some(used) = prepared.prep_time_used_secs {
        println!(
            "\n{}",
            format!("  Prepared for {}:{:02}.", used / 60, used % 60).dimmed()
        );
    }
    Ok(prepared)
}

async fn submit(
    orchestrator: &TurnOrchestrator,
    session: &mut DebateSession,
    pending: &mut Vec<PendingAudio>,
    text: &str,
) -> Result<(), argumentace_core::DebateError> {
    let outcome = orchestrator.submit_turn(session, text).await?;
    *session = outcome.session;
    pending.push(outcome.audio);

    let count = session.debate_log.len();
    for turn in &session.debate_log[count.saturating_sub(2)..] {
        print_turn(turn);
    }
    Ok(())
}

/// Patch in audio that has arrived since the last prompt.
async fn apply_finished_audio(session: &mut DebateSession, pending: &mut Vec<PendingAudio>) {
    let mut waiting = Vec::new();
    for audio in pending.drain(..) {
        if !audio.is_finished() {
            waiting.push(audio);
            continue;
        }
        if let Some(patch) = audio.resolve().await {
            match session.apply_audio_patch(&patch) {
                Some(next) => *session = next,
                None => warn!("Discarding audio for a turn no longer in this session"),
            }
        }
    }
    *pending = waiting;
}

async fn run_sessions(
    store: &SessionStore,
    action: SessionsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SessionsAction::List => {
            let sessions = store.list().await?;
            if sessions.is_empty() {
                println!("{}", "No saved sessions.".dimmed());
            }
            for session in sessions {
                println!(
                    "{}  {}  {} {}{}",
                    session.id.as_deref().unwrap_or("-").bright_cyan(),
                    session.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    session.topic.bold(),
                    format!("({} turns)", session.debate_log.len()).dimmed(),
                    if session.is_published() {
                        " [shared]".yellow().to_string()
                    } else {
                        String::new()
                    }
                );
            }
        }
        SessionsAction::Show { id } => match store.load(&id).await? {
            Some(session) => print_session(&session),
            None => return Err(format!("No saved session '{}'", id).into()),
        },
        SessionsAction::Delete { id } => {
            if store.delete(&id).await? {
                println!("Deleted {}", id.bright_cyan());
            } else {
                println!("{}", format!("No saved session '{}'", id).yellow());
            }
        }
        SessionsAction::Clear => {
            let removed = store.delete_all().await?;
            println!("Deleted {} session(s)", removed);
        }
    }
    Ok(())
}

async fn run_timer(
    kv: &dyn KvStore,
    seconds: u64,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut timer = ClockTimer::new(seconds, Arc::new(SystemClock))
        .on_complete(|| println!("\n{}", "  Time's up!".bright_red().bold()))
        .restore(kv, key)
        .await?;

    if timer.phase() == TimerPhase::Completed {
        ClockTimer::forget(kv, key).await?;
        return Ok(());
    }

    timer.start();
    timer.persist(kv, key).await?;

    timer
        .run_until_complete(std::time::Duration::from_secs(1), |remaining| {
            print!("\r  {} {:02}:{:02} ", "⏱".bright_cyan(), remaining / 60, remaining % 60);
            let _ = std::io::stdout().flush();
        })
        .await;

    ClockTimer::forget(kv, key).await?;
    println!("  Used {}s of {}s", timer.time_used_secs(), timer.total_secs());
    Ok(())
}

fn export_report(session: &DebateSession, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let doc = report::render(session, chrono::Utc::now());
    let content = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::to_string_pretty(&doc)?
    } else {
        doc.to_plain_text()
    };
    std::fs::write(path, content)?;
    println!(
        "{} {} ({} page(s), suggested name \"{}\")",
        "Report written to".bright_green(),
        path.display(),
        doc.page_count(),
        doc.file_name
    );
    Ok(())
}

/// Create a callback that prints debate events to the console.
fn create_console_callback() -> Box<dyn Fn(DebateEvent) + Send + Sync> {
    Box::new(move |event| match event {
        DebateEvent::TurnSubmitted(_) => {
            println!("{}", "  The opponent is thinking...".dimmed());
        }
        DebateEvent::TurnRolledBack { .. } => {
            println!("{}", "  Turn discarded, your argument was not recorded.".yellow());
        }
        DebateEvent::AudioReady(patch) => {
            println!("\n{} {}", "  ♪ audio ready:".dimmed(), patch.audio_ref.as_str().dimmed());
        }
        DebateEvent::TurnCommitted(_) | DebateEvent::VerdictReady { .. } => {}
    })
}

fn print_header(session: &DebateSession) {
    let format = session.format.format();
    println!();
    println!("{}", "═".repeat(WIDTH).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "ArgumentAce".bold(), format.display_name())
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(WIDTH).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), session.topic.bright_white());
    println!("{} {}", "Opponent skill:".bold(), session.reasoning_skill);
    if let Some(ref role) = session.current_role {
        println!(
            "{} {} {}",
            "Your role:".bold(),
            role.yellow(),
            session
                .opponent_role()
                .map(|r| format!("(opponent: {})", r))
                .unwrap_or_default()
                .dimmed()
        );
    }
    if format.timed_speeches() {
        println!(
            "{}",
            format!(
                "Preparation time: {} min. Points of information open between 1:00 and 6:00 of your speech.",
                format.prep_minutes()
            )
            .dimmed()
        );
    }
    println!("{}", "─".repeat(WIDTH).dimmed());
}

fn print_help() {
    println!(
        "{}",
        "Type an argument and press enter. Commands: /poi <draft>, /suggest, /research, /verdict, /save, /publish, /export <path>, /quit"
            .dimmed()
    );
}

fn print_turn(turn: &DebateTurn) {
    println!();
    let label = turn.speaker_label();
    let heading = match turn.speaker {
        argumentace_core::Speaker::User => label.bright_green().bold(),
        argumentace_core::Speaker::Ai => label.bright_cyan().bold(),
    };
    println!(
        "{} {} {}",
        "▶".bright_cyan(),
        heading,
        turn.timestamp.format("%H:%M:%S").to_string().dimmed()
    );
    for line in textwrap::wrap(&turn.text, WIDTH - 4) {
        println!("  {}", line);
    }

    if let Some(ref feedback) = turn.feedback {
        println!("  {}", "Coach:".yellow().bold());
        for line in textwrap::wrap(&feedback.feedback, WIDTH - 6) {
            println!("    {}", line.yellow());
        }
        print_list("Fallacies", &feedback.fallacies);
        print_list("Techniques", &feedback.persuasive_techniques);
        print_list("Counterpoints", &feedback.counterpoints);
    }
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("  {}", format!("{}:", title).bold());
    for item in items {
        println!("    {} {}", "•".dimmed(), item);
    }
}

fn print_clash(clash: &Clash) {
    println!(
        "  {} {} {}",
        "◆".bright_magenta(),
        clash.point.bold(),
        format!("{} ({:+})", clash.winner.label(), clash.winner_score).yellow()
    );
    for line in textwrap::wrap(&clash.summary, WIDTH - 6) {
        println!("    {}", line);
    }
    if !clash.reasoning.is_empty() {
        println!("    {}", clash.reasoning.dimmed());
    }
}

fn print_verdict(verdict: &VerdictResult) {
    println!();
    println!("{}", "═".repeat(WIDTH).bright_magenta());
    println!(
        "{}",
        format!(
            "  JURY VERDICT: {} ({:+})",
            verdict.winner().label(),
            verdict.final_score()
        )
        .bright_magenta()
        .bold()
    );
    println!("{}", "═".repeat(WIDTH).bright_magenta());
    for line in textwrap::wrap(verdict.overall_assessment(), WIDTH - 2) {
        println!("  {}", line);
    }
    for clash in verdict.clashes() {
        print_clash(clash);
    }
    print_list("Your strengths", verdict.user_strengths());
    print_list("Your weaknesses", verdict.user_weaknesses());
    print_list("AI strengths", verdict.ai_strengths());
    print_list("AI weaknesses", verdict.ai_weaknesses());
    if let Some(advice) = verdict.advice_for_user() {
        println!("  {} {}", "Advice:".bold(), advice);
    }
}

fn print_session(session: &DebateSession) {
    print_header(session);
    for turn in &session.debate_log {
        print_turn(turn);
    }
    if let Some(ref verdict) = session.verdict {
        print_verdict(verdict);
    }
    if let Some(ref url) = session.public_url {
        println!();
        println!("{} {}", "Shared at".dimmed(), url);
    }
}

fn print_formats() {
    for kind in FormatKind::all() {
        let format = kind.format();
        println!(
            "{} {} - {}",
            kind.to_string().bright_cyan().bold(),
            format!("({})", format.display_name()).dimmed(),
            format.description()
        );
        if format.prep_minutes() > 0 {
            println!("    Preparation: {} min", format.prep_minutes());
        }
        for role in format.roles() {
            println!(
                "    {} {} ({} min)",
                "•".dimmed(),
                role.name.yellow(),
                role.speaking_minutes
            );
        }
    }
}
