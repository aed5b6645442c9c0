//! Speech synthesis for AI turns using kokoro-tiny, written out as WAV files.

use kokoro_tiny::TtsEngine;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::VoicesConfig;
use crate::error::DebateError;
use crate::services::SpeechSynthesizer;
use crate::session::AudioRef;

/// Kokoro output rate.
pub const SAMPLE_RATE: u32 = 24_000;

/// Pause between chunks (0.3 seconds) to prevent cutoff.
const CHUNK_GAP_SAMPLES: usize = 7_200;

/// Trailing padding (0.5 seconds) at the end of a turn.
const TRAILING_SAMPLES: usize = 12_000;

/// Kokoro has a ~200 char safe limit per synthesis call.
const MAX_CHUNK_CHARS: usize = 200;

/// kokoro-tiny backed [`SpeechSynthesizer`]. Each turn becomes one WAV file
/// under the output directory and the returned [`AudioRef`] is its path.
pub struct KokoroSpeech {
    engine: Arc<Mutex<TtsEngine>>,
    available_voices: Vec<String>,
    default_voice: String,
    output_dir: PathBuf,
}

impl KokoroSpeech {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new(
        voices: &VoicesConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, DebateError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| DebateError::TtsError(format!("Failed to initialize TTS: {}", e)))?;

        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            DebateError::TtsError(format!(
                "Failed to create audio directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        let speech = Self {
            available_voices: engine.voices(),
            engine: Arc::new(Mutex::new(engine)),
            default_voice: voices.opponent_voice.clone(),
            output_dir,
        };
        speech.validate_all_voices(voices)?;
        info!(voices = speech.available_voices.len(), "TTS engine ready");
        Ok(speech)
    }

    /// Get list of available voice IDs.
    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), DebateError> {
        if voice_id.is_empty() {
            return Err(DebateError::TtsError(format!(
                "Voice ID cannot be empty. Available voices:\n{}",
                self.format_available_voices()
            )));
        }

        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(DebateError::TtsError(format!(
                "Unknown voice '{}'. Available voices:\n{}",
                voice_id,
                self.format_available_voices()
            )));
        }

        Ok(())
    }

    fn format_available_voices(&self) -> String {
        let mut english_voices: Vec<&String> = self
            .available_voices
            .iter()
            .filter(|v| {
                v.starts_with("af_")
                    || v.starts_with("am_")
                    || v.starts_with("bf_")
                    || v.starts_with("bm_")
            })
            .collect();
        english_voices.sort();

        english_voices
            .iter()
            .map(|v| format!("  - {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Validate all configured voices.
    pub fn validate_all_voices(&self, voices: &VoicesConfig) -> Result<(), DebateError> {
        self.validate_voice(&voices.opponent_voice)?;
        self.validate_voice(&voices.government_voice)?;
        self.validate_voice(&voices.opposition_voice)?;
        self.validate_voice(&voices.announcer_voice)?;
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSpeech {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<AudioRef, DebateError> {
        let voice = voice.unwrap_or(&self.default_voice).to_string();
        self.validate_voice(&voice)?;

        let chunks = split_into_chunks(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(DebateError::TtsError("nothing to synthesize".to_string()));
        }

        let path = self.output_dir.join(audio_file_name(Uuid::new_v4()));
        let engine = Arc::clone(&self.engine);
        let target = path.clone();

        // Synthesis is CPU bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut engine = engine
                .lock()
                .map_err(|_| DebateError::TtsError("TTS engine lock poisoned".to_string()))?;

            let mut rendered = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let samples = engine
                    .synthesize(chunk, Some(voice.as_str()))
                    .map_err(|e| DebateError::TtsError(format!("Synthesis failed: {}", e)))?;
                rendered.push(samples);
            }
            drop(engine);

            write_wav(&target, &join_chunks(rendered))
        })
        .await
        .map_err(|e| DebateError::TtsError(format!("Synthesis task failed: {}", e)))??;

        debug!(path = %path.display(), "Wrote turn audio");
        Ok(AudioRef::new(path.to_string_lossy()))
    }
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    // Split by sentence-ending punctuation
    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk = String::new();
            }

            // If single sentence is too long, split by commas
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars && !current_chunk.is_empty() {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk = String::new();
                    }
                    current_chunk.push_str(part.trim());
                    current_chunk.push(' ');
                }
            } else {
                current_chunk.push_str(sentence);
                current_chunk.push(' ');
            }
        } else {
            current_chunk.push_str(sentence);
            current_chunk.push(' ');
        }
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

/// Concatenate synthesized chunks with a gap after each and trailing padding.
fn join_chunks(chunks: Vec<Vec<f32>>) -> Vec<f32> {
    let mut all_samples = Vec::new();
    for samples in chunks {
        all_samples.extend(samples);
        all_samples.extend(std::iter::repeat_n(0.0, CHUNK_GAP_SAMPLES));
    }
    all_samples.extend(std::iter::repeat_n(0.0, TRAILING_SAMPLES));
    all_samples
}

/// Write mono 32-bit float samples at [`SAMPLE_RATE`].
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32]) -> Result<(), DebateError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_err = |e: hound::Error| DebateError::TtsError(format!("Failed to save WAV: {}", e));

    let mut writer = hound::WavWriter::create(path.as_ref(), spec).map_err(wav_err)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

fn audio_file_name(id: Uuid) -> String {
    format!("turn-{}.wav", id.simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert_eq!(
            chunks,
            vec!["Hello world. This is a test.", "Another sentence here."]
        );
    }

    #[test]
    fn test_split_long_sentence_on_commas() {
        let text = format!("{}, {}, {}.", "a".repeat(40), "b".repeat(40), "c".repeat(40));
        let chunks = split_into_chunks(&text, 50);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 50));
    }

    #[test]
    fn test_split_skips_blank_text() {
        assert!(split_into_chunks("   ", 200).is_empty());
    }

    #[test]
    fn test_join_chunks_pads() {
        let joined = join_chunks(vec![vec![1.0, 1.0], vec![2.0]]);
        assert_eq!(joined.len(), 3 + 2 * CHUNK_GAP_SAMPLES + TRAILING_SAMPLES);
        assert_eq!(joined[2], 0.0);
        assert_eq!(joined[2 + CHUNK_GAP_SAMPLES], 2.0);
    }

    #[test]
    fn test_write_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(audio_file_name(Uuid::new_v4()));
        write_wav(&path, &[0.0, 0.5, -0.5]).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 3);
    }

    #[test]
    fn test_audio_file_name() {
        let name = audio_file_name(Uuid::nil());
        assert_eq!(name, "turn-00000000000000000000000000000000.wav");
    }
}
