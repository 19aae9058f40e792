//! Streaming decoder contract and the Vosk backed implementation
//!
//! The channel only talks to `Decoder` and `DecoderModel`; the acoustic
//! model and search live behind them.

use crate::config::DecoderConfig;
use crate::error::{RecogError, RecogResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::Path;
use tracing::{debug, info, warn};
use vosk::{DecodingState, Model, Recognizer};

/// One recognized word with its timing (seconds) and confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordResult {
    pub word: String,
    pub start: f32,
    pub end: f32,
    pub conf: f32,
}

/// Final result of an utterance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub result: Vec<WordResult>,
    pub text: String,
}

impl Transcript {
    pub fn from_words(result: Vec<WordResult>) -> Self {
        let text = result
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { result, text }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Mean word confidence; 1.0 when the decoder gave text without words
    pub fn confidence(&self) -> f32 {
        if self.result.is_empty() {
            return if self.is_empty() { 0.0 } else { 1.0 };
        }
        let sum: f32 = self.result.iter().map(|w| w.conf).sum();
        sum / self.result.len() as f32
    }
}

/// Decoder statistics carried from one utterance to the next
///
/// The content is backend specific; an empty state is always accepted
/// and leaves a fresh decoder untouched.
#[derive(Default)]
pub struct AdaptationState {
    inner: Option<Box<dyn Any + Send>>,
}

impl AdaptationState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new<T: Any + Send>(state: T) -> Self {
        Self {
            inner: Some(Box::new(state)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Take the state out if it was captured by the backend owning `T`
    pub fn take<T: Any + Send>(&mut self) -> Option<T> {
        match self.inner.take()?.downcast::<T>() {
            Ok(state) => Some(*state),
            Err(other) => {
                self.inner = Some(other);
                None
            }
        }
    }
}

impl std::fmt::Debug for AdaptationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptationState")
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// A single streaming decoder instance, one per channel
pub trait Decoder: Send {
    /// Feed PCM16 samples; returns true when the decoder detected an endpoint
    fn accept_audio(&mut self, samples: &[i16]) -> RecogResult<bool>;

    /// Current best hypothesis, empty until enough audio has been decoded
    fn partial_result(&mut self) -> RecogResult<String>;

    /// Finalize the utterance and return the structured transcript
    fn final_result(&mut self) -> RecogResult<Transcript>;

    /// Consume the decoder, keeping only what should survive into the next utterance
    fn capture_adaptation_state(self: Box<Self>) -> AdaptationState;
}

/// Loaded, shared, read-only model that creates decoders
pub trait DecoderModel: Send + Sync {
    fn new_decoder(
        &self,
        sample_rate: u32,
        state: AdaptationState,
    ) -> RecogResult<Box<dyn Decoder>>;
}

/// Replace a used decoder with a fresh one carrying its adaptation state
pub fn renew(
    model: &dyn DecoderModel,
    previous: Box<dyn Decoder>,
    sample_rate: u32,
) -> RecogResult<Box<dyn Decoder>> {
    let state = previous.capture_adaptation_state();
    debug!("Renewing decoder (adaptation state empty: {})", state.is_empty());
    model.new_decoder(sample_rate, state)
}

/// Vosk model loaded once per process
pub struct VoskModel {
    model: Model,
    options: DecoderConfig,
}

impl VoskModel {
    pub fn load(path: &Path, options: DecoderConfig) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!("Vosk model not found at {}", path.display()));
        }

        info!("Loading Vosk model from: {}", path.display());

        let model_str = path.to_str().ok_or_else(|| {
            anyhow::anyhow!("Vosk model path is not valid UTF-8: {}", path.display())
        })?;

        let model = Model::new(model_str).context("Failed to load Vosk model")?;
        Ok(Self { model, options })
    }
}

/// What a Vosk decoder leaves behind: the reset recognizer, which keeps
/// its i-vector adaptation internally
struct VoskAdaptation {
    recognizer: Recognizer,
    sample_rate: u32,
}

impl DecoderModel for VoskModel {
    fn new_decoder(
        &self,
        sample_rate: u32,
        mut state: AdaptationState,
    ) -> RecogResult<Box<dyn Decoder>> {
        let reused = state
            .take::<VoskAdaptation>()
            .filter(|a| a.sample_rate == sample_rate)
            .map(|a| a.recognizer);

        let recognizer = match reused {
            Some(recognizer) => {
                debug!("Reusing adapted Vosk recognizer at {} Hz", sample_rate);
                recognizer
            }
            None => {
                let mut recognizer = Recognizer::new(&self.model, sample_rate as f32)
                    .ok_or_else(|| {
                        RecogError::Model(format!(
                            "Failed to create Vosk recognizer at {} Hz",
                            sample_rate
                        ))
                    })?;
                recognizer.set_words(self.options.words);
                recognizer.set_max_alternatives(self.options.max_alternatives);
                recognizer
            }
        };

        Ok(Box::new(VoskDecoder {
            recognizer,
            sample_rate,
            min_partial_steps: self.options.min_partial_steps,
            samples_accepted: 0,
        }))
    }
}

pub struct VoskDecoder {
    recognizer: Recognizer,
    sample_rate: u32,
    min_partial_steps: u64,
    samples_accepted: u64,
}

impl VoskDecoder {
    /// Number of 10 ms decoder steps covered by the accepted audio
    fn steps_decoded(&self) -> u64 {
        self.samples_accepted * 100 / self.sample_rate.max(1) as u64
    }
}

impl Decoder for VoskDecoder {
    fn accept_audio(&mut self, samples: &[i16]) -> RecogResult<bool> {
        self.samples_accepted += samples.len() as u64;
        match self.recognizer.accept_waveform(samples) {
            DecodingState::Finalized => Ok(true),
            DecodingState::Running => Ok(false),
            DecodingState::Failed => Err(RecogError::Decoder(
                "Decoding failed for this chunk".to_string(),
            )),
        }
    }

    fn partial_result(&mut self) -> RecogResult<String> {
        if self.steps_decoded() < self.min_partial_steps {
            return Ok(String::new());
        }
        Ok(self.recognizer.partial_result().partial.trim().to_string())
    }

    fn final_result(&mut self) -> RecogResult<Transcript> {
        let result = self.recognizer.final_result();
        if let Some(single) = result.single() {
            let words = single
                .result
                .iter()
                .map(|w| WordResult {
                    word: w.word.to_string(),
                    start: w.start,
                    end: w.end,
                    conf: w.conf,
                })
                .collect::<Vec<_>>();
            let mut transcript = Transcript::from_words(words);
            if transcript.result.is_empty() {
                transcript.text = single.text.trim().to_string();
            }
            return Ok(transcript);
        }
        if let Some(multiple) = result.multiple() {
            let best = multiple.alternatives.first();
            return Ok(Transcript {
                result: Vec::new(),
                text: best.map(|a| a.text.trim().to_string()).unwrap_or_default(),
            });
        }
        warn!("Vosk returned an unexpected result shape");
        Ok(Transcript::default())
    }

    fn capture_adaptation_state(self: Box<Self>) -> AdaptationState {
        let mut recognizer = self.recognizer;
        recognizer.reset();
        AdaptationState::new(VoskAdaptation {
            recognizer,
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(w: &str, conf: f32) -> WordResult {
        WordResult {
            word: w.to_string(),
            start: 0.0,
            end: 0.5,
            conf,
        }
    }

    #[test]
    fn test_transcript_text_is_space_joined() {
        let t = Transcript::from_words(vec![word("hello", 0.9), word("world", 0.7)]);
        assert_eq!(t.text, "hello world");
        assert!((t.confidence() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_empty_transcript() {
        let t = Transcript::default();
        assert!(t.is_empty());
        assert_eq!(t.confidence(), 0.0);
    }

    #[test]
    fn test_transcript_json_shape() {
        let t = Transcript::from_words(vec![word("yes", 1.0)]);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["text"], "yes");
        assert_eq!(json["result"][0]["word"], "yes");
        assert_eq!(json["result"][0]["conf"], 1.0);
    }

    #[test]
    fn test_adaptation_state_take() {
        let mut state = AdaptationState::new(42u32);
        assert!(!state.is_empty());
        assert_eq!(state.take::<String>(), None);
        assert!(!state.is_empty());
        assert_eq!(state.take::<u32>(), Some(42));
        assert!(state.is_empty());
        assert_eq!(AdaptationState::empty().take::<u32>(), None);
    }
}
