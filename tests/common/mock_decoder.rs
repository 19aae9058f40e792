//! Mock Decoder for Testing
//!
//! Scripted partials, endpoints and finals, plus a record of every
//! adaptation state handed to the model.

use std::sync::{Arc, Mutex};
use vosk_recog::decoder::{AdaptationState, Decoder, DecoderModel, Transcript, WordResult};
use vosk_recog::error::{RecogError, RecogResult};

/// What a mock decoder reports while audio arrives
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Partial hypothesis, reported once `partial_after` frames were accepted
    pub partial: String,
    pub partial_after: usize,
    /// Report an endpoint on this frame
    pub endpoint_after: Option<usize>,
    /// Text of the final transcript; defaults to the partial
    pub final_text: Option<String>,
    pub fail_final: bool,
}

impl MockScript {
    pub fn phrase(text: &str) -> Self {
        Self {
            partial: text.to_string(),
            partial_after: 3,
            ..Default::default()
        }
    }
}

/// Adaptation state of the mock backend: utterances decoded so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockAdaptation {
    pub utterances: u32,
}

pub struct MockDecoder {
    script: MockScript,
    frames: usize,
    utterances: u32,
    received: Arc<Mutex<usize>>,
}

impl Decoder for MockDecoder {
    fn accept_audio(&mut self, _samples: &[i16]) -> RecogResult<bool> {
        self.frames += 1;
        if let Ok(mut n) = self.received.lock() {
            *n += 1;
        }
        Ok(self.script.endpoint_after == Some(self.frames))
    }

    fn partial_result(&mut self) -> RecogResult<String> {
        if self.frames >= self.script.partial_after {
            Ok(self.script.partial.clone())
        } else {
            Ok(String::new())
        }
    }

    fn final_result(&mut self) -> RecogResult<Transcript> {
        if self.script.fail_final {
            return Err(RecogError::Decoder("scripted failure".to_string()));
        }
        let text = self
            .script
            .final_text
            .clone()
            .unwrap_or_else(|| self.script.partial.clone());
        let words = text
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| WordResult {
                word: w.to_string(),
                start: i as f32 * 0.3,
                end: i as f32 * 0.3 + 0.25,
                conf: 0.9,
            })
            .collect();
        Ok(Transcript::from_words(words))
    }

    fn capture_adaptation_state(self: Box<Self>) -> AdaptationState {
        AdaptationState::new(MockAdaptation {
            utterances: self.utterances + 1,
        })
    }
}

/// Mock model creating `MockDecoder`s from one script
pub struct MockModel {
    script: MockScript,
    /// Adaptation carried into each decoder created, in order
    pub adaptations: Arc<Mutex<Vec<Option<MockAdaptation>>>>,
    /// Frames accepted by all decoders
    pub received_frames: Arc<Mutex<usize>>,
}

impl MockModel {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            adaptations: Arc::new(Mutex::new(Vec::new())),
            received_frames: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_phrase(text: &str) -> Self {
        Self::new(MockScript::phrase(text))
    }
}

impl DecoderModel for MockModel {
    fn new_decoder(
        &self,
        _sample_rate: u32,
        mut state: AdaptationState,
    ) -> RecogResult<Box<dyn Decoder>> {
        let carried = state.take::<MockAdaptation>();
        self.adaptations.lock()?.push(carried);
        Ok(Box::new(MockDecoder {
            script: self.script.clone(),
            frames: 0,
            utterances: carried.map(|a| a.utterances).unwrap_or(0),
            received: self.received_frames.clone(),
        }))
    }
}
