//! Voice activity detection
//!
//! An energy based detector driven purely by the frames it is fed. Time
//! only advances by the audio duration of each processed frame, so a
//! stalled media path never fires a timeout on its own.

use crate::audio::calculate_level;
use crate::config::DetectorConfig;
use tracing::debug;

/// Transition reported for a single processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorEvent {
    None,
    /// Speech has been present for at least the speech timeout
    Activity,
    /// Silence has followed speech for at least the silence timeout
    Inactivity,
    /// No speech since the detector was reset, for at least the no-input timeout
    NoInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Inactivity,
    ActivityTransition,
    Activity,
    InactivityTransition,
}

#[derive(Debug, Clone)]
pub struct ActivityDetector {
    level_threshold: u32,
    speech_timeout: u64,
    silence_timeout: u64,
    noinput_timeout: u64,

    state: DetectorState,
    /// Audio time spent in the current state, in milliseconds
    duration: u64,
}

impl ActivityDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            level_threshold: config.level_threshold,
            speech_timeout: config.speech_timeout,
            silence_timeout: config.silence_timeout,
            noinput_timeout: config.noinput_timeout,
            state: DetectorState::Inactivity,
            duration: 0,
        }
    }

    pub fn set_noinput_timeout(&mut self, ms: u64) {
        self.noinput_timeout = ms;
    }

    pub fn set_silence_timeout(&mut self, ms: u64) {
        self.silence_timeout = ms;
    }

    pub fn noinput_timeout(&self) -> u64 {
        self.noinput_timeout
    }

    pub fn silence_timeout(&self) -> u64 {
        self.silence_timeout
    }

    /// Return to the initial silent state, keeping thresholds
    pub fn reset(&mut self) {
        self.state = DetectorState::Inactivity;
        self.duration = 0;
    }

    fn change_state(&mut self, state: DetectorState) {
        debug!("Activity detector {:?} -> {:?}", self.state, state);
        self.state = state;
        self.duration = 0;
    }

    /// Feed one frame lasting `frame_ms` milliseconds
    pub fn process(&mut self, samples: &[i16], frame_ms: u64) -> DetectorEvent {
        let speech = calculate_level(samples) >= self.level_threshold;

        match self.state {
            DetectorState::Inactivity => {
                if speech {
                    self.change_state(DetectorState::ActivityTransition);
                    self.advance_onset(frame_ms)
                } else {
                    self.duration += frame_ms;
                    if self.duration >= self.noinput_timeout {
                        DetectorEvent::NoInput
                    } else {
                        DetectorEvent::None
                    }
                }
            }
            DetectorState::ActivityTransition => {
                if speech {
                    self.advance_onset(frame_ms)
                } else {
                    self.change_state(DetectorState::Inactivity);
                    DetectorEvent::None
                }
            }
            DetectorState::Activity => {
                if speech {
                    self.duration += frame_ms;
                } else {
                    self.change_state(DetectorState::InactivityTransition);
                    self.duration = frame_ms;
                    if self.duration >= self.silence_timeout {
                        self.change_state(DetectorState::Inactivity);
                        return DetectorEvent::Inactivity;
                    }
                }
                DetectorEvent::None
            }
            DetectorState::InactivityTransition => {
                if speech {
                    self.change_state(DetectorState::Activity);
                    DetectorEvent::None
                } else {
                    self.duration += frame_ms;
                    if self.duration >= self.silence_timeout {
                        self.change_state(DetectorState::Inactivity);
                        DetectorEvent::Inactivity
                    } else {
                        DetectorEvent::None
                    }
                }
            }
        }
    }

    fn advance_onset(&mut self, frame_ms: u64) -> DetectorEvent {
        self.duration += frame_ms;
        if self.duration >= self.speech_timeout {
            self.change_state(DetectorState::Activity);
            DetectorEvent::Activity
        } else {
            DetectorEvent::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 20;
    const SILENCE: [i16; 160] = [0; 160];
    const SPEECH: [i16; 160] = [3000; 160];

    fn detector() -> ActivityDetector {
        ActivityDetector::new(&DetectorConfig::default())
    }

    fn in_speech(det: &ActivityDetector) -> bool {
        matches!(
            det.state,
            DetectorState::Activity | DetectorState::InactivityTransition
        )
    }

    fn feed(det: &mut ActivityDetector, frame: &[i16], ms: u64) -> Vec<DetectorEvent> {
        (0..ms / FRAME_MS)
            .map(|_| det.process(frame, FRAME_MS))
            .filter(|e| *e != DetectorEvent::None)
            .collect()
    }

    #[test]
    fn test_speech_then_silence() {
        let mut det = detector();
        det.set_silence_timeout(750);

        assert!(feed(&mut det, &SILENCE, 200).is_empty());
        assert_eq!(feed(&mut det, &SPEECH, 400), vec![DetectorEvent::Activity]);
        assert!(in_speech(&det));
        assert_eq!(feed(&mut det, &SILENCE, 1000), vec![DetectorEvent::Inactivity]);
        assert!(!in_speech(&det));
    }

    #[test]
    fn test_activity_reported_after_speech_timeout() {
        let mut det = detector();
        // 300 ms onset: the 15th frame confirms activity
        for _ in 0..14 {
            assert_eq!(det.process(&SPEECH, FRAME_MS), DetectorEvent::None);
        }
        assert_eq!(det.process(&SPEECH, FRAME_MS), DetectorEvent::Activity);
    }

    #[test]
    fn test_short_blip_is_not_activity() {
        let mut det = detector();
        assert!(feed(&mut det, &SPEECH, 100).is_empty());
        assert!(feed(&mut det, &SILENCE, 100).is_empty());
        assert!(!in_speech(&det));
    }

    #[test]
    fn test_pause_shorter_than_silence_timeout_keeps_speech() {
        let mut det = detector();
        feed(&mut det, &SPEECH, 400);
        assert!(feed(&mut det, &SILENCE, 200).is_empty());
        assert!(feed(&mut det, &SPEECH, 100).is_empty());
        assert!(in_speech(&det));
    }

    #[test]
    fn test_noinput_timeout() {
        let mut det = detector();
        det.set_noinput_timeout(1000);

        let events = feed(&mut det, &SILENCE, 980);
        assert!(events.is_empty());
        assert_eq!(det.process(&SILENCE, FRAME_MS), DetectorEvent::NoInput);
    }

    #[test]
    fn test_reset_restarts_noinput_clock() {
        let mut det = detector();
        det.set_noinput_timeout(400);
        feed(&mut det, &SILENCE, 300);
        det.reset();
        assert!(feed(&mut det, &SILENCE, 300).is_empty());
        assert_eq!(det.noinput_timeout(), 400);
    }

    #[test]
    fn test_empty_frame_counts_as_silence() {
        let mut det = detector();
        det.set_noinput_timeout(20);
        assert_eq!(det.process(&[], FRAME_MS), DetectorEvent::NoInput);
    }
}
