//! Audio frames delivered on the media path

use crate::error::{RecogError, RecogResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Negotiated codec of a channel's sink stream (always linear PCM16, mono)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub sample_rate: u32,
}

impl CodecDescriptor {
    /// Linear PCM at `sample_rate` Hz, validated against the supported rates
    pub fn lpcm(sample_rate: u32, supported: &[u32]) -> RecogResult<Self> {
        if !supported.contains(&sample_rate) {
            return Err(RecogError::Codec(format!(
                "unsupported LPCM sample rate {} Hz (supported: {:?})",
                sample_rate, supported
            )));
        }
        Ok(Self { sample_rate })
    }

    /// Audio duration of `samples` samples in milliseconds
    pub fn duration_ms(&self, samples: usize) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        samples as u64 * 1000 / self.sample_rate as u64
    }

    /// Number of samples in `ms` milliseconds of audio
    pub fn samples_per(&self, ms: u64) -> usize {
        (self.sample_rate as u64 * ms / 1000) as usize
    }
}

/// Marker of an out-of-band named event (e.g. DTMF) carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMarker {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedEvent {
    pub id: u8,
    pub marker: EventMarker,
    /// Duration in timestamp units, meaningful on `End`
    pub duration: u32,
}

/// One frame of audio as delivered by the media path
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub samples: &'a [i16],
    pub event: Option<NamedEvent>,
}

impl<'a> Frame<'a> {
    pub fn audio(samples: &'a [i16]) -> Self {
        Self {
            samples,
            event: None,
        }
    }

    pub fn with_event(samples: &'a [i16], event: NamedEvent) -> Self {
        Self {
            samples,
            event: Some(event),
        }
    }
}

/// Mean absolute sample level of a frame
pub fn calculate_level(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }

    let sum: u64 = samples.iter().map(|&s| (s as i32).unsigned_abs() as u64).sum();
    (sum / samples.len() as u64) as u32
}

/// Raw PCM capture of the audio a channel recognized
pub struct UtteranceWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl UtteranceWriter {
    pub fn file_name(sample_rate: u32, session_id: &str) -> String {
        format!("utter-{}kHz-{}.pcm", sample_rate / 1000, session_id)
    }

    /// Open (truncate) the capture file for a session inside `dir`
    pub fn create(dir: &Path, sample_rate: u32, session_id: &str) -> RecogResult<Self> {
        let path = dir.join(Self::file_name(sample_rate, session_id));
        info!("Open Utterance Output File [{}] for Writing", path.display());
        let file = File::create(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append samples as little-endian PCM16; failures are logged, not fatal
    pub fn write(&mut self, samples: &[i16]) {
        for s in samples {
            if let Err(e) = self.out.write_all(&s.to_le_bytes()) {
                warn!("Failed to write utterance [{}]: {}", self.path.display(), e);
                return;
            }
        }
    }
}

impl Drop for UtteranceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!("Failed to flush utterance [{}]: {}", self.path.display(), e);
        }
        debug!("Closed utterance file [{}]", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_calculation() {
        assert_eq!(calculate_level(&[]), 0);
        assert_eq!(calculate_level(&[0i16; 160]), 0);
        assert_eq!(calculate_level(&[-1000, 1000, -1000, 1000]), 1000);
        assert_eq!(calculate_level(&[i16::MIN, i16::MAX]), 32767);
    }

    #[test]
    fn test_codec_validation() {
        assert!(CodecDescriptor::lpcm(8000, &[8000, 16000]).is_ok());
        assert!(matches!(
            CodecDescriptor::lpcm(44100, &[8000, 16000]),
            Err(RecogError::Codec(_))
        ));
    }

    #[test]
    fn test_codec_durations() {
        let codec = CodecDescriptor { sample_rate: 8000 };
        assert_eq!(codec.samples_per(20), 160);
        assert_eq!(codec.duration_ms(160), 20);

        let wide = CodecDescriptor { sample_rate: 16000 };
        assert_eq!(wide.samples_per(20), 320);
        assert_eq!(wide.duration_ms(320), 20);
    }

    #[test]
    fn test_utterance_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut writer = UtteranceWriter::create(dir.path(), 8000, "abc123").unwrap();
            writer.write(&[1, -2, 256]);
            writer.path().to_path_buf()
        };

        assert_eq!(path.file_name().unwrap(), "utter-8kHz-abc123.pcm");
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(bytes, vec![1, 0, 0xfe, 0xff, 0, 1]);
    }
}
