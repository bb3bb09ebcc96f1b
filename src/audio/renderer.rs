use async_trait::async_trait;

use super::play::SegmentPlayer;
use super::playback_queue::{Payload, PlaybackUnit, Renderer};
use super::speech::{SpeechSynth, VoicePreference};
use crate::config::Config;
use crate::error::RenderError;

/// Renders speech directives with the local synthesizer and audio segments
/// on the ALSA playback device.
pub struct LocalRenderer {
    speech: SpeechSynth,
    segments: SegmentPlayer,
}

impl LocalRenderer {
    pub fn new(speech: SpeechSynth, segments: SegmentPlayer) -> Self {
        Self { speech, segments }
    }

    pub fn from_config(config: &Config) -> Self {
        let speech = SpeechSynth::new(
            config.speech_command.clone(),
            &config.speech_voice,
            VoicePreference {
                locale: config.speech_locale.clone(),
                preferred: config.preferred_voices.clone(),
            },
        );
        let segments = SegmentPlayer {
            device: config.playback_device.clone(),
            channels: config.playback_channels,
            sample_rate: config.segment_sample_rate,
            format: config.segment_format.clone(),
        };
        Self::new(speech, segments)
    }
}

#[async_trait]
impl Renderer for LocalRenderer {
    async fn render(&self, unit: &PlaybackUnit) -> Result<(), RenderError> {
        match &unit.payload {
            Payload::Speech(text) => self.speech.speak(text).await,
            Payload::Audio(data) => self.segments.play(data.clone()).await,
        }
    }
}
