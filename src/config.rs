use std::path::Path;

use anyhow::Context;
use ffmpeg_mux::{AUTO_CONTAINER, SessionSettings, VideoPtsPolicy};
use ffmpeg_next::Rational;
use serde::Deserialize;

/// One encode run, read from JSON. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub output: String,
    /// Muxer name, or `"auto"` to pick one from the output extension.
    pub container: String,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub fps: i32,
    pub gop: u32,
    pub video_bit_rate: usize,
    pub video_codec: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub audio_bit_rate: usize,
    pub audio_codec: Option<String>,
    pub require_audio: bool,
    /// Clear encoder presentation timestamps before muxing.
    pub legacy_video_pts: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            output: "synth.mp4".to_string(),
            container: AUTO_CONTAINER.to_string(),
            frame_count: 50,
            width: settings.video.width,
            height: settings.video.height,
            fps: settings.video.frame_rate.numerator(),
            gop: settings.video.gop,
            video_bit_rate: settings.video.bit_rate,
            video_codec: None,
            sample_rate: settings.audio.sample_rate,
            channels: settings.audio.channels,
            audio_bit_rate: settings.audio.bit_rate,
            audio_codec: None,
            require_audio: false,
            legacy_video_pts: false,
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Reads the file named by the first argument, or falls back to defaults.
    pub fn from_args() -> anyhow::Result<Self> {
        match std::env::args().nth(1) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// PCM bytes of s16 audio that cover one video frame.
    pub fn pcm_bytes_per_tick(&self) -> usize {
        let samples = self.sample_rate as usize / self.fps.max(1) as usize;
        samples * self.channels as usize * 2
    }

    pub fn to_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::default();
        let video = &mut settings.video;
        video.width = self.width;
        video.height = self.height;
        video.frame_rate = Rational::new(self.fps, 1);
        video.gop = self.gop;
        video.bit_rate = self.video_bit_rate;
        video.codec = self.video_codec.clone();
        if self.legacy_video_pts {
            video.pts_policy = VideoPtsPolicy::ClearValid;
        }
        let audio = &mut settings.audio;
        audio.sample_rate = self.sample_rate;
        audio.channels = self.channels;
        audio.bit_rate = self.audio_bit_rate;
        audio.codec = self.audio_codec.clone();
        audio.required = self.require_audio;
        settings
    }
}
