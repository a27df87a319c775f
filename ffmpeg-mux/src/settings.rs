//! Session configuration. `Default` is the reference setup: 320x240 @ 25 fps video
//! with 44100 Hz mono audio.

use ffmpeg_next::Rational;

use crate::error::{MuxError, Result};

/// Carry-over capacity for buffered PCM.
pub const CARRY_OVER_CAPACITY: usize = 4 * 1024 * 1024;

/// How a compressed video packet's presentation timestamp reaches the muxer.
///
/// The default, [`VideoPtsPolicy::Propagate`], departs from the historical
/// behaviour of this encoder, which is kept as [`VideoPtsPolicy::ClearValid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoPtsPolicy {
    /// Rescale the encoder's timestamp to the stream time base.
    #[default]
    Propagate,
    /// Drop a valid encoder timestamp and leave the muxer to derive it. Matches the
    /// historical behaviour of this encoder; decoding timestamps are kept.
    ClearValid,
}

impl VideoPtsPolicy {
    /// Presentation timestamp to hand to the muxer, still in the encoder time base.
    pub fn apply(self, encoder_pts: Option<i64>) -> Option<i64> {
        match self {
            VideoPtsPolicy::Propagate => encoder_pts,
            VideoPtsPolicy::ClearValid => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    /// Frames per second as `num/den`; the codec time base is its inverse.
    pub frame_rate: Rational,
    pub gop: u32,
    pub bit_rate: usize,
    /// Encoder name override, e.g. `libx264` or `rawvideo`. `None` uses the container default.
    pub codec: Option<String>,
    /// Encoder pixel format. `None` picks YUV420P when the codec accepts it.
    pub pixel_format: Option<ffmpeg_next::format::Pixel>,
    /// Private encoder options (`preset`, `crf`, ...).
    pub options: Vec<(String, String)>,
    pub pts_policy: VideoPtsPolicy,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            frame_rate: Rational::new(25, 1),
            gop: 12,
            bit_rate: 2_000_000,
            codec: None,
            pixel_format: None,
            options: Vec::new(),
            pts_policy: VideoPtsPolicy::default(),
        }
    }
}

impl VideoSettings {
    pub fn time_base(&self) -> Rational {
        self.frame_rate.invert()
    }
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: usize,
    pub codec: Option<String>,
    /// When false a failure to set up the audio stream leaves a video-only session.
    pub required: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            bit_rate: 128_000,
            codec: None,
            required: false,
        }
    }
}

impl AudioSettings {
    /// Bytes per interleaved sample frame of the s16 input.
    pub fn input_frame_bytes(&self) -> usize {
        crate::reframer::INPUT_SAMPLE_BYTES * self.channels as usize
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub carry_over_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            carry_over_capacity: CARRY_OVER_CAPACITY,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(MuxError::InvalidSettings { reason });
        let v = &self.video;
        if v.width == 0 || v.height == 0 || v.width % 2 != 0 || v.height % 2 != 0 {
            return invalid(format!(
                "video size {}x{} must be non-zero and even",
                v.width, v.height
            ));
        }
        if v.frame_rate.numerator() <= 0 || v.frame_rate.denominator() <= 0 {
            return invalid(format!("frame rate {} must be positive", v.frame_rate));
        }
        let a = &self.audio;
        if a.sample_rate == 0 || a.channels == 0 {
            return invalid(format!(
                "audio {} Hz / {} channels must be non-zero",
                a.sample_rate, a.channels
            ));
        }
        if self.carry_over_capacity == 0 {
            return invalid("carry-over capacity must be non-zero".to_string());
        }
        Ok(())
    }
}
