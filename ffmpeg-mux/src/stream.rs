use std::fmt;

use ffmpeg_next::Rational;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => f.write_str("video"),
            StreamKind::Audio => f.write_str("audio"),
        }
    }
}

impl From<StreamKind> for ffmpeg_next::media::Type {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Video => ffmpeg_next::media::Type::Video,
            StreamKind::Audio => ffmpeg_next::media::Type::Audio,
        }
    }
}

/// Media-specific half of a [`StreamDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamShape {
    Video {
        width: u32,
        height: u32,
        pixel_format: ffmpeg_next::format::Pixel,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        sample_format: ffmpeg_next::format::Sample,
    },
}

/// What one output stream was opened with. Fixed for the life of the session.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    index: usize,
    codec_name: String,
    codec_time_base: Rational,
    bit_rate: usize,
    shape: StreamShape,
}

impl StreamDescriptor {
    pub(crate) fn new(
        index: usize,
        codec_name: &str,
        codec_time_base: Rational,
        bit_rate: usize,
        shape: StreamShape,
    ) -> Self {
        Self {
            index,
            codec_name: codec_name.to_string(),
            codec_time_base,
            bit_rate,
            shape,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> StreamKind {
        match self.shape {
            StreamShape::Video { .. } => StreamKind::Video,
            StreamShape::Audio { .. } => StreamKind::Audio,
        }
    }

    /// Time base the encoder stamps its packets in.
    pub fn codec_time_base(&self) -> Rational {
        self.codec_time_base
    }

    pub fn shape(&self) -> StreamShape {
        self.shape
    }

    pub fn is_video(&self) -> bool {
        self.kind() == StreamKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == StreamKind::Audio
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} tb={}/{} bitrate={}",
            self.index,
            self.kind(),
            self.codec_name,
            self.codec_time_base.numerator(),
            self.codec_time_base.denominator(),
            self.bit_rate
        )?;
        match self.shape {
            StreamShape::Video {
                width,
                height,
                pixel_format,
            } => write!(f, " {}x{} {:?}", width, height, pixel_format),
            StreamShape::Audio {
                sample_rate,
                channels,
                sample_format,
            } => write!(f, " {}Hz ch={} {:?}", sample_rate, channels, sample_format),
        }
    }
}
