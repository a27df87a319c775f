//! Reading back what a session wrote, ffprobe style.

use std::fmt;

use ffmpeg_next::{Rational, media};

/// Container-level info.
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Demuxer name, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// None if the container does not know its duration.
    pub duration_sec: Option<f64>,
    pub bit_rate: i64,
    pub nb_streams: u32,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub medium: media::Type,
    pub codec_name: String,
    pub time_base: Rational,
    /// In `time_base` units; None if unknown.
    pub duration_ts: Option<i64>,
    /// Average frame rate for video, 0/0 otherwise.
    pub rate: Rational,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        self.medium == media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.medium == media::Type::Audio
    }
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_video())
    }

    pub fn audio(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_audio())
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        match self.format.duration_sec {
            Some(d) => writeln!(f, "duration_sec={:.3}", d)?,
            None => writeln!(f, "duration_sec=N/A")?,
        }
        writeln!(f, "bit_rate={}", self.format.bit_rate)?;
        writeln!(f, "nb_streams={}", self.format.nb_streams)?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", format!("{:?}", s.medium).to_lowercase())?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}", s.time_base)?;
            if let Some(d) = s.duration_ts {
                writeln!(f, "duration_ts={}", d)?;
            }
            if s.is_video() {
                writeln!(f, "rate={}", s.rate)?;
            }
            if let (Some(w), Some(h)) = (s.width, s.height) {
                writeln!(f, "size={}x{}", w, h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

fn known(value: i64) -> Option<i64> {
    if value == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || value < 0 {
        None
    } else {
        Some(value)
    }
}

/// Opens a media file and describes its container and streams.
pub fn probe(path: &str) -> anyhow::Result<MediaInfo> {
    let input = ffmpeg_next::format::input(path)?;

    // duration is in 1/AV_TIME_BASE seconds
    let duration_sec = known(input.duration())
        .filter(|&d| d > 0)
        .map(|d| d as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE));

    let streams = input
        .streams()
        .map(|stream| {
            let params = stream.parameters();
            let medium = params.medium();
            let (width, height, sample_rate, channels) = match medium {
                media::Type::Video => {
                    let (w, h) = video_size(&params);
                    (Some(w), Some(h), None, None)
                }
                media::Type::Audio => {
                    let (sr, ch) = audio_layout(&params);
                    (None, None, Some(sr), Some(ch))
                }
                _ => (None, None, None, None),
            };
            StreamInfo {
                index: stream.index(),
                medium,
                codec_name: format!("{:?}", params.id()).to_lowercase(),
                time_base: stream.time_base(),
                duration_ts: known(stream.duration()),
                rate: stream.avg_frame_rate(),
                width,
                height,
                sample_rate,
                channels,
            }
        })
        .collect();

    Ok(MediaInfo {
        format: FormatInfo {
            format_name: input.format().name().to_string(),
            duration_sec,
            bit_rate: input.bit_rate(),
            nb_streams: input.nb_streams(),
        },
        streams,
    })
}

/// Timestamps of every packet of one stream, in demux order.
#[derive(Debug, Clone)]
pub struct StreamPackets {
    pub index: usize,
    pub medium: media::Type,
    pub time_base: Rational,
    pub count: usize,
    pub key_frames: usize,
    pub dts: Vec<Option<i64>>,
    pub pts: Vec<Option<i64>>,
}

impl StreamPackets {
    /// True when no known dts goes backwards.
    pub fn dts_monotonic(&self) -> bool {
        let known: Vec<i64> = self.dts.iter().flatten().copied().collect();
        known.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Demuxes `path` and collects packet counts and timestamps per stream.
pub fn scan_packets(path: &str) -> anyhow::Result<Vec<StreamPackets>> {
    let mut input = ffmpeg_next::format::input(path)?;
    let mut streams: Vec<StreamPackets> = input
        .streams()
        .map(|stream| StreamPackets {
            index: stream.index(),
            medium: stream.parameters().medium(),
            time_base: stream.time_base(),
            count: 0,
            key_frames: 0,
            dts: Vec::new(),
            pts: Vec::new(),
        })
        .collect();

    for (stream, packet) in input.packets() {
        let Some(entry) = streams.get_mut(stream.index()) else {
            continue;
        };
        entry.count += 1;
        if packet.is_key() {
            entry.key_frames += 1;
        }
        entry.dts.push(packet.dts());
        entry.pts.push(packet.pts());
    }
    Ok(streams)
}

/// Width and height from codec parameters (not exposed by ffmpeg-next).
fn video_size(params: &ffmpeg_next::codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
    }
}

fn audio_layout(params: &ffmpeg_next::codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        (
            (*ptr).sample_rate.max(0) as u32,
            (*ptr).ch_layout.nb_channels.max(0) as u32,
        )
    }
}
