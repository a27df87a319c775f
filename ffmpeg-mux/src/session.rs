//! One write-once encode session: open a container, feed it picture/PCM pairs,
//! finish it.
//!
//! ```text
//! Uninitialized --init_file--> Opened --finish--> Finalizing --> Closed
//! ```
//!
//! Every resource is built into locals while opening and only moved into the
//! session once the header is written, so a failed `init_file` leaves nothing
//! behind. `finish` runs from `Drop` as well.

use crate::{
    audio_encoder::SampleEncoder,
    encoder::{FrameEncoder, PacketSource, find_encoder},
    error::{MuxError, Result},
    frame::{RawPicture, SOURCE_PIXEL_FORMAT},
    output::MuxOutput,
    reframer::{AudioReframer, Drain},
    scaler::PixelConverter,
    settings::SessionSettings,
    stream::{StreamDescriptor, StreamKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Opened,
    Finalizing,
    Closed,
}

/// Running totals for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub skipped_pictures: u64,
    pub video_packets: u64,
    pub video_bytes: u64,
    pub audio_frames: u64,
    pub audio_packets: u64,
    pub audio_bytes: u64,
}

/// What one `add_frame` call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub video_packets: usize,
    pub audio_frames: usize,
    pub audio_packets: usize,
}

struct OpenParts {
    output: MuxOutput,
    video: FrameEncoder,
    audio: Option<(SampleEncoder, AudioReframer)>,
}

pub struct EncoderSession {
    settings: SessionSettings,
    state: SessionState,
    output: Option<MuxOutput>,
    video: Option<FrameEncoder>,
    audio: Option<SampleEncoder>,
    converter: Option<PixelConverter>,
    reframer: Option<AudioReframer>,
    stats: SessionStats,
}

impl EncoderSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            state: SessionState::Uninitialized,
            output: None,
            video: None,
            audio: None,
            converter: None,
            reframer: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.video.as_ref().map(|v| v.descriptor())
    }

    pub fn audio_stream(&self) -> Option<&StreamDescriptor> {
        self.audio.as_ref().map(|a| a.descriptor())
    }

    /// Bytes of PCM that make up one aligned audio frame, if audio is open.
    pub fn audio_frame_bytes(&self) -> Option<usize> {
        self.reframer.as_ref().map(|r| r.frame_bytes())
    }

    /// PCM bytes carried over to the next push.
    pub fn pending_audio(&self) -> usize {
        self.reframer.as_ref().map_or(0, |r| r.pending())
    }

    /// Number of owned library resources: container, encoders, converter, carry-over.
    pub fn open_resources(&self) -> usize {
        [
            self.output.is_some(),
            self.video.is_some(),
            self.audio.is_some(),
            self.converter.is_some(),
            self.reframer.is_some(),
        ]
        .into_iter()
        .filter(|&owned| owned)
        .count()
    }

    /// Opens `path` as a `container` file (`"auto"` guesses from the extension)
    /// with one video and, when possible, one audio stream, and writes the header.
    pub fn init_file(&mut self, path: &str, container: &str) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(MuxError::InvalidState {
                op: "init_file",
                state: self.state,
            });
        }
        let opened = match Self::open(&self.settings, path, container) {
            Ok(opened) => opened,
            Err(e) => {
                log::error!("cannot init file {}: {}", path, e);
                return Err(e);
            }
        };

        self.output = Some(opened.output);
        self.video = Some(opened.video);
        if let Some((audio, reframer)) = opened.audio {
            self.audio = Some(audio);
            self.reframer = Some(reframer);
        }
        self.state = SessionState::Opened;
        log::info!("session opened: {} ({})", path, container);
        Ok(())
    }

    fn open(settings: &SessionSettings, path: &str, container: &str) -> Result<OpenParts> {
        settings.validate()?;
        let format_name = MuxOutput::resolve_format(path, container)?;
        let mut output = MuxOutput::create(path, &format_name)?;
        let global_header = output.needs_global_header();

        let video_codec = find_encoder(
            StreamKind::Video,
            settings.video.codec.as_deref(),
            output.default_codec(StreamKind::Video),
        )?;
        let video = FrameEncoder::open(
            output.context_mut(),
            &settings.video,
            video_codec,
            global_header,
        )?;

        let audio = match Self::open_audio(settings, &mut output, global_header) {
            Ok(audio) => Some(audio),
            Err(e) if !settings.audio.required => {
                log::warn!("continuing without audio: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        log::info!("output {} [{}]", path, output.format_name());
        log::info!("  {}", video.descriptor());
        if let Some((audio, reframer)) = &audio {
            log::info!(
                "  {} ({} bytes per frame)",
                audio.descriptor(),
                reframer.frame_bytes()
            );
        }

        output.dump();
        output.write_header()?;
        Ok(OpenParts {
            output,
            video,
            audio,
        })
    }

    fn open_audio(
        settings: &SessionSettings,
        output: &mut MuxOutput,
        global_header: bool,
    ) -> Result<(SampleEncoder, AudioReframer)> {
        let codec = find_encoder(
            StreamKind::Audio,
            settings.audio.codec.as_deref(),
            output.default_codec(StreamKind::Audio),
        )?;
        let encoder = SampleEncoder::open(
            output.context_mut(),
            &settings.audio,
            codec,
            global_header,
            settings.carry_over_capacity,
        )?;
        let reframer = AudioReframer::new(encoder.frame_bytes(), settings.carry_over_capacity)?;
        Ok((encoder, reframer))
    }

    /// Encodes one picture and one chunk of s16 PCM.
    ///
    /// A picture without data and an empty chunk are both fine and simply skip
    /// that half of the tick. Errors other than [`MuxError::BufferOverflow`] leave
    /// the session usable.
    pub fn add_frame(&mut self, picture: &RawPicture, pcm: &[u8]) -> Result<TickReport> {
        if self.state != SessionState::Opened {
            return Err(MuxError::InvalidState {
                op: "add_frame",
                state: self.state,
            });
        }
        self.stats.ticks += 1;

        let mut report = TickReport::default();
        let video = self.push_video(picture).map(|n| report.video_packets = n);
        let audio = if pcm.is_empty() {
            Ok(())
        } else {
            self.push_audio(pcm).map(|(frames, packets)| {
                report.audio_frames = frames;
                report.audio_packets = packets;
            })
        };

        match (video, audio) {
            (Ok(()), Ok(())) => Ok(report),
            (video, Err(e @ MuxError::BufferOverflow { .. })) => {
                if let Err(video_err) = video {
                    log::warn!("video failed in overflowing tick: {}", video_err);
                }
                Err(e)
            }
            (Err(e), audio) => {
                if let Err(audio_err) = audio {
                    log::warn!("audio failed in the same tick: {}", audio_err);
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
        }
    }

    fn push_video(&mut self, picture: &RawPicture) -> Result<usize> {
        if !picture.has_data() {
            log::trace!("tick {} has no picture", self.stats.ticks);
            self.stats.skipped_pictures += 1;
            return Ok(0);
        }
        let Some(video) = self.video.as_mut() else {
            return Ok(0);
        };
        let (width, height) = (self.settings.video.width, self.settings.video.height);
        if picture.format() != SOURCE_PIXEL_FORMAT
            || picture.width() != width
            || picture.height() != height
        {
            return Err(MuxError::InvalidInput {
                kind: StreamKind::Video,
                reason: format!(
                    "picture is {:?} {}x{}, expected {:?} {}x{}",
                    picture.format(),
                    picture.width(),
                    picture.height(),
                    SOURCE_PIXEL_FORMAT,
                    width,
                    height
                ),
            });
        }

        let frame = if PixelConverter::needs_conversion(video.pixel_format()) {
            let dst_format = video.pixel_format();
            self.converter
                .get_or_insert_with(|| PixelConverter::new(dst_format, width, height))
                .convert(picture)?
        } else {
            picture.as_video().clone()
        };
        if let Err(e) = video.send(frame) {
            log::warn!("skipping picture {}: {}", video.frame_count() - 1, e);
            return Err(e);
        }

        let Some(output) = self.output.as_mut() else {
            return Ok(0);
        };
        write_pending(video, output, &mut self.stats)
    }

    fn push_audio(&mut self, pcm: &[u8]) -> Result<(usize, usize)> {
        let (Some(audio), Some(reframer), Some(output)) = (
            self.audio.as_mut(),
            self.reframer.as_mut(),
            self.output.as_mut(),
        ) else {
            log::trace!("no audio stream, dropping {} bytes", pcm.len());
            return Ok((0, 0));
        };
        let sample_frame = self.settings.audio.input_frame_bytes();
        if pcm.len() % sample_frame != 0 {
            return Err(MuxError::InvalidInput {
                kind: StreamKind::Audio,
                reason: format!(
                    "{} bytes is not a whole number of {}-byte samples",
                    pcm.len(),
                    sample_frame
                ),
            });
        }

        let stats = &mut self.stats;
        let mut drain = reframer.push(pcm)?;
        let fed = feed_frames(&mut drain, |frame| {
            audio.send(frame)?;
            write_pending(audio, output, stats)
        });
        drop(drain);
        self.stats.audio_frames += fed.frames as u64;

        match fed.failure {
            Some(e) => Err(e),
            None => Ok((fed.frames, fed.packets)),
        }
    }

    /// Flushes both encoders, writes the trailer and releases everything.
    ///
    /// Calling it again, or on a session that never opened, does nothing.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Opened => {}
            SessionState::Uninitialized | SessionState::Finalizing => {
                self.release();
                self.state = SessionState::Closed;
                return Ok(());
            }
        }
        self.state = SessionState::Finalizing;

        let flushed = self.flush();
        if let Err(e) = &flushed {
            log::error!("flush failed: {}", e);
        }
        let trailer = match self.output.as_mut() {
            Some(output) => output.finish(),
            None => Ok(()),
        };
        if let Err(e) = &trailer {
            log::error!("{}", e);
        }

        self.release();
        self.state = SessionState::Closed;
        log::info!("session closed: {:?}", self.stats);
        flushed.and(trailer)
    }

    fn flush(&mut self) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        let mut failure = None;

        if let (Some(audio), Some(reframer)) = (self.audio.as_mut(), self.reframer.as_mut()) {
            let tail = reframer.take_tail();
            if !tail.is_empty() {
                if audio.accepts_short_frame() {
                    match audio.send(&tail) {
                        Ok(()) => self.stats.audio_frames += 1,
                        Err(e) => {
                            failure.get_or_insert(e);
                        }
                    }
                } else {
                    log::debug!("dropping {} trailing audio bytes", tail.len());
                }
            }
            if let Err(e) = audio
                .send_eof()
                .and_then(|()| write_pending(audio, output, &mut self.stats))
            {
                failure.get_or_insert(e);
            }
        }

        if let Some(video) = self.video.as_mut() {
            if let Err(e) = video
                .send_eof()
                .and_then(|()| write_pending(video, output, &mut self.stats))
            {
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        self.converter = None;
        self.reframer = None;
        self.audio = None;
        self.video = None;
        self.output = None;
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("finish on drop failed: {}", e);
        }
    }
}

/// Outcome of handing one drain's frames to an encoder.
struct Fed {
    frames: usize,
    packets: usize,
    failure: Option<MuxError>,
}

/// Passes every complete frame of `drain` to `encode`, which returns the number
/// of packets it wrote. A failed frame is skipped and the next one still goes
/// out, except after a write failure, which ends the drain. The first failure
/// is kept.
fn feed_frames(
    drain: &mut Drain<'_>,
    mut encode: impl FnMut(&[u8]) -> Result<usize>,
) -> Fed {
    let mut fed = Fed {
        frames: 0,
        packets: 0,
        failure: None,
    };
    while let Some(frame) = drain.next_frame() {
        fed.frames += 1;
        match encode(frame) {
            Ok(n) => fed.packets += n,
            Err(e @ MuxError::Write { .. }) => {
                log::warn!("audio frame {} not written: {}", fed.frames - 1, e);
                fed.failure.get_or_insert(e);
                break;
            }
            Err(e) => {
                log::warn!("skipping audio frame {}: {}", fed.frames - 1, e);
                fed.failure.get_or_insert(e);
            }
        }
    }
    fed
}

/// Writes every packet `source` has ready. Stops at the first write failure.
fn write_pending(
    source: &mut impl PacketSource,
    output: &mut MuxOutput,
    stats: &mut SessionStats,
) -> Result<usize> {
    let index = source.descriptor().index();
    let mut written = 0;
    while let Some(packet) = source.receive()? {
        let kind = packet.kind();
        let size = packet.size() as u64;
        output.write_interleaved(index, packet)?;
        written += 1;
        match kind {
            StreamKind::Video => {
                stats.video_packets += 1;
                stats.video_bytes += size;
            }
            StreamKind::Audio => {
                stats.audio_packets += 1;
                stats.audio_bytes += size;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
