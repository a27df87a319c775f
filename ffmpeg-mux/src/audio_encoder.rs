use ffmpeg_next::{
    ChannelLayout, Rational, codec,
    codec::capabilities::Capabilities,
    format::{Sample, sample::Type as SampleType},
    software::resampling,
};

use crate::{
    encoder::PacketSource,
    error::{MuxError, Result},
    packet::EncodedPacket,
    reframer::{INPUT_SAMPLE_BYTES, samples_per_frame},
    settings::AudioSettings,
    stream::{StreamDescriptor, StreamKind, StreamShape},
};

/// Sample layout of every PCM chunk pushed into a session.
pub const INPUT_SAMPLE_FORMAT: Sample = Sample::I16(SampleType::Packed);

fn pick_sample_format(codec: &ffmpeg_next::Codec) -> Sample {
    let supported: Option<Vec<Sample>> = codec
        .audio()
        .ok()
        .and_then(|audio| audio.formats().map(|formats| formats.collect()));
    match supported {
        Some(formats) if !formats.contains(&INPUT_SAMPLE_FORMAT) => {
            formats.first().copied().unwrap_or(INPUT_SAMPLE_FORMAT)
        }
        _ => INPUT_SAMPLE_FORMAT,
    }
}

/// Owns the audio encoder. Takes one aligned s16 frame at a time.
pub struct SampleEncoder {
    descriptor: StreamDescriptor,
    encoder: ffmpeg_next::codec::encoder::Audio,
    // s16 -> codec sample format, same rate and layout
    resampler: Option<resampling::Context>,
    layout: ChannelLayout,
    samples_per_frame: usize,
    accepts_short_frame: bool,
    next_pts: i64,
}

impl SampleEncoder {
    /// Opens the encoder and adds its stream to `output`.
    ///
    /// Fails before touching `output` when one codec frame of s16 input would not
    /// fit in `max_frame_bytes`.
    pub fn open(
        output: &mut ffmpeg_next::format::context::Output,
        settings: &AudioSettings,
        codec: ffmpeg_next::Codec,
        global_header: bool,
        max_frame_bytes: usize,
    ) -> Result<Self> {
        let kind = StreamKind::Audio;
        let sample_format = pick_sample_format(&codec);
        let layout = ChannelLayout::default(settings.channels as i32);
        let time_base = Rational::new(1, settings.sample_rate as i32);

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|source| MuxError::CodecOpen { kind, source })?;
        encoder.set_rate(settings.sample_rate as i32);
        encoder.set_channel_layout(layout);
        encoder.set_format(sample_format);
        encoder.set_bit_rate(settings.bit_rate);
        encoder.set_time_base(time_base);
        if global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
        }
        let encoder = encoder
            .open()
            .map_err(|source| MuxError::CodecOpen { kind, source })?;
        let encoder_time_base: Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };

        let resampler = if sample_format != INPUT_SAMPLE_FORMAT {
            log::debug!(
                "audio codec {} wants {:?}, converting from {:?}",
                codec.name(),
                sample_format,
                INPUT_SAMPLE_FORMAT
            );
            Some(
                resampling::Context::get(
                    INPUT_SAMPLE_FORMAT,
                    layout,
                    settings.sample_rate,
                    sample_format,
                    layout,
                    settings.sample_rate,
                )
                .map_err(|source| MuxError::CodecOpen { kind, source })?,
            )
        } else {
            None
        };

        let samples_per_frame =
            samples_per_frame(encoder.frame_size(), settings.channels, codec.id());
        let frame_bytes = samples_per_frame * INPUT_SAMPLE_BYTES * settings.channels as usize;
        if frame_bytes > max_frame_bytes {
            return Err(MuxError::InvalidSettings {
                reason: format!(
                    "{} frame of {} bytes does not fit carry-over capacity {}",
                    codec.name(),
                    frame_bytes,
                    max_frame_bytes
                ),
            });
        }
        let accepts_short_frame = codec
            .capabilities()
            .intersects(Capabilities::SMALL_LAST_FRAME | Capabilities::VARIABLE_FRAME_SIZE);

        let mut stream = output
            .add_stream(codec)
            .map_err(|source| MuxError::StreamAdd { kind, source })?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        let index = stream.index();

        log::debug!(
            "audio stream {}: codec frame_size={} -> {} samples per frame",
            index,
            encoder.frame_size(),
            samples_per_frame
        );

        Ok(Self {
            descriptor: StreamDescriptor::new(
                index,
                codec.name(),
                encoder_time_base,
                settings.bit_rate,
                StreamShape::Audio {
                    sample_rate: settings.sample_rate,
                    channels: settings.channels,
                    sample_format,
                },
            ),
            encoder,
            resampler,
            layout,
            samples_per_frame,
            accepts_short_frame,
            next_pts: 0,
        })
    }

    fn channels(&self) -> usize {
        match self.descriptor.shape() {
            StreamShape::Audio { channels, .. } => channels as usize,
            StreamShape::Video { .. } => unreachable!("audio encoder with video descriptor"),
        }
    }

    fn sample_rate(&self) -> u32 {
        match self.descriptor.shape() {
            StreamShape::Audio { sample_rate, .. } => sample_rate,
            StreamShape::Video { .. } => unreachable!("audio encoder with video descriptor"),
        }
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// Bytes of s16 input that make up one codec frame.
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame * INPUT_SAMPLE_BYTES * self.channels()
    }

    /// Whether the codec takes a final frame shorter than the others.
    pub fn accepts_short_frame(&self) -> bool {
        self.accepts_short_frame
    }

    /// Samples submitted so far, which is also the next frame's timestamp.
    pub fn next_pts(&self) -> i64 {
        self.next_pts
    }

    /// Submits one frame of interleaved s16 PCM.
    pub fn send(&mut self, pcm: &[u8]) -> Result<()> {
        let sample_frame = INPUT_SAMPLE_BYTES * self.channels();
        if pcm.is_empty() || pcm.len() % sample_frame != 0 {
            return Err(MuxError::InvalidInput {
                kind: StreamKind::Audio,
                reason: format!(
                    "{} bytes is not a whole number of {}-byte samples",
                    pcm.len(),
                    sample_frame
                ),
            });
        }
        let samples = pcm.len() / sample_frame;
        let encode_err = |source| MuxError::Encode {
            kind: StreamKind::Audio,
            source,
        };

        let mut frame = ffmpeg_next::frame::Audio::new(INPUT_SAMPLE_FORMAT, samples, self.layout);
        frame.set_rate(self.sample_rate());
        frame.data_mut(0)[..pcm.len()].copy_from_slice(pcm);
        frame.set_pts(Some(self.next_pts));

        let frame = match self.resampler {
            Some(ref mut resampler) => {
                let mut converted = ffmpeg_next::frame::Audio::empty();
                resampler.run(&frame, &mut converted).map_err(encode_err)?;
                converted.set_pts(Some(self.next_pts));
                converted
            }
            None => frame,
        };
        self.next_pts += samples as i64;

        self.encoder.send_frame(&frame).map_err(encode_err)
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.encoder.send_eof().map_err(|source| MuxError::Encode {
            kind: StreamKind::Audio,
            source,
        })
    }
}

impl PacketSource for SampleEncoder {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn receive(&mut self) -> Result<Option<EncodedPacket>> {
        loop {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) if packet.size() == 0 => continue,
                // A missing timestamp is left for the muxer to infer.
                Ok(()) => {
                    return Ok(Some(EncodedPacket::new(
                        packet,
                        StreamKind::Audio,
                        self.descriptor.codec_time_base(),
                    )));
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    return Ok(None);
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(source) => {
                    return Err(MuxError::Encode {
                        kind: StreamKind::Audio,
                        source,
                    });
                }
            }
        }
    }
}
