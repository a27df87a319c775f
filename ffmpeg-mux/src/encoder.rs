use ffmpeg_next::{Dictionary, Rational, codec, format::Pixel};

use crate::{
    error::{MuxError, Result},
    packet::EncodedPacket,
    settings::{VideoPtsPolicy, VideoSettings},
    stream::{StreamDescriptor, StreamKind, StreamShape},
};

/// Something the session can pull finished packets out of.
pub trait PacketSource {
    fn descriptor(&self) -> &StreamDescriptor;

    /// Next finished packet, `None` when the encoder needs more input.
    fn receive(&mut self) -> Result<Option<EncodedPacket>>;
}

/// Looks up an encoder by explicit name, or falls back to the container's default codec.
pub fn find_encoder(
    kind: StreamKind,
    name: Option<&str>,
    default_id: codec::Id,
) -> Result<ffmpeg_next::Codec> {
    let codec = match name {
        Some(name) => ffmpeg_next::encoder::find_by_name(name).ok_or_else(|| {
            MuxError::EncoderNotFound {
                kind,
                codec: name.to_string(),
            }
        })?,
        None => {
            if default_id == codec::Id::None {
                return Err(MuxError::EncoderNotFound {
                    kind,
                    codec: "container has no default codec".to_string(),
                });
            }
            ffmpeg_next::encoder::find(default_id).ok_or_else(|| MuxError::EncoderNotFound {
                kind,
                codec: format!("{:?}", default_id).to_lowercase(),
            })?
        }
    };
    if codec.medium() != ffmpeg_next::media::Type::from(kind) {
        return Err(MuxError::EncoderNotFound {
            kind,
            codec: format!("{} is not a {} encoder", codec.name(), kind),
        });
    }
    Ok(codec)
}

/// YUV420P unless the codec cannot take it, in which case its first supported format.
fn pick_pixel_format(codec: &ffmpeg_next::Codec, requested: Option<Pixel>) -> Pixel {
    if let Some(format) = requested {
        return format;
    }
    let supported: Option<Vec<Pixel>> = codec
        .video()
        .ok()
        .and_then(|video| video.formats().map(|formats| formats.collect()));
    match supported {
        Some(formats) if !formats.contains(&Pixel::YUV420P) => {
            formats.first().copied().unwrap_or(Pixel::YUV420P)
        }
        _ => Pixel::YUV420P,
    }
}

enum VideoMode {
    /// Pictures are stored as-is; no encoder call.
    Raw,
    Compressed(ffmpeg_next::codec::encoder::Video),
}

/// Owns the video encoder and turns one picture at a time into packets.
pub struct FrameEncoder {
    descriptor: StreamDescriptor,
    mode: VideoMode,
    pts_policy: VideoPtsPolicy,
    frame_index: i64,
    pending_raw: Option<EncodedPacket>,
}

impl FrameEncoder {
    /// Opens the encoder and adds its stream to `output`.
    pub fn open(
        output: &mut ffmpeg_next::format::context::Output,
        settings: &VideoSettings,
        codec: ffmpeg_next::Codec,
        global_header: bool,
    ) -> Result<Self> {
        let kind = StreamKind::Video;
        let pixel_format = pick_pixel_format(&codec, settings.pixel_format);
        let time_base = settings.time_base();

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|source| MuxError::CodecOpen { kind, source })?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(pixel_format);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(settings.frame_rate));
        encoder.set_bit_rate(settings.bit_rate);
        encoder.set_gop(settings.gop);
        match codec.id() {
            codec::Id::MPEG2VIDEO => encoder.set_max_b_frames(2),
            // keeps chroma coefficients from overflowing on synthetic motion
            codec::Id::MPEG1VIDEO => {
                encoder.set_mb_decision(ffmpeg_next::encoder::Decision::RateDistortion)
            }
            _ => {}
        }
        if global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
        }

        let mut opts = Dictionary::new();
        for (key, value) in &settings.options {
            opts.set(key, value);
        }
        let encoder = encoder
            .open_with(opts)
            .map_err(|source| MuxError::CodecOpen { kind, source })?;
        let encoder_time_base: Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };

        let mut stream = output
            .add_stream(codec)
            .map_err(|source| MuxError::StreamAdd { kind, source })?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        let index = stream.index();

        let descriptor = StreamDescriptor::new(
            index,
            codec.name(),
            encoder_time_base,
            settings.bit_rate,
            StreamShape::Video {
                width: settings.width,
                height: settings.height,
                pixel_format,
            },
        );
        let mode = if codec.id() == codec::Id::RAWVIDEO {
            log::info!("video stream {} stores raw pictures", index);
            VideoMode::Raw
        } else {
            VideoMode::Compressed(encoder)
        };

        Ok(Self {
            descriptor,
            mode,
            pts_policy: settings.pts_policy,
            frame_index: 0,
            pending_raw: None,
        })
    }

    pub fn pixel_format(&self) -> Pixel {
        match self.descriptor.shape() {
            StreamShape::Video { pixel_format, .. } => pixel_format,
            StreamShape::Audio { .. } => unreachable!("video encoder with audio descriptor"),
        }
    }

    /// Pictures submitted so far.
    pub fn frame_count(&self) -> i64 {
        self.frame_index
    }

    /// Submits one picture already in the encoder's pixel format.
    pub fn send(&mut self, mut frame: ffmpeg_next::frame::Video) -> Result<()> {
        let pts = self.frame_index;
        self.frame_index += 1;
        frame.set_pts(Some(pts));
        match self.mode {
            VideoMode::Raw => {
                let mut packet = raw_picture_packet(&frame)?;
                packet.set_pts(Some(pts));
                packet.set_dts(Some(pts));
                packet.set_flags(codec::packet::Flags::KEY);
                self.pending_raw = Some(EncodedPacket::new(
                    packet,
                    StreamKind::Video,
                    self.descriptor.codec_time_base(),
                ));
                Ok(())
            }
            VideoMode::Compressed(ref mut encoder) => {
                encoder
                    .send_frame(&frame)
                    .map_err(|source| MuxError::Encode {
                        kind: StreamKind::Video,
                        source,
                    })
            }
        }
    }

    /// Signals end of stream so delayed packets can be received.
    pub fn send_eof(&mut self) -> Result<()> {
        match self.mode {
            VideoMode::Raw => Ok(()),
            VideoMode::Compressed(ref mut encoder) => {
                encoder.send_eof().map_err(|source| MuxError::Encode {
                    kind: StreamKind::Video,
                    source,
                })
            }
        }
    }
}

impl PacketSource for FrameEncoder {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn receive(&mut self) -> Result<Option<EncodedPacket>> {
        let encoder = match self.mode {
            VideoMode::Raw => return Ok(self.pending_raw.take()),
            VideoMode::Compressed(ref mut encoder) => encoder,
        };
        loop {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            match encoder.receive_packet(&mut packet) {
                Ok(()) if packet.size() == 0 => continue,
                Ok(()) => {
                    let pts = self.pts_policy.apply(packet.pts());
                    packet.set_pts(pts);
                    return Ok(Some(EncodedPacket::new(
                        packet,
                        StreamKind::Video,
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
                        kind: StreamKind::Video,
                        source,
                    });
                }
            }
        }
    }
}

/// Packs the picture planes without row padding, the layout raw video is stored in.
fn raw_picture_packet(
    frame: &ffmpeg_next::frame::Video,
) -> Result<ffmpeg_next::codec::packet::Packet> {
    let format: ffmpeg_next::ffi::AVPixelFormat = frame.format().into();
    let (width, height) = (frame.width() as i32, frame.height() as i32);
    let encode_err = |code: i32| MuxError::Encode {
        kind: StreamKind::Video,
        source: ffmpeg_next::Error::from(code),
    };

    let size = unsafe { ffmpeg_next::ffi::av_image_get_buffer_size(format, width, height, 1) };
    if size < 0 {
        return Err(encode_err(size));
    }
    let mut buffer = vec![0u8; size as usize];
    let copied = unsafe {
        let ptr = frame.as_ptr();
        ffmpeg_next::ffi::av_image_copy_to_buffer(
            buffer.as_mut_ptr(),
            size,
            (*ptr).data.as_ptr() as *const *const u8,
            (*ptr).linesize.as_ptr(),
            format,
            width,
            height,
            1,
        )
    };
    if copied < 0 {
        return Err(encode_err(copied));
    }
    Ok(ffmpeg_next::codec::packet::Packet::copy(&buffer))
}
