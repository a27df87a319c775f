use std::ffi::{CStr, CString, c_int};

use ffmpeg_next::Rational;

use crate::{
    error::{MuxError, Result},
    packet::EncodedPacket,
    stream::StreamKind,
};

/// Container selector that infers the format from the output file name.
pub const AUTO_CONTAINER: &str = "auto";

/// The output container: header, interleaved packets, trailer.
pub struct MuxOutput {
    inner: ffmpeg_next::format::context::Output,
    path: String,
    format_name: String,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl MuxOutput {
    /// Resolves `container` to a muxer name. `"auto"` guesses from the extension of `path`.
    pub fn resolve_format(path: &str, container: &str) -> Result<String> {
        let not_found = || MuxError::FormatNotFound {
            name: if container == AUTO_CONTAINER {
                format!("no container matches {:?}", path)
            } else {
                container.to_string()
            },
        };
        let ptr = if container == AUTO_CONTAINER {
            let filename = CString::new(path).map_err(|_| not_found())?;
            unsafe {
                ffmpeg_next::ffi::av_guess_format(
                    std::ptr::null(),
                    filename.as_ptr(),
                    std::ptr::null(),
                )
            }
        } else {
            let name = CString::new(container).map_err(|_| not_found())?;
            unsafe {
                ffmpeg_next::ffi::av_guess_format(name.as_ptr(), std::ptr::null(), std::ptr::null())
            }
        };
        if ptr.is_null() {
            return Err(not_found());
        }
        let name = unsafe { CStr::from_ptr((*ptr).name) };
        Ok(name.to_string_lossy().into_owned())
    }

    /// Allocates the muxer context for `format_name` and, unless the muxer does its
    /// own I/O, opens `path` for writing. Nothing is left allocated on failure.
    pub fn create(path: &str, format_name: &str) -> Result<Self> {
        use ffmpeg_next::ffi;

        let open_err = |source| MuxError::OutputOpen {
            path: path.to_string(),
            source,
        };
        let c_path = CString::new(path).map_err(|_| open_err(ffmpeg_next::Error::InvalidData))?;
        let c_format = CString::new(format_name).map_err(|_| MuxError::FormatNotFound {
            name: format_name.to_string(),
        })?;

        let inner = unsafe {
            let mut ctx = std::ptr::null_mut();
            let ret = ffi::avformat_alloc_output_context2(
                &mut ctx,
                std::ptr::null_mut(),
                c_format.as_ptr(),
                c_path.as_ptr(),
            );
            if ret < 0 || ctx.is_null() {
                return Err(open_err(ffmpeg_next::Error::from(ret.min(-1))));
            }
            if (*(*ctx).oformat).flags & ffi::AVFMT_NOFILE as c_int == 0 {
                let ret = ffi::avio_open(
                    &mut (*ctx).pb,
                    c_path.as_ptr(),
                    ffi::AVIO_FLAG_WRITE as c_int,
                );
                if ret < 0 {
                    ffi::avformat_free_context(ctx);
                    return Err(open_err(ffmpeg_next::Error::from(ret)));
                }
            } else {
                log::debug!("muxer {} writes without a file handle", format_name);
            }
            ffmpeg_next::format::context::Output::wrap(ctx)
        };
        Ok(Self {
            inner,
            path: path.to_string(),
            format_name: format_name.to_string(),
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    /// Codec the container would pick for a stream of `kind`.
    pub fn default_codec(&self, kind: StreamKind) -> ffmpeg_next::codec::Id {
        self.inner.format().codec(&self.path, kind.into())
    }

    pub fn needs_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::flag::Flags::GLOBAL_HEADER)
    }

    pub fn context_mut(&mut self) -> &mut ffmpeg_next::format::context::Output {
        &mut self.inner
    }

    pub fn stream_time_base(&self, index: usize) -> Option<Rational> {
        self.inner.stream(index).map(|s| s.time_base())
    }

    /// Logs the stream layout through FFmpeg's own dump.
    pub fn dump(&self) {
        ffmpeg_next::format::context::output::dump(&self.inner, 0, Some(&self.path));
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.inner.write_header().map_err(MuxError::Header)?;
        self.have_written_header = true;
        Ok(())
    }

    /// Rescales `packet` from its codec time base to the stream's and hands it to
    /// the interleaving writer.
    pub fn write_interleaved(
        &mut self,
        stream_index: usize,
        mut packet: EncodedPacket,
    ) -> Result<()> {
        let kind = packet.kind();
        let Some(stream_time_base) = self.stream_time_base(stream_index) else {
            return Err(MuxError::Write {
                kind,
                source: ffmpeg_next::Error::StreamNotFound,
            });
        };
        let time_base = packet.time_base();
        let p = packet.get_mut();
        p.set_stream(stream_index);
        p.set_position(-1);
        p.rescale_ts(time_base, stream_time_base);
        log::trace!(
            "write {} packet: stream={} pts={:?} dts={:?} size={} key={}",
            kind,
            stream_index,
            p.pts(),
            p.dts(),
            p.size(),
            p.is_key()
        );
        p.write_interleaved(&mut self.inner)
            .map_err(|source| MuxError::Write { kind, source })
    }

    /// Writes the trailer once. No-op when the header never went out.
    pub fn finish(&mut self) -> Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer().map_err(MuxError::Trailer)?;
        }
        Ok(())
    }
}
