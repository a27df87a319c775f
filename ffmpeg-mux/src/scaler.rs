use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use crate::error::{MuxError, Result};
use crate::frame::{RawPicture, SOURCE_PIXEL_FORMAT};

/// Converts RGB24 pictures into the video encoder's pixel format.
///
/// The scaling context is built on first use and kept for the session; size and
/// formats never change once a session is open.
pub struct PixelConverter {
    dst_format: Pixel,
    width: u32,
    height: u32,
    context: Option<scaling::Context>,
}

impl PixelConverter {
    pub fn new(dst_format: Pixel, width: u32, height: u32) -> Self {
        Self {
            dst_format,
            width,
            height,
            context: None,
        }
    }

    pub fn needs_conversion(dst_format: Pixel) -> bool {
        dst_format != SOURCE_PIXEL_FORMAT
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Returns a freshly allocated picture in the destination format. The caller
    /// drops it after the single encode it is made for.
    pub fn convert(&mut self, src: &RawPicture) -> Result<ffmpeg_next::frame::Video> {
        let context = match self.context {
            Some(ref mut context) => context,
            None => {
                log::debug!(
                    "creating pixel converter {:?} -> {:?} at {}x{}",
                    SOURCE_PIXEL_FORMAT,
                    self.dst_format,
                    self.width,
                    self.height
                );
                let context = scaling::Context::get(
                    SOURCE_PIXEL_FORMAT,
                    self.width,
                    self.height,
                    self.dst_format,
                    self.width,
                    self.height,
                    scaling::Flags::BICUBLIN,
                )
                .map_err(MuxError::Convert)?;
                self.context.insert(context)
            }
        };

        let mut converted =
            ffmpeg_next::frame::Video::new(self.dst_format, self.width, self.height);
        context
            .run(src.as_video(), &mut converted)
            .map_err(MuxError::Convert)?;
        Ok(converted)
    }
}
