use ffmpeg_next::format::Pixel;

/// Pixel layout every caller-supplied picture is in.
pub const SOURCE_PIXEL_FORMAT: Pixel = Pixel::RGB24;

/// One raw picture handed to the session for a single tick.
///
/// A picture without a first data plane carries no video for that tick.
pub struct RawPicture {
    frame: ffmpeg_next::frame::Video,
}

impl RawPicture {
    /// Allocates a zeroed RGB24 picture.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: ffmpeg_next::frame::Video::new(SOURCE_PIXEL_FORMAT, width, height),
        }
    }

    /// A picture with no pixel data.
    pub fn empty() -> Self {
        Self {
            frame: ffmpeg_next::frame::Video::empty(),
        }
    }

    /// Copies tightly packed RGB24 rows into a new picture.
    pub fn from_rgb24(data: &[u8], width: u32, height: u32) -> anyhow::Result<Self> {
        let row = width as usize * 3;
        if data.len() != row * height as usize {
            anyhow::bail!(
                "invalid rgb24 size: got {}, expected {} ({}x{}x3)",
                data.len(),
                row * height as usize,
                width,
                height
            );
        }
        let mut picture = Self::new(width, height);
        let stride = picture.stride();
        let dst = picture.frame.data_mut(0);
        for (y, src) in data.chunks_exact(row).enumerate() {
            dst[y * stride..y * stride + row].copy_from_slice(src);
        }
        Ok(picture)
    }

    pub fn has_data(&self) -> bool {
        unsafe { !(*self.frame.as_ptr()).data[0].is_null() }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> Pixel {
        self.frame.format()
    }

    /// Bytes per row of the first plane, padding included.
    pub fn stride(&self) -> usize {
        self.frame.stride(0)
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.data_mut(0)
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }
}

impl From<ffmpeg_next::frame::Video> for RawPicture {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}
