/// Registers FFmpeg components. Call once at startup before opening a session.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod audio_encoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod reframer;
pub mod scaler;
pub mod session;
pub mod settings;
pub mod stream;

pub use error::{ErrorClass, MuxError};
pub use frame::RawPicture;
pub use metadata::{probe, scan_packets};
pub use output::AUTO_CONTAINER;
pub use session::{EncoderSession, SessionState, SessionStats, TickReport};
pub use settings::{AudioSettings, SessionSettings, VideoPtsPolicy, VideoSettings};
