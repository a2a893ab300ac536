//! vigil-media - Media server access for Vigil
//!
//! Resolves channels to live stream names and grabs single frames over RTSP.

mod capture;
mod error;
mod resolver;

pub use capture::{check_ffmpeg, decode_frame, CaptureConfig, FrameAcquirer};
pub use error::{MediaError, Result};
pub use resolver::{
    match_stream, MediaEntry, ResolvedStream, ResolverConfig, StreamResolver, StreamSource,
};
