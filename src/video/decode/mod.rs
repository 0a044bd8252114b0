//! Pluggable decode backends
//!
//! Two interchangeable strategies turn candidate access units into
//! JPEGs published to the [`FrameCache`](super::cache::FrameCache):
//! the in-process openh264 backend ([`native`], feature-gated) and the
//! loopback relay into an external ffmpeg consumer ([`relay`]). Neither
//! is preferred by design; selection is an availability concern made
//! once at construction time.

#[cfg(feature = "native-decode")]
pub mod native;
pub mod relay;

use super::cache::FrameCache;
use crate::config::{DecoderMode, VideoConfig};
use crate::error::Result;
use std::sync::Arc;

/// Decode backend fed by the reconstruction stage
pub trait Decoder: Send {
    /// Feed one candidate access unit. Backends publish decoded frames
    /// to the cache they were constructed with; the in-process backend
    /// does so synchronously, the relay backend from its own threads.
    fn feed_chunk(&mut self, chunk: Vec<u8>);

    /// Last-resort attempt over the whole accumulated buffer, called
    /// only until the first frame has ever been produced. Default: no-op.
    fn feed_bulk(&mut self, _buffer: &[u8]) {}

    /// Release backend resources (processes, sockets, threads)
    fn shutdown(&mut self) {}

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Select and construct a decode backend
pub fn create_decoder(
    config: &VideoConfig,
    cache: Arc<FrameCache>,
) -> Result<Box<dyn Decoder>> {
    match config.decoder {
        DecoderMode::Native => {
            #[cfg(feature = "native-decode")]
            {
                Ok(Box::new(native::NativeDecoder::new(cache)?))
            }
            #[cfg(not(feature = "native-decode"))]
            {
                let _ = cache;
                Err(crate::error::Error::DecoderUnavailable(
                    "built without the native-decode feature",
                ))
            }
        }
        DecoderMode::Relay => Ok(Box::new(relay::RelayDecoder::new(cache, config)?)),
        DecoderMode::Auto => {
            #[cfg(feature = "native-decode")]
            match native::NativeDecoder::new(Arc::clone(&cache)) {
                Ok(decoder) => return Ok(Box::new(decoder)),
                Err(e) => log::warn!("native decoder unavailable ({}), using relay", e),
            }
            Ok(Box::new(relay::RelayDecoder::new(cache, config)?))
        }
    }
}
