//! In-process decode via openh264
//!
//! A persistent decoder context is fed successive chunks; each decoded
//! picture is converted to RGB and re-encoded as JPEG once. Until the
//! first frame has ever been produced, the pipeline additionally offers
//! the whole accumulated buffer, which a fresh context decodes from the
//! top; that recovers streams whose parameter sets were missed by the
//! chunk heuristics.

use super::Decoder;
use crate::error::{Error, Result};
use crate::video::cache::FrameCache;
use openh264::decoder::{DecodedYUV, Decoder as H264Decoder};
use openh264::formats::YUVSource;
use std::sync::Arc;

/// JPEG re-encode quality
const JPEG_QUALITY: u8 = 80;

/// Strategy B: direct in-process decode
pub struct NativeDecoder {
    cache: Arc<FrameCache>,
    context: H264Decoder,
    frames: u64,
}

impl NativeDecoder {
    pub fn new(cache: Arc<FrameCache>) -> Result<Self> {
        let context = H264Decoder::new().map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Self {
            cache,
            context,
            frames: 0,
        })
    }

    /// Convert one decoded picture to a JPEG
    fn to_jpeg(yuv: &DecodedYUV) -> Option<Vec<u8>> {
        let (width, height) = yuv.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let mut rgb = vec![0u8; width * height * 3];
        yuv.write_rgb8(&mut rgb);

        let mut jpeg = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
        match encoder.encode(
            &rgb,
            width as u32,
            height as u32,
            image::ExtendedColorType::Rgb8,
        ) {
            Ok(()) => Some(jpeg),
            Err(e) => {
                log::debug!("jpeg encode failed: {}", e);
                None
            }
        }
    }
}

impl Decoder for NativeDecoder {
    fn feed_chunk(&mut self, chunk: Vec<u8>) {
        match self.context.decode(&chunk) {
            Ok(Some(yuv)) => {
                if let Some(jpeg) = Self::to_jpeg(&yuv) {
                    self.frames += 1;
                    if self.frames == 1 {
                        log::info!("first video frame decoded ({} bytes)", jpeg.len());
                    }
                    self.cache.store(jpeg);
                }
            }
            // the parser needs more data; normal mid-stream condition
            Ok(None) => {}
            // bad or partial chunks are expected with heuristic framing
            Err(e) => log::trace!("chunk decode failed: {}", e),
        }
    }

    fn feed_bulk(&mut self, buffer: &[u8]) {
        let mut fresh = match H264Decoder::new() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("bulk decode context failed: {}", e);
                return;
            }
        };
        if let Ok(Some(yuv)) = fresh.decode(buffer) {
            if let Some(jpeg) = Self::to_jpeg(&yuv) {
                log::info!("bulk decode produced the first frame ({} bytes)", jpeg.len());
                self.frames += 1;
                self.cache.store(jpeg);
            }
        }
    }

    fn name(&self) -> &'static str {
        "native-openh264"
    }
}
