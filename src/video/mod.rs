//! Video ingestion pipeline
//!
//! Reconstructs frames from the raw UDP transport stream and keeps the
//! latest decoded JPEG available to non-blocking readers. One receiver
//! thread owns the socket and the reconstruction buffer; decode either
//! happens inline (native backend) or in the relay backend's own
//! threads. Readers only ever touch the [`FrameCache`].
//!
//! Shutdown contract: a blocking socket read does not observe a flag
//! flip, so `stop()` both sets the flag and pokes the socket with an
//! empty datagram; the 1 s read timeout bounds the join either way.

pub mod buffer;
pub mod cache;
pub mod decode;
pub mod reconstruct;

pub use cache::FrameCache;

use crate::config::{FramingMode, VideoConfig};
use decode::Decoder;
use parking_lot::Mutex;
use reconstruct::{FrameReconstructor, ShortPacketFraming, StartCodeFraming, MIN_CHUNK_BYTES};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Socket read timeout; bounds shutdown latency in low-traffic conditions
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest expected video datagram
const MAX_DATAGRAM: usize = 2048;

/// Buffered bytes before the pre-first-frame bulk decode attempt runs
const BULK_DECODE_THRESHOLD: usize = 30_000;

/// Interval between liveness heartbeat logs
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Liveness counters, readable while the pipeline runs.
///
/// "Receiving data but not decoding yet" and "receiving nothing" are
/// different operational states; these counters let callers tell them
/// apart.
#[derive(Default)]
pub struct PipelineStats {
    packets: AtomicU64,
    first_packet: AtomicBool,
}

impl PipelineStats {
    fn record_packet(&self) -> u64 {
        let count = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.first_packet.swap(true, Ordering::Relaxed) {
            log::info!("first video packet received");
        }
        count
    }

    fn reset(&self) {
        self.packets.store(0, Ordering::Relaxed);
        self.first_packet.store(false, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn has_seen_packets(&self) -> bool {
        self.first_packet.load(Ordering::Relaxed)
    }
}

struct PipelineInner {
    receiver: Option<JoinHandle<()>>,
    /// Clone of the receive socket used to poke a blocked read on stop
    wake: Option<(UdpSocket, SocketAddr)>,
}

/// Owns the video UDP listener and all reconstruction/decode work
pub struct VideoPipeline {
    config: VideoConfig,
    cache: Arc<FrameCache>,
    stats: Arc<PipelineStats>,
    running: Arc<AtomicBool>,
    inner: Mutex<PipelineInner>,
}

impl VideoPipeline {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            cache: Arc::new(FrameCache::new()),
            stats: Arc::new(PipelineStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(PipelineInner {
                receiver: None,
                wake: None,
            }),
        }
    }

    /// Start reception and decode. Idempotent: returns `true` when
    /// already running. Returns `false` if the video port cannot be
    /// bound or no decode backend is available.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if self.running.load(Ordering::SeqCst) {
            return true;
        }

        let socket = match UdpSocket::bind(("0.0.0.0", self.config.bind_port)) {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("video: bind to port {} failed: {}", self.config.bind_port, e);
                return false;
            }
        };
        if let Err(e) = socket.set_read_timeout(Some(RECV_TIMEOUT)) {
            log::error!("video: set_read_timeout failed: {}", e);
            return false;
        }
        let local_port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                log::error!("video: local_addr failed: {}", e);
                return false;
            }
        };

        let decoder = match decode::create_decoder(&self.config, Arc::clone(&self.cache)) {
            Ok(decoder) => decoder,
            Err(e) => {
                log::error!("video: no decode backend available: {}", e);
                return false;
            }
        };
        log::info!(
            "video pipeline starting on udp port {} ({:?} framing, {} decode)",
            local_port,
            self.config.framing,
            decoder.name()
        );

        let reconstructor: Box<dyn FrameReconstructor> = match self.config.framing {
            FramingMode::ShortPacket => Box::new(ShortPacketFraming::new()),
            FramingMode::StartCode => Box::new(StartCodeFraming::new(self.config.nals_per_chunk)),
        };

        // buffers and the frame cache live only for this run
        self.cache.clear();
        self.stats.reset();
        self.running.store(true, Ordering::SeqCst);

        let wake = socket
            .try_clone()
            .ok()
            .map(|clone| (clone, SocketAddr::from(([127, 0, 0, 1], local_port))));

        let cache = Arc::clone(&self.cache);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let receiver = thread::Builder::new()
            .name("video-recv".to_string())
            .spawn(move || receiver_loop(socket, reconstructor, decoder, cache, stats, running));
        match receiver {
            Ok(handle) => {
                inner.receiver = Some(handle);
                inner.wake = wake;
                true
            }
            Err(e) => {
                log::error!("video: could not spawn receiver thread: {}", e);
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop reception, unblock any in-flight read, and join background
    /// work. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.running.store(false, Ordering::SeqCst);
        // empty datagram wakes a blocked recv immediately
        if let Some((socket, target)) = inner.wake.take() {
            let _ = socket.send_to(&[], target);
        }
        if let Some(handle) = inner.receiver.take() {
            if handle.join().is_err() {
                log::warn!("video receiver thread panicked");
            }
            log::info!("video pipeline stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest decoded JPEG; never blocks beyond a lock acquisition
    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        self.cache.latest()
    }

    /// True once any frame has ever been decoded during the current run
    pub fn has_ever_received_frame(&self) -> bool {
        self.cache.has_ever_decoded()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receiver_loop(
    socket: UdpSocket,
    mut reconstructor: Box<dyn FrameReconstructor>,
    mut decoder: Box<dyn Decoder>,
    cache: Arc<FrameCache>,
    stats: Arc<PipelineStats>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut last_heartbeat = Instant::now();

    while running.load(Ordering::Relaxed) {
        let n = match socket.recv_from(&mut buf) {
            Ok((n, _)) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                heartbeat(&stats, &cache, &mut last_heartbeat);
                continue;
            }
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    log::warn!("video recv error: {}", e);
                }
                break;
            }
        };
        if n == 0 {
            // wake datagram; the loop condition decides whether to exit
            continue;
        }

        stats.record_packet();

        if let Some(chunk) = reconstructor.push(&buf[..n]) {
            if chunk.len() >= MIN_CHUNK_BYTES {
                decoder.feed_chunk(chunk);
            }
        }

        // some decoder implementations need full container framing the
        // raw stream lacks; offer the whole buffer until something
        // decodes
        if !cache.has_ever_decoded() && reconstructor.buffered().len() >= BULK_DECODE_THRESHOLD {
            decoder.feed_bulk(reconstructor.buffered());
            if cache.has_ever_decoded() {
                reconstructor.reset();
            }
        }

        heartbeat(&stats, &cache, &mut last_heartbeat);
    }

    decoder.shutdown();
    log::debug!("video receiver loop exited");
}

/// Throttled liveness log
fn heartbeat(stats: &PipelineStats, cache: &FrameCache, last: &mut Instant) {
    if last.elapsed() >= HEARTBEAT_INTERVAL {
        log::debug!(
            "video liveness: {} packets received, {} frames decoded",
            stats.packets_received(),
            cache.frames_decoded()
        );
        *last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderMode;

    fn test_config() -> VideoConfig {
        VideoConfig {
            bind_port: 0,
            relay_port: 0,
            // keep tests hermetic: no native lib, no real ffmpeg
            decoder: DecoderMode::Relay,
            ffmpeg_path: "ffmpeg-binary-that-does-not-exist".to_string(),
            ..VideoConfig::default()
        }
    }

    #[test]
    fn start_is_idempotent_and_stop_is_prompt() {
        let pipeline = VideoPipeline::new(test_config());
        assert!(!pipeline.is_running());
        assert!(pipeline.start());
        assert!(pipeline.start()); // already running
        assert!(pipeline.is_running());
        assert_eq!(pipeline.latest_frame(), None);
        assert!(!pipeline.has_ever_received_frame());

        // the receiver is blocked in recv_from right now; stop must
        // still return promptly
        let started = Instant::now();
        pipeline.stop();
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "stop took {:?}",
            started.elapsed()
        );
        assert!(!pipeline.is_running());
        pipeline.stop(); // idempotent
    }

    #[test]
    fn counts_received_packets() {
        let pipeline = VideoPipeline::new(test_config());
        assert!(pipeline.start());

        // discover the bound port via the wake socket clone
        let port = {
            let inner = pipeline.inner.lock();
            inner.wake.as_ref().unwrap().1.port()
        };
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for _ in 0..5 {
            sender.send_to(&[0x42; 64], ("127.0.0.1", port)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.stats().packets_received() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(pipeline.stats().has_seen_packets());
        assert_eq!(pipeline.stats().packets_received(), 5);
        pipeline.stop();
    }

    #[test]
    fn restart_clears_cache_and_stats() {
        let pipeline = VideoPipeline::new(test_config());
        pipeline.cache.store(vec![1]);
        assert!(pipeline.start());
        // start() clears the previous run's frame
        assert_eq!(pipeline.latest_frame(), None);
        assert_eq!(pipeline.stats().packets_received(), 0);
        pipeline.stop();
    }
}
