//! Toolkit-bridge decode
//!
//! Strategy A: reconstructed chunks go into a capacity-1 drop-oldest
//! queue; a relay thread forwards them verbatim over a loopback TCP
//! server to whichever consumer is connected (one at a time,
//! reconnect-tolerant). The consumer is an external `ffmpeg` process
//! that treats the loopback stream as a plain H.264 source and writes
//! MJPEG to stdout; complete JPEGs are cut out of that stream and
//! published to the frame cache. ffmpeg exiting (stream hiccup, missing
//! binary appearing later on PATH) is handled by respawning after a
//! short pause while the backend is running.

use super::Decoder;
use crate::config::VideoConfig;
use crate::error::Result;
use crate::video::cache::FrameCache;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause between consumer respawn attempts
const RESPAWN_DELAY: Duration = Duration::from_secs(2);

/// Poll interval for the non-blocking accept loop
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Poll interval while the chunk queue is empty
const QUEUE_POLL: Duration = Duration::from_millis(1);

/// JPEG frame markers in the MJPEG byte stream
const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Strategy A: relay chunks to an external decode consumer
pub struct RelayDecoder {
    queue: Arc<ArrayQueue<Vec<u8>>>,
    running: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    threads: Vec<JoinHandle<()>>,
    relay_port: u16,
}

impl RelayDecoder {
    pub fn new(cache: Arc<FrameCache>, config: &VideoConfig) -> Result<Self> {
        // freshness over completeness: one slot, oldest displaced
        let queue = Arc::new(ArrayQueue::new(1));
        let running = Arc::new(AtomicBool::new(true));
        let child = Arc::new(Mutex::new(None));

        // failing to bind the loopback port is a startup failure, not a
        // runtime one
        let listener = TcpListener::bind(("127.0.0.1", config.relay_port))?;
        listener.set_nonblocking(true)?;
        let relay_port = listener.local_addr()?.port();
        log::info!("video relay listening on 127.0.0.1:{}", relay_port);

        let mut threads = Vec::with_capacity(2);

        let relay_queue = Arc::clone(&queue);
        let relay_running = Arc::clone(&running);
        threads.push(
            thread::Builder::new()
                .name("video-relay".to_string())
                .spawn(move || relay_loop(listener, relay_queue, relay_running))?,
        );

        let consumer_running = Arc::clone(&running);
        let consumer_child = Arc::clone(&child);
        let ffmpeg_path = config.ffmpeg_path.clone();
        threads.push(
            thread::Builder::new()
                .name("video-consumer".to_string())
                .spawn(move || {
                    consumer_loop(
                        &ffmpeg_path,
                        relay_port,
                        cache,
                        consumer_child,
                        consumer_running,
                    )
                })?,
        );

        Ok(Self {
            queue,
            running,
            child,
            threads,
            relay_port,
        })
    }

    /// Loopback port the relay is serving on (useful when configured
    /// with port 0)
    pub fn local_port(&self) -> u16 {
        self.relay_port
    }
}

impl Decoder for RelayDecoder {
    fn feed_chunk(&mut self, chunk: Vec<u8>) {
        if self.queue.force_push(chunk).is_some() {
            log::trace!("relay queue full, displaced oldest chunk");
        }
    }

    fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // killing the consumer unblocks its stdout read; the relay loop
        // observes the flag between polls
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("relay thread panicked during shutdown");
            }
        }
        log::debug!("relay decoder stopped");
    }

    fn name(&self) -> &'static str {
        "relay-ffmpeg"
    }
}

impl Drop for RelayDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept one consumer at a time and forward queued chunks to it
fn relay_loop(listener: TcpListener, queue: Arc<ArrayQueue<Vec<u8>>>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        let mut stream = match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("relay consumer connected from {}", addr);
                stream
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                log::warn!("relay accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        while running.load(Ordering::Relaxed) {
            match queue.pop() {
                Some(chunk) => {
                    if let Err(e) = stream.write_all(&chunk) {
                        log::debug!("relay consumer dropped: {}", e);
                        break;
                    }
                }
                None => thread::sleep(QUEUE_POLL),
            }
        }
        // fall through to accept the next consumer
    }
    log::debug!("relay loop exited");
}

/// Keep an ffmpeg consumer alive and publish the JPEGs it emits
fn consumer_loop(
    ffmpeg_path: &str,
    relay_port: u16,
    cache: Arc<FrameCache>,
    child_slot: Arc<Mutex<Option<Child>>>,
    running: Arc<AtomicBool>,
) {
    let mut spawn_failure_logged = false;
    while running.load(Ordering::Relaxed) {
        let mut child = match spawn_ffmpeg(ffmpeg_path, relay_port) {
            Ok(child) => {
                spawn_failure_logged = false;
                child
            }
            Err(e) => {
                if !spawn_failure_logged {
                    log::warn!("could not start {}: {} (will keep retrying)", ffmpeg_path, e);
                    spawn_failure_logged = true;
                }
                sleep_while_running(&running, RESPAWN_DELAY);
                continue;
            }
        };

        let mut stdout = child.stdout.take();
        *child_slot.lock() = Some(child);

        if let Some(stdout) = stdout.as_mut() {
            read_mjpeg_stream(stdout, &cache, &running);
        }

        if let Some(mut child) = child_slot.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if running.load(Ordering::Relaxed) {
            log::debug!("video consumer exited, respawning in {:?}", RESPAWN_DELAY);
            sleep_while_running(&running, RESPAWN_DELAY);
        }
    }
    log::debug!("consumer loop exited");
}

fn spawn_ffmpeg(ffmpeg_path: &str, relay_port: u16) -> std::io::Result<Child> {
    Command::new(ffmpeg_path)
        .args([
            "-loglevel",
            "quiet",
            "-f",
            "h264",
            "-i",
            &format!("tcp://127.0.0.1:{}", relay_port),
            "-f",
            "image2pipe",
            "-c:v",
            "mjpeg",
            "-q:v",
            "5",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Read the consumer's MJPEG stream until it ends, publishing each
/// complete JPEG
fn read_mjpeg_stream(stdout: &mut impl Read, cache: &Arc<FrameCache>, running: &Arc<AtomicBool>) {
    let mut accumulated = Vec::with_capacity(64 * 1024);
    let mut read_buf = [0u8; 16 * 1024];
    while running.load(Ordering::Relaxed) {
        let n = match stdout.read(&mut read_buf) {
            Ok(0) => break, // consumer closed its stdout
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("consumer stdout read failed: {}", e);
                break;
            }
        };
        accumulated.extend_from_slice(&read_buf[..n]);
        while let Some(jpeg) = extract_jpeg(&mut accumulated) {
            cache.store(jpeg);
        }
    }
}

/// Cut the first complete JPEG out of `buf`.
///
/// Splitting on SOI/EOI markers is itself a heuristic (the EOI byte pair
/// can occur inside entropy-coded data), matching how MJPEG pipe output
/// is conventionally consumed; a mis-split yields one bad frame that the
/// next good frame replaces.
fn extract_jpeg(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find_marker(buf, &JPEG_SOI, 0)?;
    let end = find_marker(buf, &JPEG_EOI, start + JPEG_SOI.len())?;
    let frame = buf[start..end + JPEG_EOI.len()].to_vec();
    buf.drain(..end + JPEG_EOI.len());
    Some(frame)
}

fn find_marker(data: &[u8], marker: &[u8], from: usize) -> Option<usize> {
    if data.len() < marker.len() {
        return None;
    }
    (from..=data.len() - marker.len()).find(|&i| &data[i..i + marker.len()] == marker)
}

/// Sleep in short slices so shutdown is observed promptly
fn sleep_while_running(running: &Arc<AtomicBool>, total: Duration) {
    let mut remaining = total;
    while running.load(Ordering::Relaxed) && remaining > Duration::ZERO {
        let slice = remaining.min(Duration::from_millis(100));
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}
