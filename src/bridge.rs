//! Bridge facade
//!
//! Composes the command translator, the UDP link, the position
//! estimator, and the video pipeline into the surface the web layer
//! calls. The link and the estimator live and die together as one
//! session per connection attempt: reconnecting always starts from a
//! fresh estimator, so a stale pose can never survive a reconnect.
//!
//! The session mutex is the single logical owner the link's
//! one-outstanding-command rule requires; callers may invoke
//! [`DroneBridge::send_command`] from any thread and commands still go
//! out strictly serialized. Pose telemetry is published to a separate
//! snapshot slot after every estimator change, so `position()` and the
//! geofence check never wait behind an in-flight command.

use crate::commands;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::link::DroneLink;
use crate::position::{PositionEstimator, PositionSnapshot};
use crate::video::VideoPipeline;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;

/// Command link plus the estimator tracking it; one per connection
struct Session {
    link: DroneLink,
    estimator: PositionEstimator,
}

/// The external interface of the drone transport subsystem
pub struct DroneBridge {
    config: AppConfig,
    remote: SocketAddr,
    command_timeout: Duration,
    session: Mutex<Option<Session>>,
    /// Latest pose, republished after every estimator change. Lock
    /// order is session before telemetry, never the reverse.
    telemetry: Mutex<Option<PositionSnapshot>>,
    video: VideoPipeline,
}

impl DroneBridge {
    /// Build a bridge from configuration. Fails only on an unusable
    /// vehicle address; transport problems surface later as degraded
    /// results, not errors.
    pub fn new(config: AppConfig) -> Result<Self> {
        let remote: SocketAddr = config
            .drone
            .address
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("drone address {:?}", config.drone.address)))?;
        let command_timeout = Duration::from_secs(config.drone.command_timeout_secs);
        let video = VideoPipeline::new(config.video.clone());
        Ok(Self {
            config,
            remote,
            command_timeout,
            session: Mutex::new(None),
            telemetry: Mutex::new(None),
            video,
        })
    }

    /// Establish the command link. Idempotent while connected; a failed
    /// attempt leaves no session behind. Each successful connect starts
    /// a fresh estimator.
    pub fn connect(&self) -> bool {
        let mut session = self.session.lock();
        if let Some(existing) = session.as_ref() {
            if existing.link.is_connected() {
                return true;
            }
        }
        *session = None;
        *self.telemetry.lock() = None;

        let mut link = DroneLink::new(self.remote, self.config.drone.local_port, self.command_timeout);
        if !link.connect() {
            return false;
        }
        let fresh = Session {
            link,
            estimator: PositionEstimator::new(self.config.geofence.max_distance_cm),
        };
        *self.telemetry.lock() = Some(fresh.estimator.snapshot());
        *session = Some(fresh);
        true
    }

    /// Tear down the command link and its estimator. Idempotent.
    pub fn disconnect(&self) {
        if let Some(mut session) = self.session.lock().take() {
            session.link.disconnect();
            *self.telemetry.lock() = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.link.is_connected())
            .unwrap_or(false)
    }

    /// Translate and execute one symbolic command.
    ///
    /// Returns the vehicle's response text, or `None` for an
    /// unrecognized control id, a missing connection, or an
    /// unacknowledged send. The estimator is updated only for
    /// acknowledged commands.
    pub fn send_command(&self, control_id: &str, value: Option<i64>) -> Option<String> {
        let wire = commands::translate(control_id, value)?;
        let mut guard = self.session.lock();
        let session = guard.as_mut()?;
        if !session.link.is_connected() {
            return None;
        }
        let response = session.link.send_command(&wire, self.command_timeout)?;
        session.estimator.update_after_command(&wire);
        self.publish_telemetry(session);
        Some(response)
    }

    /// Republish the pose snapshot; called with the session lock held
    fn publish_telemetry(&self, session: &Session) {
        *self.telemetry.lock() = Some(session.estimator.snapshot());
    }

    /// Translate and send one symbolic command without waiting for a
    /// response. Returns `false` only for unrecognized ids or a missing
    /// connection; the send itself is best-effort.
    pub fn send_command_async(&self, control_id: &str, value: Option<i64>) -> bool {
        let Some(wire) = commands::translate(control_id, value) else {
            return false;
        };
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if !session.link.is_connected() {
            return false;
        }
        session.link.send_command_async(&wire);
        // no acknowledgment will come; keep the model in step with what
        // was commanded
        session.estimator.update_after_command(&wire);
        self.publish_telemetry(session);
        true
    }

    /// Read-only pose telemetry; `None` before the first connect.
    /// Reads the published snapshot, never the session itself, so the
    /// call returns immediately even while a command is in flight.
    pub fn position(&self) -> Option<PositionSnapshot> {
        *self.telemetry.lock()
    }

    /// Geofence check on the last published pose
    pub fn should_return_home(&self) -> bool {
        self.position()
            .map(|pos| pos.armed && pos.distance_from_home > pos.max_distance_cm)
            .unwrap_or(false)
    }

    /// Advisory return-home plan from the pose at planning time
    pub fn return_home_plan(&self) -> Vec<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.estimator.return_home_commands())
            .unwrap_or_default()
    }

    /// Execute the return-home plan step by step.
    ///
    /// Each step is best-effort: a failed step is logged and the
    /// remainder still runs. Returns the number of acknowledged steps so
    /// the caller can decide whether to alarm. The session lock is taken
    /// per step, so telemetry reads interleave with a running plan.
    pub fn execute_return_home(&self) -> usize {
        let plan = self.return_home_plan();
        if plan.is_empty() {
            return 0;
        }
        log::warn!("executing return-home plan: {:?}", plan);
        let mut acknowledged = 0;
        for step in &plan {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                log::warn!("return-home aborted: link went away");
                break;
            };
            match session.link.send_command(step, self.command_timeout) {
                Some(_) => {
                    session.estimator.update_after_command(step);
                    self.publish_telemetry(session);
                    acknowledged += 1;
                }
                None => log::warn!("return-home step {:?} not acknowledged, continuing", step),
            }
        }
        log::info!(
            "return-home plan finished: {}/{} steps acknowledged",
            acknowledged,
            plan.len()
        );
        acknowledged
    }

    // Video lifecycle passthrough; the pipeline runs independently of
    // the command link.

    pub fn start_video(&self) -> bool {
        self.video.start()
    }

    pub fn stop_video(&self) {
        self.video.stop()
    }

    pub fn is_video_running(&self) -> bool {
        self.video.is_running()
    }

    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        self.video.latest_frame()
    }

    pub fn has_ever_received_frame(&self) -> bool {
        self.video.has_ever_received_frame()
    }
}

impl Drop for DroneBridge {
    fn drop(&mut self) {
        self.video.stop();
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderMode;
    use std::net::UdpSocket;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    /// Loopback stand-in for the vehicle: acknowledges everything with
    /// "ok" and records what it was sent
    fn fake_drone(running: Arc<AtomicBool>) -> (SocketAddr, Arc<parking_lot::Mutex<Vec<String>>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while running.load(Ordering::Relaxed) {
                if let Ok((n, from)) = socket.recv_from(&mut buf) {
                    let cmd = String::from_utf8_lossy(&buf[..n]).to_string();
                    received_clone.lock().push(cmd);
                    socket.send_to(b"ok", from).unwrap();
                }
            }
        });
        (addr, received)
    }

    fn test_bridge(addr: SocketAddr) -> DroneBridge {
        let mut config = AppConfig::default();
        config.drone.address = addr.to_string();
        config.drone.local_port = 0;
        config.drone.command_timeout_secs = 2;
        config.video.bind_port = 0;
        config.video.relay_port = 0;
        config.video.decoder = DecoderMode::Relay;
        config.video.ffmpeg_path = "ffmpeg-binary-that-does-not-exist".to_string();
        DroneBridge::new(config).unwrap()
    }

    #[test]
    fn command_flow_updates_estimator() {
        let running = Arc::new(AtomicBool::new(true));
        let (addr, received) = fake_drone(Arc::clone(&running));
        let bridge = test_bridge(addr);

        assert!(bridge.connect());
        assert!(bridge.is_connected());
        assert!(bridge.connect()); // idempotent

        assert!(bridge.send_command("takeoff", None).is_some());
        assert!(bridge.send_command("forward", Some(100)).is_some());
        let pos = bridge.position().unwrap();
        assert!((pos.x - 100.0).abs() < 1e-6);
        assert!(pos.armed);

        // handshake + takeoff + forward, as wire commands
        let sent = received.lock().clone();
        assert_eq!(sent, vec!["command", "takeoff", "forward 100"]);

        // unknown ids degrade to None without touching the link
        assert_eq!(bridge.send_command("dance", None), None);
        assert_eq!(received.lock().len(), 3);

        running.store(false, Ordering::Relaxed);
        bridge.disconnect();
        assert!(!bridge.is_connected());
    }

    #[test]
    fn reconnect_resets_estimator() {
        let running = Arc::new(AtomicBool::new(true));
        let (addr, _received) = fake_drone(Arc::clone(&running));
        let bridge = test_bridge(addr);

        assert!(bridge.connect());
        bridge.send_command("takeoff", None);
        bridge.send_command("forward", Some(100));
        assert!(bridge.position().unwrap().x > 0.0);

        bridge.disconnect();
        assert_eq!(bridge.position(), None);

        assert!(bridge.connect());
        let pos = bridge.position().unwrap();
        assert_eq!(pos.x, 0.0);
        assert!(!pos.armed);
        running.store(false, Ordering::Relaxed);
    }

    #[test]
    fn geofence_drives_return_home() {
        let running = Arc::new(AtomicBool::new(true));
        let (addr, received) = fake_drone(Arc::clone(&running));
        let mut bridge = test_bridge(addr);
        bridge.config.geofence.max_distance_cm = 300.0;

        assert!(bridge.connect());
        bridge.send_command("takeoff", None);
        assert!(!bridge.should_return_home());
        bridge.send_command("back", Some(500));
        assert!(bridge.should_return_home());

        let acknowledged = bridge.execute_return_home();
        assert_eq!(acknowledged, 2);
        let sent = received.lock().clone();
        assert_eq!(&sent[sent.len() - 2..], &["forward 400", "forward 100"]);
        // executed steps fed the estimator; we are home again
        assert!(!bridge.should_return_home());
        assert!(bridge.position().unwrap().distance_from_home < 20.0);
        running.store(false, Ordering::Relaxed);
    }

    /// Vehicle stand-in that waits before acknowledging, keeping each
    /// command in flight for `delay`
    fn slow_drone(running: Arc<AtomicBool>, delay: Duration) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while running.load(Ordering::Relaxed) {
                if let Ok((_, from)) = socket.recv_from(&mut buf) {
                    thread::sleep(delay);
                    socket.send_to(b"ok", from).unwrap();
                }
            }
        });
        addr
    }

    #[test]
    fn telemetry_reads_do_not_block_behind_inflight_command() {
        let running = Arc::new(AtomicBool::new(true));
        let addr = slow_drone(Arc::clone(&running), Duration::from_millis(400));
        let bridge = Arc::new(test_bridge(addr));
        assert!(bridge.connect());
        assert!(bridge.send_command("takeoff", None).is_some());

        let sender = Arc::clone(&bridge);
        let worker = thread::spawn(move || sender.send_command("forward", Some(100)));

        // let the worker get its command onto the wire
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        let pos = bridge.position().unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "position() stalled for {:?}",
            started.elapsed()
        );
        assert!(!bridge.should_return_home());
        // the in-flight command has not been acknowledged yet
        assert_eq!(pos.x, 0.0);

        assert!(worker.join().unwrap().is_some());
        assert!((bridge.position().unwrap().x - 100.0).abs() < 1e-6);
        running.store(false, Ordering::Relaxed);
    }

    #[test]
    fn operations_degrade_without_connection() {
        let bridge = test_bridge("127.0.0.1:9".parse().unwrap());
        assert!(!bridge.is_connected());
        assert_eq!(bridge.send_command("takeoff", None), None);
        assert!(!bridge.send_command_async("takeoff", None));
        assert_eq!(bridge.position(), None);
        assert!(!bridge.should_return_home());
        assert!(bridge.return_home_plan().is_empty());
        assert_eq!(bridge.execute_return_home(), 0);
    }
}
