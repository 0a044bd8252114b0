//! UDP command link to the vehicle
//!
//! Synchronous command/response protocol: one datagram out, then block
//! (with timeout) on the receive queue until the reply arrives. The link
//! enforces at most one outstanding command through `&mut self`; callers
//! that need concurrent issuance serialize through one owner (the bridge
//! facade wraps the link in a mutex for exactly this reason).
//!
//! Every transport failure degrades to a `None`/`false` result. Losing a
//! response is an expected condition on this link, not an error path.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Socket-level read timeout. Short so that the overall command deadline
/// and daemon shutdown are both observed promptly.
const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Handshake command expected to be acknowledged with "ok"
const HANDSHAKE_COMMAND: &str = "command";

/// Maximum expected response datagram size
const MAX_RESPONSE_BYTES: usize = 1024;

/// Single-outstanding UDP command link
pub struct DroneLink {
    remote: SocketAddr,
    local_port: u16,
    command_timeout: Duration,
    socket: Option<UdpSocket>,
    connected: bool,
    last_response: Option<String>,
}

impl DroneLink {
    /// Create an unconnected link to `remote`, binding locally to
    /// `local_port` on connect (0 = ephemeral)
    pub fn new(remote: SocketAddr, local_port: u16, command_timeout: Duration) -> Self {
        Self {
            remote,
            local_port,
            command_timeout,
            socket: None,
            connected: false,
            last_response: None,
        }
    }

    /// Open the socket and perform the handshake.
    ///
    /// Returns `false` (never panics or errors) on bind failure, send
    /// failure, timeout, or a reply without an "ok" token.
    pub fn connect(&mut self) -> bool {
        if self.connected {
            return true;
        }

        let socket = match UdpSocket::bind(("0.0.0.0", self.local_port)) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("command link: bind to port {} failed: {}", self.local_port, e);
                return false;
            }
        };
        if let Err(e) = socket.set_read_timeout(Some(RECV_POLL_TIMEOUT)) {
            log::warn!("command link: set_read_timeout failed: {}", e);
            return false;
        }
        self.socket = Some(socket);

        match self.send_command(HANDSHAKE_COMMAND, self.command_timeout) {
            Some(reply) if reply.to_ascii_lowercase().contains("ok") => {
                self.connected = true;
                log::info!("command link established to {}", self.remote);
                true
            }
            Some(reply) => {
                log::warn!("command link: unexpected handshake reply {:?}", reply);
                self.socket = None;
                false
            }
            None => {
                log::warn!("command link: no handshake reply from {}", self.remote);
                self.socket = None;
                false
            }
        }
    }

    /// Send one command and wait up to `timeout` for the reply.
    ///
    /// Returns the decoded response text, or `None` on any transport
    /// error or timeout. Datagrams are drained from the receive queue;
    /// the first one that arrives within the deadline is the reply
    /// (responses are not pipelined, so there is nothing to correlate).
    pub fn send_command(&mut self, command: &str, timeout: Duration) -> Option<String> {
        let socket = self.socket.as_ref()?;
        self.last_response = None;

        if let Err(e) = socket.send_to(command.as_bytes(), self.remote) {
            log::warn!("command link: send of {:?} failed: {}", command, e);
            return None;
        }
        log::debug!("command link: sent {:?}", command);

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_RESPONSE_BYTES];
        while Instant::now() < deadline {
            match socket.recv_from(&mut buf) {
                Ok((n, _)) => {
                    let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                    log::debug!("command link: {:?} -> {:?}", command, text);
                    self.last_response = Some(text.clone());
                    return Some(text);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    log::warn!("command link: recv failed: {}", e);
                    return None;
                }
            }
        }

        log::warn!("command link: {:?} not acknowledged within {:?}", command, timeout);
        None
    }

    /// Send with the link's configured response timeout
    pub fn send_command_default(&mut self, command: &str) -> Option<String> {
        self.send_command(command, self.command_timeout)
    }

    /// Fire-and-forget send: no response wait, errors swallowed
    pub fn send_command_async(&self, command: &str) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        if let Err(e) = socket.send_to(command.as_bytes(), self.remote) {
            log::debug!("command link: async send of {:?} failed: {}", command, e);
        }
    }

    /// Close the socket and clear the connected flag. Idempotent; a
    /// blocked `send_command` on another owner cannot exist because the
    /// link is `&mut`-exclusive.
    pub fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            log::info!("command link to {} closed", self.remote);
        }
        self.connected = false;
        self.last_response = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Most recent response text, if any
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }
}

impl Drop for DroneLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;

    /// Spawn a loopback peer that answers each datagram with `reply`
    fn echo_peer(reply: &'static str, count: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            for _ in 0..count {
                if let Ok((_, from)) = socket.recv_from(&mut buf) {
                    socket.send_to(reply.as_bytes(), from).unwrap();
                }
            }
        });
        addr
    }

    #[test]
    fn connect_succeeds_on_ok_reply() {
        let peer = echo_peer("ok", 1);
        let mut link = DroneLink::new(peer, 0, Duration::from_secs(2));
        assert!(link.connect());
        assert!(link.is_connected());
        link.disconnect();
        assert!(!link.is_connected());
        // disconnect is idempotent
        link.disconnect();
    }

    #[test]
    fn connect_fails_on_non_ok_reply() {
        let peer = echo_peer("error", 1);
        let mut link = DroneLink::new(peer, 0, Duration::from_secs(2));
        assert!(!link.connect());
        assert!(!link.is_connected());
    }

    #[test]
    fn send_command_returns_reply_text() {
        let peer = echo_peer("OK", 2);
        let mut link = DroneLink::new(peer, 0, Duration::from_secs(2));
        assert!(link.connect());
        let reply = link.send_command("forward 50", Duration::from_secs(2));
        assert_eq!(reply.as_deref(), Some("OK"));
        assert_eq!(link.last_response(), Some("OK"));
    }

    #[test]
    fn send_command_times_out_to_none() {
        // peer answers the handshake only, then goes silent
        let peer = echo_peer("ok", 1);
        let mut link = DroneLink::new(peer, 0, Duration::from_secs(2));
        assert!(link.connect());
        let started = Instant::now();
        assert_eq!(link.send_command("forward 50", Duration::from_millis(200)), None);
        // bounded by the deadline plus one socket poll interval
        assert!(started.elapsed() < RECV_POLL_TIMEOUT + Duration::from_secs(1));
        // the link itself stays connected; a lost reply is not fatal
        assert!(link.is_connected());
    }

    #[test]
    fn send_without_socket_is_none() {
        let mut link = DroneLink::new("127.0.0.1:9".parse().unwrap(), 0, Duration::from_secs(1));
        assert_eq!(link.send_command("land", Duration::from_millis(10)), None);
        link.send_command_async("land"); // swallowed, no panic
    }
}
