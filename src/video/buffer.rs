//! Rolling byte accumulation for the raw video stream
//!
//! Bounded memory over correctness: the buffer is capped at 1 MiB and
//! drops its oldest half on overflow. Loss shows up as a decode failure
//! downstream, which the pipeline already tolerates.

/// Accumulation cap
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// Rolling accumulation buffer owned by the reconstruction stage
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(64 * 1024),
        }
    }

    /// Append datagram bytes, discarding the oldest half on overflow
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > MAX_BUFFER_BYTES {
            let dropped = self.data.len() - MAX_BUFFER_BYTES / 2;
            self.data.drain(..dropped);
            log::debug!("video buffer overflow, dropped {} oldest bytes", dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take the full accumulated contents, leaving the buffer empty
    pub fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Discard everything before `pos`
    pub fn drain_to(&mut self, pos: usize) {
        let pos = pos.min(self.data.len());
        self.data.drain(..pos);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the next NAL start code (`00 00 01` or `00 00 00 01`) at or
/// after `from`; returns the offset of its first zero byte.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                return Some(i);
            }
            if i + 4 <= data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Find the start code following the unit that begins at `at`
pub fn next_start_code(data: &[u8], at: usize) -> Option<usize> {
    let skip = if at + 4 <= data.len() && data[at + 2] == 0x00 && data[at + 3] == 0x01 {
        at + 4
    } else {
        at + 3
    };
    find_start_code(data, skip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_keeps_newest_half() {
        let mut buf = FrameBuffer::new();
        buf.extend(&vec![0xAA; MAX_BUFFER_BYTES]);
        assert_eq!(buf.len(), MAX_BUFFER_BYTES);
        buf.extend(&[0xBB; 4]);
        assert_eq!(buf.len(), MAX_BUFFER_BYTES / 2);
        // newest bytes survive at the tail
        let tail = &buf.as_slice()[buf.len() - 4..];
        assert_eq!(tail, &[0xBB; 4]);
    }

    #[test]
    fn start_code_scanner_finds_exact_offsets() {
        // three start codes: 3-byte at 0, 4-byte at 8, 3-byte at 17
        let mut data = Vec::new();
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0xFF]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, 0xAB]);
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0x88, 0x84]);

        let mut offsets = Vec::new();
        let mut pos = find_start_code(&data, 0);
        while let Some(at) = pos {
            offsets.push(at);
            pos = next_start_code(&data, at);
        }
        assert_eq!(offsets, vec![0, 8, 17]);
    }

    #[test]
    fn scanner_ignores_lone_zero_pairs() {
        let data = [0x00, 0x00, 0x02, 0x00, 0x00, 0xFF, 0x01];
        assert_eq!(find_start_code(&data, 0), None);
    }

    #[test]
    fn take_all_and_drain() {
        let mut buf = FrameBuffer::new();
        buf.extend(&[1, 2, 3, 4, 5]);
        buf.drain_to(2);
        assert_eq!(buf.as_slice(), &[3, 4, 5]);
        assert_eq!(buf.take_all(), vec![3, 4, 5]);
        assert!(buf.is_empty());
    }
}
