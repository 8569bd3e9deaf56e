//! Bounded, human-readable log of serial traffic.

/// Marker inserted when traffic switches to device → host.
const READ_MARKER: &str = "🡄 ";
/// Marker inserted when traffic switches to host → device.
const WRITE_MARKER: &str = "🡆 ";

/// Traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Device → host.
    Read,
    /// Host → device.
    Write,
}

/// Append-only ring of rendered traffic, bounded to `capacity` bytes.
///
/// Control characters other than CR and LF are shown in caret notation
/// (`0x03` → `^C`).
#[derive(Debug)]
pub(crate) struct TrafficLog {
    /// Rendered text, oldest first.
    buffer: String,
    /// Maximum length of `buffer` in bytes.
    capacity: usize,
    /// Direction of the last recorded chunk.
    last: Option<Direction>,
}

impl TrafficLog {
    /// Creates an empty log.
    pub(crate) const fn new(capacity: usize) -> Self {
        Self {
            buffer: String::new(),
            capacity,
            last: None,
        }
    }

    /// Appends a chunk of traffic.
    pub(crate) fn record(&mut self, direction: Direction, data: &[u8]) {
        if self.last != Some(direction) {
            self.last = Some(direction);
            self.buffer.push_str(match direction {
                Direction::Read => READ_MARKER,
                Direction::Write => WRITE_MARKER,
            });
        }
        for c in String::from_utf8_lossy(data).chars() {
            match c {
                '\r' | '\n' => self.buffer.push(c),
                c if u32::from(c) < 0x20 => {
                    self.buffer.push('^');
                    self.buffer.push(char::from(b'@' + c as u8));
                }
                c => self.buffer.push(c),
            }
        }
        self.trim();
    }

    /// Drops the oldest text beyond capacity, on a char boundary.
    fn trim(&mut self) {
        if self.buffer.len() <= self.capacity {
            return;
        }
        let mut cut = self.buffer.len() - self.capacity;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
    }

    /// The rendered log.
    pub(crate) fn contents(&self) -> &str {
        &self.buffer
    }
}
