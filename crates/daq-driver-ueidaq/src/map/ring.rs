//! Frame ring for variable-rate maps.

/// Fixed-capacity FIFO of equally sized byte frames.
///
/// The refresh side pushes one frame per scan and the decode side peeks and
/// consumes in blocks. Positions are monotonic counters; the slot of position
/// `p` is `p % capacity`.
#[derive(Debug)]
pub struct FrameRing {
    data: Vec<u8>,
    frame_size: usize,
    capacity: usize,
    write_pos: u64,
    read_pos: u64,
}

impl FrameRing {
    /// Ring of `capacity` frames of `frame_size` bytes.
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        Self {
            data: vec![0; capacity * frame_size],
            frame_size,
            capacity,
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// Frames the ring can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Frames queued.
    pub fn len(&self) -> usize {
        (self.write_pos - self.read_pos) as usize
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.write_pos == self.read_pos
    }

    /// Frames that can still be pushed.
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Append a frame. Returns `false`, storing nothing, when the ring is full
    /// or the frame has the wrong size.
    pub fn push(&mut self, frame: &[u8]) -> bool {
        if frame.len() != self.frame_size || self.free() == 0 {
            return false;
        }
        let start = (self.write_pos % self.capacity as u64) as usize * self.frame_size;
        self.data[start..start + self.frame_size].copy_from_slice(frame);
        self.write_pos += 1;
        true
    }

    /// Frame `index` positions after the oldest queued frame.
    pub fn peek(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len() {
            return None;
        }
        let pos = self.read_pos + index as u64;
        let start = (pos % self.capacity as u64) as usize * self.frame_size;
        Some(&self.data[start..start + self.frame_size])
    }

    /// Drop the `n` oldest frames (all of them if fewer are queued).
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.len()) as u64;
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.read_pos = self.write_pos;
    }
}
