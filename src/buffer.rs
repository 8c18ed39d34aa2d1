use alloc::vec::Vec;

/// Growable byte staging area with distinct readable and writable regions.
///
/// Bytes are appended at the write position and consumed from the read
/// position; `read <= write <= capacity` always holds. Consuming the last
/// readable byte rewinds both positions to the start of the storage, and a
/// writable-view request that does not fit moves pending bytes to the front
/// before growing the storage. Growth is infallible.
#[derive(Debug)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    /// Create a buffer with `capacity` bytes of initial storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: alloc::vec![0; capacity],
            read: 0,
            write: 0,
        }
    }

    /// Number of readable bytes.
    pub fn bytes(&self) -> usize {
        self.write - self.read
    }

    /// Current storage size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// View of the readable bytes.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// Writable view with at least `min` contiguous bytes, growing the
    /// storage when the request does not fit behind the readable bytes.
    ///
    /// The view may be larger than `min`; call
    /// [`advance_write`](Self::advance_write) with the number of bytes
    /// actually filled.
    pub fn writable(&mut self, min: usize) -> &mut [u8] {
        if self.buf.len() - self.write < min {
            self.compact();
            if self.buf.len() - self.write < min {
                let grown = core::cmp::max(self.buf.len() * 2, self.write + min);
                self.buf.resize(grown, 0);
            }
        }
        &mut self.buf[self.write..]
    }

    /// Mark `n` readable bytes as consumed.
    pub fn advance_read(&mut self, n: usize) {
        debug_assert!(n <= self.bytes());
        self.read += n;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
    }

    /// Mark `n` bytes of the writable view as filled.
    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(self.write + n <= self.buf.len());
        self.write += n;
    }

    /// Append bytes behind any pending readable bytes.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        let dst = self.writable(src.len());
        dst[..src.len()].copy_from_slice(src);
        self.advance_write(src.len());
    }

    /// Append another buffer's readable bytes, consuming them from `other`.
    pub fn inject(&mut self, other: &mut ByteBuffer) {
        let count = other.bytes();
        let dst = self.writable(count);
        dst[..count].copy_from_slice(other.readable());
        self.advance_write(count);
        other.advance_read(count);
    }

    fn compact(&mut self) {
        if self.read > 0 {
            self.buf.copy_within(self.read..self.write, 0);
            self.write -= self.read;
            self.read = 0;
        }
    }
}
