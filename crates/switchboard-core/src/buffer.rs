//! A growable ring buffer used as the per-connection read accumulator.
//!
//! Ported from the reference `CyclicBuffer` (index arithmetic over a
//! contiguous `bytearray`, doubling growth) into a `Vec<u8>`-backed
//! ring-with-wrap. `put` never discards data: when the free region is
//! smaller than the incoming slice, capacity doubles (repeatedly) before the
//! copy, preserving FIFO order.

/// FIFO byte buffer with delimiter search, used to accumulate partial reads
/// until a full protocol frame is available.
#[derive(Debug)]
pub struct CyclicBuffer {
    buf: Vec<u8>,
    read: usize,
    write: usize,
    available: usize,
}

impl CyclicBuffer {
    pub fn new(capacity_hint: usize) -> Self {
        let capacity = capacity_hint.max(1);
        Self { buf: vec![0; capacity], read: 0, write: 0, available: 0 }
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.available
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.available
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.available = 0;
    }

    /// Appends `src` to the buffer, growing capacity (doubling, possibly more
    /// than once) if the free region is too small. A no-op for an empty
    /// slice.
    pub fn put(&mut self, src: &[u8]) {
        let len = src.len();
        if len == 0 {
            return;
        }
        if self.remaining() < len {
            self.grow(len - self.remaining());
        }

        let capacity = self.buf.len();
        if self.write + len > capacity {
            let head = capacity - self.write;
            self.buf[self.write..capacity].copy_from_slice(&src[..head]);
            self.buf[..len - head].copy_from_slice(&src[head..]);
            self.write = len - head;
        } else {
            self.buf[self.write..self.write + len].copy_from_slice(src);
            self.write = if self.write + len == capacity { 0 } else { self.write + len };
        }
        self.available += len;
    }

    /// Copies at most `min(dst.len(), available)` bytes into `dst` and
    /// advances the read index. Returns the number of bytes copied.
    pub fn get(&mut self, dst: &mut [u8]) -> usize {
        let readable = dst.len().min(self.available);
        if readable == 0 {
            return 0;
        }

        let capacity = self.buf.len();
        if self.read + readable > capacity {
            let head = capacity - self.read;
            dst[..head].copy_from_slice(&self.buf[self.read..capacity]);
            dst[head..readable].copy_from_slice(&self.buf[..readable - head]);
            self.read = readable - head;
        } else {
            dst[..readable].copy_from_slice(&self.buf[self.read..self.read + readable]);
            self.read = if self.read + readable == capacity { 0 } else { self.read + readable };
        }
        self.available -= readable;
        if self.available == 0 {
            // Not observable, just keeps indices from drifting arbitrarily far.
            self.read = 0;
            self.write = 0;
        }
        readable
    }

    /// Discards up to `len` bytes from the front of the buffer. Returns the
    /// number actually skipped (saturates at `available`).
    pub fn skip(&mut self, len: usize) -> usize {
        if self.available == 0 {
            return 0;
        }
        let skipped = len.min(self.available);
        let capacity = self.buf.len();
        self.read = (self.read + skipped) % capacity;
        self.available -= skipped;
        if self.available == 0 {
            self.read = 0;
            self.write = 0;
        }
        skipped
    }

    /// Non-destructive scan for `delim` within the next `limit` bytes (or all
    /// of `available` when `limit` is `None`). Returns the zero-based offset
    /// of the first match relative to the current read position, or `None`
    /// if `delim` does not occur within the scanned window.
    pub fn seek(&self, delim: u8, limit: Option<usize>) -> Option<usize> {
        let scan_len = match limit {
            Some(limit) => limit.min(self.available),
            None => self.available,
        };
        let capacity = self.buf.len();
        for offset in 0..scan_len {
            let idx = (self.read + offset) % capacity;
            if self.buf[idx] == delim {
                return Some(offset);
            }
        }
        None
    }

    /// `seek` composed with `get`: if `delim` is found within `limit` bytes,
    /// copies the bytes strictly before it into `dst` (the delimiter itself
    /// is left unread — callers typically follow with `skip(1)`) and returns
    /// the count. Returns `None` if `delim` was not found in the scanned
    /// window; the buffer is left unmodified in that case.
    pub fn get_until(&mut self, delim: u8, dst: &mut [u8], limit: Option<usize>) -> Option<usize> {
        let offset = self.seek(delim, limit)?;
        Some(self.get(&mut dst[..offset]))
    }

    fn grow(&mut self, min_growth: usize) {
        let mut new_capacity = self.buf.len();
        while new_capacity - self.remaining() < min_growth + self.available {
            new_capacity *= 2;
        }
        let mut new_buf = vec![0; new_capacity];
        let available = self.available;
        let capacity = self.buf.len();
        if available > 0 {
            if self.read + available > capacity {
                let head = capacity - self.read;
                new_buf[..head].copy_from_slice(&self.buf[self.read..capacity]);
                new_buf[head..available].copy_from_slice(&self.buf[..available - head]);
            } else {
                new_buf[..available].copy_from_slice(&self.buf[self.read..self.read + available]);
            }
        }
        self.buf = new_buf;
        self.read = 0;
        self.write = available;
        self.available = available;
    }
}

impl Default for CyclicBuffer {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips_across_chunkings() {
        let original: Vec<u8> = (0u8..=255).cycle().take(5000).collect();
        for chunk_size in [1usize, 3, 7, 64, 4096] {
            let mut buf = CyclicBuffer::new(16);
            let mut drained = Vec::new();
            for chunk in original.chunks(chunk_size) {
                buf.put(chunk);
                let mut scratch = vec![0u8; chunk.len().max(1)];
                loop {
                    let n = buf.get(&mut scratch);
                    if n == 0 {
                        break;
                    }
                    drained.extend_from_slice(&scratch[..n]);
                }
            }
            assert_eq!(drained, original, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn seek_finds_first_occurrence_or_reports_absence() {
        let mut buf = CyclicBuffer::new(8);
        buf.put(b"abcXdefX");
        assert_eq!(buf.seek(b'X', None), Some(3));
        assert_eq!(buf.seek(b'Y', None), None);
    }

    #[test]
    fn get_decreases_available_by_min_requested_and_present() {
        let mut buf = CyclicBuffer::new(8);
        buf.put(b"hello");
        let before = buf.available();
        let mut dst = [0u8; 3];
        let n = buf.get(&mut dst);
        assert_eq!(n, 3);
        assert_eq!(buf.available(), before - 3);

        let mut dst = [0u8; 100];
        let n = buf.get(&mut dst);
        assert_eq!(n, 2);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn geometric_growth_preserves_all_bytes_and_never_shrinks_below_total() {
        let mut buf = CyclicBuffer::new(4);
        let mut total = Vec::new();
        for i in 0..50u8 {
            let chunk = vec![i; 37];
            buf.put(&chunk);
            total.extend_from_slice(&chunk);
            assert!(buf.available() <= total.len());
            assert!(buf.capacity() >= buf.available());
        }
        let mut out = vec![0u8; total.len()];
        let n = buf.get(&mut out);
        assert_eq!(n, total.len());
        assert_eq!(out, total);
    }

    #[test]
    fn ten_byte_buffer_accepts_a_25_byte_put() {
        let mut buf = CyclicBuffer::new(10);
        buf.put(&vec![7u8; 25]);
        assert_eq!(buf.available(), 25);
        assert!(buf.capacity() >= 25);
    }

    #[test]
    fn get_until_leaves_delimiter_unread() {
        let mut buf = CyclicBuffer::new(16);
        buf.put(b"12345 rest");
        let mut dst = [0u8; 16];
        let n = buf.get_until(b' ', &mut dst, None).expect("delimiter present");
        assert_eq!(&dst[..n], b"12345");
        assert_eq!(buf.available(), b" rest".len());
        buf.skip(1);
        let mut rest = vec![0u8; buf.available()];
        buf.get(&mut rest);
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn get_until_returns_none_when_delimiter_absent_within_window() {
        let mut buf = CyclicBuffer::new(16);
        buf.put(b"no-delimiter-here");
        let mut dst = [0u8; 16];
        assert_eq!(buf.get_until(b'X', &mut dst, Some(5)), None);
        // Buffer must be untouched: available bytes unchanged.
        assert_eq!(buf.available(), b"no-delimiter-here".len());
    }

    #[test]
    fn wraps_around_the_ring_correctly() {
        let mut buf = CyclicBuffer::new(8);
        buf.put(b"abcdef");
        let mut scratch = [0u8; 4];
        buf.get(&mut scratch);
        buf.put(b"ghij"); // forces write index to wrap
        let mut out = vec![0u8; buf.available()];
        buf.get(&mut out);
        assert_eq!(out, b"efghij");
    }
}
