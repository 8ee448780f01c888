use std::collections::VecDeque;

/// Pool of scratch pixel buffers reused between encodes.
///
/// # Performance
/// - Pre-allocates buffers on creation to avoid runtime allocation
/// - Reuses buffers via put()/take() cycle
/// - Falls back to allocation if pool is exhausted
pub(crate) struct FramePool {
    buffers: VecDeque<Vec<u8>>,
    frame_len: usize,
}

/// Initial number of buffers to pre-allocate in the pool
const INITIAL_POOL_SIZE: usize = 2;

impl FramePool {
    pub fn new(frame_len: usize) -> Self {
        let mut buffers = VecDeque::with_capacity(INITIAL_POOL_SIZE);
        for _ in 0..INITIAL_POOL_SIZE {
            buffers.push_back(Vec::with_capacity(frame_len));
        }
        Self { buffers, frame_len }
    }

    /// Put a given buffer back to the pool after it was used.
    #[inline]
    pub fn put(&mut self, mut buffer: Vec<u8>) {
        // Only keep buffers if pool isn't too large (prevent unbounded growth)
        if self.buffers.len() < INITIAL_POOL_SIZE * 2 {
            buffer.clear();
            self.buffers.push_back(buffer);
        }
    }

    /// Take an empty buffer with room for `len` bytes, allocating if necessary.
    #[inline]
    pub fn take(&mut self, len: usize) -> Vec<u8> {
        if len != self.frame_len {
            // resolution changed: pooled buffers are the wrong size
            self.buffers.clear();
            self.frame_len = len;
        }
        match self.buffers.pop_front() {
            Some(mut buffer) => {
                buffer.reserve(len);
                buffer
            }
            None => Vec::with_capacity(len),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let mut pool = FramePool::new(12);
        let mut buf = pool.take(12);
        buf.extend_from_slice(&[1; 12]);
        let ptr = buf.as_ptr();
        pool.put(buf);

        // pre-allocated buffer comes out first, the returned one after it
        let first = pool.take(12);
        let second = pool.take(12);
        assert!(second.is_empty());
        assert_eq!(second.as_ptr(), ptr);
        pool.put(first);
        pool.put(second);
    }

    #[test]
    fn test_resize_drops_stale_buffers() {
        let mut pool = FramePool::new(12);
        assert_eq!(pool.len(), INITIAL_POOL_SIZE);
        let buf = pool.take(48);
        assert!(buf.capacity() >= 48);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let mut pool = FramePool::new(4);
        for _ in 0..10 {
            pool.put(Vec::with_capacity(4));
        }
        assert_eq!(pool.len(), INITIAL_POOL_SIZE * 2);
    }
}
