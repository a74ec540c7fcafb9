//! Single-producer single-consumer ring buffer for disk streaming.
//!
//! The butler thread writes, the realtime thread reads. Unlike a general
//! purpose SPSC queue, the read side needs non-advancing reads at an offset
//! (declick fadeout), read-pointer adjustment in both directions (internal
//! seeks) and a seek-feasibility test, so the ring is built directly on
//! atomics rather than an off-the-shelf queue.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
#[repr(align(64))]
struct AtomicIndex(AtomicUsize);

/// Fixed-capacity SPSC ring of `T`.
///
/// One slot is reserved to distinguish empty from full, so the usable
/// capacity is `capacity() - 1`. Storage is fully initialized at
/// construction, which also touches every page so the realtime reader never
/// faults.
///
/// Thread discipline: at most one concurrent writer and one concurrent
/// reader. `reset` and `decrement_read_ptr` additionally require the
/// producer to be quiescent; the engine guarantees that through the
/// pending-overwrite / locate handoff protocol.
pub struct PlaybackBuffer<T> {
    storage: Box<[UnsafeCell<T>]>,
    read_idx: AtomicIndex,
    write_idx: AtomicIndex,
}

unsafe impl<T: Copy + Send> Send for PlaybackBuffer<T> {}
unsafe impl<T: Copy + Send> Sync for PlaybackBuffer<T> {}

impl<T: Copy + Default> PlaybackBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            storage,
            read_idx: AtomicIndex::default(),
            write_idx: AtomicIndex::default(),
        }
    }

    /// Append up to `n` default-valued (zero) elements.
    pub fn write_zero(&self, n: usize) -> usize {
        let zeros = [T::default(); 64];
        let mut written = 0;
        while written < n {
            let chunk = (n - written).min(zeros.len());
            let w = self.write(&zeros[..chunk]);
            written += w;
            if w < chunk {
                break;
            }
        }
        written
    }
}

impl<T: Copy> PlaybackBuffer<T> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Elements available to the reader.
    #[inline]
    pub fn read_space(&self) -> usize {
        let w = self.write_idx.0.load(Ordering::Acquire);
        let r = self.read_idx.0.load(Ordering::Acquire);
        (w + self.capacity() - r) % self.capacity()
    }

    /// Elements the writer may append.
    #[inline]
    pub fn write_space(&self) -> usize {
        self.capacity() - 1 - self.read_space()
    }

    /// Non-blocking write. Returns the number of elements accepted, short
    /// only when the ring is (nearly) full.
    pub fn write(&self, src: &[T]) -> usize {
        let w = self.write_idx.0.load(Ordering::Relaxed);
        let n = src.len().min(self.write_space());
        if n == 0 {
            return 0;
        }

        let first = n.min(self.capacity() - w);
        unsafe {
            let base = self.storage.as_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), (*base.add(w)).get(), first);
            if n > first {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr().add(first),
                    (*base).get(),
                    n - first,
                );
            }
        }

        self.write_idx
            .0
            .store((w + n) % self.capacity(), Ordering::Release);
        n
    }

    /// Non-blocking advancing read.
    pub fn read(&self, dst: &mut [T]) -> usize {
        let r = self.read_idx.0.load(Ordering::Relaxed);
        let n = dst.len().min(self.read_space());
        if n == 0 {
            return 0;
        }

        self.copy_out(dst, r, n);
        self.read_idx
            .0
            .store((r + n) % self.capacity(), Ordering::Release);
        n
    }

    /// Non-advancing read starting `offset` elements past the read pointer.
    ///
    /// Used by the declick fadeout, which replays buffered material without
    /// consuming it.
    pub fn peek(&self, dst: &mut [T], offset: usize) -> usize {
        let avail = self.read_space();
        if offset >= avail {
            return 0;
        }
        let r = self.read_idx.0.load(Ordering::Relaxed);
        let n = dst.len().min(avail - offset);
        if n == 0 {
            return 0;
        }
        self.copy_out(dst, (r + offset) % self.capacity(), n);
        n
    }

    #[inline]
    fn copy_out(&self, dst: &mut [T], from: usize, n: usize) {
        let first = n.min(self.capacity() - from);
        unsafe {
            let base = self.storage.as_ptr();
            std::ptr::copy_nonoverlapping((*base.add(from)).get(), dst.as_mut_ptr(), first);
            if n > first {
                std::ptr::copy_nonoverlapping(
                    (*base).get(),
                    dst.as_mut_ptr().add(first),
                    n - first,
                );
            }
        }
    }

    /// Discard everything the reader has not consumed.
    pub fn read_flush(&self) {
        let w = self.write_idx.0.load(Ordering::Acquire);
        self.read_idx.0.store(w, Ordering::Release);
    }

    /// Return both indices to zero. Both sides must be quiescent.
    pub fn reset(&self) {
        self.read_idx.0.store(0, Ordering::Release);
        self.write_idx.0.store(0, Ordering::Release);
    }

    /// Advance the read pointer without copying. Returns the distance
    /// actually advanced.
    pub fn increment_read_ptr(&self, n: usize) -> usize {
        let adv = n.min(self.read_space());
        if adv > 0 {
            let r = self.read_idx.0.load(Ordering::Relaxed);
            self.read_idx
                .0
                .store((r + adv) % self.capacity(), Ordering::Release);
        }
        adv
    }

    /// Retreat the read pointer into already-consumed history. Returns the
    /// distance actually retreated. The producer must be quiescent, since
    /// the re-exposed region is writable from its point of view.
    pub fn decrement_read_ptr(&self, n: usize) -> usize {
        let ret = n.min(self.write_space());
        if ret > 0 {
            let r = self.read_idx.0.load(Ordering::Relaxed);
            self.read_idx
                .0
                .store((r + self.capacity() - ret) % self.capacity(), Ordering::Release);
        }
        ret
    }

    /// Whether the ring currently holds enough data (forward) or consumed
    /// history (backward) to move the read pointer by `distance` samples.
    pub fn can_seek(&self, distance: i64) -> bool {
        if distance > 0 {
            self.read_space() as i64 >= distance
        } else if distance < 0 {
            self.write_space() as i64 >= -distance
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[test]
    fn test_basic_write_read() {
        let rb = PlaybackBuffer::<f32>::with_capacity(8);
        assert_eq!(rb.write_space(), 7);
        assert_eq!(rb.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(rb.read_space(), 3);

        let mut out = [0.0f32; 3];
        assert_eq!(rb.read(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(rb.read_space(), 0);
    }

    #[test]
    fn test_one_slot_reserved() {
        let rb = PlaybackBuffer::<f32>::with_capacity(4);
        assert_eq!(rb.write(&[1.0; 10]), 3);
        assert_eq!(rb.write(&[9.0]), 0);
        assert_eq!(rb.read_space(), 3);
    }

    #[test]
    fn test_wrap_around() {
        let rb = PlaybackBuffer::<f32>::with_capacity(4);
        let mut out = [0.0f32; 4];
        for round in 0..10 {
            let v = round as f32;
            assert_eq!(rb.write(&[v, v + 0.5]), 2);
            assert_eq!(rb.read(&mut out[..2]), 2);
            assert_eq!(&out[..2], &[v, v + 0.5]);
        }
    }

    #[test]
    fn test_peek_does_not_advance() {
        let rb = PlaybackBuffer::<f32>::with_capacity(8);
        rb.write(&[1.0, 2.0, 3.0, 4.0]);

        let mut out = [0.0f32; 2];
        assert_eq!(rb.peek(&mut out, 0), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(rb.peek(&mut out, 2), 2);
        assert_eq!(out, [3.0, 4.0]);
        assert_eq!(rb.peek(&mut out, 4), 0);
        assert_eq!(rb.read_space(), 4);
    }

    #[test]
    fn test_write_zero() {
        let rb = PlaybackBuffer::<f32>::with_capacity(256);
        rb.write(&[5.0; 4]);
        assert_eq!(rb.write_zero(100), 100);
        let mut out = [1.0f32; 104];
        assert_eq!(rb.read(&mut out), 104);
        assert_eq!(&out[..4], &[5.0; 4]);
        assert!(out[4..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_read_flush() {
        let rb = PlaybackBuffer::<f32>::with_capacity(8);
        rb.write(&[1.0; 5]);
        rb.read_flush();
        assert_eq!(rb.read_space(), 0);
        assert_eq!(rb.write_space(), 7);
    }

    #[test]
    fn test_read_ptr_adjustment() {
        let rb = PlaybackBuffer::<f32>::with_capacity(16);
        rb.write(&[1.0; 10]);

        assert_eq!(rb.increment_read_ptr(4), 4);
        assert_eq!(rb.read_space(), 6);

        // 4 consumed + 5 free slots of history behind the read pointer
        assert_eq!(rb.decrement_read_ptr(3), 3);
        assert_eq!(rb.read_space(), 9);

        // Cannot retreat past the write pointer's reserved slot
        let history = rb.write_space();
        assert_eq!(rb.decrement_read_ptr(100), history);
    }

    #[test]
    fn test_can_seek() {
        let rb = PlaybackBuffer::<f32>::with_capacity(16);
        rb.write(&[0.0; 10]);
        rb.increment_read_ptr(6);

        assert!(rb.can_seek(4));
        assert!(!rb.can_seek(5));
        assert!(rb.can_seek(-5));
        assert!(rb.can_seek(0));
        assert!(!rb.can_seek(-12));
    }

    #[test]
    fn test_spsc_fifo_across_threads() {
        let rb = Arc::new(PlaybackBuffer::<f32>::with_capacity(128));
        let total = 100_000usize;

        let producer = {
            let rb = Arc::clone(&rb);
            std::thread::spawn(move || {
                let mut next = 0usize;
                while next < total {
                    let remain = (total - next).min(32);
                    let chunk: Vec<f32> = (next..next + remain).map(|i| i as f32).collect();
                    let written = rb.write(&chunk);
                    next += written;
                    if written == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut seen = 0usize;
        let mut buf = [0.0f32; 48];
        while seen < total {
            let n = rb.read(&mut buf);
            for &v in &buf[..n] {
                assert_eq!(v, seen as f32);
                seen += 1;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_matches_model(ops in proptest::collection::vec((0u8..4, 1usize..12), 1..200)) {
            let rb = PlaybackBuffer::<u32>::with_capacity(16);
            let mut model: VecDeque<u32> = VecDeque::new();
            let mut next = 0u32;

            for (op, n) in ops {
                match op {
                    0 => {
                        let chunk: Vec<u32> = (next..next + n as u32).collect();
                        let written = rb.write(&chunk);
                        prop_assert_eq!(written, n.min(15 - model.len()));
                        for &v in &chunk[..written] {
                            model.push_back(v);
                        }
                        next += written as u32;
                    }
                    1 => {
                        let mut out = vec![0u32; n];
                        let read = rb.read(&mut out);
                        prop_assert_eq!(read, n.min(model.len()));
                        for &v in &out[..read] {
                            prop_assert_eq!(v, model.pop_front().unwrap());
                        }
                    }
                    2 => {
                        let adv = rb.increment_read_ptr(n);
                        prop_assert_eq!(adv, n.min(model.len()));
                        for _ in 0..adv {
                            model.pop_front();
                        }
                    }
                    _ => {
                        let mut out = vec![0u32; n];
                        let read = rb.peek(&mut out, 0);
                        prop_assert_eq!(read, n.min(model.len()));
                        for (i, &v) in out[..read].iter().enumerate() {
                            prop_assert_eq!(v, model[i]);
                        }
                    }
                }

                // Size invariant holds after every operation
                prop_assert_eq!(rb.read_space() + rb.write_space() + 1, 16);
                prop_assert_eq!(rb.read_space(), model.len());
            }
        }
    }
}
