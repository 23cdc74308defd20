//! Sample ring buffer between the decoder thread and the output callback.
//!
//! One producer (the decoder) writes, one consumer (the cpal callback)
//! reads. Samples are stored as `f32` bit patterns in atomics, so neither
//! side needs a lock or `unsafe`.
//!
//! [`RingBuffer::clear`] may be called by the producer while the consumer is
//! mid-read: the read position is only ever committed with a
//! compare-and-swap, and a read that loses the race reports zero samples.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Single-producer, single-consumer sample queue.
pub struct RingBuffer {
    slots: Box<[AtomicU32]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    /// Power of two.
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a ring buffer; `capacity` is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            slots,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be read.
    pub fn available(&self) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Room left for writing.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Append samples. Returns how many fit. Producer only.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        let room = self.capacity - write.wrapping_sub(read);
        let count = samples.len().min(room);

        for (offset, sample) in samples[..count].iter().enumerate() {
            self.slots[write.wrapping_add(offset) & self.mask]
                .store(sample.to_bits(), Ordering::Relaxed);
        }

        self.write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Take up to `output.len()` samples. Consumer only.
    ///
    /// Returns 0 if the buffer was cleared while reading.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        let count = output.len().min(write.wrapping_sub(read));
        if count == 0 {
            return 0;
        }

        for (offset, sample) in output[..count].iter_mut().enumerate() {
            *sample = f32::from_bits(
                self.slots[read.wrapping_add(offset) & self.mask].load(Ordering::Relaxed),
            );
        }

        match self.read_pos.compare_exchange(
            read,
            read.wrapping_add(count),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => count,
            Err(_) => 0,
        }
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        loop {
            let read = self.read_pos.load(Ordering::Acquire);
            let write = self.write_pos.load(Ordering::Acquire);
            if self
                .read_pos
                .compare_exchange(read, write, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// Ring buffer shared between the decoder thread and the output stream.
pub type SharedRingBuffer = Arc<RingBuffer>;

pub fn shared_ring_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
