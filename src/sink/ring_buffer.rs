//! Lock-free ring buffer feeding the audio playback device
//!
//! Single producer (the scheduler or ingest consumer) and single
//! consumer (the device callback, running on the device's own clock).
//! The writer never overtakes the reader — excess samples are dropped
//! and counted — and the reader emits silence on underrun.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Ring buffer of f32 samples shared with the device callback.
pub struct AudioRingBuffer {
    buffer: Vec<f32>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    has_data: AtomicBool,
    samples_dropped: AtomicU64,
}

// Safety: one writer and one reader, each owning its own position; the
// overlap window is excluded by the available-space computation.
unsafe impl Send for AudioRingBuffer {}
unsafe impl Sync for AudioRingBuffer {}

impl AudioRingBuffer {
    /// Create a ring buffer with the given capacity in samples.
    ///
    /// For stereo 48 kHz with 500 ms of headroom:
    /// capacity = 48000 * 2 * 0.5 = 48000 samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            has_data: AtomicBool::new(false),
            samples_dropped: AtomicU64::new(0),
        }
    }

    /// Write samples, returning how many were accepted. Samples that do
    /// not fit are dropped and counted.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let available = if write >= read {
            self.capacity - (write - read) - 1
        } else {
            read - write - 1
        };

        let to_write = samples.len().min(available);
        if to_write < samples.len() {
            self.samples_dropped
                .fetch_add((samples.len() - to_write) as u64, Ordering::Relaxed);
        }
        if to_write == 0 {
            return 0;
        }

        // Interior mutability without locks; the reader never touches
        // [write, write + to_write)
        let buf_ptr = self.buffer.as_ptr() as *mut f32;
        for (i, &sample) in samples.iter().enumerate().take(to_write) {
            let pos = (write + i) % self.capacity;
            unsafe {
                *buf_ptr.add(pos) = sample;
            }
        }

        self.write_pos
            .store((write + to_write) % self.capacity, Ordering::Release);
        self.has_data.store(true, Ordering::Release);

        to_write
    }

    /// Fill the output slice, padding with silence when the buffer runs
    /// dry. Returns the number of real samples read.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);

        let available = if write >= read {
            write - read
        } else {
            self.capacity - read + write
        };

        let to_read = output.len().min(available);

        for (i, sample) in output.iter_mut().enumerate().take(to_read) {
            let pos = (read + i) % self.capacity;
            *sample = self.buffer[pos];
        }

        for sample in output[to_read..].iter_mut() {
            *sample = 0.0;
        }

        if to_read > 0 {
            self.read_pos
                .store((read + to_read) % self.capacity, Ordering::Release);
        }

        if available <= to_read {
            self.has_data.store(false, Ordering::Release);
        }

        to_read
    }

    pub fn has_data(&self) -> bool {
        self.has_data.load(Ordering::Acquire)
    }

    /// Number of samples currently buffered
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Relaxed);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples dropped because the buffer was full
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Discard everything buffered
    pub fn reset(&self) {
        self.write_pos.store(0, Ordering::Release);
        self.read_pos.store(0, Ordering::Release);
        self.has_data.store(false, Ordering::Release);
    }
}
