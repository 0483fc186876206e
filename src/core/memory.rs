//! Atomic counters tracking live tracked values. Read-only to the outside world (§3
//! MemoryCounters); out of scope beyond this simple accounting (§1).

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct MemoryCounters {
    object_count: AtomicI64,
    buffer_bytes: AtomicI64,
    string_bytes: AtomicI64,
}

impl MemoryCounters {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn object_allocated(&self) { self.object_count.fetch_add(1, Ordering::Relaxed); }

    pub fn object_freed(&self) { self.object_count.fetch_sub(1, Ordering::Relaxed); }

    pub fn buffer_allocated(&self, bytes: usize) {
        self.buffer_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub fn buffer_freed(&self, bytes: usize) {
        self.buffer_bytes.fetch_sub(bytes as i64, Ordering::Relaxed);
    }

    pub fn string_allocated(&self, bytes: usize) {
        self.string_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub fn string_freed(&self, bytes: usize) {
        self.string_bytes.fetch_sub(bytes as i64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn object_count(&self) -> i64 { self.object_count.load(Ordering::Relaxed) }

    #[must_use]
    pub fn buffer_bytes(&self) -> i64 { self.buffer_bytes.load(Ordering::Relaxed) }

    #[must_use]
    pub fn string_bytes(&self) -> i64 { self.string_bytes.load(Ordering::Relaxed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_allocations_and_frees() {
        let mem = MemoryCounters::new();
        mem.object_allocated();
        mem.buffer_allocated(128);
        assert_eq!(mem.object_count(), 1);
        assert_eq!(mem.buffer_bytes(), 128);
        mem.object_freed();
        mem.buffer_freed(128);
        assert_eq!(mem.object_count(), 0);
        assert_eq!(mem.buffer_bytes(), 0);
    }
}
