//! Buffer accounting and system memory visibility

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use sysinfo::System;

/// Tracks engine-owned buffer allocations alongside system memory
pub struct MemoryTracker {
    inner: RwLock<Inner>,
}

struct Inner {
    system: System,
    buffers: HashMap<u32, usize>,
    next_id: u32,
    current: usize,
    peak: usize,
}

/// Point-in-time memory view
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub current_bytes: usize,
    pub peak_bytes: usize,
    pub buffer_count: usize,
    pub system_available_bytes: u64,
    pub system_total_bytes: u64,
}

impl MemoryTracker {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            inner: RwLock::new(Inner {
                system,
                buffers: HashMap::new(),
                next_id: 0,
                current: 0,
                peak: 0,
            }),
        }
    }

    /// Record an allocation, returning its buffer id
    pub fn allocate(&self, bytes: usize) -> u32 {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.buffers.insert(id, bytes);
        inner.current += bytes;
        if inner.current > inner.peak {
            inner.peak = inner.current;
        }
        id
    }

    /// Release a previously recorded allocation
    pub fn release(&self, id: u32) -> bool {
        let mut inner = self.inner.write();
        match inner.buffers.remove(&id) {
            Some(bytes) => {
                inner.current = inner.current.saturating_sub(bytes);
                true
            }
            None => false,
        }
    }

    /// Track a peak observed outside buffer accounting (e.g. reported by
    /// the compute module)
    pub fn observe_peak(&self, bytes: usize) {
        let mut inner = self.inner.write();
        if bytes > inner.peak {
            inner.peak = bytes;
        }
    }

    pub fn current_usage(&self) -> usize {
        self.inner.read().current
    }

    pub fn peak_usage(&self) -> usize {
        self.inner.read().peak
    }

    pub fn buffer_count(&self) -> usize {
        self.inner.read().buffers.len()
    }

    pub fn status(&self) -> MemoryStatus {
        let mut inner = self.inner.write();
        inner.system.refresh_memory();
        MemoryStatus {
            current_bytes: inner.current,
            peak_bytes: inner.peak,
            buffer_count: inner.buffers.len(),
            system_available_bytes: inner.system.available_memory(),
            system_total_bytes: inner.system.total_memory(),
        }
    }

    /// Drop all buffer accounting (teardown)
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.buffers.clear();
        inner.current = 0;
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}
