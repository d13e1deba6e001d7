//! Isolate box id allocation
//!
//! Isolate only supports box ids 0-9999. Each worker (0-9) owns a range of
//! 1000 ids and cycles through it, so concurrent runs on one host never share
//! a box.

use std::sync::atomic::{AtomicU32, Ordering};

const BOXES_PER_WORKER: u32 = 1000;
const MAX_WORKERS: u32 = 10;

#[derive(Debug)]
pub struct BoxIdAllocator {
    worker_id: u32,
    counter: AtomicU32,
}

impl BoxIdAllocator {
    pub fn new(worker_id: u32) -> Self {
        Self {
            worker_id: worker_id % MAX_WORKERS,
            counter: AtomicU32::new(0),
        }
    }

    /// First id of this worker's range; also used for the startup cgroup check
    pub fn first_box_id(&self) -> u32 {
        self.worker_id * BOXES_PER_WORKER
    }

    pub fn next_box_id(&self) -> u32 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        self.worker_id * BOXES_PER_WORKER + (counter % BOXES_PER_WORKER)
    }
}
