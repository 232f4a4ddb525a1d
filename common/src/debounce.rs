use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub const DEFAULT_DEBOUNCE_MS: u32 = 200;

// No edge accepted yet. A real edge stamped at this value is recorded one
// millisecond early.
const NEVER: u32 = u32::MAX;

// Lock-free and ISR-safe; 32-bit atomics only (Xtensa has no 64-bit ones).
#[derive(Debug)]
pub struct PressLatch {
    window_ms: AtomicU32,
    pending: AtomicBool,
    last_accepted_ms: AtomicU32,
    rejected: AtomicU32,
}

impl PressLatch {
    pub const fn new(window_ms: u32) -> Self {
        Self {
            window_ms: AtomicU32::new(window_ms),
            pending: AtomicBool::new(false),
            last_accepted_ms: AtomicU32::new(NEVER),
            rejected: AtomicU32::new(0),
        }
    }

    pub fn set_window_ms(&self, window_ms: u32) {
        self.window_ms.store(window_ms, Ordering::Relaxed);
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms.load(Ordering::Relaxed)
    }

    pub fn on_edge(&self, now_ms: u32) -> bool {
        let window = self.window_ms.load(Ordering::Relaxed);
        let stamp = if now_ms == NEVER { NEVER - 1 } else { now_ms };
        let mut last = self.last_accepted_ms.load(Ordering::Acquire);

        loop {
            // A concurrent producer may have sampled its clock just before
            // the winner did, so a stamp slightly behind `last` is also
            // inside the window.
            if last != NEVER
                && (stamp.wrapping_sub(last) < window || last.wrapping_sub(stamp) < window)
            {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            match self.last_accepted_ms.compare_exchange_weak(
                last,
                stamp,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => last = current,
            }
        }

        // Overwrites a press that is still pending; never queues.
        self.pending.store(true, Ordering::Release);
        true
    }

    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn rejected_edges(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Default for PressLatch {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}
