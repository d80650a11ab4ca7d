//! Read buffers: per-run sizing and per-thread reuse.

use std::cell::RefCell;

use tracing::debug;

use crate::catalog::{Catalog, HeaderDetector};
use crate::config::{DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with this thread's scratch buffer, grown to at least `size`
/// bytes. The buffer is reused across calls on the same worker thread.
///
/// Not reentrant: a nested call on the same thread gets a fresh buffer.
pub fn with_scratch<T>(size: usize, f: impl FnOnce(&mut [u8]) -> T) -> T {
    SCRATCH.with(|cell| match cell.try_borrow_mut() {
        Ok(mut buf) => {
            if buf.len() < size {
                buf.resize(size, 0);
            }
            f(&mut buf[..size])
        }
        Err(_) => f(&mut vec![0u8; size][..]),
    })
}

/// Buffer size chosen for one scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlan {
    pub buffer_size: usize,
    /// Every header rule is a fixed-offset test inside the default window,
    /// so the larger buffer is never allocated.
    pub lazy: bool,
}

impl Default for BufferPlan {
    fn default() -> Self {
        BufferPlan {
            buffer_size: DEFAULT_BUFFER_SIZE,
            lazy: true,
        }
    }
}

impl BufferPlan {
    pub fn for_catalog(catalog: &Catalog) -> Self {
        Self::compute(catalog.max_rom_size(), catalog.header.as_ref())
    }

    /// Size from the largest declared ROM and the widest header window,
    /// clamped to `DEFAULT_BUFFER_SIZE..=MAX_BUFFER_SIZE`.
    pub fn compute(max_rom_size: u64, header: Option<&HeaderDetector>) -> Self {
        let Some(header) = header.filter(|h| !h.rules.is_empty()) else {
            return BufferPlan::default();
        };

        let floor = DEFAULT_BUFFER_SIZE as u64;
        let mut window = 0u64;
        let mut simple = true;
        for rule in &header.rules {
            window = window
                .max(rule.start_offset)
                .max(rule.end_offset.unwrap_or(0));
            for test in &rule.tests {
                match test.end() {
                    Some(end) => window = window.max(end),
                    None => simple = false,
                }
            }
            if rule.end_offset.is_some() {
                simple = false;
            }
        }

        let plan = if simple && window <= floor {
            BufferPlan::default()
        } else {
            let wanted = max_rom_size.saturating_add(window);
            BufferPlan {
                buffer_size: wanted.clamp(floor, MAX_BUFFER_SIZE as u64) as usize,
                lazy: false,
            }
        };
        debug!(
            "Buffer plan: {} bytes (header window {}, largest rom {}, lazy {})",
            plan.buffer_size, window, max_rom_size, plan.lazy
        );
        plan
    }
}
