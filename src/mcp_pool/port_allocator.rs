// ABOUTME: Host port allocation for per-user MCP containers
// ABOUTME: Hands out the lowest free port in a fixed window under its own lock

//! Port allocation for container backends.
//!
//! Allocation happens during provisioning and release during teardown, under
//! different pool lock scopes. The table sits behind its own mutex and never
//! calls back into the pool.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use thiserror::Error;

/// Errors from the port allocator
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    /// Every port in the window is assigned to a resident container
    #[error("No free port in range {start}..{end}")]
    Exhausted { start: u16, end: u32 },

    /// The configured window is empty or runs past 65535
    #[error("Invalid port range: base {base}, size {size}")]
    InvalidRange { base: u16, size: u32 },
}

/// Assigns unique host ports from `[base, base + size)`.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    size: u32,
    used: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator for `size` ports starting at `base`.
    pub fn new(base: u16, size: u32) -> Result<Self, PortError> {
        if size == 0 || u32::from(base) + size > u32::from(u16::MAX) + 1 {
            return Err(PortError::InvalidRange { base, size });
        }

        Ok(Self {
            base,
            size,
            used: Mutex::new(BTreeSet::new()),
        })
    }

    /// Mark and return the lowest free port.
    pub fn allocate(&self) -> Result<u16, PortError> {
        let mut used = self.used.lock();

        // BTreeSet iterates in order, so the first gap is the lowest free port.
        let mut candidate = u32::from(self.base);
        for &port in used.iter() {
            if u32::from(port) != candidate {
                break;
            }
            candidate += 1;
        }

        if candidate >= self.end() {
            return Err(PortError::Exhausted {
                start: self.base,
                end: self.end(),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let port = candidate as u16;
        used.insert(port);
        Ok(port)
    }

    /// Return a port to the free set. Returns false if it was not allocated.
    pub fn release(&self, port: u16) -> bool {
        self.used.lock().remove(&port)
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        self.used.lock().contains(&port)
    }

    /// Number of ports currently handed out.
    pub fn in_use(&self) -> usize {
        self.used.lock().len()
    }

    pub fn capacity(&self) -> u32 {
        self.size
    }

    /// Exclusive end of the window.
    fn end(&self) -> u32 {
        u32::from(self.base) + self.size
    }
}
