//! Request id allocation
//!
//! Ids live in a wrapping 32-bit space. `0` and `-1` (all ones) are
//! reserved by the protocol and are never handed out.

/// Compute the id that follows `current`, skipping the reserved values
pub fn next_request_id(current: i32) -> i32 {
    let mut next = (current as u32).wrapping_add(1);
    while next == u32::MAX || next == 0 {
        next = next.wrapping_add(1);
    }
    next as i32
}

/// Stateful cursor over the request id space
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    current: i32,
}

impl IdAllocator {
    /// Allocator whose first id is 1
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Allocator whose first id is the one following `current`
    pub fn starting_after(current: i32) -> Self {
        Self { current }
    }

    /// Allocate the next id
    pub fn next_id(&mut self) -> i32 {
        self.current = next_request_id(self.current);
        self.current
    }

    /// The most recently allocated id
    pub fn current(&self) -> i32 {
        self.current
    }
}
