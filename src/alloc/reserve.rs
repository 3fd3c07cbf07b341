//! Reservation Chain
//!
//! Positions chosen by an allocation that has not finished marking its
//! bitmap bits. Cloning a bitmap page while marking may re-enter the
//! allocator, and the nested call must not hand out the same space again.
//! The chain is created by the outermost caller and threaded down through
//! every nested call.

#[derive(Debug, Default)]
pub(crate) struct Reservations {
    chain: Vec<(u64, u64)>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `[pos, pos + size)` intersects any reserved range
    pub fn conflicts(&self, pos: u64, size: u64) -> bool {
        self.chain.iter().any(|&(start, len)| {
            (pos >= start && pos - start < len) || (pos <= start && start - pos < size)
        })
    }

    pub fn reserve(&mut self, pos: u64, size: u64) {
        self.chain.push((pos, size));
    }

    /// Drop the innermost reservation once its bits are set
    pub fn release(&mut self) {
        self.chain.pop();
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}
