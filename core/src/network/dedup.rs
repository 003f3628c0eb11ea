use std::collections::HashSet;
use super::address::NetworkAddress;

/// Addresses already handed to the resolver during one run.
///
/// The set only grows. A new tracker is created for every pipeline, so
/// nothing carries over between runs.
#[derive(Debug, Default)]
pub struct DeduplicationTracker {
    processed: HashSet<NetworkAddress>,
}

impl DeduplicationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records the address on first sight, false afterwards.
    pub fn should_process(&mut self, address: NetworkAddress) -> bool {
        self.processed.insert(address)
    }

    pub fn contains(&self, address: NetworkAddress) -> bool {
        self.processed.contains(&address)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
