use core::fmt;

use super::entry::{Entry, State};

/// A snapshot of the block list of a pool.
///
/// All sizes are payload sizes, i.e. the headers are not included. If there is
/// no block of a category, both its smallest and largest size are reported as
/// `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of blocks handed out to users.
    pub used_blocks: usize,
    /// Number of blocks available for allocation.
    pub free_blocks: usize,
    pub smallest_free: usize,
    pub largest_free: usize,
    pub smallest_used: usize,
    pub largest_used: usize,
}
impl Stats {
    /// Gather the statistics of a sequence of entries in a single pass.
    pub(super) fn collect(entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut free = Extremes::default();
        let mut used = Extremes::default();

        for entry in entries {
            match entry.state() {
                State::Free => free.record(entry.size()),
                State::Used => used.record(entry.size()),
            }
        }

        Self {
            used_blocks: used.count,
            free_blocks: free.count,
            smallest_free: free.smallest.unwrap_or(0),
            largest_free: free.largest,
            smallest_used: used.smallest.unwrap_or(0),
            largest_used: used.largest,
        }
    }
}
impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} free blocks, {} used blocks, free blocks: smallest={} largest={}, used blocks: smallest={} largest={}",
            self.free_blocks,
            self.used_blocks,
            self.smallest_free,
            self.largest_free,
            self.smallest_used,
            self.largest_used,
        )
    }
}

#[derive(Default)]
struct Extremes {
    count: usize,
    smallest: Option<usize>,
    largest: usize,
}
impl Extremes {
    fn record(&mut self, size: usize) {
        self.count += 1;
        self.smallest = Some(self.smallest.map_or(size, |smallest| smallest.min(size)));
        self.largest = self.largest.max(size);
    }
}
