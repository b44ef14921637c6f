use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::{mix_u64, short_prefixed_id};

/// Process-wide generator for thread, item and turn identifiers.
///
/// Ids are derived from a random seed mixed with a monotonically increasing
/// counter, so two ids from the same generator never share a sequence number.
pub struct IdGenerator {
    seed: u64,
    counter: AtomicU64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(fastrand::u64(..))
    }

    /// Deterministic generator, mostly useful for tests and benches.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(1),
        }
    }

    fn next_mixed(&self) -> u64 {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        mix_u64(self.seed ^ mix_u64(seq))
    }

    fn next_short(&self, prefix: &str) -> String {
        let mixed = self.next_mixed();
        short_prefixed_id(prefix, (mixed >> 32) as u32)
    }

    #[must_use]
    pub fn thread_id(&self) -> String {
        self.next_short("thr")
    }

    #[must_use]
    pub fn message_id(&self) -> String {
        self.next_short("msg")
    }

    #[must_use]
    pub fn user_message_id(&self) -> String {
        self.next_short("usr")
    }

    /// Id stamped on text-delta updates.
    #[must_use]
    pub fn delta_item_id(&self) -> String {
        self.next_short("itm")
    }

    #[must_use]
    pub fn widget_id(&self) -> String {
        self.next_short("wdg")
    }

    /// Correlation id for one translated turn, used in log records.
    #[must_use]
    pub fn turn_uuid(&self) -> uuid::Uuid {
        let hi = self.next_mixed();
        let lo = mix_u64(hi ^ self.seed);
        uuid::Uuid::from_u64_pair(hi, lo)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
