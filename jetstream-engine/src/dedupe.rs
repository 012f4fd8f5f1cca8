//! Time-windowed `msgId -> (seq, ts)` duplicate suppression.
//!
//! Backed by a map for O(1) lookup plus an insertion-ordered array for
//! O(1) amortized eviction, matching the pairing called out in the
//! engine's design notes: the array's unused prefix (entries already
//! evicted from the map but not yet physically removed) is compacted once
//! it exceeds two-thirds of the array, rather than on every eviction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A single recorded publish, keyed by its client-supplied `Nats-Msg-Id`
#[derive(Debug, Clone)]
struct DedupeEntry {
    id: String,
    seq: u64,
    ts: Instant,
}

/// The result of testing a msg-id against the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeOutcome {
    /// Not seen before (or fallen out of the window); now recorded
    New,
    /// Already seen at `seq` within the window; store left untouched
    Duplicate { seq: u64 },
}

/// Bounded, time-windowed map of observed message ids
#[derive(Debug)]
pub struct Dedupe {
    window: Duration,
    map: HashMap<String, usize>,
    array: Vec<Option<DedupeEntry>>,
    /// Index of the oldest live (non-`None`) entry in `array`
    index: usize,
    loaded: bool,
}

impl Dedupe {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            map: HashMap::new(),
            array: Vec::new(),
            index: 0,
            loaded: false,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Test `id` against the window without recording anything
    ///
    /// Returns the sequence it was previously recorded at, if still live.
    #[must_use]
    pub fn check(&self, id: &str, now: Instant) -> Option<u64> {
        let &pos = self.map.get(id)?;
        let entry = self.array[pos].as_ref()?;
        (now.duration_since(entry.ts) < self.window).then_some(entry.seq)
    }

    /// Test `id` against the window; if new, record it at `(seq, now)`
    ///
    /// Kept for callers (tests, the lazy-load scan) that want the
    /// combined check-then-insert in one call; the ingress pipeline uses
    /// [`Dedupe::check`] and [`Dedupe::record`] separately since the
    /// sequence isn't known until after the store append succeeds.
    pub fn check_and_insert(&mut self, id: &str, seq: u64, now: Instant) -> DedupeOutcome {
        if let Some(seq) = self.check(id, now) {
            return DedupeOutcome::Duplicate { seq };
        }
        self.insert(id.to_owned(), seq, now);
        DedupeOutcome::New
    }

    /// Record `id` as observed at `(seq, now)`, once the sequence is known
    pub fn record(&mut self, id: String, seq: u64, now: Instant) {
        self.insert(id, seq, now);
    }

    /// Restore an entry directly, used by the lazy-load scan to
    /// repopulate from already-stored message headers without re-checking
    /// the window (the scan already bounds itself to `now - window`)
    pub fn restore(&mut self, id: String, seq: u64, ts: Instant) {
        self.insert(id, seq, ts);
    }

    fn insert(&mut self, id: String, seq: u64, ts: Instant) {
        if let Some(&pos) = self.map.get(&id) {
            self.array[pos] = None;
        }
        let pos = self.array.len();
        self.array.push(Some(DedupeEntry {
            id: id.clone(),
            seq,
            ts,
        }));
        self.map.insert(id, pos);
    }

    /// Evict every entry with `age >= window`, compacting the backing
    /// array when its dead prefix exceeds two-thirds of its length
    ///
    /// Returns the age of the oldest surviving entry, used by the caller
    /// to reschedule the eviction timer (floor 50ms), or `None` if the
    /// map is now empty.
    pub fn evict(&mut self, now: Instant) -> Option<Duration> {
        while self.index < self.array.len() {
            match &self.array[self.index] {
                None => self.index += 1,
                Some(entry) => {
                    if now.duration_since(entry.ts) >= self.window {
                        self.map.remove(&entry.id);
                        self.array[self.index] = None;
                        self.index += 1;
                    } else {
                        break;
                    }
                }
            }
        }

        if self.index * 3 > self.array.len() * 2 {
            self.array.drain(..self.index);
            self.index = 0;
            for (pos, entry) in self.array.iter().enumerate() {
                if let Some(entry) = entry {
                    self.map.insert(entry.id.clone(), pos);
                }
            }
        }

        if self.map.is_empty() {
            self.array.clear();
            self.index = 0;
            return None;
        }

        self.array[self.index..]
            .iter()
            .flatten()
            .map(|entry| self.window.saturating_sub(now.duration_since(entry.ts)))
            .min()
            .map(|next| next.max(Duration::from_millis(50)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
