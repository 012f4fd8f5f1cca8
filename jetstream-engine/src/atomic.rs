use std::sync::atomic::{AtomicU32, Ordering};

const IS_LEADER: u32 = 1 << 0;
const SEALED: u32 = 1 << 1;
const DISABLED: u32 = 1 << 2;
const DEDUPE_LOADED: u32 = 1 << 3;

/// Lock-free snapshot of the handful of booleans readers need without
/// taking the stream's bookkeeping lock: leadership, sealed, disabled
/// (after a fatal storage fault) and whether the dedupe map has completed
/// its lazy load.
///
/// Packed into a single `AtomicU32` so a read is one load, following the
/// same bit-packed-flags shape used for quick client-side status snapshots
/// elsewhere in this codebase.
#[derive(Debug, Default)]
pub struct RawStreamFlags(AtomicU32);

impl RawStreamFlags {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    #[must_use]
    pub fn snapshot(&self) -> StreamFlags {
        decode(self.0.load(Ordering::Acquire))
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.set_bit(IS_LEADER, is_leader);
    }

    pub fn set_sealed(&self, sealed: bool) {
        self.set_bit(SEALED, sealed);
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.set_bit(DISABLED, disabled);
    }

    pub fn set_dedupe_loaded(&self, loaded: bool) {
        self.set_bit(DEDUPE_LOADED, loaded);
    }

    fn set_bit(&self, bit: u32, value: bool) {
        if value {
            self.0.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.0.fetch_and(!bit, Ordering::AcqRel);
        }
    }
}

/// A decoded, point-in-time copy of [`RawStreamFlags`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags {
    pub is_leader: bool,
    pub sealed: bool,
    pub disabled: bool,
    pub dedupe_loaded: bool,
}

fn decode(bits: u32) -> StreamFlags {
    StreamFlags {
        is_leader: bits & IS_LEADER != 0,
        sealed: bits & SEALED != 0,
        disabled: bits & DISABLED != 0,
        dedupe_loaded: bits & DEDUPE_LOADED != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::RawStreamFlags;

    #[test]
    fn round_trips_each_bit_independently() {
        let flags = RawStreamFlags::new();
        assert_eq!(flags.snapshot(), super::StreamFlags::default());

        flags.set_leader(true);
        flags.set_disabled(true);
        let snap = flags.snapshot();
        assert!(snap.is_leader);
        assert!(snap.disabled);
        assert!(!snap.sealed);
        assert!(!snap.dedupe_loaded);

        flags.set_leader(false);
        let snap = flags.snapshot();
        assert!(!snap.is_leader);
        assert!(snap.disabled);
    }
}
