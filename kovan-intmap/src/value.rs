//! Slot word encoding.
//!
//! A slot's value word carries both the user value and the migration state
//! of that slot. Reserved words never leave the crate: callers only ever see
//! live values or `0` for "absent".
//!
//! ```text
//! 0                    empty, key absent
//! 1 ..= MAX_VALUE      live value
//! TOMBSTONE            key was removed
//! v | FROZEN_BIT       frozen copy of `v`, migration in progress
//! MOVED                migrated, authoritative data lives in the next generation
//! FORWARDED            migrated while empty, nothing was copied for this slot
//! ```
//!
//! A copy that meets `FORWARDED` carries on into the next generation. A copy
//! that meets `MOVED` stops: the key's data was already settled further down
//! the chain.

/// Word stored in a key field that has never been claimed.
pub(crate) const EMPTY_KEY: i64 = 0;

/// Word stored in a value field that has never been written.
pub(crate) const EMPTY: i64 = 0;

/// Reserved value marking a removed key.
pub const TOMBSTONE: i64 = i64::MAX;

/// Largest value accepted by [`IntMap::put`](crate::IntMap::put).
pub const MAX_VALUE: i64 = TOMBSTONE - 1;

/// Tag bit set on a value while its slot is being copied forward.
pub(crate) const FROZEN_BIT: i64 = i64::MIN;

/// Terminal state of a slot in a retiring generation.
///
/// Shares its bit pattern with a frozen `0`, which is never produced since
/// empty slots skip the frozen state.
pub(crate) const MOVED: i64 = FROZEN_BIT;

/// Terminal state of a slot that was still empty when its generation retired.
///
/// Shares its bit pattern with a frozen `TOMBSTONE`, which is never produced
/// since tombstones skip the frozen state.
pub(crate) const FORWARDED: i64 = -1;

/// Decoded view of a value word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotValue {
    Empty,
    Live(i64),
    Tombstone,
    Frozen(i64),
    Moved,
    Forwarded,
}

impl SlotValue {
    #[inline(always)]
    pub(crate) fn decode(raw: i64) -> Self {
        match raw {
            EMPTY => SlotValue::Empty,
            TOMBSTONE => SlotValue::Tombstone,
            MOVED => SlotValue::Moved,
            FORWARDED => SlotValue::Forwarded,
            frozen if frozen < 0 => SlotValue::Frozen(frozen & !FROZEN_BIT),
            live => SlotValue::Live(live),
        }
    }
}

/// Tags `value` as frozen.
#[inline(always)]
pub(crate) fn freeze(value: i64) -> i64 {
    value | FROZEN_BIT
}

/// Returns true if `value` may be stored by a caller.
#[inline(always)]
pub fn is_value(value: i64) -> bool {
    (1..=MAX_VALUE).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reserved_words() {
        assert_eq!(SlotValue::decode(EMPTY), SlotValue::Empty);
        assert_eq!(SlotValue::decode(TOMBSTONE), SlotValue::Tombstone);
        assert_eq!(SlotValue::decode(MOVED), SlotValue::Moved);
        assert_eq!(SlotValue::decode(FORWARDED), SlotValue::Forwarded);
    }

    #[test]
    fn test_decode_live_and_frozen() {
        assert_eq!(SlotValue::decode(1), SlotValue::Live(1));
        assert_eq!(SlotValue::decode(MAX_VALUE), SlotValue::Live(MAX_VALUE));
        assert_eq!(SlotValue::decode(freeze(1)), SlotValue::Frozen(1));
        assert_eq!(SlotValue::decode(freeze(MAX_VALUE)), SlotValue::Frozen(MAX_VALUE));
    }

    #[test]
    fn test_frozen_never_collides_with_terminal_states() {
        for v in [1, 2, 42, 1 << 40, MAX_VALUE] {
            assert_ne!(freeze(v), MOVED);
            assert_ne!(freeze(v), FORWARDED);
            assert!(freeze(v) < 0);
        }
    }

    #[test]
    fn test_is_value_bounds() {
        assert!(!is_value(0));
        assert!(!is_value(-1));
        assert!(!is_value(i64::MIN));
        assert!(!is_value(TOMBSTONE));
        assert!(is_value(1));
        assert!(is_value(MAX_VALUE));
    }
}
