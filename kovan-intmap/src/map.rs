extern crate alloc;

use crate::error::{Error, Result};
use crate::generation::{self, Generation, Upsert};
use crate::value::{self, TOMBSTONE};
use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::Ordering;
use kovan::{Atomic, Guard, pin, retire};

/// Capacity of the first generation built by [`IntMap::new`].
pub const DEFAULT_CAPACITY: usize = 2;

/// Smallest generation capacity.
const MIN_CAPACITY: usize = 2;

/// Lock-free map from positive `i64` keys to positive `i64` values.
///
/// Every operation is a handful of single-word CAS steps on the current
/// table generation. When a probe sequence overflows, the generation is
/// replaced by one of twice the capacity; every thread that runs into the
/// migration helps finish it, so a stalled resizer never blocks anyone.
/// Retired generations are reclaimed through kovan.
///
/// Absent keys read as `0`.
pub struct IntMap {
    current: Atomic<Generation>,
}

impl IntMap {
    /// Creates an empty map with [`DEFAULT_CAPACITY`] slots.
    ///
    /// # Examples
    ///
    /// ```
    /// use kovan_intmap::IntMap;
    ///
    /// let map = IntMap::new();
    /// assert_eq!(map.get(1).unwrap(), 0);
    /// ```
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty map whose first generation has at least `capacity`
    /// slots, rounded up to a power of two.
    ///
    /// # Examples
    ///
    /// ```
    /// use kovan_intmap::IntMap;
    ///
    /// let map = IntMap::with_capacity(100);
    /// assert_eq!(map.capacity(), 128);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(MIN_CAPACITY);
        Self {
            current: Atomic::new(Box::into_raw(Box::new(Generation::new(capacity)))),
        }
    }

    /// Slot count of the current generation.
    ///
    /// Grows as keys are added; never shrinks.
    pub fn capacity(&self) -> usize {
        let guard = pin();
        self.current(&guard).capacity()
    }

    #[inline(always)]
    fn current<'g>(&self, guard: &'g Guard) -> &'g Generation {
        // SAFETY: `current` is never null, and a generation the map advanced
        // past is freed by kovan only after every guard that saw it is gone.
        unsafe { &*self.current.load(Ordering::Acquire, guard).as_raw() }
    }

    /// Returns the value stored for `key`, or `0` if it is absent.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `key <= 0`.
    pub fn get(&self, key: i64) -> Result<i64> {
        check_key(key)?;
        let guard = pin();
        Ok(self.current(&guard).lookup(key, &guard))
    }

    /// Returns true if `key` currently holds a value.
    pub fn contains_key(&self, key: i64) -> Result<bool> {
        self.get(key).map(|v| v != 0)
    }

    /// Stores `value` for `key`, returning the previous value or `0`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `key <= 0`, [`Error::InvalidValue`] unless
    /// `1 <= value <= MAX_VALUE`.
    ///
    /// # Examples
    ///
    /// ```
    /// use kovan_intmap::IntMap;
    ///
    /// let map = IntMap::new();
    /// assert_eq!(map.put(5, 100).unwrap(), 0);
    /// assert_eq!(map.put(5, 200).unwrap(), 100);
    /// assert!(map.put(5, 0).is_err());
    /// ```
    pub fn put(&self, key: i64, value: i64) -> Result<i64> {
        check_key(key)?;
        if !value::is_value(value) {
            return Err(Error::InvalidValue(value));
        }
        Ok(self.write(key, value))
    }

    /// Removes `key`, returning the value it held or `0`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `key <= 0`.
    pub fn remove(&self, key: i64) -> Result<i64> {
        check_key(key)?;
        Ok(self.write(key, TOMBSTONE))
    }

    fn write(&self, key: i64, new: i64) -> i64 {
        let guard = pin();

        loop {
            match self.current(&guard).upsert(key, new, &guard) {
                Upsert::Done(previous) => return previous,
                Upsert::NeedsGrowth(full) => {
                    full.grow(&guard);
                    self.advance(&guard);
                }
            }
        }
    }

    /// Moves `current` forward past every generation that has a successor,
    /// finishing each one's migration first.
    fn advance(&self, guard: &Guard) {
        loop {
            let current = self.current.load(Ordering::Acquire, guard);
            // SAFETY: see `IntMap::current`.
            let generation = unsafe { &*current.as_raw() };
            let next = generation.next_ptr(guard);
            if next.is_null() {
                return;
            }

            generation.grow(guard);

            if self
                .current
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                tracing::debug!(
                    capacity = generation.capacity() << 1,
                    "advanced to next generation"
                );
                // SAFETY: Generation is #[repr(C)] with its RetiredNode first,
                // and only the thread that unlinked it retires it.
                unsafe { retire(current.as_raw()) };
            }
        }
    }
}

#[inline(always)]
fn check_key(key: i64) -> Result<()> {
    if key > 0 {
        Ok(())
    } else {
        Err(Error::InvalidKey(key))
    }
}

impl Default for IntMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IntMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntMap")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

// SAFETY: all shared state is reached through atomics, and generations are
// reclaimed through kovan.
unsafe impl Send for IntMap {}
unsafe impl Sync for IntMap {}

impl Drop for IntMap {
    fn drop(&mut self) {
        let guard = pin();
        let head = self.current.load(Ordering::Acquire, &guard);
        // SAFETY: `&mut self` rules out concurrent users; generations before
        // `current` were already retired and are not part of this chain.
        unsafe { generation::drop_chain(head, &guard) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MAX_VALUE;

    #[test]
    fn test_put_get_remove() {
        let map = IntMap::new();
        assert_eq!(map.put(5, 100), Ok(0));
        assert_eq!(map.put(5, 200), Ok(100));
        assert_eq!(map.get(5), Ok(200));
        assert_eq!(map.remove(5), Ok(200));
        assert_eq!(map.get(5), Ok(0));
        assert_eq!(map.put(5, 300), Ok(0));
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let map = IntMap::new();
        assert_eq!(map.get(0), Err(Error::InvalidKey(0)));
        assert_eq!(map.get(-3), Err(Error::InvalidKey(-3)));
        assert_eq!(map.put(-1, 5), Err(Error::InvalidKey(-1)));
        assert_eq!(map.remove(0), Err(Error::InvalidKey(0)));
        assert_eq!(map.put(1, 0), Err(Error::InvalidValue(0)));
        assert_eq!(map.put(1, -7), Err(Error::InvalidValue(-7)));
        assert_eq!(map.put(1, TOMBSTONE), Err(Error::InvalidValue(TOMBSTONE)));
        assert_eq!(map.put(1, MAX_VALUE), Ok(0));
        assert_eq!(map.get(1), Ok(MAX_VALUE));
    }

    #[test]
    fn test_growth_from_two_slots() {
        let map = IntMap::with_capacity(2);
        assert_eq!(map.capacity(), 2);
        assert_eq!(map.put(1, 10), Ok(0));
        assert_eq!(map.put(2, 20), Ok(0));
        assert_eq!(map.put(3, 30), Ok(0));
        assert!(map.capacity() > 2);
        assert_eq!(map.get(1), Ok(10));
        assert_eq!(map.get(2), Ok(20));
        assert_eq!(map.get(3), Ok(30));
    }

    #[test]
    fn test_remove_never_grows() {
        let map = IntMap::with_capacity(2);
        map.put(1, 10).unwrap();
        map.put(2, 20).unwrap();
        for key in 3..100 {
            assert_eq!(map.remove(key), Ok(0));
        }
        assert_eq!(map.capacity(), 2);
    }

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(IntMap::with_capacity(0).capacity(), 2);
        assert_eq!(IntMap::with_capacity(1).capacity(), 2);
        assert_eq!(IntMap::with_capacity(3).capacity(), 4);
        assert_eq!(IntMap::with_capacity(64).capacity(), 64);
        assert_eq!(IntMap::default().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_concurrent_inserts() {
        use alloc::sync::Arc;
        extern crate std;
        use std::thread;

        let map = Arc::new(IntMap::new());
        let mut handles = alloc::vec::Vec::new();

        for thread_id in 0..4 {
            let map_clone = Arc::clone(&map);
            let handle = thread::spawn(move || {
                for i in 1..=1000 {
                    let key = thread_id * 1000 + i;
                    map_clone.put(key, key * 2).unwrap();
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        for key in 1..=4000 {
            assert_eq!(map.get(key), Ok(key * 2));
        }
    }
}
