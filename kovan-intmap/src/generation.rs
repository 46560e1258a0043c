//! One fixed-capacity generation of the table.
//!
//! # Architecture
//! - **Slots**: pairs of atomic words, key then value. A key is claimed once
//!   and never changes afterwards; the value walks the state machine in
//!   [`value`](crate::value).
//! - **Probing**: golden-ratio multiplicative hash, then linear probing towards
//!   lower indices, bounded by [`MAX_PROBES`].
//! - **Forwarding**: `next` is installed at most once. A slot in state
//!   `MOVED` or `FORWARDED` sends reads and writes of its key to `next`;
//!   walks across generations are loops, never recursion.
//! - **Copying**: a migrating value only passes a `FORWARDED` slot. Meeting
//!   `MOVED` means the key was already settled downstream, possibly removed,
//!   so a late copy stops there.
//!
//! Generations are `#[repr(C)]` with the `RetiredNode` header first so the
//! map can hand a drained generation to `kovan::retire`.

extern crate alloc;

use crate::value::{self, EMPTY, EMPTY_KEY, FORWARDED, MOVED, SlotValue, TOMBSTONE};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use kovan::{Atomic, Guard, RetiredNode, Shared};
use portable_atomic::{AtomicBool, AtomicI64};

/// Probe sequence length after which a generation counts as full.
pub(crate) const MAX_PROBES: usize = 8;

/// 2^64 / golden ratio.
const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C15;

struct Slot {
    key: AtomicI64,
    value: AtomicI64,
}

impl Slot {
    fn new() -> Self {
        Self {
            key: AtomicI64::new(EMPTY_KEY),
            value: AtomicI64::new(EMPTY),
        }
    }
}

/// Outcome of [`Generation::upsert`].
pub(crate) enum Upsert<'g> {
    /// The write was applied; carries the previous live value or `0`.
    Done(i64),
    /// The probe sequence in this generation is exhausted and it has no successor yet.
    NeedsGrowth(&'g Generation),
}

/// One table generation.
///
/// `RetiredNode` **must** stay the first field: kovan casts `*mut Generation`
/// to `*mut RetiredNode` when the map retires it.
#[repr(C)]
pub(crate) struct Generation {
    retired: RetiredNode,
    slots: Box<[Slot]>,
    shift: u32,
    next: Atomic<Generation>,
    /// Set once every slot has reached a terminal state.
    migrated: AtomicBool,
}

impl Generation {
    /// `capacity` must be a power of two and at least 2.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "Capacity must be a power of 2 (>= 2): {}",
            capacity
        );
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot::new());
        }

        Self {
            retired: RetiredNode::new(),
            slots: slots.into_boxed_slice(),
            shift: u64::BITS - capacity.trailing_zeros(),
            next: Atomic::null(),
            migrated: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn home_index(&self, key: i64) -> usize {
        ((key as u64).wrapping_mul(GOLDEN_RATIO) >> self.shift) as usize
    }

    /// `probe`-th slot of the sequence for a key whose home is `home`.
    #[inline(always)]
    fn slot(&self, home: usize, probe: usize) -> &Slot {
        let idx = home.wrapping_sub(probe) & (self.slots.len() - 1);
        // SAFETY: idx is masked to the power-of-two length.
        unsafe { self.slots.get_unchecked(idx) }
    }

    #[inline(always)]
    pub(crate) fn next_ptr<'g>(&self, guard: &'g Guard) -> Shared<'g, Generation> {
        self.next.load(Ordering::Acquire, guard)
    }

    #[inline(always)]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Option<&'g Generation> {
        // SAFETY: a published successor is freed only through kovan, after
        // every guard that could have loaded it is gone.
        let next = self.next_ptr(guard);
        if next.is_null() {
            None
        } else {
            unsafe { Some(&*next.as_raw()) }
        }
    }

    /// Successor of a generation that holds a frozen or moved slot.
    fn successor<'g>(&self, guard: &'g Guard) -> &'g Generation {
        match self.next(guard) {
            Some(next) => next,
            None => panic!(
                "corrupted table: migrated slot in a generation of capacity {} without successor",
                self.capacity()
            ),
        }
    }

    /// Returns the successor, installing a fresh one of double capacity if
    /// there is none yet. Only one installation ever succeeds.
    pub(crate) fn ensure_next<'g>(&self, guard: &'g Guard) -> &'g Generation {
        if let Some(next) = self.next(guard) {
            return next;
        }

        let fresh = Box::into_raw(Box::new(Generation::new(self.capacity() << 1)));
        match self.next.compare_exchange(
            unsafe { Shared::from_raw(core::ptr::null_mut()) },
            unsafe { Shared::from_raw(fresh) },
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => {
                tracing::debug!(
                    from = self.capacity(),
                    to = self.capacity() << 1,
                    "installed next generation"
                );
                // SAFETY: just published; reclaimed only through kovan.
                unsafe { &*fresh }
            }
            Err(installed) => unsafe {
                // Lost the race; nobody else has seen `fresh`.
                drop(Box::from_raw(fresh));
                &*installed.as_raw()
            },
        }
    }

    /// Returns the live value of `key` or `0`.
    pub(crate) fn lookup<'g>(&'g self, key: i64, guard: &'g Guard) -> i64 {
        let mut generation = self;

        'generations: loop {
            let home = generation.home_index(key);

            for probe in 0..MAX_PROBES {
                let slot = generation.slot(home, probe);
                let slot_key = slot.key.load(Ordering::Acquire);

                if slot_key == key {
                    let raw = slot.value.load(Ordering::Acquire);
                    match SlotValue::decode(raw) {
                        SlotValue::Live(v) => return v,
                        SlotValue::Empty | SlotValue::Tombstone => return 0,
                        SlotValue::Frozen(v) => generation.help_migrate(slot, key, raw, v, guard),
                        SlotValue::Moved | SlotValue::Forwarded => {}
                    }
                    generation = generation.successor(guard);
                    continue 'generations;
                }

                if slot_key == EMPTY_KEY {
                    // An unclaimed slot ends the sequence unless this part of
                    // the table was already retired.
                    if slot.value.load(Ordering::Acquire) == FORWARDED {
                        generation = generation.successor(guard);
                        continue 'generations;
                    }
                    return 0;
                }
            }

            match generation.next(guard) {
                Some(next) => generation = next,
                None => return 0,
            }
        }
    }

    /// Writes `new` for `key`, where `new` is a live value or [`TOMBSTONE`].
    ///
    /// Removals never claim a slot and never ask for growth.
    pub(crate) fn upsert<'g>(&'g self, key: i64, new: i64, guard: &'g Guard) -> Upsert<'g> {
        let removing = new == TOMBSTONE;
        let mut generation = self;

        'generations: loop {
            let home = generation.home_index(key);
            let mut probe = 0;

            while probe < MAX_PROBES {
                let slot = generation.slot(home, probe);
                let slot_key = slot.key.load(Ordering::Acquire);

                if slot_key == EMPTY_KEY {
                    if slot.value.load(Ordering::Acquire) == FORWARDED {
                        generation = generation.successor(guard);
                        continue 'generations;
                    }
                    if removing {
                        return Upsert::Done(0);
                    }
                    // Won or lost, look at the same slot again.
                    let _ = slot.key.compare_exchange(
                        EMPTY_KEY,
                        key,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    continue;
                }

                if slot_key != key {
                    probe += 1;
                    continue;
                }

                let raw = slot.value.load(Ordering::Acquire);
                match SlotValue::decode(raw) {
                    SlotValue::Empty | SlotValue::Tombstone => {
                        if removing {
                            return Upsert::Done(0);
                        }
                        if slot
                            .value
                            .compare_exchange(raw, new, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            return Upsert::Done(0);
                        }
                    }
                    SlotValue::Live(old) => {
                        if slot
                            .value
                            .compare_exchange(raw, new, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            return Upsert::Done(old);
                        }
                    }
                    SlotValue::Frozen(v) => {
                        generation.help_migrate(slot, key, raw, v, guard);
                        generation = generation.successor(guard);
                        continue 'generations;
                    }
                    SlotValue::Moved | SlotValue::Forwarded => {
                        generation = generation.successor(guard);
                        continue 'generations;
                    }
                }
                // CAS lost to a concurrent writer or migrator; reread the slot.
            }

            match generation.next(guard) {
                Some(next) => generation = next,
                None if removing => return Upsert::Done(0),
                None => return Upsert::NeedsGrowth(generation),
            }
        }
    }

    /// Installs the successor and drives every slot of this generation to a
    /// terminal state. Safe to run from any number of threads at once.
    pub(crate) fn grow<'g>(&self, guard: &'g Guard) -> &'g Generation {
        let next = self.ensure_next(guard);
        if self.is_migrated() {
            return next;
        }

        for slot in self.slots.iter() {
            loop {
                let raw = slot.value.load(Ordering::Acquire);
                match SlotValue::decode(raw) {
                    // Nothing to copy; a pending copy of this key must look
                    // further down the chain.
                    SlotValue::Empty => {
                        if slot
                            .value
                            .compare_exchange(raw, FORWARDED, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            break;
                        }
                    }
                    SlotValue::Tombstone => {
                        if slot
                            .value
                            .compare_exchange(raw, MOVED, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            break;
                        }
                    }
                    SlotValue::Live(v) => {
                        // The frozen arm performs the copy on the next pass.
                        let _ = slot.value.compare_exchange(
                            raw,
                            value::freeze(v),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }
                    SlotValue::Frozen(v) => {
                        let key = slot.key.load(Ordering::Acquire);
                        debug_assert!(key > 0, "frozen value {} in unclaimed slot", v);
                        if value::is_value(v) {
                            next.claim(key, v, guard);
                        }
                        let _ = slot.value.compare_exchange(
                            raw,
                            MOVED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }
                    SlotValue::Moved | SlotValue::Forwarded => break,
                }
            }
        }

        self.migrated.store(true, Ordering::Release);
        next
    }

    /// True once a `grow` sweep over this generation has completed.
    #[inline(always)]
    pub(crate) fn is_migrated(&self) -> bool {
        self.migrated.load(Ordering::Acquire)
    }

    /// Finishes the migration of a slot another thread froze.
    fn help_migrate<'g>(&'g self, slot: &Slot, key: i64, frozen: i64, v: i64, guard: &'g Guard) {
        let next = self.successor(guard);
        tracing::trace!(key, capacity = self.capacity(), "helping migrate frozen slot");
        if value::is_value(v) {
            next.claim(key, v, guard);
        }
        let _ = slot
            .value
            .compare_exchange(frozen, MOVED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Copies a migrating `key`/`v` pair into this generation (or a later one
    /// when this one is full or retired before the copy arrived).
    ///
    /// The destination value only ever moves away from empty once, so racing
    /// migrators of the same slot agree, and a newer write or removal that
    /// already landed is never overwritten. Only `FORWARDED` is passed
    /// through: a `MOVED` destination held data, so the copy is stale.
    fn claim<'g>(&'g self, key: i64, v: i64, guard: &'g Guard) {
        let mut generation = self;

        'generations: loop {
            let home = generation.home_index(key);
            let mut probe = 0;

            while probe < MAX_PROBES {
                let slot = generation.slot(home, probe);
                let slot_key = slot.key.load(Ordering::Acquire);

                if slot_key == EMPTY_KEY {
                    if slot.value.load(Ordering::Acquire) == FORWARDED {
                        generation = generation.successor(guard);
                        continue 'generations;
                    }
                    let _ = slot.key.compare_exchange(
                        EMPTY_KEY,
                        key,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    continue;
                }

                if slot_key != key {
                    probe += 1;
                    continue;
                }

                match slot
                    .value
                    .compare_exchange(EMPTY, v, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => return,
                    Err(FORWARDED) => {
                        generation = generation.successor(guard);
                        continue 'generations;
                    }
                    // Already copied, or settled by a later write.
                    Err(_) => return,
                }
            }

            generation = generation.ensure_next(guard);
        }
    }
}

/// Frees `head` and every generation reachable from it.
///
/// # Safety
///
/// The caller must have exclusive access to the chain, and no generation in
/// it may have been passed to `kovan::retire`.
pub(crate) unsafe fn drop_chain<'g>(head: Shared<'g, Generation>, guard: &'g Guard) {
    let mut current = head;
    while !current.is_null() {
        unsafe {
            let next = (*current.as_raw()).next_ptr(guard);
            drop(Box::from_raw(current.as_raw()));
            current = next;
        }
    }
}
