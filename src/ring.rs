//! Fixed-capacity overwrite ring with per-slot locking.
//!
//! A single producer appends on the host's polling thread while queries run
//! on a worker thread. Each slot has its own mutex held only for the copy in
//! or out, so an append never waits on a whole-buffer lock and a reader never
//! observes a half-written record.

use crate::events::Sample;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Fixed-capacity circular store of event records.
///
/// The cursor always points at the most recently written slot; `-1` means
/// nothing has been written yet.
pub struct RingBuffer<T: Sample> {
    slots: Vec<Mutex<T>>,
    cursor: AtomicI64,
}

impl<T: Sample> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Mutex::new(T::default()));
        }
        Self {
            slots,
            cursor: AtomicI64::new(-1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Write `value` into the slot after the cursor, then advance the cursor.
    /// Single producer; concurrent readers are safe.
    pub fn append(&self, value: T) {
        let next = (self.cursor.load(Ordering::Acquire) + 1).rem_euclid(self.slots.len() as i64);
        match self.slots[next as usize].lock() {
            Ok(mut slot) => *slot = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
        self.cursor.store(next, Ordering::Release);
    }

    /// Copy of the most recently written record, if any.
    pub fn latest(&self) -> Option<T> {
        let cursor = self.cursor.load(Ordering::Acquire);
        if cursor < 0 {
            return None;
        }
        Some(self.read_slot(cursor as usize))
    }

    /// Walk backward from the cursor collecting records with event time in
    /// `[from, to]`, newest first, stopping at `max` matches or after one
    /// full revolution. Unwritten slots (event time zero) end the scan.
    pub fn snapshot_backward(&self, from: i64, to: i64, max: usize) -> Vec<T> {
        let cursor = self.cursor.load(Ordering::Acquire);
        let mut out = Vec::new();
        if cursor < 0 || max == 0 {
            return out;
        }
        let len = self.slots.len() as i64;
        let mut index = cursor;
        for _ in 0..self.slots.len() {
            let record = self.read_slot(index as usize);
            let time = record.event_time();
            if time == 0 {
                break;
            }
            if time >= from && time <= to {
                out.push(record);
                if out.len() >= max {
                    break;
                }
            }
            index = (index - 1).rem_euclid(len);
        }
        out
    }

    /// Count records with event time in `[from, to]`, scanning backward from
    /// the cursor, stopping early once `cap` is reached.
    pub fn count_in_range(&self, from: i64, to: i64, cap: usize) -> usize {
        let cursor = self.cursor.load(Ordering::Acquire);
        let mut count = 0;
        if cursor < 0 || cap == 0 {
            return count;
        }
        let len = self.slots.len() as i64;
        let mut index = cursor;
        for _ in 0..self.slots.len() {
            let record = self.read_slot(index as usize);
            let time = record.event_time();
            if time == 0 {
                break;
            }
            if time >= from && time <= to {
                count += 1;
                if count >= cap {
                    break;
                }
            }
            index = (index - 1).rem_euclid(len);
        }
        count
    }

    fn read_slot(&self, index: usize) -> T {
        match self.slots[index].lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
