//! A self-verifying demonstration workload.
//!
//! [`CountdownBag`] holds buckets of abstract work units; processing one
//! unit decrements a bucket and bumps an internal `done` counter. The final
//! [`CountFold`] therefore must equal exactly the seeded total, whatever
//! the cluster shape, steal pattern, or tuner behavior, which makes this
//! workload the conservation oracle for the integration tests.
//!
//! The `done` counter travels with the bag, not with the fold: it is handed
//! to the result only through [`Bag::submit`]. Splits always carve off
//! fragments with `done == 0`, and workers merge even exhausted private
//! fragments back, so every processed unit is counted exactly once.

use serde::{Deserialize, Serialize};

use crate::bag::{Bag, Fold};

/// Total units processed across the cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountFold {
    pub count: u64,
}

impl Fold for CountFold {
    fn fold(&mut self, other: Self) {
        self.count += other.count;
    }
}

/// Buckets of synthetic work units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountdownBag {
    slots: Vec<u64>,
    done: u64,
}

impl CountdownBag {
    /// A bag holding `total` units spread across `slots` buckets.
    pub fn seeded(total: u64, slots: usize) -> Self {
        let slots = slots.max(1);
        let base = total / slots as u64;
        let mut buckets = vec![base; slots];
        buckets[0] += total % slots as u64;
        Self {
            slots: buckets,
            done: 0,
        }
    }

    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            done: 0,
        }
    }

    /// Units not yet processed.
    pub fn remaining(&self) -> u64 {
        self.slots.iter().sum()
    }

    /// Units processed and not yet submitted.
    pub fn processed(&self) -> u64 {
        self.done
    }
}

impl Bag for CountdownBag {
    type Result = CountFold;

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn is_splittable(&self) -> bool {
        self.remaining() >= 2
    }

    fn merge(&mut self, other: Self) {
        self.slots.extend(other.slots.into_iter().filter(|&s| s > 0));
        self.done += other.done;
    }

    fn process(&mut self, work_amount: usize, _shared: &mut CountFold) {
        let mut budget = work_amount as u64;
        for slot in &mut self.slots {
            if budget == 0 {
                break;
            }
            let consumed = budget.min(*slot);
            *slot -= consumed;
            self.done += consumed;
            budget -= consumed;
        }
        self.slots.retain(|&s| s > 0);
    }

    fn split(&mut self, take_all: bool) -> Option<Self> {
        if take_all {
            return Some(Self {
                slots: std::mem::take(&mut self.slots),
                done: 0,
            });
        }
        if !self.is_splittable() {
            return None;
        }
        // Half of every bucket; when all buckets hold a single unit this
        // yields nothing, so fall back to moving alternate buckets whole.
        let mut fragment: Vec<u64> = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let half = *slot / 2;
            *slot -= half;
            if half > 0 {
                fragment.push(half);
            }
        }
        if fragment.is_empty() {
            let keep = self.slots.len() / 2;
            fragment = self.slots.split_off(keep);
        }
        self.slots.retain(|&s| s > 0);
        debug_assert!(!fragment.is_empty());
        Some(Self {
            slots: fragment,
            done: 0,
        })
    }

    fn submit(&mut self, result: &mut CountFold) {
        result.count += self.done;
        self.done = 0;
    }
}
