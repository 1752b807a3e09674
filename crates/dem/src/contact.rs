//! Per-contact history: named scalar wildcards that live as long as the
//! contact does.
//!
//! The default force kernel keeps its tangential spring displacement here
//! (three scalars); user models may register more names. Entries are created
//! on first penetration, carried while the pair stays in contact, and swept
//! after every dynamics step by mark-and-sweep.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::geometry::GeomId;

/// Wildcard slots `0..3` hold the tangential displacement accumulator.
pub const TANGENT_X: usize = 0;
pub const TANGENT_Y: usize = 1;
pub const TANGENT_Z: usize = 2;
/// First slot available to user-registered wildcard names.
pub const USER_BASE: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub a: GeomId,
    pub b: GeomId,
}

impl PairKey {
    /// Canonical (ordered) key.
    pub fn new(a: GeomId, b: GeomId) -> Self {
        if a <= b {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }
}

struct Slot {
    values: Vec<f32>,
    marked: bool,
}

/// Contact history table, owned by the dynamics thread.
pub struct ContactTable {
    slots: FxHashMap<PairKey, Slot>,
    /// User wildcard names, in registration order after the built-ins.
    names: Vec<String>,
}

impl ContactTable {
    pub fn new(user_names: &[String]) -> Self {
        Self {
            slots: FxHashMap::default(),
            names: user_names.to_vec(),
        }
    }

    fn width(&self) -> usize {
        USER_BASE + self.names.len()
    }

    /// Slot index of a user wildcard name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name).map(|i| USER_BASE + i)
    }

    /// Fetch (creating zeroed if absent) and mark the history of a pair.
    pub fn touch(&mut self, key: PairKey) -> &mut [f32] {
        let width = self.width();
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            values: vec![0.0; width],
            marked: false,
        });
        slot.marked = true;
        &mut slot.values
    }

    /// Drop the history of a pair that separated.
    pub fn drop_pair(&mut self, key: PairKey) {
        self.slots.remove(&key);
    }

    /// Remove every entry not touched since the previous sweep.
    pub fn sweep(&mut self) {
        self.slots.retain(|_, slot| std::mem::take(&mut slot.marked));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read the tangential displacement of a live contact, if any.
    pub fn tangent_of(&self, key: PairKey) -> Option<Vec3> {
        self.slots.get(&key).map(|s| {
            Vec3::new(
                s.values[TANGENT_X],
                s.values[TANGENT_Y],
                s.values[TANGENT_Z],
            )
        })
    }
}
