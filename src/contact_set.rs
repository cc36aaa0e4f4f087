// Copyright 2017 Matthew Plant. This file is part of MGF.
//
// MGF is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// MGF is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with MGF. If not, see <http://www.gnu.org/licenses/>.

//! Spatially hashed contact merging.
//!
//! Mesh against mesh queries can produce thousands of candidate contacts, so
//! finding an existing contact at the same position has to be O(1). Contact
//! positions are snapped to a grid, the three grid coordinates are hashed
//! into a fixed table of small buckets, and a bucket hit is confirmed with an
//! exact distance check.

use cgmath::InnerSpace;
use smallvec::SmallVec;

use crate::geom::GeomId;
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::math::{Real, Vec3};

/// Grid resolution of the position hash.
pub const CONTACT_POS_HASH_QUOTIENT: Real = 10000.0;

/// Number of buckets in the table.
pub const CONTACT_HASH_SIZE: usize = 256;

/// Keys stored per bucket before new contacts stop being tracked.
pub const MAX_CONTACTS_PER_BUCKET: usize = 4;

/// Depths closer than this are considered equal and their normals averaged.
pub const CONTACT_DIFF_EPSILON: Real = 0.00001;

/// An averaged normal shorter than this means the merged normals cancelled.
pub const CONTACT_NORMAL_ZERO: Real = 0.0000001;

const SQRT_3: Real = 1.732_050_807_568_877_2;

#[derive(Copy, Clone, Debug)]
struct ContactKey {
    key: u32,
    index: usize,
}

/// The result of pushing a contact through the set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Merge {
    /// Stored as a new contact.
    Added,
    /// Folded into an existing contact.
    Merged,
    /// Its normal cancelled an existing contact, which was removed.
    Freed,
    /// The buffer is full and nothing matched.
    Dropped,
}

/// Hashes the grid cell containing `pos`.
pub fn contact_key(pos: Vec3) -> u32 {
    let mut hash: u32 = 0;
    for i in 0..3 {
        let coord = (pos[i] * CONTACT_POS_HASH_QUOTIENT).floor();
        let bits = coord.to_bits();
        let input = (bits as u32) ^ ((bits >> 32) as u32);

        hash = (hash << 4).wrapping_add(input >> 24) ^ (hash >> 28);
        hash = (hash << 4).wrapping_add((input >> 16) & 0xFF) ^ (hash >> 28);
        hash = (hash << 4).wrapping_add((input >> 8) & 0xFF) ^ (hash >> 28);
        hash = (hash << 4).wrapping_add(input & 0xFF) ^ (hash >> 28);

        if i < 2 {
            hash = hash.rotate_left(11);
        }
    }
    hash
}

#[inline]
fn bucket_index(key: u32) -> usize {
    let index = key ^ (key >> 16);
    ((index ^ (index >> 8)) & 0xFF) as usize
}

/// The position hash over the contacts of one query. It tracks contacts by
/// their index in the buffer, so it must be cleared before every query and
/// the buffer must only be changed through it while the query runs.
#[derive(Clone, Debug)]
pub struct ContactSet {
    buckets: Vec<SmallVec<[ContactKey; MAX_CONTACTS_PER_BUCKET]>>,
    /// Length of the running normal sum of each contact, indexed like the
    /// buffer from `base` on.
    weights: Vec<Real>,
    base: usize,
}

impl Default for ContactSet {
    fn default() -> Self {
        ContactSet::new()
    }
}

impl ContactSet {
    pub fn new() -> Self {
        ContactSet {
            buckets: vec![SmallVec::new(); CONTACT_HASH_SIZE],
            weights: Vec::new(),
            base: 0,
        }
    }

    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.weights.clear();
        self.base = 0;
    }

    /// Clears the set for a query appending to `buf`. Contacts already in
    /// the buffer are left alone.
    pub fn begin(&mut self, buf: &ContactBuffer) {
        self.clear();
        self.base = buf.len();
    }

    /// Number of contacts tracked by the hash.
    pub fn tracked(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    fn find(&self, buf: &ContactBuffer, key: u32, pos: Vec3) -> Option<usize> {
        let tolerance = 1.00001 * SQRT_3 / CONTACT_POS_HASH_QUOTIENT;
        self.buckets[bucket_index(key)]
            .iter()
            .find(|k| k.key == key && (buf[k.index].pos - pos).magnitude() < tolerance)
            .map(|k| k.index)
    }

    fn insert(&mut self, key: u32, index: usize) {
        let bucket = &mut self.buckets[bucket_index(key)];
        if bucket.len() < MAX_CONTACTS_PER_BUCKET {
            bucket.push(ContactKey { key, index });
        } else {
            log::warn!("contact hash bucket overflow, close contacts might not be culled");
        }
    }

    fn remove(&mut self, key: u32, index: usize) {
        let bucket = &mut self.buckets[bucket_index(key)];
        if let Some(i) = bucket.iter().position(|k| k.index == index) {
            bucket.swap_remove(i);
        }
    }

    fn reindex(&mut self, key: u32, from: usize, to: usize) {
        if let Some(k) = self.buckets[bucket_index(key)]
            .iter_mut()
            .find(|k| k.index == from)
        {
            k.index = to;
        }
    }

    /// Removes contact `index` from the buffer, moving the last contact into
    /// its slot.
    fn free(&mut self, buf: &mut ContactBuffer, index: usize) {
        self.remove(contact_key(buf[index].pos), index);
        let last = buf.len() - 1;
        if index != last {
            self.reindex(contact_key(buf[last].pos), last, index);
        }
        buf.swap_remove(index);
        self.weights.swap_remove(index - self.base);
    }

    /// Adds `contact` to `buf`, merging it with a contact in the same grid
    /// cell when there is one.
    ///
    /// A clearly deeper contact replaces the existing one. One of nearly the
    /// same depth has its normal averaged into the existing normal, weighted
    /// by the length of the running sum; if the normals cancel out the
    /// existing contact is removed. `merge` picks the side id of a merged
    /// contact for the geom it is called with.
    pub fn push<F>(&mut self, buf: &mut ContactBuffer, contact: ContactGeom, merge: F) -> Merge
    where
        F: Fn(GeomId, i32, i32) -> i32,
    {
        let key = contact_key(contact.pos);
        let index = match self.find(buf, key, contact.pos) {
            Some(index) => index,
            None => {
                if !buf.add(contact) {
                    return Merge::Dropped;
                }
                self.weights.push(1.0);
                self.insert(key, buf.len() - 1);
                return Merge::Added;
            }
        };

        let depth_difference = contact.depth - buf[index].depth;
        if depth_difference > CONTACT_DIFF_EPSILON {
            let existing = buf.get_mut(index);
            *existing = ContactGeom {
                pos: existing.pos,
                ..contact
            };
            self.weights[index - self.base] = 1.0;
            Merge::Merged
        } else if depth_difference >= -CONTACT_DIFF_EPSILON {
            let contact = if buf[index].g1 == contact.g2 {
                contact.flipped()
            } else {
                contact
            };
            let existing = buf.get_mut(index);
            let sum = contact.normal + existing.normal * self.weights[index - self.base];
            let len = sum.magnitude();
            if len > CONTACT_NORMAL_ZERO {
                existing.normal = sum / len;
                existing.side1 = merge(existing.g1, existing.side1, contact.side1);
                existing.side2 = merge(existing.g2, existing.side2, contact.side2);
                self.weights[index - self.base] = len;
                Merge::Merged
            } else {
                self.free(buf, index);
                Merge::Freed
            }
        } else {
            Merge::Merged
        }
    }
}

#[cfg(test)]
mod tests {
    mod contact_set {
        use approx::assert_abs_diff_eq;

        use crate::contact_set::*;
        use crate::geom::GeomId;
        use crate::manifold::{ContactBuffer, ContactGeom};
        use crate::math::Vec3;

        fn contact(pos: Vec3, normal: Vec3, depth: f64, sides: (i32, i32)) -> ContactGeom {
            ContactGeom::new(pos, normal, depth, GeomId(1), GeomId(2)).with_sides(sides.0, sides.1)
        }

        fn no_merge(_: GeomId, _: i32, _: i32) -> i32 {
            -1
        }

        #[test]
        fn test_key_is_cell_stable() {
            let a = contact_key(Vec3::new(0.12341, 1.0, -2.0));
            let b = contact_key(Vec3::new(0.12349, 1.0, -2.0));
            let c = contact_key(Vec3::new(0.12351, 1.0, -2.0));
            assert_eq!(a, b);
            assert_ne!(a, c);
        }

        #[test]
        fn test_merge_same_position() {
            let mut set = ContactSet::new();
            let mut buf = ContactBuffer::with_capacity(8);
            let p = Vec3::new(0.5, 0.5, 0.0);
            let c = contact(p, Vec3::unit_z(), 0.1, (0, 0));
            assert_eq!(set.push(&mut buf, c, no_merge), Merge::Added);
            assert_eq!(set.push(&mut buf, c, no_merge), Merge::Merged);
            assert_eq!(buf.len(), 1);
            assert_abs_diff_eq!(buf[0].normal, Vec3::unit_z());
            // Equal depth from another triangle pair merges the side ids.
            assert_eq!(buf[0].side1, -1);

            let deeper = contact(p, Vec3::unit_x(), 0.2, (4, 5));
            assert_eq!(set.push(&mut buf, deeper, no_merge), Merge::Merged);
            assert_eq!(buf.len(), 1);
            assert_abs_diff_eq!(buf[0].depth, 0.2);
            assert_abs_diff_eq!(buf[0].normal, Vec3::unit_x());
            assert_eq!(buf[0].side1, 4);
        }

        #[test]
        fn test_average_normals() {
            let mut set = ContactSet::new();
            let mut buf = ContactBuffer::with_capacity(8);
            let p = Vec3::new(1.0, 2.0, 3.0);
            set.push(&mut buf, contact(p, Vec3::unit_x(), 0.1, (1, 2)), no_merge);
            set.push(&mut buf, contact(p, Vec3::unit_y(), 0.1, (3, 4)), |_, a, b| a.max(b));
            let h = 1.0 / 2.0f64.sqrt();
            assert_abs_diff_eq!(buf[0].normal, Vec3::new(h, h, 0.0), epsilon = 1.0e-12);
            assert_eq!(buf[0].side1, 3);
            assert_eq!(buf[0].side2, 4);
        }

        #[test]
        fn test_cancelled_normal_frees() {
            let mut set = ContactSet::new();
            let mut buf = ContactBuffer::with_capacity(8);
            let a = Vec3::new(0.0, 0.0, 0.0);
            let b = Vec3::new(5.0, 0.0, 0.0);
            set.push(&mut buf, contact(a, Vec3::unit_z(), 0.1, (0, 0)), no_merge);
            set.push(&mut buf, contact(b, Vec3::unit_z(), 0.1, (0, 0)), no_merge);
            assert_eq!(
                set.push(&mut buf, contact(a, -Vec3::unit_z(), 0.1, (0, 0)), no_merge),
                Merge::Freed
            );
            assert_eq!(buf.len(), 1);
            assert_abs_diff_eq!(buf[0].pos, b);
            assert_eq!(set.tracked(), 1);
            // The moved contact is still found at its new index.
            assert_eq!(
                set.push(&mut buf, contact(b, Vec3::unit_z(), 0.5, (0, 0)), no_merge),
                Merge::Merged
            );
            assert_abs_diff_eq!(buf[0].depth, 0.5);
        }

        #[test]
        fn test_begin_after_existing_contacts() {
            let mut set = ContactSet::new();
            let mut buf = ContactBuffer::with_capacity(8);
            let p = Vec3::new(0.0, 0.0, 0.0);
            buf.add(contact(Vec3::new(9.0, 9.0, 9.0), Vec3::unit_z(), 1.0, (0, 0)));
            set.begin(&buf);
            set.push(&mut buf, contact(p, Vec3::unit_x(), 0.1, (0, 0)), no_merge);
            set.push(&mut buf, contact(p, Vec3::unit_y(), 0.1, (0, 0)), no_merge);
            assert_eq!(buf.len(), 2);
            let h = 1.0 / 2.0f64.sqrt();
            assert_abs_diff_eq!(buf[1].normal, Vec3::new(h, h, 0.0), epsilon = 1.0e-12);
            assert_abs_diff_eq!(buf[0].depth, 1.0);
        }

        #[test]
        fn test_full_buffer() {
            let mut set = ContactSet::new();
            let mut buf = ContactBuffer::with_capacity(1);
            let p = Vec3::new(0.0, 0.0, 0.0);
            set.push(&mut buf, contact(p, Vec3::unit_z(), 0.1, (0, 0)), no_merge);
            assert_eq!(
                set.push(&mut buf, contact(Vec3::new(1.0, 0.0, 0.0), Vec3::unit_z(), 0.3, (0, 0)), no_merge),
                Merge::Dropped
            );
            assert_eq!(
                set.push(&mut buf, contact(p, Vec3::unit_z(), 0.3, (0, 0)), no_merge),
                Merge::Merged
            );
            assert_eq!(buf.len(), 1);
            assert_abs_diff_eq!(buf[0].depth, 0.3);
        }
    }
}
