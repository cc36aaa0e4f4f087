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

use std::cmp::Ordering;
use std::ops::Index;
use std::slice;

use bitflags::bitflags;
use cgmath::InnerSpace;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::geom::GeomId;
use crate::math::{Real, Vec3, EPSILON};

bitflags! {
    /// Flags passed with every collision request. The low sixteen bits hold
    /// the maximum number of contacts the caller wants back.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ContactFlags: u32 {
        const NUMC_MASK = 0xffff;
        /// The caller only cares whether the geoms touch; contacts are not
        /// deduplicated and queries may stop early.
        const UNIMPORTANT = 0x8000_0000;
    }
}

impl ContactFlags {
    /// Requests up to `max` contacts, clamped to what the mask can hold.
    pub fn with_capacity(max: usize) -> Self {
        ContactFlags::from_bits_retain(max.min(0xffff) as u32)
    }

    pub fn unimportant(self) -> Self {
        self | ContactFlags::UNIMPORTANT
    }

    #[inline]
    pub fn capacity(self) -> usize {
        (self.bits() & ContactFlags::NUMC_MASK.bits()) as usize
    }

    #[inline]
    pub fn is_unimportant(self) -> bool {
        self.contains(ContactFlags::UNIMPORTANT)
    }
}

/// A single point of contact between two geoms.
///
/// The normal is a unit vector pointing from `g2` towards `g1`: moving `g1`
/// along it by `depth` separates the pair. The side ids name the triangle
/// involved on a mesh and are -1 otherwise.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactGeom {
    pub pos: Vec3,
    pub normal: Vec3,
    pub depth: Real,
    pub g1: GeomId,
    pub g2: GeomId,
    pub side1: i32,
    pub side2: i32,
}

impl ContactGeom {
    pub fn new(pos: Vec3, normal: Vec3, depth: Real, g1: GeomId, g2: GeomId) -> Self {
        ContactGeom {
            pos,
            normal,
            depth,
            g1,
            g2,
            side1: -1,
            side2: -1,
        }
    }

    pub fn with_sides(mut self, side1: i32, side2: i32) -> Self {
        self.side1 = side1;
        self.side2 = side2;
        self
    }

    /// The same contact seen from the other geom.
    pub fn flipped(&self) -> Self {
        ContactGeom {
            pos: self.pos,
            normal: -self.normal,
            depth: self.depth,
            g1: self.g2,
            g2: self.g1,
            side1: self.side2,
            side2: self.side1,
        }
    }

    /// Two contacts are the same when their positions coincide and their
    /// normals are parallel or anti-parallel.
    fn matches(&self, pos: Vec3, normal: Vec3) -> bool {
        (pos - self.pos).magnitude2() < EPSILON && normal.dot(self.normal).abs() > 1.0 - EPSILON
    }
}

/// The bounded list of contacts produced by one collision query.
#[derive(Clone, Debug)]
pub struct ContactBuffer {
    contacts: Vec<ContactGeom>,
    flags: ContactFlags,
}

impl ContactBuffer {
    pub fn new(flags: ContactFlags) -> Self {
        ContactBuffer {
            contacts: Vec::with_capacity(flags.capacity().min(64)),
            flags,
        }
    }

    pub fn with_capacity(max: usize) -> Self {
        ContactBuffer::new(ContactFlags::with_capacity(max))
    }

    pub fn flags(&self) -> ContactFlags {
        self.flags
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.flags.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.contacts.len() >= self.capacity()
    }

    #[inline]
    pub fn is_unimportant(&self) -> bool {
        self.flags.is_unimportant()
    }

    /// Full and without merging, so further contacts cannot change it.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.is_full() && self.is_unimportant()
    }

    pub fn contacts(&self) -> &[ContactGeom] {
        &self.contacts
    }

    pub fn iter(&self) -> slice::Iter<ContactGeom> {
        self.contacts.iter()
    }

    pub fn into_vec(self) -> Vec<ContactGeom> {
        self.contacts
    }

    /// Adds a contact, merging it into an existing one at the same position
    /// with a parallel normal.
    ///
    /// A merge keeps the deeper depth and happens even when the buffer is
    /// full, since a later triangle may reveal a deeper matching contact.
    /// Every matching contact is updated. Returns whether a new contact was
    /// stored. Unimportant contacts skip the merge.
    pub fn push(&mut self, contact: ContactGeom) -> bool {
        if !self.is_unimportant() {
            let mut duplicate = false;
            for old in self.contacts.iter_mut() {
                if old.matches(contact.pos, contact.normal) {
                    if contact.depth > old.depth {
                        old.depth = contact.depth;
                    }
                    duplicate = true;
                }
            }
            if duplicate {
                return false;
            }
        }
        self.add(contact)
    }

    /// Stores a contact without looking for duplicates. Returns false if the
    /// buffer is full.
    #[inline]
    pub fn add(&mut self, contact: ContactGeom) -> bool {
        if self.is_full() {
            return false;
        }
        self.contacts.push(contact);
        true
    }

    pub(crate) fn get_mut(&mut self, i: usize) -> &mut ContactGeom {
        &mut self.contacts[i]
    }

    pub(crate) fn swap_remove(&mut self, i: usize) -> ContactGeom {
        self.contacts.swap_remove(i)
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.contacts.truncate(len);
    }

    /// Flips every contact from `start` on, for colliders that were run with
    /// their arguments swapped.
    pub(crate) fn flip_from(&mut self, start: usize) {
        for c in self.contacts[start..].iter_mut() {
            *c = c.flipped();
        }
    }

    /// Replaces `from` with `to` as the first geom of every contact from
    /// `start` on.
    pub(crate) fn remap_g1(&mut self, start: usize, from: GeomId, to: GeomId) {
        for c in self.contacts[start..].iter_mut() {
            if c.g1 == from {
                c.g1 = to;
            }
        }
    }
}

impl Index<usize> for ContactBuffer {
    type Output = ContactGeom;

    fn index(&self, i: usize) -> &ContactGeom {
        &self.contacts[i]
    }
}

impl<'a> IntoIterator for &'a ContactBuffer {
    type Item = &'a ContactGeom;
    type IntoIter = slice::Iter<'a, ContactGeom>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.iter()
    }
}

/// Per axis tolerance under which two local contacts are considered the
/// same.
pub const SAME_CONTACT_POSITION_EPSILON: Real = 0.0001;
pub const SAME_CONTACT_NORMAL_EPSILON: Real = 0.0001;

/// A contact gathered by a collider before it is written to the caller's
/// buffer.
#[derive(Copy, Clone, Debug)]
pub struct LocalContact {
    pub pos: Vec3,
    pub normal: Vec3,
    pub depth: Real,
    pub tri: u32,
    keep: bool,
}

impl LocalContact {
    fn is_near(&self, other: &LocalContact) -> bool {
        let dp = self.pos - other.pos;
        let dn = self.normal - other.normal;
        dp.x.abs() < SAME_CONTACT_POSITION_EPSILON
            && dp.y.abs() < SAME_CONTACT_POSITION_EPSILON
            && dp.z.abs() < SAME_CONTACT_POSITION_EPSILON
            && dn.x.abs() < SAME_CONTACT_NORMAL_EPSILON
            && dn.y.abs() < SAME_CONTACT_NORMAL_EPSILON
            && dn.z.abs() < SAME_CONTACT_NORMAL_EPSILON
    }
}

/// Contacts collected over every triangle of a query, filtered before
/// being written out.
#[derive(Clone, Debug, Default)]
pub struct LocalContacts {
    contacts: SmallVec<[LocalContact; 16]>,
}

impl LocalContacts {
    pub fn new() -> Self {
        LocalContacts::default()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }

    pub fn push(&mut self, pos: Vec3, normal: Vec3, depth: Real, tri: u32) {
        self.contacts.push(LocalContact {
            pos,
            normal,
            depth,
            tri,
            keep: true,
        });
    }

    /// Of every pair of near identical contacts the shallower is dropped.
    pub fn optimize(&mut self) {
        let n = self.contacts.len();
        for i in 0..n {
            for j in i + 1..n {
                if self.contacts[i].is_near(&self.contacts[j]) {
                    if self.contacts[j].depth > self.contacts[i].depth {
                        self.contacts[i].keep = false;
                    } else {
                        self.contacts[j].keep = false;
                    }
                }
            }
        }
    }

    /// Writes the surviving contacts into `buf` until it is full, converting
    /// each with `make`. Near duplicates are removed first unless the buffer
    /// asks for unimportant contacts; when more survive than fit, the
    /// deepest are written.
    pub fn flush<F>(&mut self, buf: &mut ContactBuffer, make: F) -> usize
    where
        F: Fn(&LocalContact) -> ContactGeom,
    {
        if self.contacts.len() > 1 && !buf.is_unimportant() {
            self.optimize();
            self.contacts.retain(|c| c.keep);
            let room = buf.capacity().saturating_sub(buf.len());
            if self.contacts.len() > room {
                self.contacts
                    .sort_by(|a, b| b.depth.partial_cmp(&a.depth).unwrap_or(Ordering::Equal));
            }
        }
        let mut written = 0;
        for c in self.contacts.iter().filter(|c| c.keep) {
            if !buf.add(make(c)) {
                break;
            }
            written += 1;
        }
        self.contacts.clear();
        written
    }
}
