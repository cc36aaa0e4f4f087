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

use std::ops::{Add, Mul};

use cgmath::{InnerSpace, Matrix, Zero};
use serde::{Deserialize, Serialize};

use crate::geom::Pose;
use crate::math::{abs_vec, rotated_extents, Mat3, Real, Triangle, Vec3};

/// A type that can test for overlap with another type.
pub trait Overlaps<RHS> {
    fn overlaps(&self, rhs: &RHS) -> bool;
}

/// A type that can completely enclose another type.
pub trait Contains<RHS> {
    fn contains(&self, rhs: &RHS) -> bool;
}

/// A volume that can be combined with another of the same kind.
///
/// Bounds are what the hierarchy stores in its nodes. The surface area is
/// only used as an insertion cost, so any measure proportional to it works.
pub trait Bound: Copy + Overlaps<Self> + Contains<Self> {
    /// Produce a bound that encloses the two arguments.
    fn combine(a: &Self, b: &Self) -> Self;

    /// Return a measure of the area of the object.
    fn surface_area(&self) -> Real;
}

/// A type that can be decomposed into a bound.
pub trait BoundedBy<B: Bound> {
    fn bounds(&self) -> B;
}

/// All geometries that satisfy Bound are bounded by themselves.
impl<B: Bound> BoundedBy<B> for B {
    #[inline(always)]
    fn bounds(&self) -> B {
        *self
    }
}

////////////////////////////////////////////////////////////////////////////////
// AABB

/// An axis aligned bounding box stored as a center and half extents.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AABB {
    pub c: Vec3,
    pub r: Vec3,
}

impl AABB {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        AABB {
            c: (min + max) * 0.5,
            r: (max - min) * 0.5,
        }
    }

    /// The smallest box around a set of points. Returns `None` for an empty
    /// iterator.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| {
            (
                Vec3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
                Vec3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
            )
        });
        Some(AABB::from_min_max(min, max))
    }

    #[inline]
    pub fn min(&self) -> Vec3 {
        self.c - self.r
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.c + self.r
    }

    /// Grows the box so that it includes `p`.
    pub fn extend(&self, p: Vec3) -> Self {
        let min = self.min();
        let max = self.max();
        AABB::from_min_max(
            Vec3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
            Vec3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
        )
    }

    /// The world space box enclosing this box after applying `pose`.
    pub fn transformed(&self, pose: &Pose) -> Self {
        AABB {
            c: pose.transform_point(self.c),
            r: rotated_extents(&pose.r, self.r),
        }
    }

    /// The box enclosing this box after applying the inverse of `pose`.
    pub fn inverse_transformed(&self, pose: &Pose) -> Self {
        AABB {
            c: pose.inverse_transform_point(self.c),
            r: rotated_extents(&pose.r.transpose(), self.r),
        }
    }
}

impl Mul<Real> for AABB {
    type Output = Self;

    /// Scale the extents.
    fn mul(self, s: Real) -> AABB {
        AABB { r: self.r * s, ..self }
    }
}

impl Add<Real> for AABB {
    type Output = Self;

    /// Extend the box by a margin on every side.
    fn add(self, s: Real) -> AABB {
        AABB { r: self.r + Vec3::new(s, s, s), ..self }
    }
}

impl Overlaps<AABB> for AABB {
    fn overlaps(&self, rhs: &AABB) -> bool {
        (self.c.x - rhs.c.x).abs() <= self.r.x + rhs.r.x
            && (self.c.y - rhs.c.y).abs() <= self.r.y + rhs.r.y
            && (self.c.z - rhs.c.z).abs() <= self.r.z + rhs.r.z
    }
}

impl Contains<AABB> for AABB {
    fn contains(&self, rhs: &AABB) -> bool {
        let (amin, amax) = (self.min(), self.max());
        let (bmin, bmax) = (rhs.min(), rhs.max());
        amin.x <= bmin.x
            && amin.y <= bmin.y
            && amin.z <= bmin.z
            && amax.x >= bmax.x
            && amax.y >= bmax.y
            && amax.z >= bmax.z
    }
}

impl Bound for AABB {
    /// The returned AABB is the smallest volume that encloses both
    /// arguments.
    fn combine(a: &AABB, b: &AABB) -> AABB {
        let (amin, amax) = (a.min(), a.max());
        let (bmin, bmax) = (b.min(), b.max());
        AABB::from_min_max(
            Vec3::new(amin.x.min(bmin.x), amin.y.min(bmin.y), amin.z.min(bmin.z)),
            Vec3::new(amax.x.max(bmax.x), amax.y.max(bmax.y), amax.z.max(bmax.z)),
        )
    }

    fn surface_area(&self) -> Real {
        self.r.x * self.r.y + self.r.y * self.r.z + self.r.z * self.r.x
    }
}

impl BoundedBy<AABB> for Triangle {
    fn bounds(&self) -> AABB {
        AABB::from_min_max(
            Vec3::new(
                self.a.x.min(self.b.x).min(self.c.x),
                self.a.y.min(self.b.y).min(self.c.y),
                self.a.z.min(self.b.z).min(self.c.z),
            ),
            Vec3::new(
                self.a.x.max(self.b.x).max(self.c.x),
                self.a.y.max(self.b.y).max(self.c.y),
                self.a.z.max(self.b.z).max(self.c.z),
            ),
        )
    }
}

////////////////////////////////////////////////////////////////////////////////
// OBB

/// An oriented bounding box. The columns of `axes` are the box axes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OBB {
    pub c: Vec3,
    pub axes: Mat3,
    pub r: Vec3,
}

impl OBB {
    pub fn new(c: Vec3, axes: Mat3, r: Vec3) -> Self {
        OBB { c, axes, r }
    }

    /// The box `aabb` (given in the local frame of `pose`) placed by `pose`.
    pub fn from_aabb(aabb: &AABB, pose: &Pose) -> Self {
        OBB {
            c: pose.transform_point(aabb.c),
            axes: pose.r,
            r: aabb.r,
        }
    }

    /// Re-expresses the box in the local frame of `pose`.
    pub fn to_local(&self, pose: &Pose) -> Self {
        let inv = pose.r.transpose();
        OBB {
            c: pose.inverse_transform_point(self.c),
            axes: inv * self.axes,
            r: self.r,
        }
    }

    /// The axis aligned box that encloses this box.
    pub fn aabb(&self) -> AABB {
        AABB {
            c: self.c,
            r: rotated_extents(&self.axes, self.r),
        }
    }

    /// Whether `p` lies within the box.
    pub fn contains_point(&self, p: Vec3) -> bool {
        let d = p - self.c;
        (0..3).all(|i| d.dot(self.axes[i]).abs() <= self.r[i])
    }

    fn corners(&self) -> [Vec3; 8] {
        let mut out = [Vec3::zero(); 8];
        for (i, corner) in out.iter_mut().enumerate() {
            let sx = if i & 1 == 0 { -1.0 } else { 1.0 };
            let sy = if i & 2 == 0 { -1.0 } else { 1.0 };
            let sz = if i & 4 == 0 { -1.0 } else { 1.0 };
            *corner = self.c
                + self.axes.x * (sx * self.r.x)
                + self.axes.y * (sy * self.r.y)
                + self.axes.z * (sz * self.r.z);
        }
        out
    }
}

impl Mul<Real> for OBB {
    type Output = Self;

    /// Scale the extents.
    fn mul(self, s: Real) -> OBB {
        OBB { r: self.r * s, ..self }
    }
}

impl Contains<OBB> for OBB {
    fn contains(&self, rhs: &OBB) -> bool {
        rhs.corners().iter().all(|p| self.contains_point(*p))
    }
}

impl Overlaps<AABB> for OBB {
    /// Separating axis test over the three box axes of each volume and their
    /// nine cross products.
    fn overlaps(&self, rhs: &AABB) -> bool {
        // Express everything in the frame of the AABB.
        let t = self.c - rhs.c;
        let r = self.axes;
        let eps = Vec3::new(1.0e-9, 1.0e-9, 1.0e-9);
        let abs_r = Mat3::from_cols(abs_vec(r.x) + eps, abs_vec(r.y) + eps, abs_vec(r.z) + eps);
        let a = rhs.r;
        let b = self.r;

        // AABB axes.
        for i in 0..3 {
            let rb = abs_r.x[i] * b.x + abs_r.y[i] * b.y + abs_r.z[i] * b.z;
            if t[i].abs() > a[i] + rb {
                return false;
            }
        }

        // OBB axes.
        for j in 0..3 {
            let ra = abs_r[j].dot(a);
            if t.dot(r[j]).abs() > ra + b[j] {
                return false;
            }
        }

        // Cross products of AABB axis i and OBB axis j.
        for i in 0..3 {
            let i1 = (i + 1) % 3;
            let i2 = (i + 2) % 3;
            for j in 0..3 {
                let j1 = (j + 1) % 3;
                let j2 = (j + 2) % 3;
                let ra = a[i1] * abs_r[j][i2] + a[i2] * abs_r[j][i1];
                let rb = b[j1] * abs_r[j2][i] + b[j2] * abs_r[j1][i];
                let dist = (t[i2] * r[j][i1] - t[i1] * r[j][i2]).abs();
                if dist > ra + rb {
                    return false;
                }
            }
        }

        true
    }
}

////////////////////////////////////////////////////////////////////////////////
// Spheres

/// A bounding sphere.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub c: Vec3,
    pub r: Real,
}

impl Overlaps<AABB> for BoundingSphere {
    fn overlaps(&self, rhs: &AABB) -> bool {
        let (min, max) = (rhs.min(), rhs.max());
        let closest = Vec3::new(
            self.c.x.max(min.x).min(max.x),
            self.c.y.max(min.y).min(max.y),
            self.c.z.max(min.z).min(max.z),
        );
        (closest - self.c).magnitude2() <= self.r * self.r
    }
}

impl Contains<BoundingSphere> for BoundingSphere {
    fn contains(&self, rhs: &BoundingSphere) -> bool {
        (rhs.c - self.c).magnitude() + rhs.r <= self.r
    }
}

////////////////////////////////////////////////////////////////////////////////
// Segments

/// A finite line segment from `a` to `b`, used for ray queries.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment {
    pub a: Vec3,
    pub b: Vec3,
}

impl Overlaps<AABB> for Segment {
    /// Slab test.
    fn overlaps(&self, rhs: &AABB) -> bool {
        let d = self.b - self.a;
        let (min, max) = (rhs.min(), rhs.max());
        let mut tmin: Real = 0.0;
        let mut tmax: Real = 1.0;
        for i in 0..3 {
            if d[i].abs() < 1.0e-12 {
                if self.a[i] < min[i] || self.a[i] > max[i] {
                    return false;
                }
            } else {
                let inv = 1.0 / d[i];
                let mut t1 = (min[i] - self.a[i]) * inv;
                let mut t2 = (max[i] - self.a[i]) * inv;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                tmin = tmin.max(t1);
                tmax = tmax.min(t2);
                if tmin > tmax {
                    return false;
                }
            }
        }
        true
    }
}
