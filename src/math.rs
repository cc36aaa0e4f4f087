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

//! Scalar, vector and plane primitives shared by every collider.

use cgmath::{InnerSpace, Matrix3, Vector3, Zero};
use serde::{Deserialize, Serialize};

/// Scalar type used throughout the crate.
pub type Real = f64;

/// A 3-vector. Positions are stored as vectors as well.
pub type Vec3 = Vector3<Real>;

/// A 3x3 rotation matrix. Column `i` is local axis `i` expressed in world
/// space.
pub type Mat3 = Matrix3<Real>;

/// Smallest difference the merge rules distinguish.
pub const EPSILON: Real = std::f64::EPSILON;

/// Vectors shorter than this are treated as zero length.
pub const NORMALIZE_EPSILON: Real = 1.0e-12;

/// Normalizes `v` unless it is too short or not finite.
#[inline]
pub fn safe_normalize(v: Vec3) -> Option<Vec3> {
    let len2 = v.magnitude2();
    if !len2.is_finite() || len2 < NORMALIZE_EPSILON * NORMALIZE_EPSILON {
        None
    } else {
        Some(v / len2.sqrt())
    }
}

/// Returns column `i` of `m`.
#[inline(always)]
pub fn axis(m: &Mat3, i: usize) -> Vec3 {
    m[i]
}

/// Component-wise absolute value.
#[inline]
pub fn abs_vec(v: Vec3) -> Vec3 {
    Vec3::new(v.x.abs(), v.y.abs(), v.z.abs())
}

/// Returns the extents of a box with half sizes `r` after being rotated by
/// `m`.
#[inline]
pub fn rotated_extents(m: &Mat3, r: Vec3) -> Vec3 {
    let mut out = Vec3::zero();
    for row in 0..3 {
        out[row] = m.x[row].abs() * r.x + m.y[row].abs() * r.y + m.z[row].abs() * r.z;
    }
    out
}

/// Builds two unit vectors perpendicular to `n` and to each other.
pub fn plane_space(n: Vec3) -> (Vec3, Vec3) {
    if n.z.abs() > std::f64::consts::FRAC_1_SQRT_2 {
        // choose p in y-z plane
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(0.0, -n.z * k, n.y * k);
        let q = Vec3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        // choose p in x-y plane
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(-n.y * k, n.x * k, 0.0);
        let q = Vec3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}

/// Parameters of the points of closest approach between two infinite lines
/// with unit directions `d1` and `d2`. Returns `None` for parallel lines.
pub fn closest_line_points(p1: Vec3, d1: Vec3, p2: Vec3, d2: Vec3) -> Option<(Real, Real)> {
    let p = p2 - p1;
    let uaub = d1.dot(d2);
    let q1 = d1.dot(p);
    let q2 = -d2.dot(p);
    let d = 1.0 - uaub * uaub;
    if d <= 0.0 {
        return None;
    }
    let d = 1.0 / d;
    Some(((q1 + uaub * q2) * d, (uaub * q1 + q2) * d))
}

/// Closest point to `p` on the segment `[a, b]`.
pub fn closest_point_on_segment(a: Vec3, b: Vec3, p: Vec3) -> Vec3 {
    let ab = b - a;
    let len2 = ab.magnitude2();
    if len2 <= NORMALIZE_EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len2).max(0.0).min(1.0);
    a + ab * t
}

/// Closest points between the segments `[a0, a1]` and `[b0, b1]`.
pub fn closest_segment_points(a0: Vec3, a1: Vec3, b0: Vec3, b1: Vec3) -> (Vec3, Vec3) {
    let d1 = a1 - a0;
    let d2 = b1 - b0;
    let r = a0 - b0;
    let a = d1.magnitude2();
    let e = d2.magnitude2();
    let f = d2.dot(r);
    if a <= NORMALIZE_EPSILON && e <= NORMALIZE_EPSILON {
        return (a0, b0);
    }
    let (s, t) = if a <= NORMALIZE_EPSILON {
        (0.0, (f / e).max(0.0).min(1.0))
    } else {
        let c = d1.dot(r);
        if e <= NORMALIZE_EPSILON {
            ((-c / a).max(0.0).min(1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom != 0.0 {
                ((b * f - c * e) / denom).max(0.0).min(1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).max(0.0).min(1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).max(0.0).min(1.0);
            }
            (s, t)
        }
    };
    (a0 + d1 * s, b0 + d2 * t)
}

/// A plane described by a unit normal and an offset: points `p` with
/// `n · p = d` lie on the plane.
///
/// The positive half space is the side the normal points to. Clipping keeps
/// the points with non-negative signed distance.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub n: Vec3,
    pub d: Real,
}

impl Plane {
    pub fn new(n: Vec3, d: Real) -> Self {
        Plane { n, d }
    }

    /// The plane through `p` with normal `n`.
    pub fn from_point(n: Vec3, p: Vec3) -> Self {
        Plane { n, d: n.dot(p) }
    }

    /// Keeps the points with `n · p + offset >= 0`.
    pub fn with_offset(n: Vec3, offset: Real) -> Self {
        Plane { n, d: -offset }
    }

    /// The plane through a counter-clockwise triangle, or `None` if the
    /// triangle is degenerate.
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Option<Self> {
        let n = safe_normalize((b - a).cross(c - a))?;
        Some(Plane::from_point(n, a))
    }

    /// Signed distance of `p`; positive on the side the normal points to.
    #[inline]
    pub fn distance(&self, p: Vec3) -> Real {
        self.n.dot(p) - self.d
    }

    pub fn flipped(&self) -> Self {
        Plane { n: -self.n, d: -self.d }
    }
}

/// A triangle given by three points in counter-clockwise order.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Triangle { a, b, c }
    }

    #[inline]
    pub fn vertex(&self, i: usize) -> Vec3 {
        match i {
            0 => self.a,
            1 => self.b,
            _ => self.c,
        }
    }

    /// Unnormalized face normal, `(b - a) × (c - a)`.
    #[inline]
    pub fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a)
    }

    pub fn unit_normal(&self) -> Option<Vec3> {
        safe_normalize(self.normal())
    }

    pub fn centroid(&self) -> Vec3 {
        (self.a + self.b + self.c) / 3.0
    }

    pub fn area(&self) -> Real {
        self.normal().magnitude() * 0.5
    }

    /// A triangle whose normal collapses to zero length.
    pub fn is_degenerate(&self) -> bool {
        self.unit_normal().is_none()
    }

    /// Evaluates the barycentric point `a + u (b - a) + v (c - a)`.
    pub fn point(&self, u: Real, v: Real) -> Vec3 {
        self.a + (self.b - self.a) * u + (self.c - self.a) * v
    }

    /// Closest point on the triangle to `p`, together with its barycentric
    /// coordinates `(u, v)` along the edges `b - a` and `c - a`.
    pub fn closest_point(&self, p: Vec3) -> (Vec3, Real, Real) {
        let ab = self.b - self.a;
        let ac = self.c - self.a;
        let ap = p - self.a;
        let d1 = ab.dot(ap);
        let d2 = ac.dot(ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return (self.a, 0.0, 0.0);
        }

        let bp = p - self.b;
        let d3 = ab.dot(bp);
        let d4 = ac.dot(bp);
        if d3 >= 0.0 && d4 <= d3 {
            return (self.b, 1.0, 0.0);
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let u = d1 / (d1 - d3);
            return (self.a + ab * u, u, 0.0);
        }

        let cp = p - self.c;
        let d5 = ab.dot(cp);
        let d6 = ac.dot(cp);
        if d6 >= 0.0 && d5 <= d6 {
            return (self.c, 0.0, 1.0);
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let v = d2 / (d2 - d6);
            return (self.a + ac * v, 0.0, v);
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return (self.b + (self.c - self.b) * w, 1.0 - w, w);
        }

        let denom = 1.0 / (va + vb + vc);
        let u = vb * denom;
        let v = vc * denom;
        (self.a + ab * u + ac * v, u, v)
    }

    /// Where the ray `origin + t dir` crosses the triangle, as `(t, u, v)`
    /// with `0 <= t <= max_t`. With `cull` set only hits on the front side
    /// count.
    pub fn ray_hit(&self, origin: Vec3, dir: Vec3, max_t: Real, cull: bool) -> Option<(Real, Real, Real)> {
        let ab = self.b - self.a;
        let ac = self.c - self.a;
        let p = dir.cross(ac);
        let det = ab.dot(p);
        if cull {
            if det < NORMALIZE_EPSILON {
                return None;
            }
        } else if det.abs() < NORMALIZE_EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        let s = origin - self.a;
        let u = s.dot(p) * inv;
        if u < 0.0 || u > 1.0 {
            return None;
        }
        let q = s.cross(ab);
        let v = dir.dot(q) * inv;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = ac.dot(q) * inv;
        if t < 0.0 || t > max_t {
            return None;
        }
        Some((t, u, v))
    }
}
