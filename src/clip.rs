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

//! Clipping of convex polygons and segments against planes.
//!
//! Both keep the part on the positive side of the plane, where
//! `plane.distance(p) >= 0`.

use smallvec::SmallVec;

use crate::math::{Plane, Vec3};

/// Largest polygon any collider builds: a quad clipped by the eight sides of
/// a cylinder cap and its plane, plus room to spare.
pub const MAX_CLIP_POINTS: usize = 16;

pub type ClipPolygon = SmallVec<[Vec3; MAX_CLIP_POINTS]>;

/// Clips the closed polygon `points` by `plane` into `out`.
pub fn clip_polygon(points: &[Vec3], plane: &Plane, out: &mut ClipPolygon) {
    out.clear();
    let n = points.len();
    if n == 0 {
        return;
    }
    let mut i0 = n - 1;
    for i1 in 0..n {
        let p0 = points[i0];
        let p1 = points[i1];
        let d0 = plane.distance(p0);
        let d1 = plane.distance(p1);

        if d0 >= 0.0 {
            out.push(p0);
        }
        if (d0 > 0.0 && d1 < 0.0) || (d0 < 0.0 && d1 > 0.0) {
            out.push(p0 - (p0 - p1) * (d0 / (d0 - d1)));
        }
        i0 = i1;
    }
}

/// Clips `poly` by every plane in turn, using `scratch` as the second
/// buffer. Stops early once nothing is left.
pub fn clip_polygon_by_planes<'a, I>(poly: &mut ClipPolygon, planes: I, scratch: &mut ClipPolygon)
where
    I: IntoIterator<Item = &'a Plane>,
{
    for plane in planes {
        if poly.is_empty() {
            return;
        }
        clip_polygon(poly, plane, scratch);
        std::mem::swap(poly, scratch);
    }
}

/// Clips the segment `a`-`b` by `plane`. Returns false if nothing of it is
/// left.
pub fn clip_segment(a: &mut Vec3, b: &mut Vec3, plane: &Plane) -> bool {
    let d0 = plane.distance(*a);
    let d1 = plane.distance(*b);

    if d0 < 0.0 && d1 < 0.0 {
        return false;
    }

    if (d0 > 0.0 && d1 < 0.0) || (d0 < 0.0 && d1 > 0.0) {
        let p = *a - (*a - *b) * (d0 / (d0 - d1));
        if d0 < 0.0 {
            *a = p;
        } else {
            *b = p;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    mod clip {
        use approx::assert_abs_diff_eq;

        use crate::clip::*;
        use crate::math::{Plane, Vec3};

        fn square() -> ClipPolygon {
            let mut poly = ClipPolygon::new();
            poly.push(Vec3::new(-1.0, -1.0, 0.0));
            poly.push(Vec3::new(1.0, -1.0, 0.0));
            poly.push(Vec3::new(1.0, 1.0, 0.0));
            poly.push(Vec3::new(-1.0, 1.0, 0.0));
            poly
        }

        #[test]
        fn test_clip_polygon() {
            let mut out = ClipPolygon::new();
            // Keep x <= 0.5.
            clip_polygon(&square(), &Plane::with_offset(-Vec3::unit_x(), 0.5), &mut out);
            assert_eq!(out.len(), 4);
            for p in out.iter() {
                assert!(p.x <= 0.5 + 1.0e-12);
            }
            assert!(out.iter().any(|p| (p.x - 0.5).abs() < 1.0e-12));

            clip_polygon(&square(), &Plane::with_offset(Vec3::unit_x(), -2.0), &mut out);
            assert!(out.is_empty());

            clip_polygon(&square(), &Plane::with_offset(Vec3::unit_z(), 1.0), &mut out);
            assert_eq!(out.len(), 4);
        }

        #[test]
        fn test_clip_corner() {
            let mut poly = square();
            let mut scratch = ClipPolygon::new();
            let n = Vec3::new(-1.0, -1.0, 0.0) / 2.0f64.sqrt();
            clip_polygon_by_planes(&mut poly, &[Plane::from_point(n, Vec3::new(0.5, 0.5, 0.0))], &mut scratch);
            // The corner at (1, 1) is cut off, leaving a pentagon.
            assert_eq!(poly.len(), 5);
        }

        #[test]
        fn test_clip_segment() {
            let plane = Plane::new(Vec3::unit_z(), 0.0);
            let mut a = Vec3::new(0.0, 0.0, -1.0);
            let mut b = Vec3::new(0.0, 0.0, 3.0);
            assert!(clip_segment(&mut a, &mut b, &plane));
            assert_abs_diff_eq!(a, Vec3::new(0.0, 0.0, 0.0));
            assert_abs_diff_eq!(b, Vec3::new(0.0, 0.0, 3.0));

            let mut a = Vec3::new(0.0, 0.0, -1.0);
            let mut b = Vec3::new(0.0, 0.0, -3.0);
            assert!(!clip_segment(&mut a, &mut b, &plane));
        }
    }
}
