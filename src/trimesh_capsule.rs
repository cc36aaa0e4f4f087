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

//! Triangle mesh against capsule.
//!
//! Triangles are one sided: a capsule whose center lies behind a triangle
//! does not touch it. For the others the axis of least penetration is found
//! among the triangle normal and the axes built from the capsule segment and
//! the triangle's significant edges and vertices. The capsule side facing
//! the triangle along that axis is then clipped by the triangle prism.

use cgmath::{InnerSpace, Zero};

use crate::bounds::OBB;
use crate::cache::ColliderCache;
use crate::clip::clip_segment;
use crate::geom::Posed;
use crate::manifold::{ContactBuffer, ContactGeom, LocalContacts};
use crate::math::{safe_normalize, Plane, Real, Triangle, Vec3};
use crate::mesh::UseFlags;

/// Slack allowed around the triangle edges when clipping.
const EDGE_TOLERANCE: Real = 1.0e-5;

/// Axes shorter than this are skipped.
const MIN_AXIS_LENGTH2: Real = 1.0e-6;

/// `((a - b) × c) × d`
#[inline]
fn double_cross(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> Vec3 {
    (a - b).cross(c).cross(d)
}

struct TriangleCapsule {
    pos: Vec3,
    axis: Vec3,
    radius: Real,
    half_length: Real,

    // Triangle vertices relative to the capsule center.
    rel: [Vec3; 3],

    normal: Vec3,
    best_depth: Real,
    best_center: Real,
    best_rt: Real,
    best_axis: usize,
}

impl TriangleCapsule {
    fn new(capsule: &Posed) -> Self {
        let shape = capsule.capsule();
        TriangleCapsule {
            pos: capsule.pose.p,
            axis: capsule.pose.axis(2),
            radius: shape.radius,
            half_length: shape.length * 0.5,
            rel: [Vec3::zero(); 3],
            normal: Vec3::zero(),
            best_depth: -Real::INFINITY,
            best_center: 0.0,
            best_rt: 0.0,
            best_axis: 0,
        }
    }

    /// Projects both shapes on `axis`. Depths here are negative; the least
    /// negative one wins. Unless `no_flip` the normal is turned to face the
    /// triangle.
    fn test_axis(&mut self, axis: Vec3, id: usize, no_flip: bool) -> bool {
        let len = axis.magnitude();
        if len < 1.0e-5 {
            return true;
        }
        let axis = axis / len;

        let rc = self.axis.dot(axis).abs() * self.half_length + self.radius;
        let p = [self.rel[0].dot(axis), self.rel[1].dot(axis), self.rel[2].dot(axis)];
        let min = p[0].min(p[1]).min(p[2]);
        let max = p[0].max(p[1]).max(p[2]);
        let center = (min + max) * 0.5;
        let rt = (max - min) * 0.5;

        if center.abs() > rc + rt {
            return false;
        }
        let depth = center.abs() - (rc + rt);
        if depth > self.best_depth {
            self.best_depth = depth;
            self.best_center = center;
            self.best_rt = rt;
            self.normal = axis;
            self.best_axis = id;
            if center < 0.0 && !no_flip {
                self.normal = -axis;
                self.best_center = -center;
            }
        }
        true
    }

    fn test_separating_axes(&mut self, tri: &Triangle, e: &[Vec3; 3], n: Vec3, flags: UseFlags) -> bool {
        let half_axis = self.axis * self.half_length;
        let cp = [self.pos + half_axis, self.pos - half_axis];
        let v = [tri.a, tri.b, tri.c];

        self.best_axis = 0;
        self.best_depth = -Real::INFINITY;
        for i in 0..3 {
            self.rel[i] = v[i] - self.pos;
        }

        if !self.test_axis(-n, 1, true) {
            return false;
        }

        for i in 0..3 {
            if !flags.contains(UseFlags::edge(i)) {
                continue;
            }
            let axis = self.axis.cross(e[i]);
            if axis.magnitude2() > MIN_AXIS_LENGTH2 && !self.test_axis(axis, 2 + i, false) {
                return false;
            }
        }

        // From each edge line to each end of the segment.
        for (k, &end) in cp.iter().enumerate() {
            for i in 0..3 {
                if !flags.contains(UseFlags::edge(i)) {
                    continue;
                }
                let axis = double_cross(end, v[i], e[i], e[i]);
                if axis.magnitude2() > MIN_AXIS_LENGTH2 && !self.test_axis(axis, 5 + k * 3 + i, false) {
                    return false;
                }
            }
        }

        // From the segment line to each vertex.
        for i in 0..3 {
            if !flags.contains(UseFlags::vert(i)) {
                continue;
            }
            let axis = double_cross(v[i], cp[0], self.axis, self.axis);
            if axis.magnitude2() > MIN_AXIS_LENGTH2 && !self.test_axis(axis, 11 + i, false) {
                return false;
            }
        }

        // From each vertex to each end of the segment.
        for (k, &end) in cp.iter().enumerate() {
            for i in 0..3 {
                if !flags.contains(UseFlags::vert(i)) {
                    continue;
                }
                let axis = v[i] - end;
                if axis.magnitude2() > MIN_AXIS_LENGTH2 && !self.test_axis(axis, 14 + k * 3 + i, false) {
                    return false;
                }
            }
        }
        true
    }

    /// Adds up to two contacts for `tri` to `local`, stopping at `room`.
    fn collide_triangle(&mut self, tri: &Triangle, index: u32, flags: UseFlags, local: &mut LocalContacts, room: usize) {
        let e = [tri.b - tri.a, tri.c - tri.b, tri.a - tri.c];
        let n = match safe_normalize(e[0].cross(e[1])) {
            Some(n) => n,
            None => return,
        };
        if Plane::from_point(n, tri.a).distance(self.pos) < 0.0 {
            return;
        }
        if !self.test_separating_axes(tri, &e, n, flags) || self.best_axis == 0 {
            return;
        }

        // The line on the capsule surface nearest the triangle, relative to
        // the first vertex.
        let base = self.pos + self.normal * self.radius - tri.a;
        let half_axis = self.axis * self.half_length;
        let mut p0 = base + half_axis;
        let mut p1 = base - half_axis;

        let t0 = n.cross(e[0]);
        let t1 = n.cross(e[1]);
        let t2 = n.cross(e[2]);
        let planes = [
            Plane::with_offset(-n, 0.0),
            Plane::with_offset(t0, EDGE_TOLERANCE),
            Plane::with_offset(t1, -(e[0].dot(t1) - EDGE_TOLERANCE)),
            Plane::with_offset(t2, EDGE_TOLERANCE),
        ];
        for plane in planes.iter() {
            if !clip_segment(&mut p0, &mut p1, plane) {
                return;
            }
        }

        let offset = self.best_center - self.best_rt;
        for &p in [p0 + tri.a, p1 + tri.a].iter() {
            if local.len() >= room {
                break;
            }
            let depth = ((p - self.pos).dot(self.normal) - offset).max(0.0);
            local.push(p, self.normal, depth, index);
        }
    }
}

/// Collides a triangle mesh (`a`) with a capsule (`b`). Contacts carry the
/// triangle index as their first side.
pub fn trimesh_capsule(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let mesh = a.trimesh();
    let capsule = b.capsule();
    let extents = Vec3::new(capsule.radius, capsule.radius, capsule.length * 0.5 + capsule.radius);
    let volume = OBB::new(b.pose.p, b.pose.r, extents).to_local(&a.pose);
    let key = if mesh.tc.capsule { Some((a.id, b.id)) } else { None };
    let fat_coeff = cache.config().capsule_fat_coeff;

    let mut candidates = cache.take_scratch();
    cache.box_candidates(key, &mesh.data, &volume, fat_coeff, &mut candidates);

    // Only unimportant queries may stop early; otherwise flush picks the deepest.
    let room = if buf.is_unimportant() {
        buf.capacity().saturating_sub(buf.len())
    } else {
        usize::MAX
    };
    let mut data = TriangleCapsule::new(b);
    let mut local = LocalContacts::new();
    for &tri in candidates.iter() {
        if local.len() >= room {
            break;
        }
        if !mesh.accepts(b.id, tri) {
            continue;
        }
        let triangle = mesh.data.triangle(tri, &a.pose);
        data.collide_triangle(&triangle, tri, mesh.data.use_flags(tri), &mut local, room);
    }
    cache.recycle(candidates);

    log::trace!("trimesh {} against capsule {}: {} local contacts", a.id, b.id, local.len());
    let (g1, g2) = (a.id, b.id);
    local.flush(buf, |c| ContactGeom::new(c.pos, c.normal, c.depth, g1, g2).with_sides(c.tri as i32, -1))
}

#[cfg(test)]
mod tests {
    mod trimesh_capsule {
        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, InnerSpace, Matrix3, Rad};

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose};
        use crate::manifold::ContactBuffer;
        use crate::math::Vec3;
        use crate::mesh::{fixtures, TriMesh};
        use crate::trimesh_capsule::*;

        fn collide(mesh: &Geom, capsule: &Geom, max: usize) -> ContactBuffer {
            let mut buf = ContactBuffer::with_capacity(max);
            let mut cache = ColliderCache::new();
            let n = trimesh_capsule(&mesh.posed(), &capsule.posed(), &mut buf, &mut cache);
            assert_eq!(n, buf.len());
            assert!(buf.len() <= max);
            for c in buf.iter() {
                assert!(c.depth >= 0.0);
                assert_abs_diff_eq!(c.normal.magnitude(), 1.0, epsilon = 1.0e-9);
                assert_eq!(c.g1, mesh.id());
                assert_eq!(c.g2, capsule.id());
                assert!(c.side1 >= 0);
            }
            buf
        }

        fn ground() -> Geom {
            Geom::trimesh(TriMesh::new(fixtures::grid(8, 4.0, 0.0)), Pose::identity())
        }

        #[test]
        fn test_upright() {
            let eps = 1.0e-3;
            let capsule = Geom::capsule(0.5, 1.0, Pose::from_position(Vec3::new(0.0, 0.0, 1.0 - eps)));
            let buf = collide(&ground(), &capsule, 8);
            // The bottom of the cap and the point where the clipped line
            // leaves the triangle plane.
            assert_eq!(buf.len(), 2);
            let mut deepest: f64 = 0.0;
            for c in buf.iter() {
                assert_abs_diff_eq!(c.normal, -Vec3::unit_z(), epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.x, 0.0, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.y, 0.0, epsilon = 1.0e-9);
                deepest = deepest.max(c.depth);
            }
            assert_abs_diff_eq!(deepest, eps, epsilon = 1.0e-9);
        }

        #[test]
        fn test_lying() {
            let eps = 1.0e-3;
            let capsule = Geom::capsule(
                0.5,
                2.0,
                Pose::new(Vec3::new(0.0, 0.0, 0.5 - eps), Matrix3::from_angle_y(Rad::from(Deg(90.0)))),
            );
            let buf = collide(&ground(), &capsule, 64);
            assert!(buf.len() >= 2);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.normal, -Vec3::unit_z(), epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.depth, eps, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.z, -eps, epsilon = 1.0e-9);
                assert!(c.pos.x.abs() <= 1.0 + 1.0e-9);
            }
            assert!(buf.iter().any(|c| (c.pos.x - 1.0).abs() < 1.0e-4));
            assert!(buf.iter().any(|c| (c.pos.x + 1.0).abs() < 1.0e-4));

            assert_eq!(collide(&ground(), &capsule, 1).len(), 1);
        }

        #[test]
        fn test_degenerate_triangles() {
            let mesh = Geom::trimesh(TriMesh::new(fixtures::slivers()), Pose::identity());
            let capsule = Geom::capsule(0.5, 1.0, Pose::identity());
            assert!(collide(&mesh, &capsule, 8).is_empty());
        }

        #[test]
        fn test_separated() {
            let capsule = Geom::capsule(0.5, 1.0, Pose::from_position(Vec3::new(0.0, 0.0, 1.1)));
            assert!(collide(&ground(), &capsule, 8).is_empty());
        }

        #[test]
        fn test_behind_triangles() {
            // Centered below the surface, so every triangle faces away.
            let capsule = Geom::capsule(0.5, 1.0, Pose::from_position(Vec3::new(0.0, 0.0, -0.3)));
            assert!(collide(&ground(), &capsule, 8).is_empty());
        }
    }
}
