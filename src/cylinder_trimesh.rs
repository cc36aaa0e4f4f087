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

//! Cylinder against triangle mesh.
//!
//! Like the capsule collider triangles are one sided and tested one at a
//! time on a set of candidate axes. When the winning axis is far from the
//! cylinder axis the side line of the cylinder is clipped by the triangle,
//! otherwise the triangle is clipped by the nearest cap.

use cgmath::{InnerSpace, Zero};
use smallvec::SmallVec;

use crate::bounds::OBB;
use crate::box_cylinder::{cap_side_normals, CAP_ALIGNMENT, CYLINDER_SEGMENTS};
use crate::cache::ColliderCache;
use crate::clip::{clip_polygon, clip_polygon_by_planes, clip_segment, ClipPolygon};
use crate::geom::{Pose, Posed};
use crate::manifold::{ContactBuffer, ContactGeom, LocalContacts};
use crate::math::{safe_normalize, Plane, Real, Triangle, Vec3};

/// Slack allowed around the triangle edges when clipping.
const EDGE_TOLERANCE: Real = 1.0e-5;

struct CylinderTriangle {
    pose: Pose,
    axis: Vec3,
    radius: Real,
    half_length: Real,
    side_normals: [Vec3; CYLINDER_SEGMENTS],

    // Triangle normal and edges `b - a`, `c - b`, `a - c`.
    n: Vec3,
    e: [Vec3; 3],

    // Points from the cylinder into the triangle.
    contact_normal: Vec3,
    best_depth: Real,
    best_rc: Real,
    best_axis: usize,
}

impl CylinderTriangle {
    fn new(cylinder: &Posed) -> Self {
        let shape = cylinder.cylinder();
        CylinderTriangle {
            pose: cylinder.pose,
            axis: cylinder.pose.axis(2),
            radius: shape.radius,
            half_length: shape.length * 0.5,
            side_normals: cap_side_normals(),
            n: Vec3::zero(),
            e: [Vec3::zero(); 3],
            contact_normal: Vec3::zero(),
            best_depth: Real::INFINITY,
            best_rc: 0.0,
            best_axis: 0,
        }
    }

    fn test_axis(&mut self, tri: &Triangle, axis: Vec3, id: usize, no_flip: bool) -> bool {
        let len = axis.magnitude();
        if len < 1.0e-5 {
            return true;
        }
        let axis = axis / len;

        let dot = self.axis.dot(axis);
        let rc = if dot.abs() > 1.0 {
            self.half_length
        } else {
            (self.half_length * dot).abs() + self.radius * (1.0 - dot * dot).sqrt()
        };

        let p = [
            (tri.a - self.pose.p).dot(axis),
            (tri.b - self.pose.p).dot(axis),
            (tri.c - self.pose.p).dot(axis),
        ];
        let min = p[0].min(p[1]).min(p[2]);
        let max = p[0].max(p[1]).max(p[2]);
        let center = (min + max) * 0.5;
        let rt = (max - min) * 0.5;

        if center.abs() > rc + rt {
            return false;
        }
        let depth = rc + rt - center.abs();
        if depth < self.best_depth {
            self.best_depth = depth;
            self.best_rc = rc;
            self.best_axis = id;
            self.contact_normal = if center < 0.0 && !no_flip { -axis } else { axis };
        }
        true
    }

    /// Tests the axis perpendicular to the edge `v0`-`v1` and to the tangent
    /// of the cap circle centered at `center` where the edge line crosses
    /// the cap plane.
    fn test_circle_edge_axis(&mut self, tri: &Triangle, center: Vec3, v0: Vec3, v1: Vec3, id: usize) -> bool {
        let dir = match safe_normalize(v1 - v0) {
            Some(dir) => dir,
            None => return true,
        };
        let dot2 = dir.dot(self.axis);
        if dot2.abs() < 1.0e-5 {
            return true;
        }
        let dot1 = (center - v0).dot(self.axis);
        let point = v0 + dir * (dot1 / dot2);
        let tangent = (center - point).cross(self.axis);
        self.test_axis(tri, tangent.cross(dir), id, false)
    }

    fn test_separating_axes(&mut self, tri: &Triangle) -> bool {
        let half_axis = self.axis * self.half_length;
        let top = self.pose.p + half_axis;
        let bottom = self.pose.p - half_axis;

        self.best_axis = 0;
        self.best_depth = Real::INFINITY;

        if !self.test_axis(tri, -self.n, 1, true) {
            return false;
        }
        for i in 0..3 {
            if !self.test_axis(tri, self.axis.cross(self.e[i]), 2 + i, false) {
                return false;
            }
        }
        for i in 0..3 {
            let axis = (tri.vertex(i) - top).cross(self.axis).cross(self.axis);
            if !self.test_axis(tri, axis, 11 + i, false) {
                return false;
            }
        }
        if !self.test_axis(tri, self.axis, 14, false) {
            return false;
        }

        let edges = [(tri.a, tri.b), (tri.b, tri.c), (tri.a, tri.c)];
        for (k, &center) in [top, bottom].iter().enumerate() {
            for (i, &(v0, v1)) in edges.iter().enumerate() {
                if !self.test_circle_edge_axis(tri, center, v0, v1, 15 + k * 3 + i) {
                    return false;
                }
            }
        }
        true
    }

    /// Clips the side line of the cylinder nearest the triangle by the
    /// triangle prism.
    fn clip_edge_to_triangle(&self, tri: &Triangle, index: u32, local: &mut LocalContacts, room: usize) {
        let n2 = self.contact_normal - self.axis * self.axis.dot(self.contact_normal);
        let len = n2.magnitude();
        if len < 1.0e-5 {
            return;
        }
        let n2 = n2 / len;

        let base = self.pose.p + n2 * self.radius - tri.a;
        let half_axis = self.axis * self.half_length;
        let mut p0 = base + half_axis;
        let mut p1 = base - half_axis;

        let t0 = self.n.cross(self.e[0]);
        let t1 = self.n.cross(self.e[1]);
        let t2 = self.n.cross(self.e[2]);
        let planes = [
            Plane::with_offset(-self.n, 0.0),
            Plane::with_offset(t0, EDGE_TOLERANCE),
            Plane::with_offset(t1, -(self.e[0].dot(t1) - EDGE_TOLERANCE)),
            Plane::with_offset(t2, EDGE_TOLERANCE),
        ];
        for plane in planes.iter() {
            if !clip_segment(&mut p0, &mut p1, plane) {
                return;
            }
        }

        for &p in [p0 + tri.a, p1 + tri.a].iter() {
            if local.len() >= room {
                return;
            }
            let rest = -(p - self.pose.p).dot(self.contact_normal) + self.best_rc;
            local.push(p, self.contact_normal, (self.best_depth - rest).max(0.0), index);
        }
    }

    /// Clips the triangle by the column of the nearest cap.
    fn clip_triangle_to_cap(&self, tri: &Triangle, index: u32, local: &mut LocalContacts, room: usize) {
        let half_axis = self.axis * self.half_length;
        let (circle_pos, circle_normal) = if self.axis.dot(self.contact_normal) > 0.0 {
            (self.pose.p + half_axis, -Vec3::unit_z())
        } else {
            (self.pose.p - half_axis, Vec3::unit_z())
        };

        let to_cap = |p: Vec3| self.pose.inverse_transform_vector(p - circle_pos);
        let points = [to_cap(tri.a), to_cap(tri.b), to_cap(tri.c)];

        let mut poly = ClipPolygon::new();
        clip_polygon(&points, &Plane::with_offset(circle_normal, 0.0), &mut poly);
        let sides: SmallVec<[Plane; CYLINDER_SEGMENTS]> =
            self.side_normals.iter().map(|side| Plane::with_offset(*side, self.radius)).collect();
        let mut scratch = ClipPolygon::new();
        clip_polygon_by_planes(&mut poly, sides.iter(), &mut scratch);

        for p in poly.iter() {
            if local.len() >= room {
                return;
            }
            let world = self.pose.transform_vector(*p) + circle_pos;
            let depth = self.best_rc - (world - self.pose.p).dot(self.contact_normal).abs();
            if depth > 0.0 {
                local.push(world, self.contact_normal, depth, index);
            }
        }
    }

    fn collide_triangle(&mut self, tri: &Triangle, index: u32, local: &mut LocalContacts, room: usize) {
        self.e = [tri.b - tri.a, tri.c - tri.b, tri.a - tri.c];
        self.n = match safe_normalize(self.e[1].cross(tri.a - tri.b)) {
            Some(n) => n,
            None => return,
        };
        if Plane::from_point(self.n, tri.a).distance(self.pose.p) < 0.0 {
            return;
        }
        if !self.test_separating_axes(tri) || self.best_axis == 0 {
            return;
        }
        if self.contact_normal.dot(self.axis).abs() < CAP_ALIGNMENT {
            self.clip_edge_to_triangle(tri, index, local, room);
        } else {
            self.clip_triangle_to_cap(tri, index, local, room);
        }
    }
}

/// Collides a cylinder (`a`) with a triangle mesh (`b`). Contacts carry the
/// triangle index as their second side.
pub fn cylinder_trimesh(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let cylinder = a.cylinder();
    let mesh = b.trimesh();
    let extents = Vec3::new(cylinder.radius, cylinder.radius, cylinder.length * 0.5);
    let volume = OBB::new(a.pose.p, a.pose.r, extents).to_local(&b.pose);
    let key = if mesh.tc.cuboid { Some((b.id, a.id)) } else { None };
    let fat_coeff = cache.config().cylinder_fat_coeff;

    let mut candidates = cache.take_scratch();
    cache.box_candidates(key, &mesh.data, &volume, fat_coeff, &mut candidates);

    // Only unimportant queries may stop early; otherwise flush picks the deepest.
    let room = if buf.is_unimportant() {
        buf.capacity().saturating_sub(buf.len())
    } else {
        usize::MAX
    };
    let mut data = CylinderTriangle::new(a);
    let mut local = LocalContacts::new();
    for &tri in candidates.iter() {
        if local.len() >= room {
            break;
        }
        if !mesh.accepts(a.id, tri) {
            continue;
        }
        let triangle = mesh.data.triangle(tri, &b.pose);
        data.collide_triangle(&triangle, tri, &mut local, room);
    }
    cache.recycle(candidates);

    log::trace!("cylinder {} against trimesh {}: {} local contacts", a.id, b.id, local.len());
    let (g1, g2) = (a.id, b.id);
    local.flush(buf, |c| ContactGeom::new(c.pos, -c.normal, c.depth, g1, g2).with_sides(-1, c.tri as i32))
}

#[cfg(test)]
mod tests {
    mod cylinder_trimesh {
        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, InnerSpace, Matrix3, Rad};

        use crate::cache::ColliderCache;
        use crate::cylinder_trimesh::*;
        use crate::geom::{Geom, Pose};
        use crate::manifold::ContactBuffer;
        use crate::math::Vec3;
        use crate::mesh::{fixtures, TriMesh};

        fn collide(cyl: &Geom, mesh: &Geom, max: usize) -> ContactBuffer {
            let mut buf = ContactBuffer::with_capacity(max);
            let mut cache = ColliderCache::new();
            let n = cylinder_trimesh(&cyl.posed(), &mesh.posed(), &mut buf, &mut cache);
            assert_eq!(n, buf.len());
            assert!(buf.len() <= max);
            for c in buf.iter() {
                assert!(c.depth >= 0.0);
                assert_abs_diff_eq!(c.normal.magnitude(), 1.0, epsilon = 1.0e-9);
                assert_eq!(c.g1, cyl.id());
                assert_eq!(c.g2, mesh.id());
                assert_eq!(c.side1, -1);
                assert!(c.side2 >= 0);
            }
            buf
        }

        fn ground() -> Geom {
            Geom::trimesh(TriMesh::new(fixtures::grid(8, 4.0, 0.0)), Pose::identity())
        }

        #[test]
        fn test_standing() {
            let eps = 1.0e-3;
            let cyl = Geom::cylinder(0.5, 2.0, Pose::from_position(Vec3::new(0.0, 0.0, 1.0 - eps)));
            let buf = collide(&cyl, &ground(), 2);
            assert!(!buf.is_empty() && buf.len() <= 2);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.normal, Vec3::unit_z(), epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.depth, eps, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.z, 0.0, epsilon = 1.0e-9);
            }

            // Every contact lies within the cap polygon.
            let buf = collide(&cyl, &ground(), 64);
            assert!(buf.len() >= 8);
            for c in buf.iter() {
                let r = (c.pos.x * c.pos.x + c.pos.y * c.pos.y).sqrt();
                assert!(r <= 0.5 / (std::f64::consts::PI / 8.0).cos() + 1.0e-9);
            }
        }

        #[test]
        fn test_lying() {
            let eps = 1.0e-3;
            let cyl = Geom::cylinder(
                0.5,
                2.0,
                Pose::new(Vec3::new(0.5, 0.0, 0.5 - eps), Matrix3::from_angle_y(Rad::from(Deg(90.0)))),
            );
            let buf = collide(&cyl, &ground(), 64);
            assert!(buf.len() >= 2);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.normal, Vec3::unit_z(), epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.depth, eps, epsilon = 1.0e-9);
                assert!(c.pos.x >= -0.5 - 1.0e-4 && c.pos.x <= 1.5 + 1.0e-4);
            }

            let buf = collide(&cyl, &ground(), 1);
            assert_eq!(buf.len(), 1);
        }

        #[test]
        fn test_degenerate_triangles() {
            let mesh = Geom::trimesh(TriMesh::new(fixtures::slivers()), Pose::identity());
            let cyl = Geom::cylinder(0.5, 2.0, Pose::identity());
            assert!(collide(&cyl, &mesh, 8).is_empty());
        }

        #[test]
        fn test_separated() {
            let cyl = Geom::cylinder(0.5, 2.0, Pose::from_position(Vec3::new(0.0, 0.0, 1.2)));
            assert!(collide(&cyl, &ground(), 8).is_empty());

            let cyl = Geom::cylinder(0.5, 2.0, Pose::from_position(Vec3::new(0.0, 0.0, -0.2)));
            assert!(collide(&cyl, &ground(), 8).is_empty());
        }
    }
}
