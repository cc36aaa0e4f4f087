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

//! Triangle mesh against box.
//!
//! Each candidate triangle is tested on thirteen axes: the triangle normal,
//! the three box axes and the nine cross products of box axes with triangle
//! edges. The axis of least penetration picks the contact generation:
//! the box face is clipped against the triangle, the triangle is clipped
//! against the box, or a single point is placed between two edges.

use cgmath::{InnerSpace, Zero};

use crate::bounds::OBB;
use crate::cache::ColliderCache;
use crate::clip::{clip_polygon_by_planes, ClipPolygon};
use crate::geom::{GeomId, Posed};
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::math::{closest_line_points, safe_normalize, Mat3, Plane, Real, Triangle, Vec3, EPSILON};

/// Edge axes must beat the best axis by this factor to replace it.
const EDGE_BIAS: Real = 1.5;

const NORMAL_AXIS: usize = 1;
const FIRST_FACE_AXIS: usize = 2;
const FIRST_EDGE_AXIS: usize = 5;

struct TriangleBox {
    pos: Vec3,
    rot: Mat3,
    half: Vec3,

    // Edges and unnormalized normal of the current triangle.
    e: [Vec3; 3],
    n: Vec3,

    best_normal: Vec3,
    best_depth: Real,
    best_axis: usize,
}

impl TriangleBox {
    fn new(cuboid: &Posed) -> Self {
        TriangleBox {
            pos: cuboid.pose.p,
            rot: cuboid.pose.r,
            half: cuboid.cuboid().half_extents,
            e: [Vec3::zero(); 3],
            n: Vec3::zero(),
            best_normal: Vec3::zero(),
            best_depth: Real::INFINITY,
            best_axis: 0,
        }
    }

    /// Box radius along `l`.
    fn radius(&self, l: Vec3) -> Real {
        (0..3).map(|i| self.half[i] * self.rot[i].dot(l).abs()).sum()
    }

    fn test_normal(&mut self, p0: Real, r: Real) -> bool {
        let depth = r + p0;
        if depth < 0.0 {
            return false;
        }
        let len = self.n.magnitude();
        if len > 0.0 {
            let depth = depth / len;
            if depth < self.best_depth {
                self.best_normal = -self.n / len;
                self.best_axis = NORMAL_AXIS;
                self.best_depth = depth;
            }
        }
        true
    }

    /// Tests a box axis or an edge axis against the projections `min` and
    /// `max` of the triangle relative to the box center. Edge axes are not
    /// unit length and only replace the best axis when clearly shallower.
    fn test_axis(&mut self, axis: Vec3, min: Real, max: Real, r: Real, id: usize) -> bool {
        let depth_min = r - min;
        let depth_max = max + r;
        if depth_min < 0.0 || depth_max < 0.0 {
            return false;
        }
        let (depth, axis) = if depth_min > depth_max {
            (depth_max, -axis)
        } else {
            (depth_min, axis)
        };

        if id < FIRST_EDGE_AXIS {
            if depth < self.best_depth {
                self.best_normal = axis;
                self.best_axis = id;
                self.best_depth = depth;
            }
            return true;
        }

        let len = axis.magnitude();
        if len > 0.0 {
            let depth = depth / len;
            if depth * EDGE_BIAS < self.best_depth {
                self.best_normal = axis / len;
                self.best_axis = id;
                self.best_depth = depth;
            }
        }
        true
    }

    fn test_separating_axes(&mut self, tri: &Triangle) -> bool {
        self.best_axis = 0;
        self.best_depth = Real::INFINITY;
        self.e = [tri.b - tri.a, tri.c - tri.a, tri.c - tri.b];
        self.n = self.e[0].cross(self.e[1]);
        if tri.is_degenerate() {
            return false;
        }

        let d = [tri.a - self.pos, tri.b - self.pos, tri.c - self.pos];
        let project = |l: Vec3| {
            let p = [l.dot(d[0]), l.dot(d[1]), l.dot(d[2])];
            (p[0].min(p[1]).min(p[2]), p[0].max(p[1]).max(p[2]))
        };

        let r = self.radius(self.n);
        if !self.test_normal(self.n.dot(d[0]), r) {
            return false;
        }

        for i in 0..3 {
            let axis = self.rot[i];
            let (min, max) = project(axis);
            if !self.test_axis(axis, min, max, self.half[i], FIRST_FACE_AXIS + i) {
                return false;
            }
        }

        for i in 0..3 {
            for j in 0..3 {
                let l = self.rot[i].cross(self.e[j]);
                if l.magnitude2() <= EPSILON {
                    continue;
                }
                let (min, max) = project(l);
                let r = self.radius(l);
                if !self.test_axis(l, min, max, r, FIRST_EDGE_AXIS + i * 3 + j) {
                    return false;
                }
            }
        }
        true
    }

    /// One contact midway between the box edge and the triangle edge that
    /// produced the best axis.
    fn edge_contact(&self, tri: &Triangle, ids: (GeomId, GeomId), side: i32, buf: &mut ContactBuffer) {
        let mut pa = self.pos;
        for i in 0..3 {
            let col = self.rot[i];
            let sign = if self.best_normal.dot(col) > 0.0 { 1.0 } else { -1.0 };
            pa += col * (sign * self.half[i]);
        }
        let axis = self.best_axis - FIRST_EDGE_AXIS;
        let (pb, ub) = match axis % 3 {
            0 => (tri.a, self.e[0]),
            1 => (tri.c, self.e[1]),
            _ => (tri.b, self.e[2]),
        };
        let ub = match safe_normalize(ub) {
            Some(ub) => ub,
            None => return,
        };
        let ua = self.rot[axis / 3];
        let (s, t) = closest_line_points(pa, ua, pb, ub).unwrap_or((0.0, 0.0));
        let pos = ((pa + ua * s) + (pb + ub * t)) * 0.5;
        buf.push(ContactGeom::new(pos, self.best_normal, self.best_depth, ids.0, ids.1).with_sides(side, -1));
    }

    /// Clips the box face most facing the triangle by the triangle prism and
    /// keeps the part below the triangle plane.
    fn box_face_contacts(&self, tri: &Triangle, ids: (GeomId, GeomId), side: i32, buf: &mut ContactBuffer) {
        let up = -self.best_normal;
        let nr = Vec3::new(self.rot.x.dot(up), self.rot.y.dot(up), self.rot.z.dot(up));
        let abs_n = Vec3::new(nr.x.abs(), nr.y.abs(), nr.z.abs());
        let b0 = if abs_n.x >= abs_n.y && abs_n.x >= abs_n.z {
            0
        } else if abs_n.y >= abs_n.z {
            1
        } else {
            2
        };
        let (b1, b2) = ((b0 + 1) % 3, (b0 + 2) % 3);

        // Relative to the first vertex.
        let face = self.rot[b0] * self.half[b0];
        let center = if nr[b0] > 0.0 {
            self.pos - tri.a - face
        } else {
            self.pos - tri.a + face
        };
        let a1 = self.rot[b1] * self.half[b1];
        let a2 = self.rot[b2] * self.half[b2];
        let mut poly: ClipPolygon = [center + a1 - a2, center - a1 - a2, center - a1 + a2, center + a1 + a2]
            .iter()
            .cloned()
            .collect();

        let edge_normal = |e: Vec3| safe_normalize(self.n.cross(e));
        let (n0, n1, n2) = match (edge_normal(self.e[0]), edge_normal(self.e[2]), edge_normal(tri.a - tri.c)) {
            (Some(n0), Some(n1), Some(n2)) => (n0, n1, n2),
            _ => return,
        };
        let planes = [
            Plane::with_offset(-up, 0.0),
            Plane::with_offset(n0, 0.0),
            Plane::with_offset(n1, (tri.a - tri.c).dot(n1)),
            Plane::with_offset(n2, 0.0),
        ];
        let mut scratch = ClipPolygon::new();
        clip_polygon_by_planes(&mut poly, planes.iter(), &mut scratch);

        for p in poly.iter() {
            let depth = -up.dot(*p).min(0.0);
            let contact = ContactGeom::new(*p + tri.a, self.best_normal, depth, ids.0, ids.1).with_sides(side, -1);
            buf.push(contact);
            if buf.is_saturated() {
                break;
            }
        }
    }

    /// Clips the triangle by the slab of the best box face and the four
    /// side faces of the box.
    fn triangle_contacts(&self, tri: &Triangle, ids: (GeomId, GeomId), side: i32, buf: &mut ContactBuffer) {
        let a0 = self.best_axis - FIRST_FACE_AXIS;
        let (a1, a2) = ((a0 + 1) % 3, (a0 + 2) % 3);
        let normal = self.best_normal;

        let mut poly: ClipPolygon = [tri.a - self.pos, tri.b - self.pos, tri.c - self.pos]
            .iter()
            .cloned()
            .collect();
        let planes = [
            Plane::with_offset(-normal, self.half[a0]),
            Plane::with_offset(self.rot[a1], self.half[a1]),
            Plane::with_offset(-self.rot[a1], self.half[a1]),
            Plane::with_offset(self.rot[a2], self.half[a2]),
            Plane::with_offset(-self.rot[a2], self.half[a2]),
        ];
        let mut scratch = ClipPolygon::new();
        clip_polygon_by_planes(&mut poly, planes.iter(), &mut scratch);

        for p in poly.iter() {
            let depth = -(normal.dot(*p) - self.half[a0]).min(0.0);
            let contact = ContactGeom::new(*p + self.pos, normal, depth, ids.0, ids.1).with_sides(side, -1);
            buf.push(contact);
            if buf.is_saturated() {
                break;
            }
        }
    }

    fn collide_triangle(&mut self, tri: &Triangle, ids: (GeomId, GeomId), side: i32, buf: &mut ContactBuffer) {
        if !self.test_separating_axes(tri) || self.best_axis == 0 {
            return;
        }
        if self.best_axis >= FIRST_EDGE_AXIS {
            self.edge_contact(tri, ids, side, buf);
        } else if self.best_axis == NORMAL_AXIS {
            self.box_face_contacts(tri, ids, side, buf);
        } else {
            self.triangle_contacts(tri, ids, side, buf);
        }
    }
}

/// Collides a triangle mesh (`a`) with a box (`b`). Contacts carry the
/// triangle index as their first side.
pub fn trimesh_box(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let mesh = a.trimesh();
    let half = b.cuboid().half_extents;
    let volume = OBB::new(b.pose.p, b.pose.r, half).to_local(&a.pose);
    let key = if mesh.tc.cuboid { Some((a.id, b.id)) } else { None };
    let fat_coeff = cache.config().box_fat_coeff;

    let mut candidates = cache.take_scratch();
    cache.box_candidates(key, &mesh.data, &volume, fat_coeff, &mut candidates);
    log::trace!("trimesh {} against box {}: {} candidate triangles", a.id, b.id, candidates.len());

    let start = buf.len();
    let mut data = TriangleBox::new(b);
    for &tri in candidates.iter() {
        if !mesh.accepts(b.id, tri) {
            continue;
        }
        let triangle = mesh.data.triangle(tri, &a.pose);
        data.collide_triangle(&triangle, (a.id, b.id), tri as i32, buf);
        if buf.is_saturated() {
            break;
        }
    }
    cache.recycle(candidates);
    buf.len() - start
}

#[cfg(test)]
mod tests {
    mod trimesh_box {
        use std::sync::Arc;

        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, InnerSpace, Matrix3, Rad};

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose};
        use crate::manifold::ContactBuffer;
        use crate::math::Vec3;
        use crate::mesh::{fixtures, TcFlags, TriMesh, TriMeshData};
        use crate::trimesh_box::*;

        fn collide_with(mesh: &Geom, cuboid: &Geom, max: usize, cache: &mut ColliderCache) -> ContactBuffer {
            let mut buf = ContactBuffer::with_capacity(max);
            let n = trimesh_box(&mesh.posed(), &cuboid.posed(), &mut buf, cache);
            assert_eq!(n, buf.len());
            assert!(buf.len() <= max);
            for c in buf.iter() {
                assert!(c.depth >= 0.0);
                assert_abs_diff_eq!(c.normal.magnitude(), 1.0, epsilon = 1.0e-9);
                assert_eq!(c.g1, mesh.id());
                assert_eq!(c.g2, cuboid.id());
                assert!(c.side1 >= 0);
                assert_eq!(c.side2, -1);
            }
            buf
        }

        fn collide(mesh: &Geom, cuboid: &Geom, max: usize) -> ContactBuffer {
            collide_with(mesh, cuboid, max, &mut ColliderCache::new())
        }

        fn ground() -> Geom {
            Geom::trimesh(TriMesh::new(fixtures::grid(8, 4.0, 0.0)), Pose::identity())
        }

        #[test]
        fn test_resting_box() {
            let eps = 1.0e-3;
            let cuboid = Geom::cuboid(Vec3::new(0.5, 0.5, 0.5), Pose::from_position(Vec3::new(0.0, 0.0, 0.5 - eps)));
            let buf = collide(&ground(), &cuboid, 32);
            assert!(buf.len() >= 4);
            // Triangles that only touch a box edge report zero depth contacts
            // with sideways normals.
            for c in buf.iter().filter(|c| c.depth > 1.0e-9) {
                assert_abs_diff_eq!(c.normal, -Vec3::unit_z(), epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.depth, eps, epsilon = 1.0e-9);
                assert!(c.pos.z <= 1.0e-9 && c.pos.z >= -eps - 1.0e-9);
            }
            for &(x, y) in &[(0.5, 0.5), (-0.5, 0.5), (0.5, -0.5), (-0.5, -0.5)] {
                assert!(buf
                    .iter()
                    .any(|c| (c.pos.x - x).abs() < 1.0e-9 && (c.pos.y - y).abs() < 1.0e-9));
            }

            assert_eq!(collide(&ground(), &cuboid, 1).len(), 1);
        }

        #[test]
        fn test_box_on_edge() {
            let eps = 1.0e-3;
            let h = 0.5 * 2.0f64.sqrt();
            let cuboid = Geom::cuboid(
                Vec3::new(0.5, 0.5, 0.5),
                Pose::new(Vec3::new(0.0, 0.0, h - eps), Matrix3::from_angle_x(Rad::from(Deg(45.0)))),
            );
            let buf = collide(&ground(), &cuboid, 32);
            assert!(!buf.is_empty());
            let mut deepest: f64 = 0.0;
            for c in buf.iter() {
                assert!(c.depth <= eps + 1.0e-9);
                if c.depth > 1.0e-9 {
                    assert!(c.normal.z < 0.0);
                }
                deepest = deepest.max(c.depth);
            }
            // The side faces of the box beat the triangle normal by a factor
            // of cos 45.
            assert!(deepest > 0.0);
        }

        #[test]
        fn test_separated() {
            let cuboid = Geom::cuboid(Vec3::new(0.5, 0.5, 0.5), Pose::from_position(Vec3::new(0.0, 0.0, 0.6)));
            assert!(collide(&ground(), &cuboid, 8).is_empty());

            // Off the edge of the mesh.
            let cuboid = Geom::cuboid(Vec3::new(0.5, 0.5, 0.5), Pose::from_position(Vec3::new(5.0, 0.0, 0.4)));
            assert!(collide(&ground(), &cuboid, 8).is_empty());
        }

        #[test]
        fn test_degenerate_triangle() {
            let verts = [[-1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
            let data = Arc::new(TriMeshData::from_f64(&verts, &[[0, 1, 2]]).unwrap());
            let mesh = Geom::trimesh(TriMesh::new(data), Pose::identity());
            let cuboid = Geom::cuboid(Vec3::new(0.5, 0.5, 0.5), Pose::from_position(Vec3::new(0.0, 0.0, 0.4)));
            assert!(collide(&mesh, &cuboid, 8).is_empty());

            // A sliver whose normal is below the normalization threshold.
            let verts = [[0.0, 0.0, 0.0], [0.1, 0.2, 0.0], [0.3, 0.6, 1.0e-16]];
            let data = Arc::new(TriMeshData::from_f64(&verts, &[[0, 1, 2]]).unwrap());
            let mesh = Geom::trimesh(TriMesh::new(data), Pose::identity());
            assert!(collide(&mesh, &cuboid, 8).is_empty());
        }

        #[test]
        fn test_full_buffer_keeps_deepest() {
            // Two stacked copies of one large triangle produce the same box
            // corners at different depths.
            let verts = [
                [-3.0, -3.0, 0.0],
                [3.0, -3.0, 0.0],
                [0.0, 3.0, 0.0],
                [-3.0, -3.0, 0.05],
                [3.0, -3.0, 0.05],
                [0.0, 3.0, 0.05],
            ];
            let cuboid = Geom::cuboid(
                Vec3::new(0.5, 0.5, 0.5),
                Pose::new(Vec3::new(0.0, 0.0, 0.4), Matrix3::from_angle_x(Rad::from(Deg(2.0)))),
            );
            let deepest = |buf: &ContactBuffer| buf.iter().map(|c| c.depth).fold(0.0, f64::max);

            let mut results = Vec::new();
            for order in &[[[0, 1, 2], [3, 4, 5]], [[3, 4, 5], [0, 1, 2]]] {
                let data = Arc::new(TriMeshData::from_f64(&verts, order).unwrap());
                let mesh = Geom::trimesh(TriMesh::new(data), Pose::identity());
                let all = collide(&mesh, &cuboid, 64);
                let few = collide(&mesh, &cuboid, 4);
                assert_eq!(few.len(), 4);
                assert_abs_diff_eq!(deepest(&few), deepest(&all), epsilon = 1.0e-9);
                results.push(deepest(&few));
            }
            assert_abs_diff_eq!(results[0], results[1], epsilon = 1.0e-9);
            assert!(results[0] > 0.15);
        }

        #[test]
        fn test_triangle_filter() {
            let mut mesh = TriMesh::new(fixtures::grid(8, 4.0, 0.0));
            mesh.callbacks.triangle = Some(Arc::new(|_, _| false));
            let mesh = Geom::trimesh(mesh, Pose::identity());
            let cuboid = Geom::cuboid(Vec3::new(0.5, 0.5, 0.5), Pose::from_position(Vec3::new(0.0, 0.0, 0.4)));
            assert!(collide(&mesh, &cuboid, 8).is_empty());
        }

        #[test]
        fn test_temporal_coherence() {
            let tc = TcFlags {
                cuboid: true,
                ..TcFlags::default()
            };
            let mesh = Geom::trimesh(TriMesh::new(fixtures::grid(8, 4.0, 0.0)).with_tc(tc), Pose::identity());
            let mut cuboid = Geom::cuboid(Vec3::new(0.5, 0.5, 0.5), Pose::from_position(Vec3::new(0.0, 0.0, 0.45)));
            let mut cache = ColliderCache::new();
            let first = collide_with(&mesh, &cuboid, 32, &mut cache).len();
            assert_eq!(cache.tc_entries(), 1);

            cuboid.set_position(Vec3::new(0.0, 0.0, 0.44));
            let second = collide_with(&mesh, &cuboid, 32, &mut cache).len();
            assert_eq!(first, second);
            assert_eq!(cache.tc_entries(), 1);
        }
    }
}
