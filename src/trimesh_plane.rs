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

use cgmath::InnerSpace;

use crate::cache::ColliderCache;
use crate::geom::Posed;
use crate::manifold::{ContactBuffer, ContactGeom};

/// Collides a triangle mesh (`a`) with a plane (`b`): every triangle vertex
/// behind the plane is a contact with the plane normal. A vertex shared by
/// several triangles is reported once.
pub fn trimesh_plane(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let mesh = a.trimesh();
    let plane = b.plane();
    let start = buf.len();

    'triangles: for tri in 0..mesh.data.triangle_count() as u32 {
        if !mesh.accepts(b.id, tri) {
            continue;
        }
        let triangle = mesh.data.triangle(tri, &a.pose);
        if triangle.is_degenerate() {
            continue;
        }
        for i in 0..3 {
            let v = triangle.vertex(i);
            let depth = plane.d - plane.n.dot(v);
            if depth <= 0.0 {
                continue;
            }
            buf.push(ContactGeom::new(v, plane.n, depth, a.id, b.id).with_sides(tri as i32, -1));
            if buf.is_saturated() {
                break 'triangles;
            }
        }
    }
    let n = buf.len() - start;
    log::trace!("trimesh {} against plane {}: {} contacts", a.id, b.id, n);
    n
}

#[cfg(test)]
mod tests {
    mod trimesh_plane {
        use std::sync::Arc;

        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, Matrix3, Rad};

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose};
        use crate::manifold::ContactBuffer;
        use crate::math::Vec3;
        use crate::mesh::{fixtures, TriMesh, TriMeshData};
        use crate::trimesh_plane::*;

        fn collide(mesh: &Geom, plane: &Geom, max: usize) -> ContactBuffer {
            let mut buf = ContactBuffer::with_capacity(max);
            let mut cache = ColliderCache::new();
            let n = trimesh_plane(&mesh.posed(), &plane.posed(), &mut buf, &mut cache);
            assert_eq!(n, buf.len());
            buf
        }

        #[test]
        fn test_cube_sunk() {
            let cube = Geom::trimesh(
                TriMesh::new(fixtures::cube(0.5)),
                Pose::from_position(Vec3::new(0.0, 0.0, 0.4)),
            );
            let ground = Geom::plane(Vec3::unit_z(), 0.0);
            let buf = collide(&cube, &ground, 32);

            // The four bottom corners, each once.
            assert_eq!(buf.len(), 4);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.normal, Vec3::unit_z(), epsilon = 1.0e-12);
                assert_abs_diff_eq!(c.depth, 0.1, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.z, -0.1, epsilon = 1.0e-9);
                assert_eq!(c.g1, cube.id());
                assert_eq!(c.g2, ground.id());
                assert!(c.side1 >= 0);
                assert_eq!(c.side2, -1);
            }

            assert_eq!(collide(&cube, &ground, 2).len(), 2);
        }

        #[test]
        fn test_tilted() {
            let cube = Geom::trimesh(
                TriMesh::new(fixtures::cube(0.5)),
                Pose::new(Vec3::new(0.0, 0.0, 0.6), Matrix3::from_angle_x(Rad::from(Deg(45.0)))),
            );
            let ground = Geom::plane(Vec3::unit_z(), 0.0);
            let buf = collide(&cube, &ground, 32);

            // The lowest edge sits 0.5 * sqrt(2) below the center.
            let depth = 0.5 * 2.0f64.sqrt() - 0.6;
            assert_eq!(buf.len(), 2);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.depth, depth, epsilon = 1.0e-9);
            }
        }

        #[test]
        fn test_above() {
            let cube = Geom::trimesh(
                TriMesh::new(fixtures::cube(0.5)),
                Pose::from_position(Vec3::new(0.0, 0.0, 0.6)),
            );
            let ground = Geom::plane(Vec3::unit_z(), 0.0);
            assert!(collide(&cube, &ground, 8).is_empty());
        }

        #[test]
        fn test_degenerate_triangle_skipped() {
            // Collinear vertices, all of them below the plane.
            let data = TriMeshData::from_f64(&[[-1.0, 0.0, -0.1], [0.0, 0.0, -0.1], [1.0, 0.0, -0.1]], &[[0, 1, 2]])
                .unwrap();
            let sliver = Geom::trimesh(TriMesh::new(Arc::new(data)), Pose::identity());
            let ground = Geom::plane(Vec3::unit_z(), 0.0);
            assert!(collide(&sliver, &ground, 8).is_empty());
        }
    }
}
