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

use cgmath::{InnerSpace, Zero};
use smallvec::SmallVec;

use crate::bounds::BoundingSphere;
use crate::cache::ColliderCache;
use crate::geom::Posed;
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::math::{Real, Vec3, EPSILON};

/// Collides a triangle mesh (`a`) with a sphere (`b`).
///
/// Each triangle whose front side faces the sphere center yields a contact
/// at the closest point, with the triangle normal and the penetration
/// projected onto it. Unless the buffer asks for unimportant contacts, the
/// contacts of all triangles are then merged into a single one: positions
/// are averaged and the depth weighted normals summed.
pub fn trimesh_sphere(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let mesh = a.trimesh();
    let radius = b.sphere().radius;
    let center = b.pose.p;

    let volume = BoundingSphere {
        c: a.pose.inverse_transform_point(center),
        r: radius,
    };
    let key = if mesh.tc.sphere { Some((a.id, b.id)) } else { None };
    let mut candidates = cache.take_scratch();
    cache.sphere_candidates(key, &mesh.data, &volume, &mut candidates);
    log::trace!("trimesh {} against sphere {}: {} candidates", a.id, b.id, candidates.len());

    let room = buf.capacity().saturating_sub(buf.len());
    let mut found: SmallVec<[ContactGeom; 8]> = SmallVec::new();
    for &tri in candidates.iter() {
        if found.len() >= room {
            break;
        }
        if !mesh.accepts(b.id, tri) {
            continue;
        }
        let triangle = mesh.data.triangle(tri, &a.pose);
        let n = match triangle.unit_normal() {
            Some(n) => n,
            None => continue,
        };
        if n.dot(center - triangle.a) < 0.0 {
            continue;
        }

        let (closest, _, _) = triangle.closest_point(center);
        let dir = center - closest;
        let dist = dir.magnitude();
        if dist > radius {
            continue;
        }
        // A center on the triangle itself penetrates by the full radius.
        let projection = if dist < EPSILON { 1.0 } else { dir.dot(n) / dist };
        if projection < 0.0 {
            continue;
        }
        let depth = (radius - dist) * projection;
        found.push(ContactGeom::new(closest, -n, depth, a.id, b.id).with_sides(tri as i32, -1));
    }
    cache.recycle(candidates);

    if found.is_empty() {
        return 0;
    }
    if buf.is_unimportant() || found.len() == 1 {
        let mut written = 0;
        for c in found {
            if !buf.add(c) {
                break;
            }
            written += 1;
        }
        return written;
    }

    let merged = merge_contacts(&found, |s1, s2| match mesh.callbacks.merge {
        Some(ref merge) => merge(s1, s2),
        None => -1,
    });
    if buf.add(merged) {
        1
    } else {
        0
    }
}

/// Folds the contacts of several triangles into one. The depth is the
/// length of the averaged depth weighted normal.
fn merge_contacts<F>(found: &[ContactGeom], merge_side: F) -> ContactGeom
where
    F: Fn(i32, i32) -> i32,
{
    let first = found[0];
    let mut pos = Vec3::zero();
    let mut normal = Vec3::zero();
    let mut side = first.side1;
    for (i, c) in found.iter().enumerate() {
        pos += c.pos;
        normal += c.normal * c.depth;
        if i > 0 {
            side = merge_side(side, c.side1);
        }
    }
    let count = found.len() as Real;
    let depth = normal.magnitude() / count;
    let normal = if depth > EPSILON { normal.normalize() } else { first.normal };
    ContactGeom::new(pos / count, normal, depth, first.g1, first.g2).with_sides(side, -1)
}

#[cfg(test)]
mod tests {
    mod trimesh_sphere {
        use std::sync::Arc;

        use approx::assert_abs_diff_eq;
        use cgmath::InnerSpace;

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose};
        use crate::manifold::{ContactBuffer, ContactFlags};
        use crate::math::Vec3;
        use crate::mesh::{fixtures, TcFlags, TriMesh, TriangleMerge};
        use crate::trimesh_sphere::*;

        fn collide(mesh: &Geom, sphere: &Geom, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
            let n = trimesh_sphere(&mesh.posed(), &sphere.posed(), buf, cache);
            for c in buf.iter() {
                assert!(c.depth >= 0.0);
                assert_abs_diff_eq!(c.normal.magnitude(), 1.0, epsilon = 1.0e-9);
                assert_eq!(c.g1, mesh.id());
                assert_eq!(c.g2, sphere.id());
                assert_eq!(c.side2, -1);
            }
            n
        }

        fn ground() -> Geom {
            Geom::trimesh(TriMesh::new(fixtures::grid(4, 2.0, 0.0)), Pose::identity())
        }

        #[test]
        fn test_inside_triangle() {
            let mesh = ground();
            let sphere = Geom::sphere(0.2, Pose::from_position(Vec3::new(0.3, 0.7, 0.1)));
            let mut buf = ContactBuffer::with_capacity(4);
            let mut cache = ColliderCache::new();
            assert_eq!(collide(&mesh, &sphere, &mut buf, &mut cache), 1);
            let c = buf.contacts()[0];
            assert_abs_diff_eq!(c.normal, -Vec3::unit_z(), epsilon = 1.0e-9);
            assert_abs_diff_eq!(c.depth, 0.1, epsilon = 1.0e-9);
            assert_abs_diff_eq!(c.pos, Vec3::new(0.3, 0.7, 0.0), epsilon = 1.0e-9);
            assert!(c.side1 >= 0);
        }

        #[test]
        fn test_merged_over_shared_vertex() {
            // The sphere sits above a vertex shared by six triangles.
            let mesh = ground();
            let sphere = Geom::sphere(0.5, Pose::from_position(Vec3::new(0.0, 0.0, 0.4)));
            let mut buf = ContactBuffer::with_capacity(8);
            let mut cache = ColliderCache::new();
            assert_eq!(collide(&mesh, &sphere, &mut buf, &mut cache), 1);
            let c = buf.contacts()[0];
            assert_abs_diff_eq!(c.normal, -Vec3::unit_z(), epsilon = 1.0e-9);
            assert_abs_diff_eq!(c.depth, 0.1, epsilon = 1.0e-9);
            assert_abs_diff_eq!(c.pos, Vec3::new(0.0, 0.0, 0.0), epsilon = 1.0e-9);
            assert_eq!(c.side1, -1);

            // Unimportant contacts are reported per triangle.
            let mut buf = ContactBuffer::new(ContactFlags::with_capacity(8).unimportant());
            let n = collide(&mesh, &sphere, &mut buf, &mut cache);
            assert_eq!(n, 6);
        }

        #[test]
        fn test_merge_callback() {
            let mut mesh = TriMesh::new(fixtures::grid(4, 2.0, 0.0));
            let merge: TriangleMerge = Arc::new(|a: i32, b: i32| a.max(b));
            mesh.callbacks.merge = Some(merge);
            let mesh = Geom::trimesh(mesh, Pose::identity());
            let sphere = Geom::sphere(0.5, Pose::from_position(Vec3::new(0.0, 0.0, 0.4)));
            let mut buf = ContactBuffer::with_capacity(8);
            let mut cache = ColliderCache::new();
            assert_eq!(collide(&mesh, &sphere, &mut buf, &mut cache), 1);
            assert!(buf.contacts()[0].side1 >= 0);
        }

        #[test]
        fn test_degenerate_triangles() {
            let mesh = Geom::trimesh(TriMesh::new(fixtures::slivers()), Pose::identity());
            let sphere = Geom::sphere(0.5, Pose::identity());
            let mut buf = ContactBuffer::with_capacity(8);
            assert_eq!(collide(&mesh, &sphere, &mut buf, &mut ColliderCache::new()), 0);
            assert!(buf.is_empty());
        }

        #[test]
        fn test_back_side_and_separated() {
            let mesh = ground();
            let mut cache = ColliderCache::new();

            let below = Geom::sphere(0.5, Pose::from_position(Vec3::new(0.3, 0.7, -0.4)));
            let mut buf = ContactBuffer::with_capacity(4);
            assert_eq!(collide(&mesh, &below, &mut buf, &mut cache), 0);

            let above = Geom::sphere(0.5, Pose::from_position(Vec3::new(0.3, 0.7, 0.6)));
            let mut buf = ContactBuffer::with_capacity(4);
            assert_eq!(collide(&mesh, &above, &mut buf, &mut cache), 0);
        }

        #[test]
        fn test_temporal_coherence() {
            let mesh = Geom::trimesh(
                TriMesh::new(fixtures::grid(4, 2.0, 0.0)).with_tc(TcFlags {
                    sphere: true,
                    ..TcFlags::default()
                }),
                Pose::identity(),
            );
            let sphere = Geom::sphere(0.2, Pose::from_position(Vec3::new(0.3, 0.7, 0.1)));
            let mut cache = ColliderCache::new();
            for _ in 0..2 {
                let mut buf = ContactBuffer::with_capacity(4);
                assert_eq!(collide(&mesh, &sphere, &mut buf, &mut cache), 1);
            }
            assert_eq!(cache.tc_entries(), 1);
        }
    }
}
