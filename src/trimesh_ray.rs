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

use crate::bounds::Segment;
use crate::cache::ColliderCache;
use crate::geom::Posed;
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::mesh::TriMesh;
use crate::math::Real;

/// A triangle crossed by the ray.
#[derive(Copy, Clone, Debug)]
struct Hit {
    tri: u32,
    t: Real,
}

/// Collides a triangle mesh (`a`) with a ray (`b`).
///
/// Each hit is a contact at the crossing point whose depth is the distance
/// along the ray. The normal is the reversed face normal of the triangle.
/// The ray flags pick between every hit, the first one found, or only the
/// closest.
pub fn trimesh_ray(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let mesh = a.trimesh();
    let ray = b.ray();
    let origin = b.pose.p;
    let dir = b.pose.axis(2);

    let segment = Segment {
        a: a.pose.inverse_transform_point(origin),
        b: a.pose.inverse_transform_point(origin + dir * ray.length),
    };
    let mut candidates = cache.take_scratch();
    mesh.data.query(&segment, &mut candidates);

    let mut hits: Vec<Hit> = Vec::new();
    for &tri in candidates.iter() {
        let triangle = mesh.data.triangle(tri, &a.pose);
        if triangle.is_degenerate() {
            continue;
        }
        let (t, u, v) = match triangle.ray_hit(origin, dir, ray.length, ray.backface_cull) {
            Some(hit) => hit,
            None => continue,
        };
        if !accepts_hit(mesh, b, tri, u, v) {
            continue;
        }
        if ray.closest_hit {
            match hits.first_mut() {
                Some(best) if best.t <= t => {}
                Some(best) => *best = Hit { tri, t },
                None => hits.push(Hit { tri, t }),
            }
            continue;
        }
        hits.push(Hit { tri, t });
        if ray.first_contact {
            break;
        }
    }
    cache.recycle(candidates);
    log::trace!("trimesh {} against ray {}: {} hits", a.id, b.id, hits.len());

    let mut written = 0;
    for hit in hits {
        let triangle = mesh.data.triangle(hit.tri, &a.pose);
        let normal = match triangle.unit_normal() {
            Some(n) => -n,
            None => continue,
        };
        let contact = ContactGeom::new(origin + dir * hit.t, normal, hit.t, a.id, b.id).with_sides(hit.tri as i32, -1);
        if !buf.add(contact) {
            break;
        }
        written += 1;
    }
    written
}

fn accepts_hit(mesh: &TriMesh, ray: &Posed, tri: u32, u: Real, v: Real) -> bool {
    if let Some(ref filter) = mesh.callbacks.ray {
        if !filter(ray.id, tri, u, v) {
            return false;
        }
    }
    mesh.accepts(ray.id, tri)
}

#[cfg(test)]
mod tests {
    mod trimesh_ray {
        use std::sync::Arc;

        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, Matrix3, Rad};

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose, Ray};
        use crate::manifold::ContactBuffer;
        use crate::math::Vec3;
        use crate::mesh::{fixtures, RayFilter, TriMesh};
        use crate::trimesh_ray::*;

        fn collide(mesh: &Geom, ray: &Geom, max: usize) -> ContactBuffer {
            let mut buf = ContactBuffer::with_capacity(max);
            let mut cache = ColliderCache::new();
            let n = trimesh_ray(&mesh.posed(), &ray.posed(), &mut buf, &mut cache);
            assert_eq!(n, buf.len());
            for c in buf.iter() {
                assert_eq!(c.g1, mesh.id());
                assert_eq!(c.g2, ray.id());
                assert!(c.side1 >= 0);
            }
            buf
        }

        fn downward(ray: Ray, x: f64, y: f64) -> Geom {
            // Rotating local z onto -z.
            Geom::ray(ray, Pose::new(Vec3::new(x, y, 2.0), Matrix3::from_angle_x(Rad::from(Deg(180.0)))))
        }

        fn cube() -> Geom {
            Geom::trimesh(TriMesh::new(fixtures::cube(0.5)), Pose::identity())
        }

        #[test]
        fn test_all_hits() {
            let buf = collide(&cube(), &downward(Ray::new(5.0), 0.1, 0.3), 8);
            assert_eq!(buf.len(), 2);
            let mut depths: Vec<f64> = buf.iter().map(|c| c.depth).collect();
            depths.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_abs_diff_eq!(depths[0], 1.5, epsilon = 1.0e-9);
            assert_abs_diff_eq!(depths[1], 2.5, epsilon = 1.0e-9);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.pos.x, 0.1, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.y, 0.3, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.pos.z, 2.0 - c.depth, epsilon = 1.0e-9);
            }
        }

        #[test]
        fn test_closest_and_culled() {
            let mut ray = Ray::new(5.0);
            ray.closest_hit = true;
            let buf = collide(&cube(), &downward(ray, 0.1, 0.3), 8);
            assert_eq!(buf.len(), 1);
            let c = buf.contacts()[0];
            assert_abs_diff_eq!(c.depth, 1.5, epsilon = 1.0e-9);
            assert_abs_diff_eq!(c.normal, Vec3::new(0.0, 0.0, -1.0), epsilon = 1.0e-9);

            // The bottom face is hit from inside and culled.
            let mut ray = Ray::new(5.0);
            ray.backface_cull = true;
            let buf = collide(&cube(), &downward(ray, 0.1, 0.3), 8);
            assert_eq!(buf.len(), 1);
            assert_abs_diff_eq!(buf.contacts()[0].depth, 1.5, epsilon = 1.0e-9);

            let mut ray = Ray::new(5.0);
            ray.first_contact = true;
            assert_eq!(collide(&cube(), &downward(ray, 0.1, 0.3), 8).len(), 1);
        }

        #[test]
        fn test_degenerate_triangles() {
            let mesh = Geom::trimesh(TriMesh::new(fixtures::slivers()), Pose::identity());
            for ray in &[Ray::new(10.0), Ray { closest_hit: true, ..Ray::new(10.0) }] {
                assert!(collide(&mesh, &downward(*ray, 0.0, 0.0), 8).is_empty());
            }
        }

        #[test]
        fn test_short_and_missing() {
            assert!(collide(&cube(), &downward(Ray::new(1.0), 0.1, 0.3), 8).is_empty());
            assert_eq!(collide(&cube(), &downward(Ray::new(2.0), 0.1, 0.3), 8).len(), 1);
            assert!(collide(&cube(), &downward(Ray::new(5.0), 2.0, 0.3), 8).is_empty());
        }

        #[test]
        fn test_ray_filter() {
            let mut mesh = TriMesh::new(fixtures::cube(0.5));
            let filter: RayFilter = Arc::new(|_, _, _, _| false);
            mesh.callbacks.ray = Some(filter);
            let mesh = Geom::trimesh(mesh, Pose::identity());
            assert!(collide(&mesh, &downward(Ray::new(5.0), 0.1, 0.3), 8).is_empty());
        }
    }
}
