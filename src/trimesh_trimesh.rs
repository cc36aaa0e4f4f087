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

//! Triangle mesh against triangle mesh.
//!
//! Every pair of triangles with overlapping bounds is tested on the two face
//! normals only. For each face the other triangle is clipped by the prism
//! over the face and its points furthest below the face plane are kept; the
//! face with the shallower penetration wins. Contacts of all pairs go through
//! the hashed contact set so that a vertex shared by many triangles yields a
//! single contact with an averaged normal.
//!
//! Coplanar pairs have no meaningful penetration direction. They are folded
//! into one contact at the mean centroid of their overlaps.

use cgmath::{InnerSpace, Zero};
use smallvec::SmallVec;

use crate::cache::ColliderCache;
use crate::clip::{clip_polygon_by_planes, ClipPolygon};
use crate::contact_set::Merge;
use crate::geom::{GeomId, Posed};
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::math::{safe_normalize, Plane, Real, Triangle, Vec3};
use crate::mesh::TriMesh;

/// Points within this distance of a prism side count as inside.
const CLIP_EPSILON: Real = 1.0e-8;

/// Points this close to the deepest one are reported with it.
const DEEP_POINT_EPSILON: Real = 1.0e-6;

/// Planes closer than this are coplanar, and coplanar overlaps report no
/// penetration.
const TINY_PENETRATION: Real = 5.0e-6;

/// Largest deviation of the face normals from parallel for coplanar pairs.
const PARALLEL_EPSILON: Real = 1.0e-6;

type DeepPoints = SmallVec<[Vec3; 8]>;

/// The face of `tri` as a unit normal and plane offset.
fn face_plane(tri: &Triangle) -> Option<(Vec3, Real)> {
    tri.unit_normal().map(|n| (n, n.dot(tri.a)))
}

/// Clips the triangle `points` by the three side planes of the prism over
/// `tri`.
fn clip_by_prism(points: &Triangle, tri: &Triangle, n: Vec3) -> ClipPolygon {
    let mut sides: SmallVec<[Plane; 3]> = SmallVec::new();
    for i in 0..3 {
        let s0 = tri.vertex(i);
        let s1 = tri.vertex((i + 1) % 3);
        if let Some(inward) = safe_normalize(n.cross(s1 - s0)) {
            sides.push(Plane::new(inward, inward.dot(s0) - CLIP_EPSILON));
        }
    }
    let mut poly: ClipPolygon = [points.a, points.b, points.c].iter().cloned().collect();
    let mut scratch = ClipPolygon::new();
    clip_polygon_by_planes(&mut poly, sides.iter(), &mut scratch);
    poly
}

/// Keeps the points of `poly` deepest below the plane `(n, d)`. Returns the
/// depth, or negative infinity for an empty polygon.
fn deepest_points(poly: &[Vec3], n: Vec3, d: Real, out: &mut DeepPoints) -> Real {
    out.clear();
    let depth = poly.iter().map(|p| d - n.dot(*p)).fold(Real::NEG_INFINITY, Real::max);
    for p in poly.iter() {
        if d - n.dot(*p) + DEEP_POINT_EPSILON >= depth {
            out.push(*p);
        }
    }
    depth
}

/// The result of testing one pair of triangles.
enum PairContact {
    Separated,
    /// Points penetrating along `normal`, which points from the second
    /// triangle towards the first.
    Penetrating { normal: Vec3, depth: Real, points: DeepPoints },
    /// The triangles share a plane and overlap around `centroid`.
    Coplanar { normal: Vec3, centroid: Vec3 },
}

fn collide_triangles(t1: &Triangle, t2: &Triangle) -> PairContact {
    let (n1, d1) = match face_plane(t1) {
        Some(plane) => plane,
        None => return PairContact::Separated,
    };
    let (n2, d2) = match face_plane(t2) {
        Some(plane) => plane,
        None => return PairContact::Separated,
    };

    let parallel = n1.dot(n2).abs() >= 1.0 - PARALLEL_EPSILON;
    if parallel && (n1.dot(t2.a) - d1).abs() <= TINY_PENETRATION {
        let overlap = clip_by_prism(t2, t1, n1);
        if overlap.is_empty() {
            return PairContact::Separated;
        }
        let sum = overlap.iter().fold(Vec3::zero(), |acc, p| acc + *p);
        return PairContact::Coplanar {
            normal: -n1,
            centroid: sum / overlap.len() as Real,
        };
    }

    let mut points1 = DeepPoints::new();
    let depth1 = deepest_points(&clip_by_prism(t2, t1, n1), n1, d1, &mut points1);
    let mut points2 = DeepPoints::new();
    let depth2 = deepest_points(&clip_by_prism(t1, t2, n2), n2, d2, &mut points2);

    let (normal, depth, points) = if depth2 < depth1 {
        (n2, depth2, points2)
    } else {
        (-n1, depth1, points1)
    };
    if depth < 0.0 || points.is_empty() {
        return PairContact::Separated;
    }
    PairContact::Penetrating { normal, depth, points }
}

/// Running mean of the coplanar overlaps of one query.
struct CoplanarOverlap {
    normal: Vec3,
    sum: Vec3,
    count: usize,
    side1: i32,
    side2: i32,
}

fn merge_side(mesh: &TriMesh, s1: i32, s2: i32) -> i32 {
    match mesh.callbacks.merge {
        Some(ref merge) => merge(s1, s2),
        None => -1,
    }
}

/// Collides two triangle meshes. Contacts carry the triangle of `a` as their
/// first side and the triangle of `b` as the second.
pub fn trimesh_trimesh(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let mesh1 = a.trimesh();
    let mesh2 = b.trimesh();
    let start = buf.len();

    let mut pairs: Vec<(u32, u32)> = Vec::new();
    let b_to_a = a.pose.inverse().compose(&b.pose);
    mesh1.data.bvh().query_pairs(mesh2.data.bvh(), &b_to_a, |t1, t2| pairs.push((t1, t2)));
    log::trace!("trimesh {} against trimesh {}: {} triangle pairs", a.id, b.id, pairs.len());
    if pairs.is_empty() {
        return 0;
    }

    let (id1, id2) = (a.id, b.id);
    let merge = |g: GeomId, s1: i32, s2: i32| {
        if g == id1 {
            merge_side(mesh1, s1, s2)
        } else {
            merge_side(mesh2, s1, s2)
        }
    };

    let set = &mut cache.contact_set;
    set.begin(buf);
    let mut coplanar: Option<CoplanarOverlap> = None;

    'pairs: for &(i1, i2) in pairs.iter() {
        if !mesh1.accepts(b.id, i1) || !mesh2.accepts(a.id, i2) {
            continue;
        }
        let t1 = mesh1.data.triangle(i1, &a.pose);
        let t2 = mesh2.data.triangle(i2, &b.pose);

        match collide_triangles(&t1, &t2) {
            PairContact::Separated => {}
            PairContact::Penetrating { normal, depth, points } => {
                for p in points {
                    let contact = ContactGeom::new(p, normal, depth, a.id, b.id).with_sides(i1 as i32, i2 as i32);
                    let merged = set.push(buf, contact, merge);
                    // Once full, later pairs may still deepen or average
                    // existing contacts unless they are unimportant.
                    if merged == Merge::Dropped && buf.is_unimportant() {
                        break 'pairs;
                    }
                }
            }
            PairContact::Coplanar { normal, centroid } => match coplanar {
                Some(ref mut overlap) => {
                    overlap.sum += centroid;
                    overlap.count += 1;
                    overlap.side1 = merge_side(mesh1, overlap.side1, i1 as i32);
                    overlap.side2 = merge_side(mesh2, overlap.side2, i2 as i32);
                }
                None => {
                    coplanar = Some(CoplanarOverlap {
                        normal,
                        sum: centroid,
                        count: 1,
                        side1: i1 as i32,
                        side2: i2 as i32,
                    })
                }
            },
        }
    }

    if let Some(overlap) = coplanar {
        let pos = overlap.sum / overlap.count as Real;
        let contact = ContactGeom::new(pos, overlap.normal, 0.0, a.id, b.id).with_sides(overlap.side1, overlap.side2);
        set.push(buf, contact, merge);
    }

    buf.len() - start
}

#[cfg(test)]
mod tests {
    mod trimesh_trimesh {
        use std::sync::Arc;

        use approx::assert_abs_diff_eq;
        use cgmath::InnerSpace;

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose};
        use crate::manifold::{ContactBuffer, ContactFlags};
        use crate::math::{Triangle, Vec3};
        use crate::mesh::{fixtures, TriMesh, TriMeshData};
        use crate::trimesh_trimesh::*;

        fn collide(a: &Geom, b: &Geom, buf: &mut ContactBuffer) -> usize {
            let mut cache = ColliderCache::new();
            let n = trimesh_trimesh(&a.posed(), &b.posed(), buf, &mut cache);
            assert_eq!(n, buf.len());
            assert!(buf.len() <= buf.capacity());
            for c in buf.iter() {
                assert!(c.depth >= 0.0);
                assert_abs_diff_eq!(c.normal.magnitude(), 1.0, epsilon = 1.0e-9);
                assert_eq!(c.g1, a.id());
                assert_eq!(c.g2, b.id());
            }
            n
        }

        fn sunk_cube(depth: f64) -> Geom {
            Geom::trimesh(
                TriMesh::new(fixtures::cube(0.5)),
                Pose::from_position(Vec3::new(0.0, 0.0, 0.5 - depth)),
            )
        }

        fn ground() -> Geom {
            Geom::trimesh(TriMesh::new(fixtures::grid(4, 2.0, 0.0)), Pose::identity())
        }

        #[test]
        fn test_cube_on_ground() {
            let cube = sunk_cube(0.1);
            let ground = ground();
            let mut buf = ContactBuffer::with_capacity(64);
            assert!(collide(&cube, &ground, &mut buf) >= 4);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.normal, Vec3::unit_z(), epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.depth, 0.1, epsilon = 1.0e-9);
                assert!(c.pos.x.abs() <= 0.5 + 1.0e-6 && c.pos.y.abs() <= 0.5 + 1.0e-6);
                assert!(c.pos.z >= -0.1 - 1.0e-9 && c.pos.z <= 1.0e-9);
            }
        }

        #[test]
        fn test_capacity() {
            let cube = sunk_cube(0.1);
            let ground = ground();
            let mut buf = ContactBuffer::with_capacity(2);
            assert_eq!(collide(&cube, &ground, &mut buf), 2);

            let mut buf = ContactBuffer::new(ContactFlags::with_capacity(1).unimportant());
            assert_eq!(collide(&cube, &ground, &mut buf), 1);
        }

        #[test]
        fn test_separated() {
            let cube = sunk_cube(-0.1);
            let mut buf = ContactBuffer::with_capacity(8);
            assert_eq!(collide(&cube, &ground(), &mut buf), 0);
        }

        #[test]
        fn test_coplanar_squares() {
            let a = Geom::trimesh(TriMesh::new(fixtures::square(0.5, 0.0)), Pose::identity());
            let b = Geom::trimesh(TriMesh::new(fixtures::square(0.5, 0.0)), Pose::identity());
            let mut buf = ContactBuffer::with_capacity(16);
            assert!(collide(&a, &b, &mut buf) <= 1);
            for c in buf.iter() {
                assert_abs_diff_eq!(c.depth, 0.0);
                assert!(c.pos.x.abs() <= 0.5 && c.pos.y.abs() <= 0.5);
            }
        }

        #[test]
        fn test_triangle_filter() {
            let mut mesh = TriMesh::new(fixtures::cube(0.5));
            mesh.callbacks.triangle = Some(Arc::new(|_, _| false));
            let cube = Geom::trimesh(mesh, Pose::from_position(Vec3::new(0.0, 0.0, 0.4)));
            let mut buf = ContactBuffer::with_capacity(8);
            assert_eq!(collide(&cube, &ground(), &mut buf), 0);
        }

        #[test]
        fn test_degenerate_triangle() {
            let sliver = TriMeshData::from_f64(
                &[[-1.0, 0.0, -0.1], [0.0, 0.0, 0.0], [1.0, 0.0, 0.1]],
                &[[0, 1, 2]],
            )
            .unwrap();
            let sliver = Geom::trimesh(TriMesh::new(Arc::new(sliver)), Pose::identity());
            let mut buf = ContactBuffer::with_capacity(8);
            assert_eq!(collide(&sliver, &ground(), &mut buf), 0);
        }

        #[test]
        fn test_pair_faces() {
            // A vertical triangle poking 0.2 through a horizontal one.
            let floor = Triangle::new(
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            );
            let fin = Triangle::new(
                Vec3::new(-0.2, 0.0, -0.2),
                Vec3::new(0.2, 0.0, 1.0),
                Vec3::new(-0.2, 0.0, 1.0),
            );
            match collide_triangles(&fin, &floor) {
                PairContact::Penetrating { normal, depth, points } => {
                    assert_abs_diff_eq!(normal, Vec3::unit_z(), epsilon = 1.0e-12);
                    assert_abs_diff_eq!(depth, 0.2, epsilon = 1.0e-12);
                    assert_eq!(points.len(), 1);
                    assert_abs_diff_eq!(points[0], fin.a, epsilon = 1.0e-12);
                }
                _ => panic!("expected a penetrating pair"),
            }
        }
    }
}
