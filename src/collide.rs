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

//! Pair dispatch and the public entry points.
//!
//! Each supported pair of shape kinds has one collider taking its shapes in
//! the order of its name. A query for the opposite order runs the same
//! collider with the arguments swapped and flips the contacts it wrote.

use crate::box_cylinder::cylinder_box;
use crate::cache::{try_with_thread_cache, ColliderCache};
use crate::cylinder_trimesh::cylinder_trimesh;
use crate::geom::{Geom, Posed, ShapeKind};
use crate::manifold::{ContactBuffer, ContactFlags};
use crate::primitives::{
    box_box, box_plane, capsule_box, capsule_capsule, capsule_plane, capsule_sphere, cylinder_plane,
    cylinder_sphere, ray_box, ray_capsule, ray_cylinder, ray_plane, ray_sphere, sphere_box, sphere_plane,
    sphere_sphere,
};
use crate::transform::transform_any;
use crate::trimesh_box::trimesh_box;
use crate::trimesh_capsule::trimesh_capsule;
use crate::trimesh_plane::trimesh_plane;
use crate::trimesh_ray::trimesh_ray;
use crate::trimesh_sphere::trimesh_sphere;
use crate::trimesh_trimesh::trimesh_trimesh;

/// A pairwise collider. Writes at most the free capacity of the buffer and
/// returns the number of contacts it added.
pub type Collider = fn(&Posed, &Posed, &mut ContactBuffer, &mut ColliderCache) -> usize;

/// The collider registered for exactly this order of kinds.
fn registered(a: ShapeKind, b: ShapeKind) -> Option<Collider> {
    use crate::geom::ShapeKind::*;

    let collider: Collider = match (a, b) {
        (Transform, _) => transform_any,
        (Sphere, Sphere) => sphere_sphere,
        (Sphere, Cuboid) => sphere_box,
        (Sphere, Plane) => sphere_plane,
        (Cuboid, Cuboid) => box_box,
        (Cuboid, Plane) => box_plane,
        (Capsule, Sphere) => capsule_sphere,
        (Capsule, Cuboid) => capsule_box,
        (Capsule, Capsule) => capsule_capsule,
        (Capsule, Plane) => capsule_plane,
        (Cylinder, Sphere) => cylinder_sphere,
        (Cylinder, Cuboid) => cylinder_box,
        (Cylinder, Plane) => cylinder_plane,
        (Cylinder, TriMesh) => cylinder_trimesh,
        (Ray, Sphere) => ray_sphere,
        (Ray, Cuboid) => ray_box,
        (Ray, Capsule) => ray_capsule,
        (Ray, Cylinder) => ray_cylinder,
        (Ray, Plane) => ray_plane,
        (TriMesh, Cuboid) => trimesh_box,
        (TriMesh, Capsule) => trimesh_capsule,
        (TriMesh, Sphere) => trimesh_sphere,
        (TriMesh, Plane) => trimesh_plane,
        (TriMesh, Ray) => trimesh_ray,
        (TriMesh, TriMesh) => trimesh_trimesh,
        _ => return None,
    };
    Some(collider)
}

/// The collider for a pair of kinds and whether it takes them reversed.
pub fn collider_for(a: ShapeKind, b: ShapeKind) -> Option<(Collider, bool)> {
    match registered(a, b) {
        Some(c) => Some((c, false)),
        None => registered(b, a).map(|c| (c, true)),
    }
}

/// Runs the collider for the pair, flipping the contacts of reversed
/// entries. Pairs without a collider produce nothing.
pub(crate) fn dispatch(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    if buf.is_full() {
        return 0;
    }
    match collider_for(a.kind(), b.kind()) {
        Some((collider, false)) => collider(a, b, buf, cache),
        Some((collider, true)) => {
            let start = buf.len();
            let n = collider(b, a, buf, cache);
            buf.flip_from(start);
            n
        }
        None => {
            log::trace!("no collider for {:?} against {:?}", a.kind(), b.kind());
            0
        }
    }
}

/// Collides two geoms using the calling thread's cache. A query made while
/// that cache is already in use, from a mesh callback for instance, runs
/// with a temporary cache instead.
///
/// # Panics
///
/// Panics if the geoms ask for different cache kinds.
pub fn collide(a: &Geom, b: &Geom, flags: ContactFlags) -> ContactBuffer {
    assert_eq!(
        a.cache_kind(),
        b.cache_kind(),
        "geoms {} and {} use different cache kinds",
        a.id(),
        b.id()
    );
    match try_with_thread_cache(a.cache_kind(), |cache| collide_with(a, b, flags, cache)) {
        Ok(buf) => buf,
        Err(err) => {
            log::warn!("{}; colliding {} and {} with a temporary cache", err, a.id(), b.id());
            collide_with(a, b, flags, &mut ColliderCache::new())
        }
    }
}

/// Collides two geoms with an explicitly owned cache.
///
/// The normal of every contact points from `b` towards `a`, `g1` names `a`
/// (or a geom inside it) and `g2` names `b`. Colliding a geom with itself,
/// or asking for no contacts, yields an empty buffer.
pub fn collide_with(a: &Geom, b: &Geom, flags: ContactFlags, cache: &mut ColliderCache) -> ContactBuffer {
    let mut buf = ContactBuffer::new(flags);
    if a.id() == b.id() || flags.capacity() == 0 {
        return buf;
    }
    let n = dispatch(&a.posed(), &b.posed(), &mut buf, cache);
    log::trace!("{} against {}: {} contacts", a.id(), b.id(), n);
    buf
}
