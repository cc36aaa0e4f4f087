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

//! Narrow-phase collision detection for 3D physics.
//!
//! # Overview
//!
//! A `Geom` is a shape placed in the world. `collide` takes two geoms and
//! returns a bounded `ContactBuffer` of contact points, each with a unit
//! normal pointing from the second geom towards the first and a
//! non-negative penetration depth.
//!
//! Supported shapes are spheres, boxes, capsules, cylinders, planes, rays,
//! triangle meshes and transform wrappers that place another geom at a fixed
//! offset. Pairs between convex shapes and meshes are resolved with the
//! separating axis test; meshes are indexed by a bounding volume hierarchy.
//!
//! Each thread that collides keeps a `ColliderCache` with scratch storage and
//! temporal coherence tables. `collide` uses the one owned by the calling
//! thread; `collide_with` takes one explicitly.
//!

pub use cgmath;

mod math;
pub use math::*;

mod error;
pub use error::*;

mod bounds;
pub use bounds::*;

mod bvh;
pub use bvh::*;

mod mesh;
pub use mesh::*;

mod geom;
pub use geom::*;

mod manifold;
pub use manifold::*;

mod contact_set;
pub use contact_set::*;

mod config;
pub use config::*;

mod cache;
pub use cache::*;

mod clip;
pub use clip::*;

mod primitives;
pub use primitives::*;

mod box_cylinder;
pub use box_cylinder::*;

mod trimesh_box;
pub use trimesh_box::*;

mod trimesh_capsule;
pub use trimesh_capsule::*;

mod cylinder_trimesh;
pub use cylinder_trimesh::*;

mod trimesh_sphere;
pub use trimesh_sphere::*;

mod trimesh_plane;
pub use trimesh_plane::*;

mod trimesh_ray;
pub use trimesh_ray::*;

mod trimesh_trimesh;
pub use trimesh_trimesh::*;

mod transform;
pub use transform::*;

mod collide;
pub use collide::*;
