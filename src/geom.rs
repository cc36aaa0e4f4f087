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

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use cgmath::{InnerSpace, Matrix, SquareMatrix, Zero};
use serde::{Deserialize, Serialize};

use crate::bounds::AABB;
use crate::cache::{self, CacheKind};
use crate::math::{abs_vec, axis, rotated_extents, Mat3, Plane, Real, Vec3};
use crate::mesh::TriMesh;
use crate::transform::Transform;

/// A position and a rotation. Column `i` of `r` is local axis `i` expressed
/// in world space.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub p: Vec3,
    pub r: Mat3,
}

impl Pose {
    pub fn new(p: Vec3, r: Mat3) -> Self {
        Pose { p, r }
    }

    pub fn identity() -> Self {
        Pose {
            p: Vec3::zero(),
            r: Mat3::identity(),
        }
    }

    pub fn from_position(p: Vec3) -> Self {
        Pose {
            p,
            r: Mat3::identity(),
        }
    }

    #[inline]
    pub fn axis(&self, i: usize) -> Vec3 {
        axis(&self.r, i)
    }

    #[inline]
    pub fn transform_point(&self, v: Vec3) -> Vec3 {
        self.r * v + self.p
    }

    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.r * v
    }

    #[inline]
    pub fn inverse_transform_point(&self, v: Vec3) -> Vec3 {
        self.r.transpose() * (v - self.p)
    }

    #[inline]
    pub fn inverse_transform_vector(&self, v: Vec3) -> Vec3 {
        self.r.transpose() * v
    }

    /// The pose of something placed at `local` relative to this pose.
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            p: self.transform_point(local.p),
            r: self.r * local.r,
        }
    }

    pub fn inverse(&self) -> Pose {
        let rt = self.r.transpose();
        Pose {
            p: -(rt * self.p),
            r: rt,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::identity()
    }
}

/// Process unique identity of a geom, reported in contacts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeomId(pub u64);

static NEXT_GEOM_ID: AtomicU64 = AtomicU64::new(1);

impl GeomId {
    fn next() -> Self {
        GeomId(NEXT_GEOM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GeomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "geom#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub radius: Real,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cuboid {
    pub half_extents: Vec3,
}

/// A cylinder with hemispherical caps along local z. `length` excludes the
/// caps.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub radius: Real,
    pub length: Real,
}

/// A flat capped cylinder along local z.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    pub radius: Real,
    pub length: Real,
}

/// A ray starting at the geom position pointing along local z.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub length: Real,
    /// Stop at the first hit found instead of searching further.
    pub first_contact: bool,
    /// Ignore hits on the back side of triangles.
    pub backface_cull: bool,
    /// Report only the nearest hit.
    pub closest_hit: bool,
}

impl Ray {
    pub fn new(length: Real) -> Self {
        Ray {
            length,
            first_contact: false,
            backface_cull: false,
            closest_hit: false,
        }
    }
}

/// Every kind of shape a geom can take.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Sphere,
    Cuboid,
    Capsule,
    Cylinder,
    Plane,
    Ray,
    TriMesh,
    Transform,
}

impl ShapeKind {
    pub const COUNT: usize = 8;

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug)]
pub enum Shape {
    Sphere(Sphere),
    Cuboid(Cuboid),
    Capsule(Capsule),
    Cylinder(Cylinder),
    /// Planes live in world space and ignore the geom pose.
    Plane(Plane),
    Ray(Ray),
    TriMesh(TriMesh),
    Transform(Transform),
}

impl Shape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Sphere(_) => ShapeKind::Sphere,
            Shape::Cuboid(_) => ShapeKind::Cuboid,
            Shape::Capsule(_) => ShapeKind::Capsule,
            Shape::Cylinder(_) => ShapeKind::Cylinder,
            Shape::Plane(_) => ShapeKind::Plane,
            Shape::Ray(_) => ShapeKind::Ray,
            Shape::TriMesh(_) => ShapeKind::TriMesh,
            Shape::Transform(_) => ShapeKind::Transform,
        }
    }

    /// World space bounds of the shape placed at `pose`.
    pub fn aabb(&self, pose: &Pose) -> AABB {
        match self {
            Shape::Sphere(s) => AABB {
                c: pose.p,
                r: Vec3::new(s.radius, s.radius, s.radius),
            },
            Shape::Cuboid(b) => AABB {
                c: pose.p,
                r: rotated_extents(&pose.r, b.half_extents),
            },
            Shape::Capsule(c) => {
                let half = abs_vec(pose.axis(2)) * (c.length * 0.5);
                AABB {
                    c: pose.p,
                    r: half + Vec3::new(c.radius, c.radius, c.radius),
                }
            }
            Shape::Cylinder(c) => {
                let z = pose.axis(2);
                let ext = |zi: Real| {
                    zi.abs() * c.length * 0.5 + c.radius * (1.0 - zi * zi).max(0.0).sqrt()
                };
                AABB {
                    c: pose.p,
                    r: Vec3::new(ext(z.x), ext(z.y), ext(z.z)),
                }
            }
            Shape::Plane(_) => AABB {
                c: Vec3::zero(),
                r: Vec3::new(Real::INFINITY, Real::INFINITY, Real::INFINITY),
            },
            Shape::Ray(ray) => {
                let end = pose.p + pose.axis(2) * ray.length;
                AABB::from_min_max(
                    Vec3::new(pose.p.x.min(end.x), pose.p.y.min(end.y), pose.p.z.min(end.z)),
                    Vec3::new(pose.p.x.max(end.x), pose.p.y.max(end.y), pose.p.z.max(end.z)),
                )
            }
            Shape::TriMesh(mesh) => mesh.data.world_aabb(pose),
            Shape::Transform(t) => t.aabb(pose),
        }
    }
}

/// A shape placed in the world.
///
/// The world space AABB is cached and recomputed lazily after any change to
/// the pose or the shape.
pub struct Geom {
    id: GeomId,
    shape: Shape,
    pose: Pose,
    cache_kind: CacheKind,
    aabb: Cell<Option<AABB>>,
}

impl Drop for Geom {
    fn drop(&mut self) {
        cache::forget_geom(self.id);
    }
}

impl fmt::Debug for Geom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Geom")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("pose", &self.pose)
            .field("cache_kind", &self.cache_kind)
            .finish()
    }
}

impl Geom {
    pub fn new(shape: Shape, pose: Pose) -> Self {
        Geom {
            id: GeomId::next(),
            shape,
            pose,
            cache_kind: CacheKind::default(),
            aabb: Cell::new(None),
        }
    }

    pub fn sphere(radius: Real, pose: Pose) -> Self {
        Geom::new(Shape::Sphere(Sphere { radius }), pose)
    }

    pub fn cuboid(half_extents: Vec3, pose: Pose) -> Self {
        Geom::new(Shape::Cuboid(Cuboid { half_extents }), pose)
    }

    pub fn capsule(radius: Real, length: Real, pose: Pose) -> Self {
        Geom::new(Shape::Capsule(Capsule { radius, length }), pose)
    }

    pub fn cylinder(radius: Real, length: Real, pose: Pose) -> Self {
        Geom::new(Shape::Cylinder(Cylinder { radius, length }), pose)
    }

    /// A world space plane. The normal is normalized.
    pub fn plane(n: Vec3, d: Real) -> Self {
        let len = n.magnitude();
        let plane = if len > 0.0 {
            Plane::new(n / len, d / len)
        } else {
            Plane::new(Vec3::unit_z(), d)
        };
        Geom::new(Shape::Plane(plane), Pose::identity())
    }

    pub fn ray(ray: Ray, pose: Pose) -> Self {
        Geom::new(Shape::Ray(ray), pose)
    }

    pub fn trimesh(mesh: TriMesh, pose: Pose) -> Self {
        Geom::new(Shape::TriMesh(mesh), pose)
    }

    /// Wraps `transform` at `pose`. The inner geom's pose is taken as an
    /// offset from this one.
    pub fn transform(transform: Transform, pose: Pose) -> Self {
        Geom::new(Shape::Transform(transform), pose)
    }

    pub fn with_cache_kind(mut self, kind: CacheKind) -> Self {
        self.cache_kind = kind;
        self
    }

    pub fn id(&self) -> GeomId {
        self.id
    }

    pub fn kind(&self) -> ShapeKind {
        self.shape.kind()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Mutable access to the shape parameters. Invalidates the cached AABB.
    pub fn shape_mut(&mut self) -> &mut Shape {
        self.aabb.set(None);
        &mut self.shape
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn cache_kind(&self) -> CacheKind {
        self.cache_kind
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
        self.aabb.set(None);
    }

    pub fn set_position(&mut self, p: Vec3) {
        self.pose.p = p;
        self.aabb.set(None);
    }

    pub fn set_rotation(&mut self, r: Mat3) {
        self.pose.r = r;
        self.aabb.set(None);
    }

    pub fn is_dirty(&self) -> bool {
        self.aabb.get().is_none()
    }

    /// World space bounds, recomputed if the geom changed since the last
    /// call.
    pub fn aabb(&self) -> AABB {
        match self.aabb.get() {
            Some(aabb) => aabb,
            None => {
                let aabb = self.shape.aabb(&self.pose);
                self.aabb.set(Some(aabb));
                aabb
            }
        }
    }

    pub(crate) fn posed(&self) -> Posed<'_> {
        Posed {
            id: self.id,
            shape: &self.shape,
            pose: self.pose,
        }
    }
}

/// A shape borrowed from a geom together with the pose and identity it is
/// collided with. Transform wrappers hand their inner shape to the colliders
/// through this with the effective pose substituted.
#[derive(Copy, Clone, Debug)]
pub struct Posed<'a> {
    pub id: GeomId,
    pub shape: &'a Shape,
    pub pose: Pose,
}

macro_rules! posed_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// The shape as the expected variant.
        ///
        /// # Panics
        ///
        /// Panics if the shape is of another kind. Colliders are only ever
        /// handed the kinds they are registered for.
        pub fn $name(&self) -> &'a $ty {
            match self.shape {
                Shape::$variant(ref s) => s,
                other => panic!(
                    concat!("expected a ", stringify!($variant), " shape, got {:?}"),
                    other.kind()
                ),
            }
        }
    };
}

impl<'a> Posed<'a> {
    pub fn kind(&self) -> ShapeKind {
        self.shape.kind()
    }

    posed_accessor!(sphere, Sphere, Sphere);
    posed_accessor!(cuboid, Cuboid, Cuboid);
    posed_accessor!(capsule, Capsule, Capsule);
    posed_accessor!(cylinder, Cylinder, Cylinder);
    posed_accessor!(plane, Plane, Plane);
    posed_accessor!(ray, Ray, Ray);
    posed_accessor!(trimesh, TriMesh, TriMesh);
    posed_accessor!(transform, Transform, Transform);
}

#[cfg(test)]
mod tests {
    mod geom {
        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, Matrix3, Rad, SquareMatrix};

        use crate::geom::*;
        use crate::math::{Mat3, Vec3};

        #[test]
        fn test_pose() {
            let pose = Pose::new(
                Vec3::new(1.0, 2.0, 3.0),
                Matrix3::from_angle_z(Rad::from(Deg(90.0))),
            );
            let p = pose.transform_point(Vec3::new(1.0, 0.0, 0.0));
            assert_abs_diff_eq!(p, Vec3::new(1.0, 3.0, 3.0), epsilon = 1.0e-12);
            assert_abs_diff_eq!(pose.inverse_transform_point(p), Vec3::new(1.0, 0.0, 0.0), epsilon = 1.0e-12);
            let inv = pose.inverse();
            assert_abs_diff_eq!(inv.transform_point(p), Vec3::new(1.0, 0.0, 0.0), epsilon = 1.0e-12);
            let local = Pose::from_position(Vec3::new(0.0, 1.0, 0.0));
            let world = pose.compose(&local);
            assert_abs_diff_eq!(world.p, Vec3::new(0.0, 2.0, 3.0), epsilon = 1.0e-12);
            assert_abs_diff_eq!(pose.axis(0), Vec3::new(0.0, 1.0, 0.0), epsilon = 1.0e-12);
        }

        #[test]
        fn test_geom_ids_unique() {
            let a = Geom::sphere(1.0, Pose::identity());
            let b = Geom::sphere(1.0, Pose::identity());
            assert_ne!(a.id(), b.id());
        }

        #[test]
        fn test_aabb_cache() {
            let mut g = Geom::cuboid(Vec3::new(1.0, 2.0, 3.0), Pose::identity());
            assert!(g.is_dirty());
            let aabb = g.aabb();
            assert!(!g.is_dirty());
            assert_abs_diff_eq!(aabb.r, Vec3::new(1.0, 2.0, 3.0));
            g.set_position(Vec3::new(5.0, 0.0, 0.0));
            assert!(g.is_dirty());
            assert_abs_diff_eq!(g.aabb().c, Vec3::new(5.0, 0.0, 0.0));
            g.set_rotation(Matrix3::from_angle_z(Rad::from(Deg(90.0))));
            assert_abs_diff_eq!(g.aabb().r, Vec3::new(2.0, 1.0, 3.0), epsilon = 1.0e-12);
            if let Shape::Cuboid(ref mut b) = g.shape_mut() {
                b.half_extents = Vec3::new(1.0, 1.0, 1.0);
            }
            assert!(g.is_dirty());
            assert_abs_diff_eq!(g.aabb().r, Vec3::new(1.0, 1.0, 1.0), epsilon = 1.0e-12);
        }

        #[test]
        fn test_shape_aabbs() {
            let cyl = Geom::cylinder(0.5, 2.0, Pose::identity());
            assert_abs_diff_eq!(cyl.aabb().r, Vec3::new(0.5, 0.5, 1.0), epsilon = 1.0e-12);
            let cap = Geom::capsule(0.5, 2.0, Pose::identity());
            assert_abs_diff_eq!(cap.aabb().r, Vec3::new(0.5, 0.5, 1.5), epsilon = 1.0e-12);
            let ray = Geom::ray(
                Ray::new(3.0),
                Pose::new(
                    Vec3::new(0.0, 0.0, 1.0),
                    Matrix3::from_angle_x(Rad::from(Deg(180.0))),
                ),
            );
            let aabb = ray.aabb();
            assert_abs_diff_eq!(aabb.min(), Vec3::new(0.0, 0.0, -2.0), epsilon = 1.0e-12);
            assert_abs_diff_eq!(aabb.max(), Vec3::new(0.0, 0.0, 1.0), epsilon = 1.0e-12);
            let plane = Geom::plane(Vec3::new(0.0, 0.0, 2.0), 2.0);
            match plane.shape() {
                Shape::Plane(p) => {
                    assert_abs_diff_eq!(p.n, Vec3::unit_z());
                    assert_abs_diff_eq!(p.d, 1.0);
                }
                _ => unreachable!(),
            }
            assert!(plane.aabb().r.x.is_infinite());
            assert_eq!(Mat3::identity(), plane.pose().r);
        }
    }
}
