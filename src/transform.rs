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

use crate::bounds::AABB;
use crate::cache::ColliderCache;
use crate::collide::dispatch;
use crate::geom::{Geom, Pose, Posed};
use crate::manifold::ContactBuffer;

/// A shape placed at a fixed offset from the geom that owns it.
///
/// The inner geom's pose is read as relative to the wrapper. Queries collide
/// the inner shape at the composed pose. With `info_mode` set, contacts name
/// the wrapper instead of the inner geom.
#[derive(Debug)]
pub struct Transform {
    inner: Box<Geom>,
    pub info_mode: bool,
}

impl Transform {
    pub fn new(inner: Geom) -> Self {
        Transform {
            inner: Box::new(inner),
            info_mode: false,
        }
    }

    pub fn with_info_mode(mut self, info_mode: bool) -> Self {
        self.info_mode = info_mode;
        self
    }

    pub fn inner(&self) -> &Geom {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Geom {
        &mut self.inner
    }

    pub fn into_inner(self) -> Geom {
        *self.inner
    }

    /// World pose of the inner shape when the wrapper sits at `outer`.
    pub fn effective_pose(&self, outer: &Pose) -> Pose {
        outer.compose(self.inner.pose())
    }

    pub fn aabb(&self, outer: &Pose) -> AABB {
        self.inner.shape().aabb(&self.effective_pose(outer))
    }

    fn placed(&self, outer: &Pose) -> Posed<'_> {
        Posed {
            id: self.inner.id(),
            shape: self.inner.shape(),
            pose: self.effective_pose(outer),
        }
    }
}

/// Collides a transform wrapper (`a`) with any geom by colliding its inner
/// shape at the effective pose.
pub fn transform_any(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let transform = a.transform();
    let inner = transform.placed(&a.pose);
    let start = buf.len();
    let n = dispatch(&inner, b, buf, cache);
    if transform.info_mode {
        buf.remap_g1(start, inner.id, a.id);
    }
    n
}

#[cfg(test)]
mod tests {
    mod transform {
        use approx::assert_abs_diff_eq;
        use cgmath::{Deg, Matrix3, Rad};

        use crate::cache::ColliderCache;
        use crate::geom::{Geom, Pose};
        use crate::manifold::ContactBuffer;
        use crate::math::Vec3;
        use crate::transform::*;

        fn wrapped(info_mode: bool) -> Geom {
            let inner = Geom::sphere(0.5, Pose::from_position(Vec3::new(1.0, 0.0, 0.0)));
            Geom::transform(
                Transform::new(inner).with_info_mode(info_mode),
                Pose::new(Vec3::new(0.0, 0.0, 0.0), Matrix3::from_angle_z(Rad::from(Deg(90.0)))),
            )
        }

        #[test]
        fn test_effective_pose_and_aabb() {
            let geom = wrapped(false);
            let aabb = geom.aabb();
            assert_abs_diff_eq!(aabb.c, Vec3::new(0.0, 1.0, 0.0), epsilon = 1.0e-12);
            assert_abs_diff_eq!(aabb.r, Vec3::new(0.5, 0.5, 0.5), epsilon = 1.0e-12);
        }

        #[test]
        fn test_info_mode() {
            let other = Geom::sphere(0.5, Pose::from_position(Vec3::new(0.0, 1.8, 0.0)));
            for &info_mode in [false, true].iter() {
                let geom = wrapped(info_mode);
                let inner_id = match geom.shape() {
                    crate::geom::Shape::Transform(t) => t.inner().id(),
                    _ => unreachable!(),
                };
                let mut buf = ContactBuffer::with_capacity(4);
                let mut cache = ColliderCache::new();
                let n = transform_any(&geom.posed(), &other.posed(), &mut buf, &mut cache);
                assert_eq!(n, 1);
                let c = buf.contacts()[0];
                assert_abs_diff_eq!(c.depth, 0.2, epsilon = 1.0e-9);
                assert_abs_diff_eq!(c.normal, Vec3::new(0.0, -1.0, 0.0), epsilon = 1.0e-9);
                assert_eq!(c.g2, other.id());
                if info_mode {
                    assert_eq!(c.g1, geom.id());
                } else {
                    assert_eq!(c.g1, inner_id);
                }
            }
        }
    }
}
