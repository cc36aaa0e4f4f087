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

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::CacheKind;
use crate::geom::{Geom, Pose, Shape};
use crate::math::Real;
use crate::mesh::{TcFlags, TriMesh, TriMeshData};

/// Tunables of the collider cache and defaults for new geoms.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Scale applied to a box before its triangle query is cached. A larger
    /// volume survives more motion before it has to be queried again.
    pub box_fat_coeff: Real,
    pub capsule_fat_coeff: Real,
    pub cylinder_fat_coeff: Real,
    /// Relative growth of a cached sphere query.
    pub sphere_fat_margin: Real,
    /// Coherence queries after which an unused entry may be evicted.
    pub tc_max_age: u64,
    /// Entry count below which no eviction sweep runs.
    pub tc_sweep_threshold: usize,
    /// Temporal coherence settings given to trimeshes built from this config.
    pub default_tc: TcFlags,
    /// Cache kind given to geoms built from this config.
    pub cache_kind: CacheKind,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig {
            box_fat_coeff: 1.1,
            capsule_fat_coeff: 1.0,
            cylinder_fat_coeff: 1.0,
            sphere_fat_margin: 0.0,
            tc_max_age: 64,
            tc_sweep_threshold: 64,
            default_tc: TcFlags::default(),
            cache_kind: CacheKind::default(),
        }
    }
}

impl CollisionConfig {
    pub fn trimesh(&self, data: Arc<TriMeshData>) -> TriMesh {
        TriMesh::new(data).with_tc(self.default_tc)
    }

    pub fn geom(&self, shape: Shape, pose: Pose) -> Geom {
        Geom::new(shape, pose).with_cache_kind(self.cache_kind)
    }
}

#[cfg(test)]
mod tests {
    mod config {
        use crate::cache::CacheKind;
        use crate::config::CollisionConfig;
        use crate::geom::{Pose, Shape, Sphere};
        use crate::mesh::{fixtures, TcFlags};

        #[test]
        fn test_defaults() {
            let config = CollisionConfig::default();
            assert_eq!(config.box_fat_coeff, 1.1);
            assert_eq!(config.capsule_fat_coeff, 1.0);
            assert_eq!(config.cylinder_fat_coeff, 1.0);
            assert_eq!(config.tc_max_age, 64);
            assert_eq!(config.tc_sweep_threshold, 64);
            assert_eq!(config.default_tc, TcFlags::default());
            assert_eq!(config.cache_kind, CacheKind::Automatic);
        }

        #[test]
        fn test_builders() {
            let config = CollisionConfig {
                default_tc: TcFlags {
                    sphere: true,
                    cuboid: true,
                    capsule: false,
                },
                cache_kind: CacheKind::Manual,
                ..CollisionConfig::default()
            };
            let mesh = config.trimesh(fixtures::square(1.0, 0.0));
            assert!(mesh.tc.sphere && mesh.tc.cuboid && !mesh.tc.capsule);
            let geom = config.geom(Shape::Sphere(Sphere { radius: 1.0 }), Pose::identity());
            assert_eq!(geom.cache_kind(), CacheKind::Manual);
        }
    }
}
