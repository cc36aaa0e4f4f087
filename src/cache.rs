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

//! Per-thread collider state.
//!
//! Every thread that runs collision queries owns a `ColliderCache`: scratch
//! storage, the hashed contact set used by mesh against mesh queries, and
//! the temporal coherence tables that remember which triangles a sphere or
//! box overlapped last time. A cache is never shared between threads.
//!
//! Callers can own a cache explicitly and pass it to `collide_with`, or let
//! `collide` use the one the registry keeps for the calling thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::bounds::{BoundingSphere, Contains, OBB};
use crate::config::CollisionConfig;
use crate::contact_set::ContactSet;
use crate::error::CacheError;
use crate::geom::GeomId;
use crate::math::Real;
use crate::mesh::TriMeshData;

/// How a thread's cache is released.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKind {
    /// Released when the thread exits.
    Automatic,
    /// Released by an explicit `cleanup_for_thread` call.
    Manual,
}

impl Default for CacheKind {
    fn default() -> Self {
        CacheKind::Automatic
    }
}

/// Which pair a temporal coherence entry belongs to: the mesh geom and the
/// geom queried against it.
pub type TcKey = (GeomId, GeomId);

#[derive(Clone, Debug)]
struct SphereTc {
    generation: u64,
    last_used: u64,
    volume: BoundingSphere,
    triangles: Vec<u32>,
}

#[derive(Clone, Debug)]
struct BoxTc {
    generation: u64,
    last_used: u64,
    volume: OBB,
    triangles: Vec<u32>,
}

/// Collider state owned by one thread.
#[derive(Debug)]
pub struct ColliderCache {
    config: CollisionConfig,
    pub(crate) contact_set: ContactSet,
    sphere_tc: HashMap<TcKey, SphereTc>,
    box_tc: HashMap<TcKey, BoxTc>,
    // Coherence queries run so far, the clock entry ages are measured in.
    queries: u64,
    next_sweep: u64,
    scratch: Vec<Vec<u32>>,
}

impl Default for ColliderCache {
    fn default() -> Self {
        ColliderCache::new()
    }
}

impl ColliderCache {
    pub fn new() -> Self {
        ColliderCache::with_config(CollisionConfig::default())
    }

    pub fn with_config(config: CollisionConfig) -> Self {
        ColliderCache {
            config,
            contact_set: ContactSet::new(),
            sphere_tc: HashMap::new(),
            box_tc: HashMap::new(),
            queries: 0,
            next_sweep: 0,
            scratch: Vec::new(),
        }
    }

    /// Creates a cache with its working storage reserved up front, failing
    /// instead of aborting if the memory is not available.
    pub fn try_new(config: CollisionConfig) -> Result<Self, CacheError> {
        let mut cache = ColliderCache::with_config(config);
        cache.sphere_tc.try_reserve(16)?;
        cache.box_tc.try_reserve(16)?;
        let mut triangles = Vec::new();
        triangles.try_reserve(64)?;
        cache.scratch.try_reserve(2)?;
        cache.scratch.push(triangles);
        Ok(cache)
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Number of live temporal coherence entries.
    pub fn tc_entries(&self) -> usize {
        self.sphere_tc.len() + self.box_tc.len()
    }

    /// Forgets every temporal coherence entry of `mesh`.
    pub fn clear_tc(&mut self, mesh: GeomId) {
        self.sphere_tc.retain(|k, _| k.0 != mesh);
        self.box_tc.retain(|k, _| k.0 != mesh);
    }

    /// Forgets every temporal coherence entry `geom` takes part in, as the
    /// mesh or as the other shape.
    pub fn forget_geom(&mut self, geom: GeomId) {
        self.sphere_tc.retain(|k, _| k.0 != geom && k.1 != geom);
        self.box_tc.retain(|k, _| k.0 != geom && k.1 != geom);
    }

    pub fn clear_all_tc(&mut self) {
        self.sphere_tc.clear();
        self.box_tc.clear();
    }

    /// Drops the temporal coherence entries unused for more than
    /// `tc_max_age` queries. Returns how many were dropped.
    pub fn evict_stale_tc(&mut self) -> usize {
        let before = self.tc_entries();
        let (now, max_age) = (self.queries, self.config.tc_max_age);
        self.sphere_tc.retain(|_, e| now - e.last_used <= max_age);
        self.box_tc.retain(|_, e| now - e.last_used <= max_age);
        let evicted = before - self.tc_entries();
        if evicted > 0 {
            log::debug!("evicted {} stale coherence entries", evicted);
        }
        evicted
    }

    /// Advances the query clock, sweeping stale entries at most once every
    /// `tc_max_age` queries while the tables are large.
    fn tick(&mut self) -> u64 {
        self.queries += 1;
        if self.queries >= self.next_sweep && self.tc_entries() >= self.config.tc_sweep_threshold {
            self.evict_stale_tc();
            self.next_sweep = self.queries + self.config.tc_max_age.max(1);
        }
        self.queries
    }

    /// A cleared triangle list. Hand it back with `recycle`.
    pub(crate) fn take_scratch(&mut self) -> Vec<u32> {
        let mut v = self.scratch.pop().unwrap_or_default();
        v.clear();
        v
    }

    pub(crate) fn recycle(&mut self, v: Vec<u32>) {
        self.scratch.push(v);
    }

    /// Collects the triangles of `data` that may touch `volume`, a sphere in
    /// mesh space. With a key the query goes through the temporal coherence
    /// table: if the cached sphere still encloses `volume` and the mesh has
    /// not been refit since, the cached triangles are reused.
    pub(crate) fn sphere_candidates(
        &mut self,
        key: Option<TcKey>,
        data: &TriMeshData,
        volume: &BoundingSphere,
        out: &mut Vec<u32>,
    ) {
        out.clear();
        let key = match key {
            Some(key) => key,
            None => {
                data.query(volume, out);
                return;
            }
        };
        let now = self.tick();
        let generation = data.generation();
        if let Some(entry) = self.sphere_tc.get_mut(&key) {
            entry.last_used = now;
            if entry.generation == generation && entry.volume.contains(volume) {
                log::trace!("sphere coherence hit for {:?}", key);
                out.extend_from_slice(&entry.triangles);
                return;
            }
        }
        let fat = BoundingSphere {
            c: volume.c,
            r: volume.r * (1.0 + self.config.sphere_fat_margin),
        };
        data.query(&fat, out);
        let entry = self.sphere_tc.entry(key).or_insert_with(|| SphereTc {
            generation,
            last_used: now,
            volume: fat,
            triangles: Vec::new(),
        });
        entry.generation = generation;
        entry.volume = fat;
        entry.triangles.clear();
        entry.triangles.extend_from_slice(out);
    }

    /// As `sphere_candidates` for a box in mesh space, fattened by
    /// `fat_coeff` before it is cached.
    pub(crate) fn box_candidates(
        &mut self,
        key: Option<TcKey>,
        data: &TriMeshData,
        volume: &OBB,
        fat_coeff: Real,
        out: &mut Vec<u32>,
    ) {
        out.clear();
        let key = match key {
            Some(key) => key,
            None => {
                data.query(volume, out);
                return;
            }
        };
        let now = self.tick();
        let generation = data.generation();
        if let Some(entry) = self.box_tc.get_mut(&key) {
            entry.last_used = now;
            if entry.generation == generation && entry.volume.contains(volume) {
                log::trace!("box coherence hit for {:?}", key);
                out.extend_from_slice(&entry.triangles);
                return;
            }
        }
        let fat = *volume * fat_coeff;
        data.query(&fat, out);
        let entry = self.box_tc.entry(key).or_insert_with(|| BoxTc {
            generation,
            last_used: now,
            volume: fat,
            triangles: Vec::new(),
        });
        entry.generation = generation;
        entry.volume = fat;
        entry.triangles.clear();
        entry.triangles.extend_from_slice(out);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Registry

static USERS: AtomicUsize = AtomicUsize::new(0);
static EPOCH: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct ThreadCaches {
    epoch: u64,
    automatic: Option<ColliderCache>,
    manual: Option<ColliderCache>,
}

impl ThreadCaches {
    fn slot(&mut self, kind: CacheKind) -> &mut Option<ColliderCache> {
        let epoch = EPOCH.load(Ordering::Acquire);
        if self.epoch != epoch {
            // The registry was torn down since this thread last used it.
            self.automatic = None;
            self.manual = None;
            self.epoch = epoch;
        }
        match kind {
            CacheKind::Automatic => &mut self.automatic,
            CacheKind::Manual => &mut self.manual,
        }
    }
}

impl Drop for ThreadCaches {
    fn drop(&mut self) {
        if self.manual.is_some() && self.epoch == EPOCH.load(Ordering::Acquire) {
            log::warn!("manual collider cache dropped at thread exit without cleanup");
        }
    }
}

thread_local! {
    static THREAD_CACHES: RefCell<ThreadCaches> = RefCell::new(ThreadCaches::default());
}

/// Registers a user of the collision subsystem. Returns the number of users.
pub fn open() -> usize {
    let users = USERS.fetch_add(1, Ordering::AcqRel) + 1;
    if users == 1 {
        log::debug!("collider cache registry opened");
    }
    users
}

/// Unregisters a user. When the last user leaves every thread cache is
/// discarded: the calling thread's immediately, other threads' the next
/// time they touch the registry. Returns the number of remaining users.
pub fn close() -> usize {
    let prev = USERS
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |u| Some(u.saturating_sub(1)))
        .unwrap_or(0);
    if prev == 0 {
        log::warn!("collider cache registry closed more times than opened");
        return 0;
    }
    if prev == 1 {
        EPOCH.fetch_add(1, Ordering::AcqRel);
        let _ = THREAD_CACHES.try_with(|caches| {
            if let Ok(mut caches) = caches.try_borrow_mut() {
                caches.slot(CacheKind::Automatic);
            }
        });
        log::debug!("collider cache registry closed");
    }
    prev - 1
}

/// Whether any user has the registry open.
pub fn is_open() -> bool {
    USERS.load(Ordering::Acquire) > 0
}

/// Creates the calling thread's cache of `kind` ahead of its first query.
/// On failure nothing is kept. Does nothing if the cache already exists.
pub fn allocate_for_thread(kind: CacheKind, config: CollisionConfig) -> Result<(), CacheError> {
    THREAD_CACHES.with(|caches| {
        let mut caches = caches.borrow_mut();
        let slot = caches.slot(kind);
        if slot.is_none() {
            *slot = Some(ColliderCache::try_new(config)?);
            log::debug!("created {:?} collider cache for {:?}", kind, std::thread::current().id());
        }
        Ok(())
    })
}

/// Releases the calling thread's manual cache.
pub fn cleanup_for_thread(kind: CacheKind) -> Result<(), CacheError> {
    if kind != CacheKind::Manual {
        return Err(CacheError::NotManual(kind));
    }
    THREAD_CACHES.with(|caches| {
        if caches.borrow_mut().slot(kind).take().is_some() {
            log::debug!("destroyed manual collider cache for {:?}", std::thread::current().id());
        }
    });
    Ok(())
}

/// Whether the calling thread currently holds a cache of `kind`.
pub fn thread_has_cache(kind: CacheKind) -> bool {
    THREAD_CACHES.with(|caches| caches.borrow_mut().slot(kind).is_some())
}

/// Clears the coherence entries of `geom` from the calling thread's caches.
/// Entries held by other threads or by caller owned caches age out instead.
pub(crate) fn forget_geom(geom: GeomId) {
    let _ = THREAD_CACHES.try_with(|caches| {
        if let Ok(mut caches) = caches.try_borrow_mut() {
            for &kind in &[CacheKind::Automatic, CacheKind::Manual] {
                if let Some(cache) = caches.slot(kind) {
                    cache.forget_geom(geom);
                }
            }
        }
    });
}

/// Runs `f` with the calling thread's cache of `kind`, creating it with the
/// default configuration on first use.
///
/// Fails with `CacheError::Busy` when called from within `f`, and with
/// `CacheError::Unavailable` once the thread is tearing down its locals.
pub fn try_with_thread_cache<R, F>(kind: CacheKind, f: F) -> Result<R, CacheError>
where
    F: FnOnce(&mut ColliderCache) -> R,
{
    THREAD_CACHES
        .try_with(|caches| {
            let mut caches = caches.try_borrow_mut().map_err(|_| CacheError::Busy)?;
            let slot = caches.slot(kind);
            if slot.is_none() {
                log::debug!("created {:?} collider cache for {:?}", kind, std::thread::current().id());
            }
            let cache = slot.get_or_insert_with(ColliderCache::new);
            Ok(f(cache))
        })
        .unwrap_or(Err(CacheError::Unavailable))
}

/// As `try_with_thread_cache`.
///
/// # Panics
///
/// Panics if called from within `f` or during thread teardown.
pub fn with_thread_cache<R, F>(kind: CacheKind, f: F) -> R
where
    F: FnOnce(&mut ColliderCache) -> R,
{
    match try_with_thread_cache(kind, f) {
        Ok(r) => r,
        Err(err) => panic!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    mod cache {
        use std::thread;

        use cgmath::{Matrix3, SquareMatrix};

        use crate::bounds::{BoundingSphere, OBB};
        use crate::cache::*;
        use crate::config::CollisionConfig;
        use crate::error::CacheError;
        use crate::collide::{collide, collide_with};
        use crate::geom::{Geom, GeomId, Pose};
        use crate::manifold::ContactFlags;
        use crate::math::Vec3;
        use crate::mesh::{fixtures, TcFlags, TriMesh};

        #[test]
        fn test_box_tc_reuse() {
            let data = fixtures::grid(8, 4.0, 0.0);
            let mut cache = ColliderCache::new();
            let key = (GeomId(100), GeomId(101));
            let mut out = Vec::new();
            let volume = OBB::new(Vec3::new(0.0, 0.0, 0.0), Matrix3::identity(), Vec3::new(0.4, 0.4, 0.4));
            cache.box_candidates(Some(key), &data, &volume, 1.1, &mut out);
            let first = out.clone();
            assert!(!first.is_empty());
            assert_eq!(cache.tc_entries(), 1);

            // A slightly moved box is inside the fattened volume.
            let moved = OBB::new(Vec3::new(0.01, 0.0, 0.0), Matrix3::identity(), Vec3::new(0.4, 0.4, 0.4));
            cache.box_candidates(Some(key), &data, &moved, 1.1, &mut out);
            assert_eq!(out, first);

            // A far box misses and overwrites the entry.
            let far = OBB::new(Vec3::new(3.5, 3.5, 0.0), Matrix3::identity(), Vec3::new(0.1, 0.1, 0.1));
            cache.box_candidates(Some(key), &data, &far, 1.1, &mut out);
            assert_ne!(out, first);
            assert_eq!(cache.tc_entries(), 1);

            cache.clear_tc(GeomId(100));
            assert_eq!(cache.tc_entries(), 0);
        }

        #[test]
        fn test_sphere_tc() {
            let data = fixtures::grid(8, 4.0, 0.0);
            let config = CollisionConfig {
                sphere_fat_margin: 0.5,
                ..CollisionConfig::default()
            };
            let mut cache = ColliderCache::with_config(config);
            let key = (GeomId(7), GeomId(8));
            let mut out = Vec::new();
            let s = BoundingSphere { c: Vec3::new(0.0, 0.0, 0.0), r: 0.5 };
            cache.sphere_candidates(Some(key), &data, &s, &mut out);
            let n = out.len();
            let nudged = BoundingSphere { c: Vec3::new(0.1, 0.0, 0.0), r: 0.5 };
            cache.sphere_candidates(Some(key), &data, &nudged, &mut out);
            assert_eq!(out.len(), n);
            cache.sphere_candidates(None, &data, &nudged, &mut out);
            assert!(out.len() <= n);
            cache.clear_all_tc();
            assert_eq!(cache.tc_entries(), 0);
        }

        #[test]
        fn test_thread_lifecycle() {
            // Holding the registry open keeps other tests from tearing it
            // down underneath this one.
            assert!(open() >= 1);
            assert!(is_open());
            thread::spawn(|| {
                assert!(!thread_has_cache(CacheKind::Manual));
                allocate_for_thread(CacheKind::Manual, CollisionConfig::default()).unwrap();
                assert!(thread_has_cache(CacheKind::Manual));
                with_thread_cache(CacheKind::Manual, |cache| assert_eq!(cache.tc_entries(), 0));
                assert_eq!(
                    cleanup_for_thread(CacheKind::Automatic),
                    Err(CacheError::NotManual(CacheKind::Automatic))
                );
                cleanup_for_thread(CacheKind::Manual).unwrap();
                assert!(!thread_has_cache(CacheKind::Manual));

                with_thread_cache(CacheKind::Automatic, |_| ());
                assert!(thread_has_cache(CacheKind::Automatic));
            })
            .join()
            .unwrap();
            close();
        }

        #[test]
        fn test_stale_entries_evicted() {
            let data = fixtures::grid(8, 4.0, 0.0);
            let mut cache = ColliderCache::new();
            let max_age = cache.config().tc_max_age as usize;
            let mut out = Vec::new();
            let s = BoundingSphere { c: Vec3::new(0.0, 0.0, 0.0), r: 0.5 };
            let busy = (GeomId(1), GeomId(2));
            for i in 0..1000 {
                cache.sphere_candidates(Some((GeomId(1), GeomId(1000 + i))), &data, &s, &mut out);
                cache.sphere_candidates(Some(busy), &data, &s, &mut out);
                assert!(cache.tc_entries() <= 2 * max_age + 2);
            }

            // The pair queried every time survives every sweep.
            let before = cache.tc_entries();
            cache.forget_geom(GeomId(2));
            assert_eq!(cache.tc_entries(), before - 1);
        }

        #[test]
        fn test_dropped_geoms_forgotten() {
            thread::spawn(|| {
                let tc = TcFlags {
                    sphere: true,
                    ..TcFlags::default()
                };
                let mesh = Geom::trimesh(TriMesh::new(fixtures::grid(8, 4.0, 0.0)).with_tc(tc), Pose::identity());
                let mut owned = ColliderCache::new();
                for _ in 0..1000 {
                    let sphere = Geom::sphere(0.5, Pose::from_position(Vec3::new(0.0, 0.0, 0.4)));
                    assert!(!collide(&mesh, &sphere, ContactFlags::with_capacity(4)).is_empty());
                    collide_with(&mesh, &sphere, ContactFlags::with_capacity(4), &mut owned);
                }
                with_thread_cache(CacheKind::Automatic, |cache| assert_eq!(cache.tc_entries(), 0));
                assert!(owned.tc_entries() <= 2 * owned.config().tc_max_age as usize + 2);
            })
            .join()
            .unwrap();
        }

        #[test]
        fn test_reentrant_access() {
            let inner = with_thread_cache(CacheKind::Automatic, |_| {
                try_with_thread_cache(CacheKind::Automatic, |cache| cache.tc_entries())
            });
            assert_eq!(inner, Err(CacheError::Busy));
            assert_eq!(try_with_thread_cache(CacheKind::Automatic, |_| 3), Ok(3));
        }

        #[test]
        fn test_try_new() {
            let cache = ColliderCache::try_new(CollisionConfig::default()).unwrap();
            assert_eq!(cache.config().box_fat_coeff, 1.1);
        }
    }
}
