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

//! Error types.
//!
//! Only malformed mesh input and cache allocation can fail. Degenerate
//! geometry and full contact buffers are not errors.

use thiserror::Error;

/// Errors raised while building triangle mesh data from raw buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    #[error("mesh has no vertices")]
    NoVertices,

    #[error("mesh has no triangles")]
    NoTriangles,

    #[error("{buffer} stride of {stride} bytes cannot hold an element of {needed} bytes")]
    StrideTooSmall {
        buffer: &'static str,
        stride: usize,
        needed: usize,
    },

    #[error("{buffer} buffer holds {len} bytes but {needed} are required")]
    BufferTooShort {
        buffer: &'static str,
        len: usize,
        needed: usize,
    },

    #[error("triangle {triangle} references vertex {index} but only {vertex_count} vertices exist")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
}

/// Errors raised by the per-thread collider cache lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("failed to allocate collider cache storage")]
    Allocation(#[from] std::collections::TryReserveError),

    #[error("thread cache cleanup requested for a {0:?} cache")]
    NotManual(crate::cache::CacheKind),

    #[error("thread cache is already in use on this thread")]
    Busy,

    #[error("thread cache is unavailable during thread teardown")]
    Unavailable,
}

/// Umbrella error for the crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid mesh: {0}")]
    Mesh(#[from] MeshError),

    #[error("collider cache: {0}")]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, Error>;
