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

//! Triangle mesh data and its spatial index.
//!
//! Mesh data is built once from raw vertex and index buffers, optionally
//! preprocessed to find the significant edges and vertices of each triangle,
//! and then shared read-only between any number of trimesh geoms. Vertex
//! motion is handled by rewriting the vertex buffer and calling `refit`.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use cgmath::InnerSpace;
use serde::{Deserialize, Serialize};

use crate::bounds::{BoundedBy, Overlaps, AABB};
use crate::bvh::BVH;
use crate::error::MeshError;
use crate::geom::{GeomId, Pose};
use crate::math::{safe_normalize, Real, Triangle, Vec3};

bitflags! {
    /// Marks which edges and vertices of a triangle may produce contacts.
    ///
    /// Edge `i` runs from vertex `i` to vertex `(i + 1) % 3`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct UseFlags: u8 {
        const EDGE0 = 0x01;
        const EDGE1 = 0x02;
        const EDGE2 = 0x04;
        const VERT0 = 0x08;
        const VERT1 = 0x10;
        const VERT2 = 0x20;

        const ALL = 0xFF;
    }
}

impl UseFlags {
    #[inline]
    pub fn edge(i: usize) -> UseFlags {
        UseFlags::from_bits_retain(0x01 << i)
    }

    #[inline]
    pub fn vert(i: usize) -> UseFlags {
        UseFlags::from_bits_retain(0x08 << i)
    }
}

/// Storage precision of a raw vertex buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexPrecision {
    Single,
    Double,
}

impl VertexPrecision {
    /// Size in bytes of one packed vertex position.
    pub fn vertex_size(self) -> usize {
        match self {
            VertexPrecision::Single => 3 * 4,
            VertexPrecision::Double => 3 * 8,
        }
    }
}

/// A raw vertex buffer. Each vertex starts `stride` bytes after the previous
/// one with three packed coordinates in native byte order; anything after
/// them within the stride is ignored.
#[derive(Clone)]
pub struct VertexBuffer {
    bytes: Vec<u8>,
    stride: usize,
    count: usize,
    precision: VertexPrecision,
}

impl VertexBuffer {
    pub fn new(
        bytes: Vec<u8>,
        stride: usize,
        count: usize,
        precision: VertexPrecision,
    ) -> Result<Self, MeshError> {
        if count == 0 {
            return Err(MeshError::NoVertices);
        }
        let size = precision.vertex_size();
        if stride < size {
            return Err(MeshError::StrideTooSmall {
                buffer: "vertex",
                stride,
                needed: size,
            });
        }
        let needed = (count - 1) * stride + size;
        if bytes.len() < needed {
            return Err(MeshError::BufferTooShort {
                buffer: "vertex",
                len: bytes.len(),
                needed,
            });
        }
        Ok(VertexBuffer {
            bytes,
            stride,
            count,
            precision,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn precision(&self) -> VertexPrecision {
        self.precision
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn get(&self, i: usize) -> Vec3 {
        let off = i * self.stride;
        match self.precision {
            VertexPrecision::Single => {
                let v: [f32; 3] = bytemuck::pod_read_unaligned(&self.bytes[off..off + 12]);
                Vec3::new(v[0] as Real, v[1] as Real, v[2] as Real)
            }
            VertexPrecision::Double => {
                let v: [f64; 3] = bytemuck::pod_read_unaligned(&self.bytes[off..off + 24]);
                Vec3::new(v[0], v[1], v[2])
            }
        }
    }

    pub fn set(&mut self, i: usize, p: Vec3) {
        let off = i * self.stride;
        match self.precision {
            VertexPrecision::Single => {
                let v = [p.x as f32, p.y as f32, p.z as f32];
                self.bytes[off..off + 12].copy_from_slice(bytemuck::bytes_of(&v));
            }
            VertexPrecision::Double => {
                let v = [p.x, p.y, p.z];
                self.bytes[off..off + 24].copy_from_slice(bytemuck::bytes_of(&v));
            }
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// A raw triangle index buffer. Each triangle starts `stride` bytes after the
/// previous one with three packed `u32` indices in native byte order.
#[derive(Clone)]
pub struct IndexBuffer {
    bytes: Vec<u8>,
    stride: usize,
    count: usize,
}

impl IndexBuffer {
    pub fn new(bytes: Vec<u8>, stride: usize, count: usize) -> Result<Self, MeshError> {
        if count == 0 {
            return Err(MeshError::NoTriangles);
        }
        if stride < 12 {
            return Err(MeshError::StrideTooSmall {
                buffer: "index",
                stride,
                needed: 12,
            });
        }
        let needed = (count - 1) * stride + 12;
        if bytes.len() < needed {
            return Err(MeshError::BufferTooShort {
                buffer: "index",
                len: bytes.len(),
                needed,
            });
        }
        Ok(IndexBuffer { bytes, stride, count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn get(&self, tri: usize) -> [u32; 3] {
        let off = tri * self.stride;
        bytemuck::pod_read_unaligned(&self.bytes[off..off + 12])
    }
}

/// Shared triangle mesh data: vertices, triangles, the bounding volume
/// hierarchy over the triangles and the model space bounding box.
pub struct TriMeshData {
    vertices: VertexBuffer,
    indices: IndexBuffer,
    bvh: BVH<AABB, u32>,
    aabb: AABB,
    use_flags: Option<Vec<UseFlags>>,
    generation: u64,
}

impl fmt::Debug for TriMeshData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TriMeshData")
            .field("vertices", &self.vertices.len())
            .field("triangles", &self.indices.len())
            .field("aabb", &self.aabb)
            .field("preprocessed", &self.use_flags.is_some())
            .finish()
    }
}

impl TriMeshData {
    /// Builds the hierarchy and model space bounds. Fails if either buffer is
    /// empty or a triangle references a vertex that does not exist.
    pub fn build(vertices: VertexBuffer, indices: IndexBuffer) -> Result<Self, MeshError> {
        let vertex_count = vertices.len();
        for tri in 0..indices.len() {
            for &index in indices.get(tri).iter() {
                if index as usize >= vertex_count {
                    return Err(MeshError::IndexOutOfRange {
                        triangle: tri,
                        index,
                        vertex_count,
                    });
                }
            }
        }

        let aabb = AABB::from_points((0..vertex_count).map(|i| vertices.get(i)))
            .ok_or(MeshError::NoVertices)?;

        let mut data = TriMeshData {
            bvh: BVH::with_capacity(indices.len()),
            vertices,
            indices,
            aabb,
            use_flags: None,
            generation: 0,
        };
        for tri in 0..data.indices.len() {
            let bounds: AABB = data.local_triangle(tri as u32).bounds();
            data.bvh.insert(&bounds, tri as u32);
        }
        log::debug!(
            "built trimesh data: {} vertices, {} triangles, hierarchy height {}",
            vertex_count,
            data.indices.len(),
            data.bvh.height()
        );
        Ok(data)
    }

    /// Builds from single precision positions and triangle indices.
    pub fn from_f32(vertices: &[[f32; 3]], triangles: &[[u32; 3]]) -> Result<Self, MeshError> {
        let vb = VertexBuffer::new(
            bytemuck::cast_slice(vertices).to_vec(),
            12,
            vertices.len(),
            VertexPrecision::Single,
        )?;
        let ib = IndexBuffer::new(bytemuck::cast_slice(triangles).to_vec(), 12, triangles.len())?;
        TriMeshData::build(vb, ib)
    }

    /// Builds from double precision positions and triangle indices.
    pub fn from_f64(vertices: &[[f64; 3]], triangles: &[[u32; 3]]) -> Result<Self, MeshError> {
        let vb = VertexBuffer::new(
            bytemuck::cast_slice(vertices).to_vec(),
            24,
            vertices.len(),
            VertexPrecision::Double,
        )?;
        let ib = IndexBuffer::new(bytemuck::cast_slice(triangles).to_vec(), 12, triangles.len())?;
        TriMeshData::build(vb, ib)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Model space position of vertex `i`.
    #[inline]
    pub fn vertex(&self, i: u32) -> Vec3 {
        self.vertices.get(i as usize)
    }

    #[inline]
    pub fn triangle_indices(&self, tri: u32) -> [u32; 3] {
        self.indices.get(tri as usize)
    }

    /// Triangle `tri` in model space.
    pub fn local_triangle(&self, tri: u32) -> Triangle {
        let [a, b, c] = self.triangle_indices(tri);
        Triangle::new(self.vertex(a), self.vertex(b), self.vertex(c))
    }

    /// Triangle `tri` placed by `pose`.
    pub fn triangle(&self, tri: u32, pose: &Pose) -> Triangle {
        let t = self.local_triangle(tri);
        Triangle::new(
            pose.transform_point(t.a),
            pose.transform_point(t.b),
            pose.transform_point(t.c),
        )
    }

    /// World space point at barycentric coordinates `(u, v)` of `tri`.
    pub fn point(&self, tri: u32, u: Real, v: Real, pose: &Pose) -> Vec3 {
        self.triangle(tri, pose).point(u, v)
    }

    /// Model space bounding box.
    pub fn model_aabb(&self) -> AABB {
        self.aabb
    }

    /// World space bounding box of the mesh placed by `pose`.
    pub fn world_aabb(&self, pose: &Pose) -> AABB {
        self.aabb.transformed(pose)
    }

    pub fn is_preprocessed(&self) -> bool {
        self.use_flags.is_some()
    }

    /// Significance flags of `tri`. Every feature is significant until the
    /// mesh has been preprocessed.
    #[inline]
    pub fn use_flags(&self, tri: u32) -> UseFlags {
        match self.use_flags {
            Some(ref flags) => flags[tri as usize],
            None => UseFlags::ALL,
        }
    }

    /// Bumped by every refit; cached queries against older geometry are
    /// stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bvh(&self) -> &BVH<AABB, u32> {
        &self.bvh
    }

    /// Collects the triangles whose bounds overlap `query`, a volume in model
    /// space, into `out`. Returns whether any did.
    pub fn query<Q: Overlaps<AABB>>(&self, query: &Q, out: &mut Vec<u32>) -> bool {
        self.bvh.query(query, |tri| out.push(tri))
    }

    /// Triangles overlapping a model space box.
    pub fn query_aabb(&self, aabb: &AABB) -> Vec<u32> {
        let mut out = Vec::new();
        self.query(aabb, &mut out);
        out
    }

    /// Moves vertex `i`. The hierarchy is stale until `refit` is called.
    pub fn set_vertex(&mut self, i: u32, p: Vec3) {
        self.vertices.set(i as usize, p);
    }

    /// Direct access to the raw vertex bytes, for skinning in place.
    pub fn vertex_bytes_mut(&mut self) -> &mut [u8] {
        self.vertices.bytes_mut()
    }

    /// Updates every bound after the vertices moved. The tree topology and
    /// the significance flags are left untouched.
    pub fn refit(&mut self) {
        let vertices = &self.vertices;
        let indices = &self.indices;
        self.bvh.refit(|tri| {
            let [a, b, c] = indices.get(tri as usize);
            Triangle::new(
                vertices.get(a as usize),
                vertices.get(b as usize),
                vertices.get(c as usize),
            )
            .bounds()
        });
        if let Some(aabb) = AABB::from_points((0..vertices.len()).map(|i| vertices.get(i))) {
            self.aabb = aabb;
        }
        self.generation += 1;
    }

    /// Computes the significance flags of every triangle. Calling it again
    /// has no effect.
    ///
    /// Boundary edges are significant along with their vertices. A shared
    /// edge is significant on its first triangle only when it forms a convex
    /// ridge; flat and concave edges are not, and the vertices of concave
    /// edges lose their significance on every triangle.
    pub fn preprocess(&mut self) {
        if self.use_flags.is_some() {
            return;
        }

        let num_tris = self.indices.len();
        let mut flags = vec![UseFlags::empty(); num_tris];
        let mut records = Vec::with_capacity(num_tris * 3);
        for tri in 0..num_tris {
            let idx = self.indices.get(tri);
            for edge in 0..3 {
                records.push(EdgeRecord::new(tri as u32, edge, &idx));
            }
        }

        // Edges sharing the same vertices end up next to each other.
        records.sort_by_key(|r| (r.v1, r.v2));

        let mut concave = 0;
        let mut i = 0;
        while i < records.len() {
            let rec1 = records[i];
            let twin = records
                .get(i + 1)
                .filter(|rec2| rec2.v1 == rec1.v1 && rec2.v2 == rec1.v2)
                .copied();
            match twin {
                Some(rec2) => {
                    let tri1 = self.local_triangle(rec1.tri);
                    let tri2 = self.local_triangle(rec2.tri);
                    let normal = safe_normalize((tri1.c - tri1.b).cross(tri1.a - tri1.b));
                    let dir = safe_normalize(
                        tri2.vertex(rec2.opposite()) - tri1.vertex(rec1.opposite()),
                    );
                    match (normal, dir) {
                        (Some(n), Some(d)) if n.dot(d) >= CONCAVE_THRESHOLD => {
                            records[i].concave = true;
                            concave += 1;
                        }
                        _ => flags[rec1.tri as usize] |= rec1.flags(),
                    }
                    // Skip the twin.
                    i += 2;
                }
                None => {
                    flags[rec1.tri as usize] |= rec1.flags();
                    i += 1;
                }
            }
        }

        for er in records.iter().filter(|r| r.concave) {
            for cur in records.iter() {
                if cur.v1 == er.v1 || cur.v1 == er.v2 {
                    flags[cur.tri as usize].remove(cur.vert1);
                }
                if cur.v2 == er.v1 || cur.v2 == er.v2 {
                    flags[cur.tri as usize].remove(cur.vert2);
                }
            }
        }

        log::debug!(
            "preprocessed trimesh: {} triangles, {} flat or concave edges",
            num_tris,
            concave
        );
        self.use_flags = Some(flags);
    }
}

/// Slightly negative so that rounding errors on flat edges count as flat.
const CONCAVE_THRESHOLD: Real = -0.000001;

#[derive(Copy, Clone, Debug)]
struct EdgeRecord {
    v1: u32,
    v2: u32,
    tri: u32,
    edge: UseFlags,
    vert1: UseFlags,
    vert2: UseFlags,
    concave: bool,
}

impl EdgeRecord {
    fn new(tri: u32, edge: usize, idx: &[u32; 3]) -> Self {
        let next = (edge + 1) % 3;
        let mut rec = EdgeRecord {
            v1: idx[edge],
            v2: idx[next],
            tri,
            edge: UseFlags::edge(edge),
            vert1: UseFlags::vert(edge),
            vert2: UseFlags::vert(next),
            concave: false,
        };
        if rec.v1 > rec.v2 {
            std::mem::swap(&mut rec.v1, &mut rec.v2);
            std::mem::swap(&mut rec.vert1, &mut rec.vert2);
        }
        rec
    }

    fn flags(&self) -> UseFlags {
        self.edge | self.vert1 | self.vert2
    }

    /// Index within the triangle of the vertex not on this edge.
    fn opposite(&self) -> usize {
        let both = self.vert1 | self.vert2;
        if both == UseFlags::VERT0 | UseFlags::VERT1 {
            2
        } else if both == UseFlags::VERT1 | UseFlags::VERT2 {
            0
        } else {
            1
        }
    }
}

/// Enables temporal coherence per kind of query shape.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcFlags {
    pub sphere: bool,
    /// Used by boxes and cylinders.
    pub cuboid: bool,
    pub capsule: bool,
}

pub type TriangleFilter = Arc<dyn Fn(GeomId, u32) -> bool + Send + Sync>;
pub type RayFilter = Arc<dyn Fn(GeomId, u32, Real, Real) -> bool + Send + Sync>;
pub type TriangleMerge = Arc<dyn Fn(i32, i32) -> i32 + Send + Sync>;

/// Optional per-geom hooks consulted during trimesh queries.
#[derive(Clone, Default)]
pub struct TriMeshCallbacks {
    /// Called with the other geom and a candidate triangle; returning false
    /// skips the triangle.
    pub triangle: Option<TriangleFilter>,
    /// Called with the ray geom, the triangle and the barycentric hit
    /// coordinates; returning false discards the hit.
    pub ray: Option<RayFilter>,
    /// Picks the feature id reported when contacts of two triangles are
    /// merged into one. Without it the merged id is -1.
    pub merge: Option<TriangleMerge>,
}

impl fmt::Debug for TriMeshCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TriMeshCallbacks")
            .field("triangle", &self.triangle.is_some())
            .field("ray", &self.ray.is_some())
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

/// The trimesh shape: shared mesh data plus per-geom settings.
#[derive(Clone, Debug)]
pub struct TriMesh {
    pub data: Arc<TriMeshData>,
    pub tc: TcFlags,
    pub callbacks: TriMeshCallbacks,
}

impl TriMesh {
    pub fn new(data: Arc<TriMeshData>) -> Self {
        TriMesh {
            data,
            tc: TcFlags::default(),
            callbacks: TriMeshCallbacks::default(),
        }
    }

    pub fn with_tc(mut self, tc: TcFlags) -> Self {
        self.tc = tc;
        self
    }

    /// The mesh data for deforming in place, or `None` while another mesh
    /// shares it. Call `TriMeshData::refit` once the vertices have moved:
    /// the new generation invalidates the coherence entries cached for the
    /// old shape. Shared data has to be rebuilt and swapped in instead.
    pub fn data_mut(&mut self) -> Option<&mut TriMeshData> {
        Arc::get_mut(&mut self.data)
    }

    pub(crate) fn accepts(&self, other: GeomId, tri: u32) -> bool {
        match self.callbacks.triangle {
            Some(ref filter) => filter(other, tri),
            None => true,
        }
    }
}
