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

//! Cylinder against box.
//!
//! The separating axis search covers the box faces, the cylinder axis and
//! its cross products with the box axes, one axis per box vertex, and one
//! axis per box edge and cap circle. The winning axis decides the clipping:
//! axes far from the cylinder axis clip the cylinder's side line against the
//! box, the others clip the nearest box face against the cap.

use cgmath::{InnerSpace, Zero};

use crate::cache::ColliderCache;
use crate::clip::{clip_polygon, clip_segment, ClipPolygon};
use crate::geom::{GeomId, Posed};
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::math::{abs_vec, Mat3, Plane, Real, Vec3};

/// Number of sides of the polygon standing in for a cap circle.
pub(crate) const CYLINDER_SEGMENTS: usize = 8;

/// Above this alignment between the contact normal and the cylinder axis the
/// contact is on a cap.
pub(crate) const CAP_ALIGNMENT: Real = 0.9;

/// Box vertex pairs forming the twelve edges.
const BOX_EDGES: [(usize, usize); 12] = [
    (1, 0),
    (1, 3),
    (2, 3),
    (2, 0),
    (4, 1),
    (4, 7),
    (0, 7),
    (5, 3),
    (5, 6),
    (2, 6),
    (4, 5),
    (6, 7),
];

/// Inward facing normals of the sides of the cap polygon, in the cylinder's
/// local frame.
pub(crate) fn cap_side_normals() -> [Vec3; CYLINDER_SEGMENTS] {
    let mut out = [Vec3::zero(); CYLINDER_SEGMENTS];
    let step = std::f64::consts::PI / CYLINDER_SEGMENTS as Real;
    let mut angle = step;
    for n in out.iter_mut() {
        *n = Vec3::new(-angle.cos(), -angle.sin(), 0.0);
        angle += step * 2.0;
    }
    out
}

struct CylinderBox {
    cyl_pos: Vec3,
    cyl_rot: Mat3,
    cyl_axis: Vec3,
    radius: Real,
    length: Real,

    box_pos: Vec3,
    box_rot: Mat3,
    half: Vec3,
    vertices: [Vec3; 8],

    diff: Vec3,
    normal: Vec3,
    best_depth: Real,
    best_rb: Real,
    best_rc: Real,
    best_axis: usize,
}

impl CylinderBox {
    fn new(cylinder: &Posed, cuboid: &Posed) -> Self {
        let shape = cylinder.cylinder();
        let half = cuboid.cuboid().half_extents;
        let local = [
            Vec3::new(-half.x, half.y, -half.z),
            Vec3::new(half.x, half.y, -half.z),
            Vec3::new(-half.x, -half.y, -half.z),
            Vec3::new(half.x, -half.y, -half.z),
            Vec3::new(half.x, half.y, half.z),
            Vec3::new(half.x, -half.y, half.z),
            Vec3::new(-half.x, -half.y, half.z),
            Vec3::new(-half.x, half.y, half.z),
        ];
        let mut vertices = [Vec3::zero(); 8];
        for (v, l) in vertices.iter_mut().zip(local.iter()) {
            *v = cuboid.pose.transform_point(*l);
        }
        CylinderBox {
            cyl_pos: cylinder.pose.p,
            cyl_rot: cylinder.pose.r,
            cyl_axis: cylinder.pose.axis(2),
            radius: shape.radius,
            length: shape.length,
            box_pos: cuboid.pose.p,
            box_rot: cuboid.pose.r,
            half,
            vertices,
            diff: cylinder.pose.p - cuboid.pose.p,
            normal: Vec3::zero(),
            best_depth: Real::INFINITY,
            best_rb: 0.0,
            best_rc: 0.0,
            best_axis: 0,
        }
    }

    fn in_box_frame(&self, v: Vec3) -> Vec3 {
        Vec3::new(self.box_rot.x.dot(v), self.box_rot.y.dot(v), self.box_rot.z.dot(v))
    }

    /// Projects both shapes on `axis`. Returns false if it separates them;
    /// axes too short to normalize never do.
    fn test_axis(&mut self, axis: Vec3, id: usize) -> bool {
        let len = axis.magnitude();
        if len < 1.0e-5 {
            return true;
        }
        let n = axis / len;

        let dot = self.cyl_axis.dot(n);
        let rc = if dot.abs() > 1.0 {
            self.length * 0.5
        } else {
            (dot * self.length * 0.5).abs() + self.radius * (1.0 - dot * dot).sqrt()
        };
        let rb = abs_vec(self.in_box_frame(n)).dot(self.half);

        let d = self.diff.dot(n);
        let depth = rc + rb;
        if d.abs() > depth {
            return false;
        }
        let depth = depth - d.abs();
        if depth < self.best_depth {
            self.best_depth = depth;
            self.best_axis = id;
            self.best_rb = rb;
            self.best_rc = rc;
            // Keep the normal pointing from the cylinder into the box.
            self.normal = if d > 0.0 { -n } else { n };
        }
        true
    }

    /// Tests the axis perpendicular to a box edge and to the tangent of the
    /// cap circle centered at `center` where the edge line crosses the cap
    /// plane.
    fn test_edge_circle_axis(&mut self, center: Vec3, v0: Vec3, v1: Vec3, id: usize) -> bool {
        let dir = match (v1 - v0).magnitude() {
            len if len > 0.0 => (v1 - v0) / len,
            _ => return true,
        };
        let dot2 = dir.dot(self.cyl_axis);
        if dot2.abs() < 1.0e-5 {
            // An edge parallel to the cap plane cannot give a new axis.
            return true;
        }
        let dot1 = (center - v0).dot(self.cyl_axis);
        let point = v0 + dir * (dot1 / dot2);
        let tangent = (center - point).cross(self.cyl_axis);
        self.test_axis(tangent.cross(dir), id)
    }

    fn test_separating_axes(&mut self) -> bool {
        for i in 0..3 {
            if !self.test_axis(self.box_rot[i], 1 + i) {
                return false;
            }
        }
        if !self.test_axis(self.cyl_axis, 4) {
            return false;
        }
        for i in 0..3 {
            let axis = self.cyl_axis.cross(self.box_rot[i]);
            if axis.magnitude2() > 1.0e-6 && !self.test_axis(axis, 5 + i) {
                return false;
            }
        }
        for i in 0..8 {
            let axis = self.cyl_axis.cross(self.cyl_axis.cross(self.vertices[i] - self.cyl_pos));
            if axis.magnitude2() > 1.0e-6 && !self.test_axis(axis, 8 + i) {
                return false;
            }
        }
        let half_axis = self.cyl_axis * (self.length * 0.5);
        for (cap, &center) in [self.cyl_pos + half_axis, self.cyl_pos - half_axis].iter().enumerate() {
            for (e, &(i, j)) in BOX_EDGES.iter().enumerate() {
                let (v0, v1) = (self.vertices[i], self.vertices[j]);
                if !self.test_edge_circle_axis(center, v0, v1, 16 + cap * 12 + e) {
                    return false;
                }
            }
        }
        true
    }

    /// Clips the cylinder side line nearest the box against the box and
    /// reports its two ends.
    fn clip_cylinder_to_box(&self, ids: (GeomId, GeomId), buf: &mut ContactBuffer) -> usize {
        let n_perp = self.normal - self.cyl_axis * self.cyl_axis.dot(self.normal);
        let n_perp = match n_perp.magnitude() {
            len if len > 0.0 => n_perp / len,
            _ => Vec3::zero(),
        };
        let base = self.cyl_pos + n_perp * self.radius - self.box_pos;
        let half_axis = self.cyl_axis * (self.length * 0.5);
        let mut e0 = base + half_axis;
        let mut e1 = base - half_axis;

        for i in 0..3 {
            let axis = self.box_rot[i];
            for &sign in &[1.0, -1.0] {
                if !clip_segment(&mut e0, &mut e1, &Plane::with_offset(axis * sign, self.half[i])) {
                    return 0;
                }
            }
        }

        let depth0 = (self.best_rb + e0.dot(self.normal)).max(0.0);
        let depth1 = (self.best_rb + e1.dot(self.normal)).max(0.0);
        let start = buf.len();
        buf.push(ContactGeom::new(e0 + self.box_pos, -self.normal, depth0, ids.0, ids.1));
        buf.push(ContactGeom::new(e1 + self.box_pos, -self.normal, depth1, ids.0, ids.1));
        buf.len() - start
    }

    /// Clips the box face nearest the cylinder against the cap and reports
    /// every clipped point below the cap.
    fn clip_box_to_cylinder(&self, ids: (GeomId, GeomId), buf: &mut ContactBuffer) -> usize {
        let half_axis = self.cyl_axis * (self.length * 0.5);
        let (circle_pos, circle_normal) = if self.cyl_axis.dot(self.normal) > 0.0 {
            (self.cyl_pos + half_axis, -Vec3::unit_z())
        } else {
            (self.cyl_pos - half_axis, Vec3::unit_z())
        };

        // The box face most facing the cylinder.
        let nr = self.in_box_frame(self.normal);
        let abs_n = abs_vec(nr);
        let b0 = if abs_n.x >= abs_n.y && abs_n.x >= abs_n.z {
            0
        } else if abs_n.y >= abs_n.z {
            1
        } else {
            2
        };
        let (b1, b2) = ((b0 + 1) % 3, (b0 + 2) % 3);
        let face_axis = self.box_rot[b0] * self.half[b0];
        let center = if nr[b0] > 0.0 {
            self.box_pos - face_axis
        } else {
            self.box_pos + face_axis
        };
        let a1 = self.box_rot[b1] * self.half[b1];
        let a2 = self.box_rot[b2] * self.half[b2];
        let corners = [center + a1 - a2, center - a1 - a2, center - a1 + a2, center + a1 + a2];

        // Into the frame of the cap.
        let to_cap = |p: Vec3| {
            let d = p - circle_pos;
            Vec3::new(self.cyl_rot.x.dot(d), self.cyl_rot.y.dot(d), self.cyl_rot.z.dot(d))
        };
        let quad: ClipPolygon = corners.iter().map(|&p| to_cap(p)).collect();

        let mut poly = ClipPolygon::new();
        clip_polygon(&quad, &Plane::with_offset(circle_normal, 0.0), &mut poly);
        let mut scratch = ClipPolygon::new();
        for side in cap_side_normals().iter() {
            clip_polygon(&poly, &Plane::with_offset(*side, self.radius), &mut scratch);
            std::mem::swap(&mut poly, &mut scratch);
        }

        let start = buf.len();
        for p in poly.iter() {
            let world = self.cyl_rot * *p + circle_pos;
            let depth = self.best_rc - (world - self.cyl_pos).dot(self.normal);
            if depth > 0.0 {
                buf.push(ContactGeom::new(world, -self.normal, depth, ids.0, ids.1));
                if buf.is_saturated() {
                    break;
                }
            }
        }
        buf.len() - start
    }
}

/// Collides a cylinder (`a`) with a box (`b`).
pub fn cylinder_box(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let mut data = CylinderBox::new(a, b);
    if !data.test_separating_axes() || data.best_axis == 0 {
        return 0;
    }
    log::trace!("cylinder {} against box {}: axis {} depth {}", a.id, b.id, data.best_axis, data.best_depth);
    if data.normal.dot(data.cyl_axis).abs() < CAP_ALIGNMENT {
        data.clip_cylinder_to_box((a.id, b.id), buf)
    } else {
        data.clip_box_to_cylinder((a.id, b.id), buf)
    }
}
