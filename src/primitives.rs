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

//! Colliders between the convex primitives and planes.
//!
//! Every collider takes its two shapes in the order of its name and writes
//! contacts whose normal points from the second shape towards the first.
//! Rays are the exception: their contacts carry the surface normal at the
//! hit and the hit distance as depth.

use cgmath::{InnerSpace, Zero};
use smallvec::SmallVec;

use crate::cache::ColliderCache;
use crate::clip::{clip_polygon_by_planes, ClipPolygon};
use crate::geom::{Cuboid, GeomId, Pose, Posed, Shape};
use crate::manifold::{ContactBuffer, ContactGeom};
use crate::math::{
    closest_line_points, closest_segment_points, plane_space, safe_normalize, Plane, Real, Vec3, EPSILON,
};

/// Contacts along edge axes must be this much shallower than a face axis to
/// be preferred over it.
const EDGE_FUDGE: Real = 1.05;

/// Capsules whose axes have `1 - cos^2` below this are treated as parallel.
const PARALLEL_TOLERANCE: Real = 1.0e-5;

/// A capsule axis closer than this to a box counts as entering it.
const AXIS_INSIDE_DISTANCE: Real = 1.0e-12;

const SEGMENT_BOX_ITERATIONS: usize = 80;

/// Contact between two spheres, or `None` if they are apart. The normal
/// points from the second sphere towards the first.
pub(crate) fn sphere_sphere_contact(p1: Vec3, r1: Real, p2: Vec3, r2: Real) -> Option<(Vec3, Vec3, Real)> {
    let d = (p1 - p2).magnitude();
    if d > r1 + r2 {
        return None;
    }
    if d <= 0.0 {
        // Concentric: any direction will do.
        return Some((p1, Vec3::unit_x(), r1 + r2));
    }
    let n = (p1 - p2) / d;
    let k = 0.5 * (r2 - r1 - d);
    Some((p1 + n * k, n, r1 + r2 - d))
}

pub fn sphere_sphere(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let (s1, s2) = (a.sphere(), b.sphere());
    match sphere_sphere_contact(a.pose.p, s1.radius, b.pose.p, s2.radius) {
        Some((pos, normal, depth)) => buf.push(ContactGeom::new(pos, normal, depth, a.id, b.id)) as usize,
        None => 0,
    }
}

pub fn sphere_box(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let radius = a.sphere().radius;
    let half = b.cuboid().half_extents;
    let p = a.pose.p - b.pose.p;

    // Sphere center in box space, clamped to the box.
    let mut t = b.pose.inverse_transform_vector(p);
    let mut on_border = false;
    for i in 0..3 {
        if t[i] < -half[i] {
            t[i] = -half[i];
            on_border = true;
        } else if t[i] > half[i] {
            t[i] = half[i];
            on_border = true;
        }
    }

    if !on_border {
        // The center is inside: push out through the nearest face.
        let mut mini = 0;
        let mut min_distance = half[0] - t[0].abs();
        for i in 1..3 {
            let face_distance = half[i] - t[i].abs();
            if face_distance < min_distance {
                min_distance = face_distance;
                mini = i;
            }
        }
        let mut local = Vec3::zero();
        local[mini] = if t[mini] > 0.0 { 1.0 } else { -1.0 };
        let normal = b.pose.transform_vector(local);
        let contact = ContactGeom::new(a.pose.p, normal, min_distance + radius, a.id, b.id);
        return buf.push(contact) as usize;
    }

    let q = b.pose.transform_vector(t);
    let r = p - q;
    let dist = r.magnitude();
    let depth = radius - dist;
    if depth < 0.0 {
        return 0;
    }
    let normal = match safe_normalize(r) {
        Some(n) => n,
        None => return 0,
    };
    buf.push(ContactGeom::new(q + b.pose.p, normal, depth, a.id, b.id)) as usize
}

pub fn sphere_plane(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let radius = a.sphere().radius;
    let plane = b.plane();
    let c = a.pose.p;
    let depth = plane.d - plane.n.dot(c) + radius;
    if depth < 0.0 {
        return 0;
    }
    let contact = ContactGeom::new(c - plane.n * radius, plane.n, depth, a.id, b.id);
    buf.push(contact) as usize
}

/// Separating axis test over the fifteen axes of two boxes.
///
/// Face contacts clip the incident face of one box against the side planes
/// of the reference face of the other; edge contacts are placed halfway
/// between the closest points of the two edges.
pub fn box_box(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let ha = a.cuboid().half_extents;
    let hb = b.cuboid().half_extents;
    let (ra, rb) = (&a.pose.r, &b.pose.r);
    let d = a.pose.p - b.pose.p;

    #[derive(Copy, Clone)]
    enum Feature {
        FaceA(usize),
        FaceB(usize),
        Edge(usize, usize),
    }

    let radius_a = |l: Vec3| (0..3).map(|k| ha[k] * ra[k].dot(l).abs()).sum::<Real>();
    let radius_b = |l: Vec3| (0..3).map(|k| hb[k] * rb[k].dot(l).abs()).sum::<Real>();

    let mut best: Option<(Real, Vec3, Feature)> = None;
    let mut test = |l: Vec3, feature: Feature, fudge: Real| -> bool {
        let dist = d.dot(l);
        let overlap = radius_a(l) + radius_b(l) - dist.abs();
        if overlap < 0.0 {
            return false;
        }
        let better = match best {
            Some((depth, _, _)) => overlap * fudge < depth,
            None => true,
        };
        if better {
            let n = if dist < 0.0 { -l } else { l };
            best = Some((overlap, n, feature));
        }
        true
    };

    for i in 0..3 {
        if !test(ra[i], Feature::FaceA(i), 1.0) {
            return 0;
        }
    }
    for j in 0..3 {
        if !test(rb[j], Feature::FaceB(j), 1.0) {
            return 0;
        }
    }
    for i in 0..3 {
        for j in 0..3 {
            let c = ra[i].cross(rb[j]);
            if c.magnitude2() <= 1.0e-6 {
                continue;
            }
            let l = c / c.magnitude();
            if !test(l, Feature::Edge(i, j), EDGE_FUDGE) {
                return 0;
            }
        }
    }

    let (depth, normal, feature) = match best {
        Some(best) => best,
        None => return 0,
    };

    match feature {
        Feature::Edge(i, j) => {
            // Supporting edge of each box towards the other.
            let mut pa = a.pose.p;
            for k in (0..3).filter(|&k| k != i) {
                let sign = if ra[k].dot(normal) > 0.0 { -1.0 } else { 1.0 };
                pa += ra[k] * (sign * ha[k]);
            }
            let mut pb = b.pose.p;
            for k in (0..3).filter(|&k| k != j) {
                let sign = if rb[k].dot(normal) > 0.0 { 1.0 } else { -1.0 };
                pb += rb[k] * (sign * hb[k]);
            }
            let pos = match closest_line_points(pa, ra[i], pb, rb[j]) {
                Some((s, t)) => (pa + ra[i] * s + pb + rb[j] * t) * 0.5,
                None => (pa + pb) * 0.5,
            };
            buf.push(ContactGeom::new(pos, normal, depth, a.id, b.id)) as usize
        }
        Feature::FaceA(k) => box_face_contacts(a, b, k, -normal, normal, (a.id, b.id), buf),
        Feature::FaceB(k) => box_face_contacts(b, a, k, normal, normal, (a.id, b.id), buf),
    }
}

/// Clips the face of `inc` most opposed to `face_n` against the face `k` of
/// `reference` whose outward normal is `face_n`. Contacts are reported
/// between `ids` with `normal`.
fn box_face_contacts(
    reference: &Posed,
    inc: &Posed,
    k: usize,
    face_n: Vec3,
    normal: Vec3,
    ids: (GeomId, GeomId),
    buf: &mut ContactBuffer,
) -> usize {
    let hr = reference.cuboid().half_extents;
    let hi = inc.cuboid().half_extents;
    let rr = &reference.pose;
    let ri = &inc.pose;

    let mut m = 0;
    let mut best = -1.0;
    for axis in 0..3 {
        let dot = ri.axis(axis).dot(face_n).abs();
        if dot > best {
            best = dot;
            m = axis;
        }
    }
    let sign_m = if ri.axis(m).dot(face_n) > 0.0 { -1.0 } else { 1.0 };
    let (u, v) = ((m + 1) % 3, (m + 2) % 3);
    let fc = ri.p + ri.axis(m) * (sign_m * hi[m]);
    let du = ri.axis(u) * hi[u];
    let dv = ri.axis(v) * hi[v];

    let mut poly = ClipPolygon::new();
    for &(su, sv) in &[(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)] {
        poly.push(rr.inverse_transform_point(fc + du * su + dv * sv));
    }

    let mut planes: SmallVec<[Plane; 4]> = SmallVec::new();
    for side in (0..3).filter(|&side| side != k) {
        let mut e = Vec3::zero();
        e[side] = 1.0;
        planes.push(Plane::with_offset(-e, hr[side]));
        planes.push(Plane::with_offset(e, hr[side]));
    }
    let mut scratch = ClipPolygon::new();
    clip_polygon_by_planes(&mut poly, planes.iter(), &mut scratch);

    let s = if face_n.dot(rr.axis(k)) > 0.0 { 1.0 } else { -1.0 };
    let mut points: SmallVec<[(Vec3, Real); 16]> = SmallVec::new();
    for p in poly.iter() {
        let depth = hr[k] - s * p[k];
        if depth >= 0.0 {
            points.push((*p, depth));
        }
    }

    let room = buf.capacity().saturating_sub(buf.len()).max(1);
    let chosen = cull_points(&points, room, k);

    let start = buf.len();
    for &i in chosen.iter() {
        let (p, depth) = points[i];
        buf.push(ContactGeom::new(rr.transform_point(p), normal, depth, ids.0, ids.1));
    }
    buf.len() - start
}

/// Picks at most `m` of `points` that best cover the set: the deepest one
/// first, then the points whose angles around the centroid, measured in the
/// face plane orthogonal to axis `k`, are closest to an even spread.
fn cull_points(points: &[(Vec3, Real)], m: usize, k: usize) -> SmallVec<[usize; 16]> {
    let mut out = SmallVec::new();
    let n = points.len();
    if n <= m {
        out.extend(0..n);
        return out;
    }

    let (u, v) = ((k + 1) % 3, (k + 2) % 3);
    let mut i0 = 0;
    for i in 1..n {
        if points[i].1 > points[i0].1 {
            i0 = i;
        }
    }
    let centroid = points.iter().fold(Vec3::zero(), |acc, p| acc + p.0) / n as Real;
    let angles: SmallVec<[Real; 16]> = points
        .iter()
        .map(|p| (p.0[v] - centroid[v]).atan2(p.0[u] - centroid[u]))
        .collect();

    let mut avail: SmallVec<[bool; 16]> = SmallVec::from_elem(true, n);
    avail[i0] = false;
    out.push(i0);
    let two_pi = 2.0 * std::f64::consts::PI;
    for j in 1..m {
        let mut target = j as Real * (two_pi / m as Real) + angles[i0];
        if target > std::f64::consts::PI {
            target -= two_pi;
        }
        let mut best = None;
        let mut best_diff = Real::INFINITY;
        for i in (0..n).filter(|&i| avail[i]) {
            let mut diff = (angles[i] - target).abs();
            if diff > std::f64::consts::PI {
                diff = two_pi - diff;
            }
            if diff < best_diff {
                best_diff = diff;
                best = Some(i);
            }
        }
        if let Some(i) = best {
            avail[i] = false;
            out.push(i);
        }
    }
    out
}

/// The deepest vertex of the box and, capacity permitting, its neighbors
/// along the two edges that are most parallel to the plane.
pub fn box_plane(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let half = a.cuboid().half_extents;
    let plane = b.plane();
    let n = plane.n;
    let pose = &a.pose;

    // Projected full side lengths.
    let q: [Real; 3] = [n.dot(pose.axis(0)), n.dot(pose.axis(1)), n.dot(pose.axis(2))];
    let proj: [Real; 3] = [
        (2.0 * half[0] * q[0]).abs(),
        (2.0 * half[1] * q[1]).abs(),
        (2.0 * half[2] * q[2]).abs(),
    ];

    let depth = plane.d + 0.5 * (proj[0] + proj[1] + proj[2]) - n.dot(pose.p);
    if depth < 0.0 {
        return 0;
    }

    let mut deepest = pose.p;
    for i in 0..3 {
        let s = if q[i] > 0.0 { -1.0 } else { 1.0 };
        deepest += pose.axis(i) * (s * half[i]);
    }

    let start = buf.len();
    buf.push(ContactGeom::new(deepest, n, depth, a.id, b.id));

    let max = buf.capacity().min(start + 3);
    let mut sides = [0usize, 1, 2];
    sides.sort_by(|&i, &j| proj[i].partial_cmp(&proj[j]).unwrap_or(std::cmp::Ordering::Equal));
    for &side in sides.iter().take(2) {
        if buf.len() >= max {
            break;
        }
        let side_depth = depth - proj[side];
        if side_depth < 0.0 {
            break;
        }
        let s = if q[side] > 0.0 { 1.0 } else { -1.0 };
        let pos = deepest + pose.axis(side) * (s * 2.0 * half[side]);
        buf.push(ContactGeom::new(pos, n, side_depth, a.id, b.id));
    }
    buf.len() - start
}

pub fn capsule_sphere(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let capsule = a.capsule();
    let sphere = b.sphere();
    let axis = a.pose.axis(2);
    let half = capsule.length * 0.5;
    let alpha = axis.dot(b.pose.p - a.pose.p).max(-half).min(half);
    let center = a.pose.p + axis * alpha;
    match sphere_sphere_contact(center, capsule.radius, b.pose.p, sphere.radius) {
        Some((pos, normal, depth)) => buf.push(ContactGeom::new(pos, normal, depth, a.id, b.id)) as usize,
        None => 0,
    }
}

pub fn capsule_plane(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let capsule = a.capsule();
    let plane = b.plane();
    let axis = a.pose.axis(2);
    let half = capsule.length * 0.5;

    // Start with the cap nearest the plane.
    let sign = if plane.n.dot(axis) > 0.0 { -1.0 } else { 1.0 };
    let start = buf.len();
    for &s in &[sign, -sign] {
        let p = a.pose.p + axis * (half * s);
        let depth = plane.d - plane.n.dot(p) + capsule.radius;
        if depth < 0.0 {
            break;
        }
        let contact = ContactGeom::new(p - plane.n * capsule.radius, plane.n, depth, a.id, b.id);
        buf.push(contact);
        if buf.is_saturated() {
            break;
        }
    }
    buf.len() - start
}

/// Two capsules with nearly parallel axes that overlap along them touch at
/// both ends of the overlap; otherwise the closest points of the two axis
/// segments are treated as spheres.
pub fn capsule_capsule(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let (c1, c2) = (a.capsule(), b.capsule());
    let (h1, h2) = (c1.length * 0.5, c2.length * 0.5);
    let axis1 = a.pose.axis(2);
    let mut axis2 = b.pose.axis(2);
    let dot = axis1.dot(axis2);
    let start = buf.len();

    if 1.0 - dot * dot < PARALLEL_TOLERANCE {
        if dot < 0.0 {
            axis2 = -axis2;
        }
        // Positions along axis2 are positions along axis1 shifted by k.
        let k = axis1.dot(a.pose.p - b.pose.p);
        let lo = (-h1).max(-h2 - k);
        let hi = h1.min(h2 - k);
        if lo <= hi {
            let spheres = |t: Real| {
                sphere_sphere_contact(a.pose.p + axis1 * t, c1.radius, b.pose.p + axis2 * (t + k), c2.radius)
            };
            if buf.capacity() - buf.len() >= 2 && lo < hi {
                if let (Some(first), Some(second)) = (spheres(lo), spheres(hi)) {
                    buf.push(ContactGeom::new(first.0, first.1, first.2, a.id, b.id));
                    buf.push(ContactGeom::new(second.0, second.1, second.2, a.id, b.id));
                    return buf.len() - start;
                }
            }
            return match spheres((lo + hi) * 0.5) {
                Some((pos, normal, depth)) => buf.push(ContactGeom::new(pos, normal, depth, a.id, b.id)) as usize,
                None => 0,
            };
        }
    }

    let (p1, p2) = closest_segment_points(
        a.pose.p + axis1 * h1,
        a.pose.p - axis1 * h1,
        b.pose.p + axis2 * h2,
        b.pose.p - axis2 * h2,
    );
    match sphere_sphere_contact(p1, c1.radius, p2, c2.radius) {
        Some((pos, normal, depth)) => buf.push(ContactGeom::new(pos, normal, depth, a.id, b.id)) as usize,
        None => 0,
    }
}

/// Closest points between the segment `[p0, p1]` and a box, both in world
/// space. The first point is on the segment.
fn closest_segment_box_points(p0: Vec3, p1: Vec3, pose: &Pose, half: Vec3) -> (Vec3, Vec3) {
    let s0 = pose.inverse_transform_point(p0);
    let s1 = pose.inverse_transform_point(p1);
    let clamp = |p: Vec3| {
        Vec3::new(
            p.x.max(-half.x).min(half.x),
            p.y.max(-half.y).min(half.y),
            p.z.max(-half.z).min(half.z),
        )
    };
    let distance2 = |t: Real| {
        let p = s0 + (s1 - s0) * t;
        (p - clamp(p)).magnitude2()
    };

    // The squared distance to a box is convex along a segment.
    let ratio = 0.5 * (5.0f64.sqrt() - 1.0);
    let (mut lo, mut hi) = (0.0, 1.0);
    let mut x1 = hi - ratio * (hi - lo);
    let mut x2 = lo + ratio * (hi - lo);
    let (mut f1, mut f2) = (distance2(x1), distance2(x2));
    for _ in 0..SEGMENT_BOX_ITERATIONS {
        if f1 <= f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - ratio * (hi - lo);
            f1 = distance2(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + ratio * (hi - lo);
            f2 = distance2(x2);
        }
    }
    let mut t = (lo + hi) * 0.5;
    for &end in &[0.0, 1.0] {
        if distance2(end) <= distance2(t) {
            t = end;
        }
    }

    let p = s0 + (s1 - s0) * t;
    (pose.transform_point(p), pose.transform_point(clamp(p)))
}

/// A capsule whose axis stays outside the box is a sphere at the closest
/// point of the axis. Once the axis enters the box the capsule is collided
/// as the box that bounds it.
pub fn capsule_box(a: &Posed, b: &Posed, buf: &mut ContactBuffer, cache: &mut ColliderCache) -> usize {
    let capsule = a.capsule();
    let half = b.cuboid().half_extents;
    let axis = a.pose.axis(2);
    let h = capsule.length * 0.5;
    let (pl, pb) = closest_segment_box_points(a.pose.p + axis * h, a.pose.p - axis * h, &b.pose, half);

    if (pl - pb).magnitude() < AXIS_INSIDE_DISTANCE {
        let bounds = Shape::Cuboid(Cuboid {
            half_extents: Vec3::new(capsule.radius, capsule.radius, h + capsule.radius),
        });
        let capbox = Posed {
            id: a.id,
            shape: &bounds,
            pose: a.pose,
        };
        return box_box(&capbox, b, buf, cache);
    }

    match sphere_sphere_contact(pl, capsule.radius, pb, 0.0) {
        Some((pos, normal, depth)) => buf.push(ContactGeom::new(pos, normal, depth, a.id, b.id)) as usize,
        None => 0,
    }
}

/// Points on the rims of both caps, the ones lowest with respect to the
/// plane first. A cylinder standing upright on the plane instead reports
/// two opposite points of its lower rim.
pub fn cylinder_plane(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let cylinder = a.cylinder();
    let plane = b.plane();
    let n = plane.n;
    let axis = a.pose.axis(2);
    let half = cylinder.length * 0.5;
    let r = cylinder.radius;

    let mut candidates: SmallVec<[Vec3; 4]> = SmallVec::new();
    match safe_normalize(-(n - axis * axis.dot(n))) {
        Some(g) if (n - axis * axis.dot(n)).magnitude2() > 1.0e-12 => {
            let (lo, hi) = if n.dot(axis) > 0.0 { (-half, half) } else { (half, -half) };
            candidates.push(a.pose.p + axis * lo + g * r);
            candidates.push(a.pose.p + axis * hi + g * r);
            candidates.push(a.pose.p + axis * lo - g * r);
            candidates.push(a.pose.p + axis * hi - g * r);
        }
        _ => {
            let sign = if n.dot(axis) > 0.0 { 1.0 } else { -1.0 };
            let c = a.pose.p - axis * (sign * half);
            let (u, _) = plane_space(axis);
            candidates.push(c + u * r);
            candidates.push(c - u * r);
        }
    }

    let start = buf.len();
    for p in candidates {
        let depth = plane.d - n.dot(p);
        if depth < 0.0 {
            continue;
        }
        buf.push(ContactGeom::new(p, n, depth, a.id, b.id));
        if buf.is_saturated() {
            break;
        }
    }
    buf.len() - start
}

/// The sphere against the closest point of the solid cylinder. A sphere
/// whose center is inside is pushed out through the nearer of the caps and
/// the side.
pub fn cylinder_sphere(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let cylinder = a.cylinder();
    let radius = b.sphere().radius;
    let h = cylinder.length * 0.5;
    let r = cylinder.radius;

    let c = a.pose.inverse_transform_point(b.pose.p);
    let rho = (c.x * c.x + c.y * c.y).sqrt();

    if rho <= r && c.z.abs() <= h {
        let cap = h - c.z.abs();
        let side = r - rho;
        let (outward, depth) = if cap < side {
            (Vec3::new(0.0, 0.0, c.z.signum()), cap + radius)
        } else {
            let radial = safe_normalize(Vec3::new(c.x, c.y, 0.0)).unwrap_or_else(Vec3::unit_x);
            (radial, side + radius)
        };
        let normal = -a.pose.transform_vector(outward);
        return buf.push(ContactGeom::new(b.pose.p, normal, depth, a.id, b.id)) as usize;
    }

    let mut q = Vec3::new(c.x, c.y, c.z.max(-h).min(h));
    if rho > r {
        q.x *= r / rho;
        q.y *= r / rho;
    }
    let d = q - c;
    let dist = d.magnitude();
    if dist > radius {
        return 0;
    }
    let normal = match safe_normalize(d) {
        Some(n) => a.pose.transform_vector(n),
        None => return 0,
    };
    let contact = ContactGeom::new(a.pose.transform_point(q), normal, radius - dist, a.id, b.id);
    buf.push(contact) as usize
}

/// Hit of a ray on a sphere as position, normal and distance. With `inside`
/// the ray is known to start inside a larger shape and the far side of the
/// sphere is taken, with the normal facing into it.
fn ray_sphere_hit(
    origin: Vec3,
    dir: Vec3,
    length: Real,
    center: Vec3,
    radius: Real,
    inside: bool,
) -> Option<(Vec3, Vec3, Real)> {
    let q = origin - center;
    let bq = q.dot(dir);
    let c = q.magnitude2() - radius * radius;

    let k = bq * bq - c;
    if k < 0.0 {
        return None;
    }
    let k = k.sqrt();
    let alpha = if inside && c >= 0.0 {
        -bq + k
    } else if -bq - k >= 0.0 {
        -bq - k
    } else {
        -bq + k
    };
    if alpha < 0.0 || alpha > length {
        return None;
    }
    let pos = origin + dir * alpha;
    let nsign = if c < 0.0 || inside { -1.0 } else { 1.0 };
    let normal = safe_normalize((pos - center) * nsign)?;
    Some((pos, normal, alpha))
}

pub fn ray_sphere(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let ray = a.ray();
    let radius = b.sphere().radius;
    // A ray starting inside the sphere hits it from the inside.
    match ray_sphere_hit(a.pose.p, a.pose.axis(2), ray.length, b.pose.p, radius, false) {
        Some((pos, normal, alpha)) => buf.push(ContactGeom::new(pos, normal, alpha, a.id, b.id)) as usize,
        None => 0,
    }
}

/// Slab test in the frame of the box. A ray starting inside reports where
/// it leaves, with the normal facing into the box.
pub fn ray_box(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let ray = a.ray();
    let half = b.cuboid().half_extents;
    let mut s = b.pose.inverse_transform_point(a.pose.p);
    let mut v = b.pose.inverse_transform_vector(a.pose.axis(2));

    // Mirrored so that every component of v is non negative.
    let mut sign = [-1.0; 3];
    for i in 0..3 {
        if v[i] < 0.0 {
            s[i] = -s[i];
            v[i] = -v[i];
            sign[i] = 1.0;
        }
    }
    for i in 0..3 {
        if (s[i] < -half[i] && v[i] <= 0.0) || s[i] > half[i] {
            return 0;
        }
    }
    if v.is_zero() {
        return 0;
    }

    let (mut lo, mut hi) = (-Real::INFINITY, Real::INFINITY);
    let (mut nlo, mut nhi) = (0, 0);
    for i in 0..3 {
        if v[i] != 0.0 {
            let k = (-half[i] - s[i]) / v[i];
            if k > lo {
                lo = k;
                nlo = i;
            }
            let k = (half[i] - s[i]) / v[i];
            if k < hi {
                hi = k;
                nhi = i;
            }
        }
    }
    if lo > hi {
        return 0;
    }
    let (alpha, n) = if lo >= 0.0 { (lo, nlo) } else { (hi, nhi) };
    if alpha < 0.0 || alpha > ray.length {
        return 0;
    }
    let pos = a.pose.p + a.pose.axis(2) * alpha;
    let normal = b.pose.axis(n) * sign[n];
    buf.push(ContactGeom::new(pos, normal, alpha, a.id, b.id)) as usize
}

pub fn ray_capsule(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let ray = a.ray();
    let capsule = b.capsule();
    let (origin, dir) = (a.pose.p, a.pose.axis(2));
    let axis = b.pose.axis(2);
    let h = capsule.length * 0.5;
    let r = capsule.radius;

    let cs = origin - b.pose.p;
    let mut k = axis.dot(cs);
    let q = axis * k - cs;
    // Negative when the origin is inside the infinite cylinder.
    let c = q.magnitude2() - r * r;

    let mut inside = false;
    if c < 0.0 {
        let along = k.max(-h).min(h);
        inside = (origin - (b.pose.p + axis * along)).magnitude2() < r * r;
    }

    let push = |buf: &mut ContactBuffer, hit: Option<(Vec3, Vec3, Real)>| match hit {
        Some((pos, normal, alpha)) => buf.push(ContactGeom::new(pos, normal, alpha, a.id, b.id)) as usize,
        None => 0,
    };

    // Outside the capsule but within its infinite cylinder only the caps
    // can be hit.
    if !inside && c < 0.0 {
        let cap = if k < 0.0 { -h } else { h };
        let hit = ray_sphere_hit(origin, dir, ray.length, b.pose.p + axis * cap, r, inside);
        return push(buf, hit);
    }

    let uv = axis.dot(dir);
    let w = axis * uv - dir;
    let qa = w.magnitude2();
    let qb = 2.0 * q.dot(w);
    let disc = qb * qb - 4.0 * qa * c;
    if disc < 0.0 || qa <= 0.0 {
        // Parallel to the axis, which only matters from the inside.
        if !inside {
            return 0;
        }
        k = if uv < 0.0 { -h } else { h };
    } else {
        let root = disc.sqrt();
        let mut alpha = (-qb - root) / (2.0 * qa);
        if alpha < 0.0 {
            alpha = (-qb + root) / (2.0 * qa);
            if alpha < 0.0 {
                return 0;
            }
        }
        if alpha > ray.length {
            return 0;
        }
        let pos = origin + dir * alpha;
        k = (pos - b.pose.p).dot(axis);
        if k >= -h && k <= h {
            let nsign = if inside { -1.0 } else { 1.0 };
            let normal = match safe_normalize((pos - (b.pose.p + axis * k)) * nsign) {
                Some(n) => n,
                None => return 0,
            };
            return buf.push(ContactGeom::new(pos, normal, alpha, a.id, b.id)) as usize;
        }
        k = if k < 0.0 { -h } else { h };
    }
    let hit = ray_sphere_hit(origin, dir, ray.length, b.pose.p + axis * k, r, inside);
    push(buf, hit)
}

/// Intersects the ray with the slab between the caps and with the infinite
/// cylinder, in the frame of the cylinder. A ray starting inside reports
/// where it leaves, with the normal facing into the cylinder.
pub fn ray_cylinder(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let ray = a.ray();
    let cylinder = b.cylinder();
    let h = cylinder.length * 0.5;
    let r = cylinder.radius;
    let s = b.pose.inverse_transform_point(a.pose.p);
    let v = b.pose.inverse_transform_vector(a.pose.axis(2));

    // Parameter intervals, each with whether its bounds are on a cap.
    let (mut z_lo, mut z_hi) = (-Real::INFINITY, Real::INFINITY);
    if v.z.abs() > EPSILON {
        let t0 = (-h - s.z) / v.z;
        let t1 = (h - s.z) / v.z;
        z_lo = t0.min(t1);
        z_hi = t0.max(t1);
    } else if s.z.abs() > h {
        return 0;
    }

    let (mut r_lo, mut r_hi) = (-Real::INFINITY, Real::INFINITY);
    let qa = v.x * v.x + v.y * v.y;
    let qb = 2.0 * (s.x * v.x + s.y * v.y);
    let qc = s.x * s.x + s.y * s.y - r * r;
    if qa > EPSILON {
        let disc = qb * qb - 4.0 * qa * qc;
        if disc < 0.0 {
            return 0;
        }
        let root = disc.sqrt();
        r_lo = (-qb - root) / (2.0 * qa);
        r_hi = (-qb + root) / (2.0 * qa);
    } else if qc > 0.0 {
        return 0;
    }

    let (lo, lo_cap) = if z_lo > r_lo { (z_lo, true) } else { (r_lo, false) };
    let (hi, hi_cap) = if z_hi < r_hi { (z_hi, true) } else { (r_hi, false) };
    if lo > hi || hi < 0.0 {
        return 0;
    }
    let (alpha, on_cap, nsign) = if lo >= 0.0 { (lo, lo_cap, 1.0) } else { (hi, hi_cap, -1.0) };
    if alpha > ray.length {
        return 0;
    }

    let p = s + v * alpha;
    let outward = if on_cap {
        Vec3::new(0.0, 0.0, p.z.signum())
    } else {
        match safe_normalize(Vec3::new(p.x, p.y, 0.0)) {
            Some(n) => n,
            None => return 0,
        }
    };
    let pos = a.pose.p + a.pose.axis(2) * alpha;
    let normal = b.pose.transform_vector(outward * nsign);
    buf.push(ContactGeom::new(pos, normal, alpha, a.id, b.id)) as usize
}

pub fn ray_plane(a: &Posed, b: &Posed, buf: &mut ContactBuffer, _cache: &mut ColliderCache) -> usize {
    let ray = a.ray();
    let plane = b.plane();
    let dir = a.pose.axis(2);
    let mut alpha = plane.d - plane.n.dot(a.pose.p);
    let nsign = if alpha > 0.0 { -1.0 } else { 1.0 };
    let k = plane.n.dot(dir);
    if k == 0.0 {
        return 0;
    }
    alpha /= k;
    if alpha < 0.0 || alpha > ray.length {
        return 0;
    }
    let pos = a.pose.p + dir * alpha;
    buf.push(ContactGeom::new(pos, plane.n * nsign, alpha, a.id, b.id)) as usize
}
