//! Exact overlap tests between a sphere and every other geometry kind.
//!
//! All tests report the same [`ContactGeom`]: a unit normal pointing from the
//! other geometry toward the sphere, the penetration depth (positive when the
//! surfaces overlap) and the contact point. Callers inflate the sphere radius
//! with the safety margin themselves when they want proximity instead of
//! penetration.

use glam::Vec3;

use crate::geometry::AnalyticalShape;

#[derive(Clone, Copy, Debug)]
pub struct ContactGeom {
    /// Unit normal from B toward A (A is always the sphere).
    pub normal: Vec3,
    /// Overlap depth; positive means penetrating.
    pub depth: f32,
    /// Representative contact point in world space.
    pub point: Vec3,
}

/// Sphere-sphere overlap. `None` when the centers coincide (no defined
/// normal) or the spheres are separated.
pub fn sphere_sphere(ca: Vec3, ra: f32, cb: Vec3, rb: f32) -> Option<ContactGeom> {
    let d = ca - cb;
    let dist_sq = d.length_squared();
    let reach = ra + rb;
    if dist_sq >= reach * reach || dist_sq < 1e-20 {
        return None;
    }
    let dist = dist_sq.sqrt();
    let normal = d / dist;
    // Contact point sits between the two surfaces.
    let point = cb + normal * (rb - (reach - dist) * 0.5);
    Some(ContactGeom {
        normal,
        depth: reach - dist,
        point,
    })
}

/// Sphere against a half-space boundary.
pub fn sphere_plane(c: Vec3, r: f32, point: Vec3, normal: Vec3) -> Option<ContactGeom> {
    let dist = (c - point).dot(normal);
    let depth = r - dist;
    if depth <= 0.0 {
        return None;
    }
    Some(ContactGeom {
        normal,
        depth,
        point: c - normal * dist,
    })
}

/// Sphere against a finite rectangular plate.
pub fn sphere_plate(
    c: Vec3,
    r: f32,
    center: Vec3,
    normal: Vec3,
    u: Vec3,
    half_u: f32,
    half_v: f32,
) -> Option<ContactGeom> {
    let v_axis = normal.cross(u);
    let rel = c - center;
    // Closest point on the rectangle.
    let pu = rel.dot(u).clamp(-half_u, half_u);
    let pv = rel.dot(v_axis).clamp(-half_v, half_v);
    let closest = center + u * pu + v_axis * pv;
    let d = c - closest;
    let dist_sq = d.length_squared();
    if dist_sq >= r * r || dist_sq < 1e-20 {
        return None;
    }
    let dist = dist_sq.sqrt();
    Some(ContactGeom {
        normal: d / dist,
        depth: r - dist,
        point: closest,
    })
}

/// Sphere against an infinite cylinder wall. `inward = true` means the
/// sphere lives inside (drum); `false`, outside (post).
pub fn sphere_cylinder(
    c: Vec3,
    r: f32,
    center: Vec3,
    axis: Vec3,
    cyl_radius: f32,
    inward: bool,
) -> Option<ContactGeom> {
    let rel = c - center;
    let radial = rel - axis * rel.dot(axis);
    let dist = radial.length();
    if inward {
        // Distance from the sphere surface to the inner wall.
        let depth = dist + r - cyl_radius;
        if depth <= 0.0 || dist < 1e-10 {
            return None;
        }
        let out = radial / dist;
        Some(ContactGeom {
            normal: -out,
            depth,
            point: c + out * (cyl_radius - dist),
        })
    } else {
        let depth = cyl_radius + r - dist;
        if depth <= 0.0 || dist < 1e-10 {
            return None;
        }
        let out = radial / dist;
        Some(ContactGeom {
            normal: out,
            depth,
            point: c - out * (dist - cyl_radius),
        })
    }
}

/// Sphere against any analytical shape.
pub fn sphere_analytical(c: Vec3, r: f32, shape: &AnalyticalShape) -> Option<ContactGeom> {
    match *shape {
        AnalyticalShape::Plane { point, normal } => sphere_plane(c, r, point, normal),
        AnalyticalShape::Plate {
            center,
            normal,
            u,
            half_u,
            half_v,
        } => sphere_plate(c, r, center, normal, u, half_u, half_v),
        AnalyticalShape::Cylinder {
            center,
            axis,
            radius,
            inward,
        } => sphere_cylinder(c, r, center, axis, radius, inward),
    }
}

/// Closest point on a triangle to `p` (Voronoi-region walk).
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Sphere against a triangle (either side).
pub fn sphere_triangle(c: Vec3, r: f32, v: &[Vec3; 3]) -> Option<ContactGeom> {
    let closest = closest_point_on_triangle(c, v[0], v[1], v[2]);
    let d = c - closest;
    let dist_sq = d.length_squared();
    if dist_sq >= r * r {
        return None;
    }
    let normal = if dist_sq > 1e-20 {
        d / dist_sq.sqrt()
    } else {
        // Center exactly on the triangle plane: fall back to the face normal.
        let n = (v[1] - v[0]).cross(v[2] - v[0]);
        let len = n.length();
        if len < 1e-20 {
            return None;
        }
        n / len
    };
    Some(ContactGeom {
        normal,
        depth: r - dist_sq.sqrt(),
        point: closest,
    })
}
