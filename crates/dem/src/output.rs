//! CSV writers for spheres, mesh triangles and contacts.
//!
//! These serve the controller's `write_*_file` operations; they read a
//! committed snapshot, so call them from a synced stance.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::broadphase::PairList;
use crate::error::ConfigError;
use crate::geometry::GeometryStore;
use crate::narrowphase;
use crate::owner::StateSnapshot;
use crate::world::WorldFrame;

/// One row per sphere: world center, radius, owner and family.
pub fn write_sphere_csv(
    path: &Path,
    snapshot: &StateSnapshot,
    frame: &WorldFrame,
    geometry: &GeometryStore,
) -> Result<(), ConfigError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "x,y,z,r,owner,family")?;
    for sphere in &geometry.spheres {
        let o = sphere.owner as usize;
        if !snapshot.active[o] {
            continue;
        }
        let pos = snapshot.position(frame, sphere.owner);
        let c = pos + snapshot.quat[o] * sphere.rel_pos;
        writeln!(
            out,
            "{},{},{},{},{},{}",
            c.x, c.y, c.z, sphere.radius, sphere.owner, snapshot.family[o]
        )?;
    }
    Ok(())
}

/// One row per mesh triangle, vertices in world space.
pub fn write_mesh_csv(
    path: &Path,
    snapshot: &StateSnapshot,
    frame: &WorldFrame,
    geometry: &GeometryStore,
) -> Result<(), ConfigError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "owner,ax,ay,az,bx,by,bz,cx,cy,cz")?;
    for tri in &geometry.triangles {
        let o = tri.owner as usize;
        if !snapshot.active[o] {
            continue;
        }
        let pos = snapshot.position(frame, tri.owner);
        let q = snapshot.quat[o];
        let v: Vec<_> = tri.v.iter().map(|&r| pos + q * r).collect();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{}",
            tri.owner, v[0].x, v[0].y, v[0].z, v[1].x, v[1].y, v[1].z, v[2].x, v[2].y, v[2].z
        )?;
    }
    Ok(())
}

/// One row per touching candidate pair, with the recomputed normal and depth.
pub fn write_contact_csv(
    path: &Path,
    snapshot: &StateSnapshot,
    frame: &WorldFrame,
    geometry: &GeometryStore,
    pairs: &PairList,
) -> Result<(), ConfigError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "gid_a,gid_b,kind,nx,ny,nz,depth")?;
    for pair in &pairs.pairs {
        let sphere = &geometry.spheres[pair.a as usize];
        let oa = sphere.owner as usize;
        if !snapshot.active[oa] {
            continue;
        }
        let pos_a = snapshot.position(frame, sphere.owner);
        let center = pos_a + snapshot.quat[oa] * sphere.rel_pos;
        let ob = geometry.owner_of(pair.b) as usize;
        if !snapshot.active[ob] {
            continue;
        }
        let pos_b = snapshot.position(frame, ob as u32);
        let q_b = snapshot.quat[ob];

        let overlap = match pair.kind {
            crate::geometry::PairKind::SphereSphere => {
                let sb = &geometry.spheres[pair.b as usize];
                narrowphase::sphere_sphere(
                    center,
                    sphere.radius,
                    pos_b + q_b * sb.rel_pos,
                    sb.radius,
                )
            }
            crate::geometry::PairKind::SphereTriangle => {
                let tri = &geometry.triangles[(pair.b - geometry.tri_base()) as usize];
                let v = [
                    pos_b + q_b * tri.v[0],
                    pos_b + q_b * tri.v[1],
                    pos_b + q_b * tri.v[2],
                ];
                narrowphase::sphere_triangle(center, sphere.radius, &v)
            }
            crate::geometry::PairKind::SphereAnalytical => {
                let anal =
                    &geometry.analytical[(pair.b - geometry.anal_base()) as usize];
                narrowphase::sphere_analytical(center, sphere.radius, &anal.shape)
            }
        };
        let Some(geom) = overlap else { continue };
        let kind = match pair.kind {
            crate::geometry::PairKind::SphereSphere => "ss",
            crate::geometry::PairKind::SphereTriangle => "st",
            crate::geometry::PairKind::SphereAnalytical => "sa",
        };
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            pair.a, pair.b, kind, geom.normal.x, geom.normal.y, geom.normal.z, geom.depth
        )?;
    }
    Ok(())
}
