//! Broad-phase candidate generation: the contact detector's inner loop.
//!
//! Works against a state snapshot, never live owner state. Spheres and
//! triangles are inflated by the safety margin, scattered into every bin
//! their box touches, sorted so bin-mates are adjacent, and paired within
//! each bin. Analytical boundaries are few, so they are tested against every
//! sphere directly instead of being binned.
//!
//! The output over-approximates: a pair in the list may not touch (the
//! narrow phase decides), but any pair that can touch before the dynamics
//! thread outruns the margin is guaranteed present.

use glam::{Quat, Vec3};
use rayon::prelude::*;

use crate::bins::{BinGrid, BinId};
use crate::family::FamilyMask;
use crate::geometry::{Aabb, GeometryStore, GeomId, PairKind};
use crate::narrowphase;
use crate::owner::StateSnapshot;
use crate::world::WorldFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContactPair {
    pub a: GeomId,
    pub b: GeomId,
    pub kind: PairKind,
}

/// One contact-detection cycle's output, stamped with the simulated time of
/// the snapshot it was built from.
#[derive(Clone, Default)]
pub struct PairList {
    pub pairs: Vec<ContactPair>,
    pub t: f64,
}

/// A bin over the crowd cap; the cycle is abandoned and the grid rebuilt.
#[derive(Clone, Copy, Debug)]
pub struct TooCrowded {
    pub bin: BinId,
    pub count: usize,
}

struct WorldGeom {
    gid: GeomId,
    owner: u32,
    family: u8,
    aabb: Aabb,
}

/// Run one broad-phase cycle. `margin` is the safety radius added to every
/// geometry. Returns the deduplicated candidate list, or the offending bin
/// when one exceeds `crowd_cap`.
pub fn find_pairs(
    snapshot: &StateSnapshot,
    frame: &WorldFrame,
    geometry: &GeometryStore,
    bins: &BinGrid,
    mask: &FamilyMask,
    margin: f32,
    crowd_cap: usize,
) -> Result<PairList, TooCrowded> {
    // Decode every active owner once.
    let n_owners = snapshot.len();
    let mut owner_pos = vec![Vec3::ZERO; n_owners];
    let mut owner_quat = vec![Quat::IDENTITY; n_owners];
    for i in 0..n_owners {
        if snapshot.active[i] {
            owner_pos[i] = snapshot.position(frame, i as u32);
            owner_quat[i] = snapshot.quat[i];
        }
    }

    // Transform the binnable geometries into world space.
    let world_extent = frame.extent();
    let world_max = frame.origin + world_extent;
    let spheres: Vec<WorldGeom> = geometry
        .spheres
        .par_iter()
        .enumerate()
        .filter(|(_, s)| snapshot.active[s.owner as usize])
        .map(|(i, s)| {
            let o = s.owner as usize;
            let center = owner_pos[o] + owner_quat[o] * s.rel_pos;
            WorldGeom {
                gid: i as GeomId,
                owner: s.owner,
                family: snapshot.family[o],
                aabb: Aabb::of_sphere(center, s.radius + margin),
            }
        })
        .collect();
    let tri_base = geometry.tri_base();
    let triangles: Vec<WorldGeom> = geometry
        .triangles
        .par_iter()
        .enumerate()
        .filter(|(_, t)| snapshot.active[t.owner as usize])
        .map(|(i, t)| {
            let o = t.owner as usize;
            let v = [
                owner_pos[o] + owner_quat[o] * t.v[0],
                owner_pos[o] + owner_quat[o] * t.v[1],
                owner_pos[o] + owner_quat[o] * t.v[2],
            ];
            WorldGeom {
                gid: tri_base + i as GeomId,
                owner: t.owner,
                family: snapshot.family[o],
                aabb: Aabb::of_triangle(&v, margin),
            }
        })
        .collect();

    // Out-of-world geometries clamp to boundary bins; say so once per cycle.
    let escaped = spheres
        .iter()
        .chain(triangles.iter())
        .any(|g| g.aabb.min.cmplt(frame.origin).any() || g.aabb.max.cmpgt(world_max).any());
    if escaped {
        log::warn!("geometry outside the world box; clamped to boundary bins this cycle");
    }

    // Touch-count pass, then prefix-sum into a flat (bin, geom) table.
    let all: Vec<&WorldGeom> = spheres.iter().chain(triangles.iter()).collect();
    let mut offsets = Vec::with_capacity(all.len() + 1);
    offsets.push(0usize);
    for g in &all {
        let (lo, hi) = bins.range_of(&g.aabb);
        offsets.push(offsets.last().unwrap() + BinGrid::range_volume(&lo, &hi));
    }
    let mut entries: Vec<(BinId, u32)> = vec![(0, 0); *offsets.last().unwrap()];
    for (gi, g) in all.iter().enumerate() {
        let (lo, hi) = bins.range_of(&g.aabb);
        let mut cursor = offsets[gi];
        for iz in lo[2]..=hi[2] {
            for iy in lo[1]..=hi[1] {
                for ix in lo[0]..=hi[0] {
                    entries[cursor] = (bins.pack(ix, iy, iz), gi as u32);
                    cursor += 1;
                }
            }
        }
    }

    // Geometries sharing a bin become adjacent; within a bin the original
    // (gid-sorted) order is kept because the table index follows gid order.
    entries.sort_unstable();

    // Per-bin pair emission.
    let mut pairs: Vec<(GeomId, GeomId)> = Vec::new();
    let mut run_start = 0;
    while run_start < entries.len() {
        let bin = entries[run_start].0;
        let mut run_end = run_start + 1;
        while run_end < entries.len() && entries[run_end].0 == bin {
            run_end += 1;
        }
        let count = run_end - run_start;
        if count > crowd_cap {
            return Err(TooCrowded { bin, count });
        }
        for i in run_start..run_end {
            let ga = all[entries[i].1 as usize];
            for j in (i + 1)..run_end {
                let gb = all[entries[j].1 as usize];
                // Triangles never pair with each other.
                if ga.gid >= tri_base && gb.gid >= tri_base {
                    continue;
                }
                // Co-owner geometries never interact.
                if ga.owner == gb.owner {
                    continue;
                }
                if mask.forbidden(ga.family, gb.family) {
                    continue;
                }
                if !ga.aabb.overlaps(&gb.aabb) {
                    continue;
                }
                pairs.push((ga.gid.min(gb.gid), ga.gid.max(gb.gid)));
            }
        }
        run_start = run_end;
    }

    // The same pair shows up once per shared bin; keep one.
    pairs.sort_unstable();
    pairs.dedup();

    let mut out: Vec<ContactPair> = pairs
        .into_iter()
        .map(|(a, b)| ContactPair {
            a,
            b,
            kind: geometry.pair_kind(a, b),
        })
        .collect();

    // Analytical boundaries: a handful of objects, checked against every
    // sphere with the margin applied.
    let anal_base = geometry.anal_base();
    for (ai, anal) in geometry.analytical.iter().enumerate() {
        if !snapshot.active[anal.owner as usize] {
            continue;
        }
        let a_family = snapshot.family[anal.owner as usize];
        let gid_b = anal_base + ai as GeomId;
        for ws in &spheres {
            if ws.owner == anal.owner || mask.forbidden(ws.family, a_family) {
                continue;
            }
            let s = &geometry.spheres[ws.gid as usize];
            let o = s.owner as usize;
            let center = owner_pos[o] + owner_quat[o] * s.rel_pos;
            if narrowphase::sphere_analytical(center, s.radius + margin, &anal.shape).is_some() {
                out.push(ContactPair {
                    a: ws.gid,
                    b: gid_b,
                    kind: PairKind::SphereAnalytical,
                });
            }
        }
    }

    Ok(PairList {
        pairs: out,
        t: snapshot.t,
    })
}
