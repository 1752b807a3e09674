//! Contact materials and their pairwise combination rules.
//!
//! A material is the `{E, nu, CoR, mu, Crr}` tuple the contact kernel reads:
//! Young's modulus, Poisson ratio, restitution, sliding friction and rolling
//! resistance. Identical materials loaded twice collapse onto one slot.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Handle returned by `load_material`; an index into the [`MaterialTable`].
pub type MaterialId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Young's modulus (Pa).
    pub e: f32,
    /// Poisson ratio.
    pub nu: f32,
    /// Coefficient of restitution.
    pub cor: f32,
    /// Sliding friction coefficient.
    pub mu: f32,
    /// Rolling resistance coefficient.
    pub crr: f32,
}

impl Material {
    /// Shear modulus derived from `E` and `nu`.
    #[inline]
    pub fn shear_modulus(&self) -> f32 {
        self.e / (2.0 * (1.0 + self.nu))
    }
}

/// Properties of a material pair, precomputed once per `(i, j)` combination
/// at initialization so the force kernel does no per-contact division.
#[derive(Clone, Copy, Debug)]
pub struct PairProps {
    /// Effective Young's modulus `E*`.
    pub e_eff: f32,
    /// Effective shear modulus `G*`.
    pub g_eff: f32,
    /// Restitution of the pair (geometric mean).
    pub cor: f32,
    /// Friction of the pair (min, the weaker surface governs).
    pub mu: f32,
    /// Rolling resistance of the pair (min).
    pub crr: f32,
    /// Damping shape factor `ln(CoR) / sqrt(ln^2(CoR) + pi^2)`, negative.
    pub beta: f32,
}

/// Combine two materials into effective pair properties.
///
/// `1/E* = (1 - nu_a^2)/E_a + (1 - nu_b^2)/E_b`, and similarly for `G*` with
/// `(2 - nu)/G` terms, the standard Hertz-Mindlin composition.
pub fn combine(a: &Material, b: &Material) -> PairProps {
    let e_inv = (1.0 - a.nu * a.nu) / a.e + (1.0 - b.nu * b.nu) / b.e;
    let g_inv = (2.0 - a.nu) / a.shear_modulus() + (2.0 - b.nu) / b.shear_modulus();
    let cor = (a.cor * b.cor).sqrt().clamp(1e-4, 1.0);
    let ln_cor = cor.ln();
    PairProps {
        e_eff: 1.0 / e_inv,
        g_eff: 1.0 / g_inv,
        cor,
        mu: a.mu.min(b.mu),
        crr: a.crr.min(b.crr),
        beta: ln_cor / (ln_cor * ln_cor + std::f32::consts::PI.powi(2)).sqrt(),
    }
}

/// Deduplicating material registry. Pure data; owned by the controller until
/// `initialize`, then shared read-only with the workers.
#[derive(Clone, Debug, Default)]
pub struct MaterialTable {
    materials: Vec<Material>,
    /// Flat `n x n` pair matrix, filled by [`MaterialTable::seal`].
    pairs: Vec<PairProps>,
}

impl MaterialTable {
    /// Register a material, returning the slot of an identical earlier one
    /// when possible.
    pub fn load(&mut self, mat: Material) -> MaterialId {
        if let Some(i) = self.materials.iter().position(|m| *m == mat) {
            return i as MaterialId;
        }
        self.materials.push(mat);
        (self.materials.len() - 1) as MaterialId
    }

    pub fn get(&self, id: MaterialId) -> Result<&Material, ConfigError> {
        self.materials
            .get(id as usize)
            .ok_or(ConfigError::UnknownMaterial(id))
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Precompute every pair combination. Called once at `initialize`.
    pub fn seal(&mut self) {
        let n = self.materials.len();
        self.pairs = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                self.pairs
                    .push(combine(&self.materials[i], &self.materials[j]));
            }
        }
    }

    /// Effective properties of a sealed pair.
    #[inline]
    pub fn pair(&self, a: MaterialId, b: MaterialId) -> &PairProps {
        &self.pairs[a as usize * self.materials.len() + b as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quartz() -> Material {
        Material {
            e: 7e10,
            nu: 0.3,
            cor: 0.5,
            mu: 0.5,
            crr: 0.01,
        }
    }

    #[test]
    fn duplicate_materials_share_a_slot() {
        let mut table = MaterialTable::default();
        let a = table.load(quartz());
        let b = table.load(quartz());
        let c = table.load(Material { mu: 0.2, ..quartz() });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn pair_combination_is_symmetric() {
        let soft = Material {
            e: 1e7,
            nu: 0.35,
            cor: 0.8,
            mu: 0.3,
            crr: 0.0,
        };
        let ab = combine(&quartz(), &soft);
        let ba = combine(&soft, &quartz());
        assert!((ab.e_eff - ba.e_eff).abs() < 1.0);
        assert!((ab.g_eff - ba.g_eff).abs() < 1.0);
        assert_eq!(ab.mu, ba.mu);
    }

    #[test]
    fn identical_materials_halve_the_modulus() {
        let m = quartz();
        let p = combine(&m, &m);
        let expected = m.e / (2.0 * (1.0 - m.nu * m.nu));
        assert!((p.e_eff - expected).abs() / expected < 1e-5);
    }
}
