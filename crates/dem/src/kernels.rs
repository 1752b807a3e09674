//! Compute-kernel seam: the backend turns declarative specs into callable
//! kernels.
//!
//! The engine never assembles kernel code itself; it hands a spec to a
//! [`ComputeBackend`] and calls whatever comes back. The bundled CPU backend
//! interprets specs directly: the Hertz-Mindlin spec becomes the standard
//! spring-dashpot kernel, and prescription specs wrap the user's callables.
//! A GPU backend would instead compile the spec into device code; nothing
//! upstream changes.

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::contact::{TANGENT_X, TANGENT_Y, TANGENT_Z};
use crate::material::PairProps;

/// Everything a contact kernel may read, plus the mutable history slice.
pub struct ContactCtx<'a> {
    /// Unit normal from B toward A.
    pub normal: Vec3,
    /// Penetration depth, positive.
    pub depth: f32,
    /// Relative velocity of A w.r.t. B at the contact point.
    pub rel_vel: Vec3,
    /// Relative angular velocity (world frame), for rolling resistance.
    pub rel_ang_vel: Vec3,
    /// Effective material pair.
    pub props: PairProps,
    /// Effective radius `R*`.
    pub r_eff: f32,
    /// Effective mass `m*`.
    pub m_eff: f32,
    pub dt: f32,
    /// Per-contact wildcards; slots `0..3` are the tangential accumulator.
    pub history: &'a mut [f32],
}

/// Force and extra torque a kernel produces, acting on A at the contact
/// point. B receives the opposite.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactForce {
    pub force: Vec3,
    /// Torque beyond `r x F` (rolling resistance), on A; B gets the negation.
    pub torque: Vec3,
}

pub trait ContactKernel: Send + Sync {
    fn evaluate(&self, ctx: &mut ContactCtx) -> ContactForce;
}

/// Declarative contact-model description handed to the backend.
#[derive(Clone)]
pub enum ContactModelSpec {
    /// Hertzian normal spring-dashpot with Mindlin tangential history and
    /// Coulomb cap.
    HertzMindlin,
    /// A user-supplied kernel, passed through opaquely.
    Custom(Arc<dyn ContactKernel>),
}

/// Per-family motion prescription: any subset of the four state components,
/// as opaque callables of simulated time.
#[derive(Clone, Default)]
pub struct PrescriptionSpec {
    pub lin_vel: Option<Arc<dyn Fn(f32) -> Vec3 + Send + Sync>>,
    /// Angular velocity in the owner's body frame.
    pub ang_vel: Option<Arc<dyn Fn(f32) -> Vec3 + Send + Sync>>,
    pub position: Option<Arc<dyn Fn(f32) -> Vec3 + Send + Sync>>,
    pub quat: Option<Arc<dyn Fn(f32) -> Quat + Send + Sync>>,
    /// `true`: overwrite after integration, exact. `false`: seed before
    /// integration, forces may still perturb the result.
    pub dictate: bool,
}

/// The prescribed values for one step.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrescribedMotion {
    pub lin_vel: Option<Vec3>,
    pub ang_vel: Option<Vec3>,
    pub position: Option<Vec3>,
    pub quat: Option<Quat>,
    pub dictate: bool,
}

pub trait PrescriptionKernel: Send + Sync {
    fn evaluate(&self, t: f32) -> PrescribedMotion;
}

/// Backend seam. `build_*` may validate or compile; the CPU backend just
/// wraps.
pub trait ComputeBackend: Send + Sync {
    fn build_contact_kernel(&self, spec: &ContactModelSpec) -> Arc<dyn ContactKernel>;
    fn build_prescription_kernel(&self, spec: &PrescriptionSpec) -> Arc<dyn PrescriptionKernel>;
}

/// Reference backend: interprets specs on the host.
#[derive(Default)]
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn build_contact_kernel(&self, spec: &ContactModelSpec) -> Arc<dyn ContactKernel> {
        match spec {
            ContactModelSpec::HertzMindlin => Arc::new(HertzMindlin),
            ContactModelSpec::Custom(kernel) => kernel.clone(),
        }
    }

    fn build_prescription_kernel(&self, spec: &PrescriptionSpec) -> Arc<dyn PrescriptionKernel> {
        Arc::new(CpuPrescription { spec: spec.clone() })
    }
}

struct CpuPrescription {
    spec: PrescriptionSpec,
}

impl PrescriptionKernel for CpuPrescription {
    fn evaluate(&self, t: f32) -> PrescribedMotion {
        PrescribedMotion {
            lin_vel: self.spec.lin_vel.as_ref().map(|f| f(t)),
            ang_vel: self.spec.ang_vel.as_ref().map(|f| f(t)),
            position: self.spec.position.as_ref().map(|f| f(t)),
            quat: self.spec.quat.as_ref().map(|f| f(t)),
            dictate: self.spec.dictate,
        }
    }
}

/// The default contact model.
///
/// Normal: `F_n = 4/3 E* sqrt(R*) d^1.5`, dashpot proportional to
/// `sqrt(S_n m*)` with the restitution-derived damping shape factor.
/// Tangential: incremental Mindlin spring on the accumulated tangential
/// displacement, Coulomb-capped at `mu * F_n` (the accumulator is rescaled
/// on slip so the spring stays on the cone).
pub struct HertzMindlin;

impl ContactKernel for HertzMindlin {
    fn evaluate(&self, ctx: &mut ContactCtx) -> ContactForce {
        let p = ctx.props;
        let sqrt_rd = (ctx.r_eff * ctx.depth).sqrt();

        // Normal direction: elastic + dissipative.
        let fn_elastic = 4.0 / 3.0 * p.e_eff * sqrt_rd * ctx.depth;
        let s_n = 2.0 * p.e_eff * sqrt_rd;
        let v_n = ctx.rel_vel.dot(ctx.normal);
        let fn_damp = -2.0 * (5.0f32 / 6.0).sqrt() * p.beta * (s_n * ctx.m_eff).sqrt() * v_n;
        // The dashpot may not suck the surfaces together.
        let f_n = (fn_elastic + fn_damp).max(0.0);

        // Tangential spring with history.
        let v_t = ctx.rel_vel - ctx.normal * v_n;
        let mut delta_t = Vec3::new(
            ctx.history[TANGENT_X],
            ctx.history[TANGENT_Y],
            ctx.history[TANGENT_Z],
        );
        // Keep the accumulator in the current tangent plane, then grow it.
        delta_t -= ctx.normal * delta_t.dot(ctx.normal);
        delta_t += v_t * ctx.dt;

        let s_t = 8.0 * p.g_eff * sqrt_rd;
        let mut f_t = -delta_t * s_t;
        let cap = p.mu * f_n;
        let f_t_mag = f_t.length();
        if f_t_mag > cap {
            if cap > 0.0 && f_t_mag > 1e-12 {
                f_t *= cap / f_t_mag;
                // Slipping: the spring cannot stretch past the cone.
                delta_t = -f_t / s_t;
            } else {
                f_t = Vec3::ZERO;
                delta_t = Vec3::ZERO;
            }
        }
        ctx.history[TANGENT_X] = delta_t.x;
        ctx.history[TANGENT_Y] = delta_t.y;
        ctx.history[TANGENT_Z] = delta_t.z;

        // Rolling resistance: plain velocity-opposing torque.
        let torque = if p.crr > 0.0 {
            let w = ctx.rel_ang_vel;
            let w_len = w.length();
            if w_len > 1e-8 {
                -w / w_len * (p.crr * f_n * ctx.r_eff)
            } else {
                Vec3::ZERO
            }
        } else {
            Vec3::ZERO
        };

        ContactForce {
            force: ctx.normal * f_n + f_t,
            torque,
        }
    }
}
