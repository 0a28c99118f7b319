//! The innermost greedy peak-find-and-subtract loop.
//!
//! One batch of minor iterations repeatedly takes the strongest pixel in the
//! active ledger, records a gain-scaled clean component at its position, and
//! subtracts the component's PSF-patch contribution from every active pixel
//! inside the patch footprint. The per-iteration flux limit rises with the
//! accumulated uncertainty factor: components found late in a batch sit on a
//! residual polluted by exterior sidelobes, so the loop stops trusting them
//! sooner when the speedup exponent is non-zero.
//!
//! Recorded components are merged additively into the model image on exit;
//! the full residual refresh is the caller's business.

use ndarray::{ArrayD, ArrayView2};

use crate::component_list::ComponentList;
use crate::float_trait::CleanFloat;
use crate::image::{image_dims, planes_view_mut};
use crate::polarization::{find_peak, Polarization};
use crate::solver::ProgressReporter;

/// Tunables for one minor-cycle batch.
#[derive(Debug, Clone)]
pub struct MinorCycleParams<F> {
    /// Loop gain, in (0, 1].
    pub gain: F,
    /// Flux limit this batch was selected with.
    pub flux_limit: F,
    /// Global user threshold; the per-iteration limit never drops below it.
    pub threshold: F,
    /// Iteration budget for this batch.
    pub max_iterations: usize,
    /// Speedup exponent for the adaptive limit decay; 0 disables the effect.
    pub speedup: F,
    /// Uncertainty factor carried into the batch (reset per major cycle).
    pub uncertainty: F,
    /// Iterations already performed in earlier batches.
    pub total_iterations: usize,
}

/// What one batch of minor iterations produced.
#[derive(Debug, Clone, Copy)]
pub struct MinorCycleResult<F> {
    /// Iterations actually performed (≤ the budget).
    pub iterations: usize,
    /// Combined magnitude of the strongest remaining active pixel.
    pub peak: F,
}

/// Run one batch of minor iterations over `active`, merging the clean
/// components found into `model`.
///
/// Panics if `active` is empty; the caller must not invoke the engine on an
/// empty ledger.
#[allow(clippy::too_many_arguments)]
pub fn run_minor_cycle<F: CleanFloat>(
    active: &mut ComponentList<F>,
    psf_patch: ArrayView2<F>,
    model: &mut ArrayD<F>,
    params: &MinorCycleParams<F>,
    mut progress: Option<&mut dyn ProgressReporter<F>>,
    total_flux: &mut F,
    just_starting: &mut bool,
) -> MinorCycleResult<F> {
    assert!(!active.is_empty(), "minor cycle invoked on an empty ledger");
    let npol = active.npol();
    let pol = Polarization::from_planes(npol);
    let mut components = ComponentList::new(npol, params.max_iterations);

    let peak = find_peak(active, pol);
    let mut peak_flux = [F::zero(); 4];
    peak_flux[..npol].copy_from_slice(active.flux(peak.index));
    let mut peak_pos = active.position(peak.index);
    let mut abs_peak = peak.magnitude;

    let mut iter = 0;
    let mut fmn = params.uncertainty;
    let mut iter_flux_limit = params.flux_limit.max(params.threshold);
    let speedup_factor = if abs_peak > F::zero() {
        (params.flux_limit / abs_peak).powf(params.speedup)
    } else {
        F::one()
    };

    while iter < params.max_iterations && abs_peak > iter_flux_limit {
        for p in 0..npol {
            peak_flux[p] *= params.gain;
        }
        *total_flux += peak_flux[0];
        components.push(&peak_flux[..npol], peak_pos);
        subtract_component(active, &peak_flux[..npol], peak_pos, psf_patch);
        iter += 1;

        let pk = find_peak(active, pol);
        peak_flux[..npol].copy_from_slice(active.flux(pk.index));
        peak_pos = active.position(pk.index);
        abs_peak = pk.magnitude;

        fmn += speedup_factor / F::usize_as(params.total_iterations + iter);
        iter_flux_limit = (params.flux_limit * fmn).max(params.threshold);

        if let Some(rep) = progress.as_deref_mut() {
            let signed = if peak_flux[0] < F::zero() {
                -abs_peak
            } else {
                abs_peak
            };
            rep.report(
                false,
                params.total_iterations + iter,
                params.max_iterations,
                signed,
                peak_pos,
                *total_flux,
                *just_starting,
            );
            *just_starting = false;
        }
    }

    merge_components(model, &components);
    MinorCycleResult {
        iterations: iter,
        peak: abs_peak,
    }
}

/// Subtract a clean component's patch contribution from every active pixel
/// inside the patch footprint around `comp_pos`. Planes are treated
/// independently; pixels outside the footprint are untouched.
pub fn subtract_component<F: CleanFloat>(
    active: &mut ComponentList<F>,
    comp_flux: &[F],
    comp_pos: [i32; 2],
    psf_patch: ArrayView2<F>,
) {
    let (nx, ny) = psf_patch.dim();
    let hx = (nx / 2) as i32;
    let hy = (ny / 2) as i32;
    let npol = active.npol();
    debug_assert_eq!(comp_flux.len(), npol);
    for i in 0..active.len() {
        let pos = active.position(i);
        let dx = pos[0] - comp_pos[0] + hx;
        let dy = pos[1] - comp_pos[1] + hy;
        if dx >= 0 && (dx as usize) < nx && dy >= 0 && (dy as usize) < ny {
            let w = psf_patch[[dx as usize, dy as usize]];
            let row = active.flux_mut(i);
            for p in 0..npol {
                row[p] -= comp_flux[p] * w;
            }
        }
    }
}

/// Accumulate clean components into the model image at their global
/// positions. Existing model flux is added to, never overwritten.
fn merge_components<F: CleanFloat>(model: &mut ArrayD<F>, components: &ComponentList<F>) {
    if components.is_empty() {
        return;
    }
    let (_, _, npol) = image_dims(model.shape());
    assert_eq!(npol, components.npol(), "component planes must match model");
    let mut planes = planes_view_mut(model);
    for i in 0..components.len() {
        let pos = components.position(i);
        let flux = components.flux(i);
        for p in 0..npol {
            planes[[pos[0] as usize, pos[1] as usize, p]] += flux[p];
        }
    }
}
