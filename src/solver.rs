//! Major-cycle orchestration for Clark CLEAN deconvolution.
//!
//! The controller alternates between selecting active pixels from the
//! residual, running a bounded batch of minor iterations against the PSF
//! patch, and asking the external residual engine for a full residual
//! refresh. Convergence, iteration budgets, zero-progress stalls and
//! divergence are all handled here; the minor-cycle arithmetic lives in
//! [`crate::minor_cycle`].
//!
//! Heuristic state (stall and divergence flags, the adaptive cycle factor)
//! is local to one `solve` call and resets every run.

use ndarray::{Array2, ArrayD};
use tracing::{info, warn};

use crate::component_list::ComponentList;
use crate::float_trait::CleanFloat;
use crate::image::{image_dims, mask_dims};
use crate::minor_cycle::{run_minor_cycle, MinorCycleParams};
use crate::polarization::Polarization;
use crate::psf::extract_psf_patch;
use crate::scanner::{cache_active_pixels, peak_residual};

// =============================================================================
// Constants
// =============================================================================

/// Default loop gain applied to each clean component.
const DEFAULT_GAIN: f64 = 0.1;

/// Default global flux threshold (clean to the noise by default).
const DEFAULT_THRESHOLD: f64 = 0.0;

/// Default total iteration budget.
const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default cap on minor iterations within one major cycle.
const DEFAULT_MAX_MINOR_PER_MAJOR: usize = 10_000;

/// Default major-cycle cap; negative means unbounded.
const DEFAULT_MAX_MAJOR_CYCLES: i32 = -1;

/// Default cycle factor scaling the per-cycle flux limit.
const DEFAULT_CYCLE_FACTOR: f64 = 1.5;

/// Default PSF patch size per axis.
const DEFAULT_PSF_PATCH_SIZE: usize = 51;

/// Default histogram bin count for the pixel-count threshold heuristic.
const DEFAULT_HIST_BINS: usize = 1024;

/// Default cap on tracked active pixels.
const DEFAULT_MAX_ACTIVE_PIXELS: usize = 32 * 1024;

/// The cycle factor is divided by this empirical scale before use.
const EMPIRICAL_CYCLE_SCALE: f64 = 4.5;

/// Flux-limit scale used by the externally driven single-cycle entry point.
const SINGLE_CYCLE_FACTOR: f64 = 1.0 / 3.0;

/// Fraction of the peak the flux limit is clamped to when the effective
/// scaling factor exceeds one.
const PEAK_CLAMP_FRACTION: f64 = 0.95;

/// Loosening applied to the cycle factor after a zero-pixel stall.
const STALL_LOOSEN_FACTOR: f64 = 1.2;

/// Cycle-factor scale applied when the residual starts rising.
const DIVERGENCE_FACTOR_SCALE: f64 = 3.0;

/// Minor-iteration cap imposed when the residual starts rising.
const DIVERGENCE_MINOR_CAP: usize = 10;

/// Exterior sidelobe level above which minor cycles are cut to almost none.
const SEVERE_SIDELOBE_LEVEL: f64 = 0.5;
const SEVERE_SIDELOBE_MINOR_CAP: usize = 5;

/// Exterior sidelobe level above which minor cycles are shortened.
const HIGH_SIDELOBE_LEVEL: f64 = 0.35;
const HIGH_SIDELOBE_MINOR_CAP: usize = 50;

// =============================================================================
// External interfaces
// =============================================================================

/// The external residual engine: full convolution/FFT machinery that
/// recomputes the residual and serves PSF samples. Treated as a blocking
/// collaborator; this crate never looks inside it.
pub trait ResidualEngine<F> {
    /// Recompute `residual` in place from the current `model`.
    fn residual(&mut self, residual: &mut ArrayD<F>, model: &ArrayD<F>);

    /// Spatial shape of the full PSF.
    fn psf_shape(&self) -> (usize, usize);

    /// Evaluate PSF samples into an array of `shape`, with the PSF peak
    /// placed at index `center` and values scaled by `scale`.
    fn evaluate_psf(&mut self, center: (usize, usize), scale: F, shape: (usize, usize))
        -> Array2<F>;
}

/// Per-iteration progress sink.
pub trait ProgressReporter<F> {
    /// Called once per minor iteration with the running state.
    #[allow(clippy::too_many_arguments)]
    fn report(
        &mut self,
        is_final: bool,
        iteration: usize,
        total_iterations: usize,
        signed_peak: F,
        position: [i32; 2],
        total_flux: F,
        is_first_call: bool,
    );

    /// Called exactly once when the algorithm finishes.
    fn finalize(&mut self);
}

/// Outcome of asking the user whether to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopChoice {
    /// Keep cleaning.
    Continue,
    /// Stop now, keeping the partial model.
    Stop,
    /// Keep cleaning and never ask again.
    DontAskAgain,
}

/// Synchronous continue/stop decision point, consulted between major cycles
/// when zero-progress stalls repeat. Inject a stub in headless use, or leave
/// unset to disable the prompt entirely.
pub trait StopDecider {
    fn decide(&mut self) -> StopChoice;
}

// =============================================================================
// Configuration
// =============================================================================

/// Tunable parameters for a clean run. All fields are independently
/// settable before `solve`; `Default::default()` matches the standard
/// settings.
#[derive(Debug, Clone)]
pub struct CleanConfig<F> {
    /// Loop gain in (0, 1]. Default: 0.1
    pub gain: F,
    /// Global flux threshold; cleaning stops at this residual level.
    /// Default: 0.0
    pub threshold: F,
    /// Total minor-iteration budget. Default: 1000
    pub max_iterations: usize,
    /// Iterations already performed by a previous run, counted against the
    /// budget. Default: 0
    pub initial_iterations: usize,
    /// Cap on minor iterations within one major cycle. Default: 10000
    pub max_minor_per_major: usize,
    /// Cap on major cycles; negative means unbounded. Default: -1
    pub max_major_cycles: i32,
    /// Cycle factor scaling the per-cycle flux limit. Default: 1.5
    pub cycle_factor: F,
    /// Speedup exponent for the adaptive flux-limit decay. Default: 0.0
    pub speedup: F,
    /// Requested PSF patch size per axis. Default: (51, 51)
    pub psf_patch_size: (usize, usize),
    /// Bin count for the pixel-count-based threshold heuristic.
    /// Default: 1024
    pub hist_bins: usize,
    /// Capacity hint for the active-pixel ledger. Default: 32768
    pub max_active_pixels: usize,
    /// User estimate of the maximum exterior PSF sidelobe, used when the
    /// PSF is too small for a measurement. Default: 0.0
    pub max_exterior_psf: F,
}

impl<F: CleanFloat> Default for CleanConfig<F> {
    fn default() -> Self {
        Self {
            gain: F::from_f64_c(DEFAULT_GAIN),
            threshold: F::from_f64_c(DEFAULT_THRESHOLD),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            initial_iterations: 0,
            max_minor_per_major: DEFAULT_MAX_MINOR_PER_MAJOR,
            max_major_cycles: DEFAULT_MAX_MAJOR_CYCLES,
            cycle_factor: F::from_f64_c(DEFAULT_CYCLE_FACTOR),
            speedup: F::from_f64_c(0.0),
            psf_patch_size: (DEFAULT_PSF_PATCH_SIZE, DEFAULT_PSF_PATCH_SIZE),
            hist_bins: DEFAULT_HIST_BINS,
            max_active_pixels: DEFAULT_MAX_ACTIVE_PIXELS,
            max_exterior_psf: F::zero(),
        }
    }
}

impl<F: CleanFloat> CleanConfig<F> {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.gain <= F::zero() || self.gain > F::one() {
            return Err("gain must be in (0, 1]".to_string());
        }
        if self.threshold < F::zero() {
            return Err("threshold must be >= 0".to_string());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be > 0".to_string());
        }
        if self.max_minor_per_major == 0 {
            return Err("max_minor_per_major must be > 0".to_string());
        }
        if self.cycle_factor <= F::zero() {
            return Err("cycle_factor must be > 0".to_string());
        }
        if self.speedup < F::zero() {
            return Err("speedup must be >= 0".to_string());
        }
        if self.psf_patch_size.0 == 0 || self.psf_patch_size.1 == 0 {
            return Err("psf_patch_size must be > 0 per axis".to_string());
        }
        if self.hist_bins < 2 {
            return Err("hist_bins must be >= 2".to_string());
        }
        if self.max_active_pixels == 0 {
            return Err("max_active_pixels must be > 0".to_string());
        }
        if self.max_exterior_psf < F::zero() {
            return Err("max_exterior_psf must be >= 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// How a clean run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanStatus {
    /// The peak residual dropped to the user threshold.
    Converged,
    /// An iteration/cycle budget ran out, or the run stalled with no
    /// selectable pixels.
    Exhausted,
    /// The residual kept rising after mitigation was applied.
    Diverged,
    /// The injected decision provider asked to stop.
    Stopped,
}

/// Terminal state of a clean run. The model holds whatever was deconvolved
/// regardless of the status.
#[derive(Debug, Clone, Copy)]
pub struct CleanOutcome<F> {
    pub status: CleanStatus,
    /// Total minor iterations performed (including `initial_iterations`).
    pub iterations: usize,
    /// Final peak residual magnitude.
    pub peak_residual: F,
    /// Largest number of active pixels any major cycle selected.
    pub max_active_pixels: usize,
    /// Accumulated plane-0 clean flux.
    pub total_flux: F,
}

// =============================================================================
// Controller
// =============================================================================

/// Clark CLEAN solver bound to a caller-owned model image.
///
/// The model is mutated in place. The residual is either supplied by the
/// caller (and refreshed in place) or allocated internally on first use.
pub struct ClarkClean<'a, F> {
    model: &'a mut ArrayD<F>,
    residual: Option<&'a mut ArrayD<F>>,
    owned_residual: Option<ArrayD<F>>,
    mask: Option<&'a ArrayD<F>>,
    config: CleanConfig<F>,
    progress: Option<&'a mut dyn ProgressReporter<F>>,
    decider: Option<&'a mut dyn StopDecider>,
}

impl<'a, F: CleanFloat> ClarkClean<'a, F> {
    /// Bind a solver to `model`. Panics on invalid image shape.
    pub fn new(model: &'a mut ArrayD<F>) -> Self {
        image_dims(model.shape());
        Self {
            model,
            residual: None,
            owned_residual: None,
            mask: None,
            config: CleanConfig::default(),
            progress: None,
            decider: None,
        }
    }

    /// Bind a solver to `model` with a selection mask. Panics on shape
    /// mismatch between mask and model.
    pub fn with_mask(model: &'a mut ArrayD<F>, mask: &'a ArrayD<F>) -> Self {
        let mut this = Self::new(model);
        this.set_mask(mask);
        this
    }

    /// Attach a caller-maintained residual image, refreshed in place by the
    /// engine. Panics if its shape differs from the model's.
    pub fn set_residual(&mut self, residual: &'a mut ArrayD<F>) {
        assert_eq!(
            residual.shape(),
            self.model.shape(),
            "residual shape must match the model"
        );
        self.residual = Some(residual);
        self.owned_residual = None;
    }

    /// Attach a selection mask. Panics on spatial shape mismatch.
    pub fn set_mask(&mut self, mask: &'a ArrayD<F>) {
        let (nx, ny, _) = image_dims(self.model.shape());
        let (mx, my) = mask_dims(mask.shape());
        assert!(
            mx == nx && my == ny,
            "mask spatial shape ({}, {}) must match model ({}, {})",
            mx,
            my,
            nx,
            ny
        );
        self.mask = Some(mask);
    }

    /// Attach a per-iteration progress sink.
    pub fn set_progress_reporter(&mut self, reporter: &'a mut dyn ProgressReporter<F>) {
        self.progress = Some(reporter);
    }

    /// Attach a continue/stop decision provider.
    pub fn set_stop_decider(&mut self, decider: &'a mut dyn StopDecider) {
        self.decider = Some(decider);
    }

    /// Current configuration.
    pub fn config(&self) -> &CleanConfig<F> {
        &self.config
    }

    /// Mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut CleanConfig<F> {
        &mut self.config
    }

    /// Replace the configuration wholesale.
    pub fn set_config(&mut self, config: CleanConfig<F>) {
        self.config = config;
    }

    /// Run major/minor cycles until convergence, budget exhaustion, stall,
    /// divergence or a user stop.
    pub fn solve<E>(&mut self, engine: &mut E) -> Result<CleanOutcome<F>, String>
    where
        E: ResidualEngine<F> + ?Sized,
    {
        self.config.validate()?;
        let cfg = self.config.clone();
        let (nx, ny, npol) = image_dims(self.model.shape());
        let _ = Polarization::from_planes(npol);

        // Compute the residual once if the caller did not supply one.
        if self.residual.is_none() && self.owned_residual.is_none() {
            let mut fresh = ArrayD::zeros(self.model.raw_dim());
            engine.residual(&mut fresh, self.model);
            self.owned_residual = Some(fresh);
        }
        let model: &mut ArrayD<F> = &mut *self.model;
        let residual: &mut ArrayD<F> =
            match (self.residual.as_deref_mut(), self.owned_residual.as_mut()) {
                (Some(r), _) => r,
                (None, Some(r)) => r,
                (None, None) => unreachable!(),
            };
        let mask = self.mask;

        let psf = extract_psf_patch(engine, (nx, ny), cfg.psf_patch_size, cfg.max_exterior_psf);
        let max_ext = psf.max_exterior_sidelobe;
        let mut max_minor = cfg.max_minor_per_major;
        if max_ext > F::from_f64_c(SEVERE_SIDELOBE_LEVEL) {
            warn!(
                "exterior sidelobe {:?} is severe, limiting minor cycles to {}",
                max_ext, SEVERE_SIDELOBE_MINOR_CAP
            );
            max_minor = SEVERE_SIDELOBE_MINOR_CAP;
        } else if max_ext > F::from_f64_c(HIGH_SIDELOBE_LEVEL) {
            warn!(
                "exterior sidelobe {:?} is high, limiting minor cycles to {}",
                max_ext, HIGH_SIDELOBE_MINOR_CAP
            );
            max_minor = HIGH_SIDELOBE_MINOR_CAP;
        }

        let mut factor = cfg.cycle_factor / F::from_f64_c(EMPIRICAL_CYCLE_SCALE);
        let mut num_iterations = cfg.initial_iterations;
        let mut num_major: i32 = 0;
        let mut max_num_pix = 0usize;
        let mut total_flux = F::zero();
        let mut just_starting = true;
        let mut stalled = false;
        let mut auto_continue = false;
        let mut mitigated = false;

        let mut peak = peak_residual(residual, mask);
        if num_iterations > 0 {
            info!("initial maximum residual: {:?}", peak);
        }
        let mut prev_peak = peak;

        let status = loop {
            if peak <= cfg.threshold {
                break CleanStatus::Converged;
            }
            if num_iterations >= cfg.max_iterations {
                break CleanStatus::Exhausted;
            }
            if cfg.max_major_cycles >= 0 && num_major >= cfg.max_major_cycles {
                break CleanStatus::Exhausted;
            }

            // Residuals below peak * (PSF value outside the patch) cannot be
            // cleaned safely this cycle.
            let mut flux_limit = peak * max_ext * factor;
            if factor > F::one() {
                flux_limit = (F::from_f64_c(PEAK_CLAMP_FRACTION) * peak).min(flux_limit);
            }

            let mut active = ComponentList::new(npol, cfg.max_active_pixels);
            cache_active_pixels(&mut active, residual, mask, flux_limit.max(cfg.threshold));
            let num_pix = active.len();

            if num_pix == 0 {
                warn!(
                    "zero pixels selected with a flux limit of {:?} and a maximum residual of {:?}",
                    flux_limit, peak
                );
                if stalled {
                    let choice = if auto_continue {
                        Some(StopChoice::Continue)
                    } else {
                        self.decider.as_deref_mut().map(|d| d.decide())
                    };
                    match choice {
                        Some(StopChoice::Continue) => {
                            factor = factor * F::from_f64_c(STALL_LOOSEN_FACTOR);
                            continue;
                        }
                        Some(StopChoice::DontAskAgain) => {
                            info!("continuing, won't ask again");
                            auto_continue = true;
                            factor = factor * F::from_f64_c(STALL_LOOSEN_FACTOR);
                            continue;
                        }
                        Some(StopChoice::Stop) => {
                            info!("clean stopped at user request");
                            break CleanStatus::Stopped;
                        }
                        None => {
                            warn!("bailing out prior to reaching the threshold, the residual is not converging");
                            break CleanStatus::Exhausted;
                        }
                    }
                }
                factor = factor * F::from_f64_c(STALL_LOOSEN_FACTOR);
                stalled = true;
                continue;
            }
            stalled = false;

            let budget = max_minor.min(cfg.max_iterations - num_iterations);
            let params = MinorCycleParams {
                gain: cfg.gain,
                flux_limit,
                threshold: cfg.threshold,
                max_iterations: budget,
                speedup: cfg.speedup,
                uncertainty: F::zero(),
                total_iterations: num_iterations,
            };
            let result = run_minor_cycle(
                &mut active,
                psf.patch.view(),
                model,
                &params,
                self.progress
                    .as_deref_mut()
                    .map(|p| p as &mut dyn ProgressReporter<F>),
                &mut total_flux,
                &mut just_starting,
            );
            num_iterations += result.iterations;
            max_num_pix = max_num_pix.max(num_pix);

            engine.residual(residual, model);
            peak = result.peak;

            if peak > prev_peak {
                if mitigated {
                    warn!("residual still rising after mitigation, stopping with the partial model");
                    break CleanStatus::Diverged;
                }
                warn!(
                    "slowing down in the minor cycle loop, the PSF may have bad sidelobes"
                );
                factor = factor * F::from_f64_c(DIVERGENCE_FACTOR_SCALE);
                max_minor = DIVERGENCE_MINOR_CAP;
                mitigated = true;
            }
            prev_peak = peak;
            num_major += 1;

            info!(
                "iteration {}: maximum residual {:?}, flux limit {:?}, {} active pixels",
                num_iterations,
                peak,
                flux_limit.max(cfg.threshold),
                num_pix
            );
        };

        if let Some(rep) = self
            .progress
            .as_deref_mut()
            .map(|p| p as &mut dyn ProgressReporter<F>)
        {
            rep.finalize();
        }
        Ok(CleanOutcome {
            status,
            iterations: num_iterations,
            peak_residual: peak,
            max_active_pixels: max_num_pix,
            total_flux,
        })
    }

    /// Run exactly one pixel-selection + minor-cycle batch against a
    /// caller-maintained residual, without refreshing it afterwards.
    ///
    /// Intended for callers that drive the major-cycle alternation
    /// themselves. Returns `Exhausted` when no pixels clear the flux limit.
    pub fn solve_single_cycle<E>(
        &mut self,
        engine: &mut E,
        residual: &mut ArrayD<F>,
    ) -> Result<CleanOutcome<F>, String>
    where
        E: ResidualEngine<F> + ?Sized,
    {
        self.config.validate()?;
        let cfg = self.config.clone();
        let (nx, ny, npol) = image_dims(self.model.shape());
        assert_eq!(
            residual.shape(),
            self.model.shape(),
            "residual shape must match the model"
        );
        let model: &mut ArrayD<F> = &mut *self.model;
        let mask = self.mask;

        let psf = extract_psf_patch(engine, (nx, ny), cfg.psf_patch_size, cfg.max_exterior_psf);
        let factor = F::from_f64_c(SINGLE_CYCLE_FACTOR);

        let peak = peak_residual(residual, mask);
        info!("initial maximum residual: {:?}", peak);

        let flux_limit = peak * psf.max_exterior_sidelobe * factor;
        let mut active = ComponentList::new(npol, cfg.max_active_pixels);
        cache_active_pixels(&mut active, residual, mask, flux_limit.max(cfg.threshold));

        if active.is_empty() {
            warn!(
                "zero pixels selected with a flux limit of {:?} and a maximum residual of {:?}",
                flux_limit, peak
            );
            return Ok(CleanOutcome {
                status: CleanStatus::Exhausted,
                iterations: cfg.initial_iterations,
                peak_residual: peak,
                max_active_pixels: 0,
                total_flux: F::zero(),
            });
        }

        let num_pix = active.len();
        let mut total_flux = F::zero();
        let mut just_starting = true;
        let budget = cfg
            .max_minor_per_major
            .min(cfg.max_iterations.saturating_sub(cfg.initial_iterations));
        let params = MinorCycleParams {
            gain: cfg.gain,
            flux_limit,
            threshold: cfg.threshold,
            max_iterations: budget,
            speedup: cfg.speedup,
            uncertainty: F::zero(),
            total_iterations: cfg.initial_iterations,
        };
        let result = run_minor_cycle(
            &mut active,
            psf.patch.view(),
            model,
            &params,
            self.progress
                .as_deref_mut()
                .map(|p| p as &mut dyn ProgressReporter<F>),
            &mut total_flux,
            &mut just_starting,
        );

        let status = if result.peak <= cfg.threshold {
            CleanStatus::Converged
        } else {
            CleanStatus::Exhausted
        };
        Ok(CleanOutcome {
            status,
            iterations: cfg.initial_iterations + result.iterations,
            peak_residual: result.peak,
            max_active_pixels: num_pix,
            total_flux,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
