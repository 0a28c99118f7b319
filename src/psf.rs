//! PSF patch sizing and the exterior-sidelobe metric.
//!
//! Minor cycles subtract a small patch of the PSF instead of recomputing the
//! full convolution, so everything the patch does not cover leaks into the
//! residual. The maximum absolute PSF value outside the patch bounds that
//! leakage and calibrates the per-cycle flux limit: residuals below
//! `peak * max_exterior_sidelobe` cannot be trusted until the next full
//! residual refresh.

use ndarray::{Array2, ArrayView2};

use crate::float_trait::CleanFloat;
use crate::solver::ResidualEngine;

/// A resolved PSF patch and its exterior-sidelobe level.
#[derive(Debug, Clone)]
pub struct PsfPatch<F> {
    /// The extracted patch, PSF peak at the patch centre.
    pub patch: Array2<F>,
    /// Maximum absolute PSF value strictly outside the patch footprint.
    pub max_exterior_sidelobe: F,
}

impl<F: CleanFloat> PsfPatch<F> {
    /// Patch size per spatial axis.
    pub fn size(&self) -> (usize, usize) {
        self.patch.dim()
    }
}

/// Determine the patch size to use and extract it from the engine.
///
/// The size is bounded per axis by `min(2 * model, psf)` — anything larger
/// cannot affect the cleaning — and by `requested`. The exterior sidelobe is
/// measured from the true PSF where the PSF is large enough; otherwise the
/// caller-supplied `user_estimate` is used, or the max of both when a
/// measurement is still possible outside a smaller-than-PSF patch.
pub fn extract_psf_patch<F, E>(
    engine: &mut E,
    model_shape: (usize, usize),
    requested: (usize, usize),
    user_estimate: F,
) -> PsfPatch<F>
where
    F: CleanFloat,
    E: ResidualEngine<F> + ?Sized,
{
    let (pnx, pny) = engine.psf_shape();
    assert!(pnx > 0 && pny > 0, "PSF must have 2 non-empty spatial dimensions");
    let (mnx, mny) = model_shape;
    assert!(mnx > 0 && mny > 0, "model must have 2 non-empty spatial dimensions");

    let max_size = ((2 * mnx).min(pnx), (2 * mny).min(pny));
    let size = (requested.0.min(max_size.0), requested.1.min(max_size.1));
    let centre = (pnx / 2, pny / 2);

    let psf_covers_model = 2 * mnx <= pnx && 2 * mny <= pny;
    let max_ext = if psf_covers_model {
        if size == (2 * mnx, 2 * mny) {
            // The patch spans everything that can interact; exterior
            // sidelobes are irrelevant.
            F::zero()
        } else {
            let full = engine.evaluate_psf(centre, F::one(), (pnx, pny));
            abs_max_beyond(full.view(), centre, size)
        }
    } else if size == (pnx, pny) {
        // Nothing outside the patch can be measured.
        user_estimate
    } else {
        let full = engine.evaluate_psf(centre, F::one(), (pnx, pny));
        abs_max_beyond(full.view(), centre, size).max(user_estimate)
    };

    let patch = engine.evaluate_psf((size.0 / 2, size.1 / 2), F::one(), size);
    assert_eq!(
        patch.dim(),
        size,
        "engine returned a patch of the wrong size"
    );
    PsfPatch {
        patch,
        max_exterior_sidelobe: max_ext,
    }
}

/// Maximum absolute value of `psf` strictly outside the `patch_size` box
/// whose half-extent sits at `centre`.
pub fn abs_max_beyond<F: CleanFloat>(
    psf: ArrayView2<F>,
    centre: (usize, usize),
    patch_size: (usize, usize),
) -> F {
    let (nx, ny) = psf.dim();
    let x_lo = centre.0 as isize - (patch_size.0 / 2) as isize;
    let x_hi = x_lo + patch_size.0 as isize;
    let y_lo = centre.1 as isize - (patch_size.1 / 2) as isize;
    let y_hi = y_lo + patch_size.1 as isize;

    let mut max_val = F::zero();
    for x in 0..nx {
        let x_outside = (x as isize) < x_lo || (x as isize) >= x_hi;
        for y in 0..ny {
            if x_outside || (y as isize) < y_lo || (y as isize) >= y_hi {
                let v = psf[[x, y]].abs();
                if v > max_val {
                    max_val = v;
                }
            }
        }
    }
    max_val
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, ArrayD};

    /// Engine backed by a fixed in-memory PSF. `evaluate_psf` places the
    /// stored PSF's centre at the requested output index.
    pub(crate) struct StaticPsfEngine {
        pub psf: Array2<f32>,
    }

    impl ResidualEngine<f32> for StaticPsfEngine {
        fn residual(&mut self, _residual: &mut ArrayD<f32>, _model: &ArrayD<f32>) {
            unreachable!("patch extraction never refreshes the residual");
        }

        fn psf_shape(&self) -> (usize, usize) {
            self.psf.dim()
        }

        fn evaluate_psf(
            &mut self,
            center: (usize, usize),
            scale: f32,
            shape: (usize, usize),
        ) -> Array2<f32> {
            let (pnx, pny) = self.psf.dim();
            let c = (pnx / 2, pny / 2);
            Array2::from_shape_fn(shape, |(i, j)| {
                let x = c.0 as isize - center.0 as isize + i as isize;
                let y = c.1 as isize - center.1 as isize + j as isize;
                if x >= 0 && (x as usize) < pnx && y >= 0 && (y as usize) < pny {
                    self.psf[[x as usize, y as usize]] * scale
                } else {
                    0.0
                }
            })
        }
    }

    fn delta_psf(nx: usize, ny: usize) -> Array2<f32> {
        let mut psf = Array2::zeros((nx, ny));
        psf[[nx / 2, ny / 2]] = 1.0;
        psf
    }

    #[test]
    fn test_patch_size_bounded_by_request() {
        let mut engine = StaticPsfEngine {
            psf: delta_psf(128, 128),
        };
        let patch = extract_psf_patch(&mut engine, (64, 64), (51, 51), 0.0f32);
        assert_eq!(patch.size(), (51, 51));
        assert_eq!(patch.patch[[25, 25]], 1.0);
        assert_eq!(patch.max_exterior_sidelobe, 0.0);
    }

    #[test]
    fn test_patch_size_bounded_by_psf() {
        let mut engine = StaticPsfEngine {
            psf: delta_psf(32, 32),
        };
        let patch = extract_psf_patch(&mut engine, (64, 64), (51, 51), 0.2f32);
        assert_eq!(patch.size(), (32, 32));
        // The patch is the whole PSF: only the user estimate is available.
        assert_eq!(patch.max_exterior_sidelobe, 0.2);
    }

    #[test]
    fn test_patch_covering_twice_model_has_no_exterior() {
        let mut psf = delta_psf(64, 64);
        psf[[2, 2]] = 0.9; // sidelobe that would otherwise dominate
        let mut engine = StaticPsfEngine { psf };
        let patch = extract_psf_patch(&mut engine, (16, 16), (32, 32), 0.0f32);
        assert_eq!(patch.size(), (32, 32));
        assert_eq!(patch.max_exterior_sidelobe, 0.0);
    }

    #[test]
    fn test_exterior_sidelobe_measured_from_full_psf() {
        let mut psf = delta_psf(128, 128);
        psf[[4, 4]] = 0.25; // well outside a 51x51 patch around (64, 64)
        let mut engine = StaticPsfEngine { psf };
        let patch = extract_psf_patch(&mut engine, (32, 32), (51, 51), 0.0f32);
        assert_eq!(patch.size(), (51, 51));
        assert_eq!(patch.max_exterior_sidelobe, 0.25);
    }

    #[test]
    fn test_user_estimate_combined_with_measurement() {
        // PSF smaller than 2x model but larger than the patch: measured
        // exterior and user estimate are both considered.
        let mut psf = delta_psf(64, 64);
        psf[[1, 1]] = 0.15;
        let mut engine = StaticPsfEngine { psf };
        let patch = extract_psf_patch(&mut engine, (64, 64), (31, 31), 0.4f32);
        assert_eq!(patch.size(), (31, 31));
        assert_eq!(patch.max_exterior_sidelobe, 0.4);

        let mut psf2 = delta_psf(64, 64);
        psf2[[1, 1]] = 0.6;
        let mut engine2 = StaticPsfEngine { psf: psf2 };
        let patch2 = extract_psf_patch(&mut engine2, (64, 64), (31, 31), 0.4f32);
        assert_eq!(patch2.max_exterior_sidelobe, 0.6);
    }

    #[test]
    fn test_abs_max_beyond_ignores_interior() {
        let mut psf = Array2::<f32>::zeros((9, 9));
        psf[[4, 4]] = 1.0;
        psf[[4, 5]] = 0.8; // inside a 3x3 box around the centre
        psf[[0, 0]] = 0.3;
        psf[[8, 4]] = -0.5;
        let max = abs_max_beyond(psf.view(), (4, 4), (3, 3));
        assert_eq!(max, 0.5);
    }

    #[test]
    fn test_abs_max_beyond_whole_array_inside() {
        let mut psf = Array2::<f32>::zeros((5, 5));
        psf[[2, 2]] = 1.0;
        let max = abs_max_beyond(psf.view(), (2, 2), (5, 5));
        assert_eq!(max, 0.0);
    }
}
