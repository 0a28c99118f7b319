//! Polarization plane-count kernels.
//!
//! The residual image carries 1, 2 or 4 polarization planes. Pixel selection
//! and peak finding need a single scalar magnitude per spatial pixel, and the
//! rule for combining planes depends on the plane count. Rather than
//! fanning out over the plane count at every call site, the closed
//! [`Polarization`] enum owns the combination rule and the ledger peak
//! search built on it.
//!
//! The combination rule is total intensity from the parallel-hand planes:
//! plane 0 alone for a single plane, the mean of planes 0 and 1 for dual,
//! and the mean of planes 0 and 3 for the full four-correlation case.

use crate::component_list::ComponentList;
use crate::float_trait::CleanFloat;

/// Number of polarization planes present in an image, as a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarization {
    /// One plane (total intensity only).
    Single,
    /// Two parallel-hand planes.
    Dual,
    /// All four correlation planes.
    Full,
}

impl Polarization {
    /// Map a plane count to its kernel set. Panics on counts outside {1, 2, 4}.
    pub fn from_planes(npol: usize) -> Self {
        match npol {
            1 => Polarization::Single,
            2 => Polarization::Dual,
            4 => Polarization::Full,
            _ => panic!("polarization plane count must be 1, 2 or 4, got {}", npol),
        }
    }

    /// Number of planes this kernel set operates on.
    pub fn planes(self) -> usize {
        match self {
            Polarization::Single => 1,
            Polarization::Dual => 2,
            Polarization::Full => 4,
        }
    }

    /// Combined scalar magnitude of one pixel's plane values.
    #[inline]
    pub fn combined_magnitude<F: CleanFloat>(self, flux: &[F]) -> F {
        let half = F::from_f64_c(0.5);
        match self {
            Polarization::Single => flux[0].abs(),
            Polarization::Dual => (flux[0] + flux[1]).abs() * half,
            Polarization::Full => (flux[0] + flux[3]).abs() * half,
        }
    }
}

/// Location and magnitude of the strongest entry in a ledger.
#[derive(Debug, Clone, Copy)]
pub struct Peak<F> {
    /// Row index into the ledger.
    pub index: usize,
    /// Combined magnitude at that row.
    pub magnitude: F,
}

/// Find the largest-magnitude entry in `list`. Panics if the list is empty.
pub fn find_peak<F: CleanFloat>(list: &ComponentList<F>, pol: Polarization) -> Peak<F> {
    assert!(!list.is_empty(), "cannot find a peak in an empty ledger");
    let mut best = Peak {
        index: 0,
        magnitude: pol.combined_magnitude(list.flux(0)),
    };
    for i in 1..list.len() {
        let mag = pol.combined_magnitude(list.flux(i));
        if mag > best.magnitude {
            best = Peak {
                index: i,
                magnitude: mag,
            };
        }
    }
    best
}
