//! Clark CLEAN Deconvolution Library
//!
//! Pure Rust implementation of the Clark variant of the CLEAN algorithm for
//! radio-interferometric image deconvolution. The crate owns the iterative
//! major/minor-cycle machinery; residual recomputation and PSF evaluation are
//! delegated to a caller-supplied [`ResidualEngine`].

pub mod component_list;
pub mod float_trait;
pub mod image;
pub mod minor_cycle;
pub mod polarization;
pub mod psf;
pub mod scanner;
pub mod solver;

// Re-export commonly used types at the crate root
pub use component_list::ComponentList;
pub use float_trait::CleanFloat;
pub use polarization::{Peak, Polarization};
pub use psf::{extract_psf_patch, PsfPatch};
pub use scanner::{biggest_residuals, cache_active_pixels, peak_residual};
pub use solver::{
    ClarkClean, CleanConfig, CleanOutcome, CleanStatus, ProgressReporter, ResidualEngine,
    StopChoice, StopDecider,
};
