//! Image shape validation and plane views.
//!
//! Images handled by this crate are 2-to-4 dimensional float grids: dimensions
//! 0 and 1 are spatial (x, y), dimension 2, when present, is polarization
//! (1, 2 or 4 planes), and any trailing dimensions must have size 1. Shape
//! violations are programming errors and fail fast with a panic rather than a
//! recoverable error.

use ndarray::{ArrayD, ArrayView2, ArrayView3, ArrayViewMut3};

use crate::float_trait::CleanFloat;

/// Validate an image shape and return `(nx, ny, npol)`.
///
/// Panics on fewer than 2 spatial dimensions, a polarization axis not in
/// {1, 2, 4}, or any trailing dimension of size other than 1.
pub fn image_dims(shape: &[usize]) -> (usize, usize, usize) {
    assert!(
        shape.len() >= 2,
        "image must have at least 2 spatial dimensions, got shape {:?}",
        shape
    );
    let nx = shape[0];
    let ny = shape[1];
    assert!(nx > 0 && ny > 0, "spatial dimensions must be non-empty");
    let npol = if shape.len() >= 3 { shape[2] } else { 1 };
    assert!(
        npol == 1 || npol == 2 || npol == 4,
        "polarization axis must have size 1, 2 or 4, got {}",
        npol
    );
    for (i, &d) in shape.iter().enumerate().skip(3) {
        assert!(d == 1, "image dimension {} must have size 1, got {}", i, d);
    }
    (nx, ny, npol)
}

/// Validate a mask shape and return `(nx, ny)`.
///
/// A mask carries no polarization planes: every dimension past the spatial
/// pair must have size 1.
pub fn mask_dims(shape: &[usize]) -> (usize, usize) {
    assert!(
        shape.len() >= 2,
        "mask must have at least 2 spatial dimensions, got shape {:?}",
        shape
    );
    for (i, &d) in shape.iter().enumerate().skip(2) {
        assert!(d == 1, "mask dimension {} must have size 1, got {}", i, d);
    }
    (shape[0], shape[1])
}

/// View an image as `(nx, ny, npol)`, collapsing trailing size-1 dimensions.
pub fn planes_view<F: CleanFloat>(image: &ArrayD<F>) -> ArrayView3<'_, F> {
    let (nx, ny, npol) = image_dims(image.shape());
    image
        .view()
        .into_shape_with_order((nx, ny, npol))
        .expect("image must be in standard (row-major) layout")
}

/// Mutable variant of [`planes_view`].
pub fn planes_view_mut<F: CleanFloat>(image: &mut ArrayD<F>) -> ArrayViewMut3<'_, F> {
    let (nx, ny, npol) = image_dims(image.shape());
    image
        .view_mut()
        .into_shape_with_order((nx, ny, npol))
        .expect("image must be in standard (row-major) layout")
}

/// View a mask as `(nx, ny)`, collapsing trailing size-1 dimensions.
pub fn mask_view<F: CleanFloat>(mask: &ArrayD<F>) -> ArrayView2<'_, F> {
    let (nx, ny) = mask_dims(mask.shape());
    mask.view()
        .into_shape_with_order((nx, ny))
        .expect("mask must be in standard (row-major) layout")
}
