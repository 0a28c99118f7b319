//! Active-pixel selection over the residual image.
//!
//! The residual is walked in fixed-size tiles; every pixel whose combined
//! polarization magnitude exceeds the flux limit is appended to a
//! [`ComponentList`] with its tile-local position, and positions are
//! translated to global coordinates once the tile is finished. When a tile
//! finds more pixels than the ledger can hold, the ledger is grown to fit and
//! the tile is rescanned; the rescan reproduces the identical selection, so
//! the recovery is invisible to the caller.
//!
//! A soft mask, when present, weights residual values during selection and
//! the weighted values are what gets stored; the subtraction arithmetic never
//! sees the mask itself.

use ndarray::{s, ArrayD, ArrayView2, ArrayView3};

use crate::component_list::ComponentList;
use crate::float_trait::CleanFloat;
use crate::image::{image_dims, mask_dims, mask_view, planes_view};
use crate::polarization::Polarization;

/// Tile edge used when walking the residual image.
///
/// Stands in for the storage granularity of a tiled on-disk image; the value
/// is a cache-friendly block for in-memory arrays.
pub const SCAN_TILE_SIZE: usize = 64;

/// Collect every pixel of `residual` whose combined magnitude exceeds
/// `flux_limit` into `list`, growing the ledger as needed.
///
/// Positions are recorded in global image coordinates. The ledger's used
/// count only ever increases. Panics on residual/mask/ledger shape
/// mismatches.
pub fn cache_active_pixels<F: CleanFloat>(
    list: &mut ComponentList<F>,
    residual: &ArrayD<F>,
    mask: Option<&ArrayD<F>>,
    flux_limit: F,
) {
    let (nx, ny, npol) = image_dims(residual.shape());
    assert_eq!(
        npol,
        list.npol(),
        "ledger plane count must match the residual"
    );
    let res = planes_view(residual);
    let mask2 = mask.map(|m| {
        let (mx, my) = mask_dims(m.shape());
        assert!(
            mx == nx && my == ny,
            "mask spatial shape ({}, {}) must match residual ({}, {})",
            mx,
            my,
            nx,
            ny
        );
        mask_view(m)
    });
    let pol = Polarization::from_planes(npol);

    let mut x0 = 0;
    while x0 < nx {
        let x1 = (x0 + SCAN_TILE_SIZE).min(nx);
        let mut y0 = 0;
        while y0 < ny {
            let y1 = (y0 + SCAN_TILE_SIZE).min(ny);
            let tile = res.slice(s![x0..x1, y0..y1, ..]);
            let mask_tile = mask2.as_ref().map(|m| m.slice(s![x0..x1, y0..y1]));

            let mark = list.len();
            let found = scan_tile(list, tile, mask_tile.as_ref(), flux_limit, pol);
            if mark + found > list.capacity() {
                // Not everything fit: grow to the exact requirement and
                // redo this tile from the mark.
                list.truncate(mark);
                list.grow(mark + found);
                let refound = scan_tile(list, tile, mask_tile.as_ref(), flux_limit, pol);
                debug_assert_eq!(refound, found, "tile rescan must be idempotent");
                debug_assert_eq!(list.len(), mark + found);
            }
            list.translate_from(mark, [x0 as i32, y0 as i32]);
            y0 = y1;
        }
        x0 = x1;
    }
}

/// Scan one tile, appending rows with tile-local positions until the ledger
/// capacity is hit. Returns the number of matching pixels in the tile,
/// which may exceed the number actually appended.
fn scan_tile<F: CleanFloat>(
    list: &mut ComponentList<F>,
    tile: ArrayView3<F>,
    mask_tile: Option<&ArrayView2<F>>,
    flux_limit: F,
    pol: Polarization,
) -> usize {
    let (tx, ty, npol) = tile.dim();
    let mut found = 0;
    let mut row = [F::zero(); 4];
    for x in 0..tx {
        for y in 0..ty {
            let weight = mask_tile.map(|m| m[[x, y]]);
            for p in 0..npol {
                let v = tile[[x, y, p]];
                row[p] = match weight {
                    Some(w) => v * w,
                    None => v,
                };
            }
            if pol.combined_magnitude(&row[..npol]) > flux_limit {
                found += 1;
                if list.remaining() > 0 {
                    list.push(&row[..npol], [x as i32, y as i32]);
                }
            }
        }
    }
    found
}

/// Largest combined magnitude anywhere in the residual, mask-weighted when a
/// mask is present.
pub fn peak_residual<F: CleanFloat>(residual: &ArrayD<F>, mask: Option<&ArrayD<F>>) -> F {
    let (nx, ny, npol) = image_dims(residual.shape());
    let res = planes_view(residual);
    let mask2 = mask.map(|m| mask_view(m));
    let pol = Polarization::from_planes(npol);

    let mut max_val = F::zero();
    let mut row = [F::zero(); 4];
    for x in 0..nx {
        for y in 0..ny {
            let weight = mask2.as_ref().map(|m| m[[x, y]]);
            for p in 0..npol {
                let v = res[[x, y, p]];
                row[p] = match weight {
                    Some(w) => v * w,
                    None => v,
                };
            }
            let mag = pol.combined_magnitude(&row[..npol]);
            if mag > max_val {
                max_val = mag;
            }
        }
    }
    max_val
}

/// Histogram of combined magnitudes over `[min, max]`, mask-weighted.
///
/// Fills `hist` (one counter per bin) and returns the `(min, max)` magnitude
/// range the bins cover. With a degenerate range every pixel lands in bin 0.
pub fn abs_histogram<F: CleanFloat>(
    hist: &mut [usize],
    residual: &ArrayD<F>,
    mask: Option<&ArrayD<F>>,
) -> (F, F) {
    assert!(hist.len() >= 2, "histogram needs at least 2 bins");
    let (nx, ny, npol) = image_dims(residual.shape());
    let res = planes_view(residual);
    let mask2 = mask.map(|m| mask_view(m));
    let pol = Polarization::from_planes(npol);

    hist.iter_mut().for_each(|h| *h = 0);

    let mut min_val = F::infinity();
    let mut max_val = F::zero();
    let mut row = [F::zero(); 4];
    let magnitude = |res: &ArrayView3<F>, row: &mut [F; 4], x: usize, y: usize| {
        let weight = mask2.as_ref().map(|m| m[[x, y]]);
        for p in 0..npol {
            let v = res[[x, y, p]];
            row[p] = match weight {
                Some(w) => v * w,
                None => v,
            };
        }
        pol.combined_magnitude(&row[..npol])
    };

    for x in 0..nx {
        for y in 0..ny {
            let mag = magnitude(&res, &mut row, x, y);
            if mag < min_val {
                min_val = mag;
            }
            if mag > max_val {
                max_val = mag;
            }
        }
    }

    let nbins = hist.len();
    let range = max_val - min_val;
    for x in 0..nx {
        for y in 0..ny {
            let mag = magnitude(&res, &mut row, x, y);
            let bin = if range > F::zero() {
                let frac = (mag - min_val) / range;
                ((frac * F::usize_as(nbins))
                    .to_usize()
                    .unwrap_or(nbins - 1))
                .min(nbins - 1)
            } else {
                0
            };
            hist[bin] += 1;
        }
    }
    (min_val, max_val)
}

/// Flux limit that selects at most `max_pixels` of the biggest residuals.
///
/// The limit is quantized by the histogram bins, so the actual selection can
/// differ slightly; when the topmost bin alone holds more than `max_pixels`
/// pixels, all of them are kept. Returns `(limit, peak_magnitude)`.
pub fn biggest_residuals<F: CleanFloat>(
    max_pixels: usize,
    flux_limit: F,
    residual: &ArrayD<F>,
    mask: Option<&ArrayD<F>>,
    nbins: usize,
) -> (F, F) {
    let mut hist = vec![0usize; nbins];
    let (min_res, max_res) = abs_histogram(&mut hist, residual, mask);

    // Scan no deeper than the externally imposed flux limit.
    let low_bin = if flux_limit <= min_res {
        0
    } else if flux_limit < max_res {
        ((flux_limit - min_res) / (max_res - min_res) * F::usize_as(nbins))
            .to_usize()
            .unwrap_or(0)
            .min(nbins - 1)
    } else {
        nbins - 1
    };

    let mut num_pix = 0usize;
    let mut cur_bin = nbins as isize - 1;
    while cur_bin >= low_bin as isize && num_pix <= max_pixels {
        num_pix += hist[cur_bin as usize];
        cur_bin -= 1;
    }
    cur_bin += 1;

    // Back off one bin when we overshot, unless the topmost bin alone did.
    if num_pix > max_pixels && cur_bin != nbins as isize - 1 {
        cur_bin += 1;
    }

    let limit = min_res + F::usize_as(cur_bin as usize) * (max_res - min_res) / F::usize_as(nbins);
    (limit, max_res)
}
