//! Growable ledger of (flux, position) pixel entries.
//!
//! [`ComponentList`] backs both the active-pixel cache filled by the scanner
//! and the clean-component list built up by the minor-cycle engine. Each row
//! holds one flux value per polarization plane and a shared 2D integer
//! position; all planes at one spatial pixel move together.
//!
//! The list has an explicit capacity distinct from its used length. Growth
//! reallocates capacity but never touches rows already written, and the used
//! length only ever increases outside of an explicit [`truncate`].
//!
//! [`truncate`]: ComponentList::truncate

use crate::float_trait::CleanFloat;

/// Append-only table of per-pixel flux rows with 2D positions.
#[derive(Debug, Clone)]
pub struct ComponentList<F> {
    npol: usize,
    max_components: usize,
    flux: Vec<F>,
    positions: Vec<i32>,
}

impl<F: CleanFloat> ComponentList<F> {
    /// Create an empty list for `npol` planes with room for `capacity` rows.
    pub fn new(npol: usize, capacity: usize) -> Self {
        assert!(
            npol == 1 || npol == 2 || npol == 4,
            "ledger plane count must be 1, 2 or 4, got {}",
            npol
        );
        Self {
            npol,
            max_components: capacity,
            flux: Vec::with_capacity(capacity * npol),
            positions: Vec::with_capacity(capacity * 2),
        }
    }

    /// Number of polarization planes per row.
    pub fn npol(&self) -> usize {
        self.npol
    }

    /// Number of rows written so far.
    pub fn len(&self) -> usize {
        self.flux.len() / self.npol
    }

    /// True when no rows have been written.
    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    /// Maximum number of rows the list accepts before it must be grown.
    pub fn capacity(&self) -> usize {
        self.max_components
    }

    /// Rows still available before the capacity is hit.
    pub fn remaining(&self) -> usize {
        self.max_components - self.len()
    }

    /// Raise the capacity to `new_capacity` rows, preserving written rows.
    /// The capacity never shrinks below the used length.
    pub fn grow(&mut self, new_capacity: usize) {
        assert!(
            new_capacity >= self.len(),
            "cannot shrink capacity ({}) below used length ({})",
            new_capacity,
            self.len()
        );
        if new_capacity > self.max_components {
            self.flux.reserve(new_capacity * self.npol - self.flux.len());
            self.positions
                .reserve(new_capacity * 2 - self.positions.len());
        }
        self.max_components = new_capacity;
    }

    /// Append one row. Panics when the capacity is exhausted or the flux
    /// slice does not match the plane count.
    pub fn push(&mut self, flux: &[F], position: [i32; 2]) {
        assert!(self.len() < self.max_components, "ledger capacity exhausted");
        assert_eq!(flux.len(), self.npol, "flux row length mismatch");
        self.flux.extend_from_slice(flux);
        self.positions.extend_from_slice(&position);
    }

    /// Flux row `i`, one value per plane.
    pub fn flux(&self, i: usize) -> &[F] {
        &self.flux[i * self.npol..(i + 1) * self.npol]
    }

    /// Mutable flux row `i`.
    pub fn flux_mut(&mut self, i: usize) -> &mut [F] {
        &mut self.flux[i * self.npol..(i + 1) * self.npol]
    }

    /// Pixel position of row `i`.
    pub fn position(&self, i: usize) -> [i32; 2] {
        [self.positions[i * 2], self.positions[i * 2 + 1]]
    }

    /// Add `offset` to the positions of every row from `start` onward.
    ///
    /// Used after a tiled scan to translate tile-local coordinates to global
    /// image coordinates.
    pub fn translate_from(&mut self, start: usize, offset: [i32; 2]) {
        for i in start..self.len() {
            self.positions[i * 2] += offset[0];
            self.positions[i * 2 + 1] += offset[1];
        }
    }

    /// Drop rows from the end so `len` rows remain. Capacity is unchanged.
    pub fn truncate(&mut self, len: usize) {
        self.flux.truncate(len * self.npol);
        self.positions.truncate(len * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_list_is_empty() {
        let list = ComponentList::<f32>::new(2, 16);
        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert_eq!(list.capacity(), 16);
        assert_eq!(list.remaining(), 16);
        assert_eq!(list.npol(), 2);
    }

    #[test]
    #[should_panic(expected = "plane count")]
    fn test_new_rejects_bad_npol() {
        ComponentList::<f32>::new(3, 16);
    }

    #[test]
    fn test_push_and_read_back() {
        let mut list = ComponentList::<f32>::new(4, 8);
        list.push(&[1.0, 2.0, 3.0, 4.0], [10, 20]);
        list.push(&[-1.0, -2.0, -3.0, -4.0], [30, 40]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.flux(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(list.flux(1), &[-1.0, -2.0, -3.0, -4.0]);
        assert_eq!(list.position(0), [10, 20]);
        assert_eq!(list.position(1), [30, 40]);
    }

    #[test]
    #[should_panic(expected = "capacity exhausted")]
    fn test_push_beyond_capacity_panics() {
        let mut list = ComponentList::<f32>::new(1, 1);
        list.push(&[1.0], [0, 0]);
        list.push(&[2.0], [1, 1]);
    }

    #[test]
    fn test_grow_preserves_rows() {
        let mut list = ComponentList::<f64>::new(1, 2);
        list.push(&[1.5], [1, 2]);
        list.push(&[2.5], [3, 4]);
        list.grow(64);
        assert_eq!(list.capacity(), 64);
        assert_eq!(list.len(), 2);
        assert_eq!(list.flux(0), &[1.5]);
        assert_eq!(list.flux(1), &[2.5]);
        assert_eq!(list.position(0), [1, 2]);
        assert_eq!(list.position(1), [3, 4]);
        list.push(&[3.5], [5, 6]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_monotone_growth_sequence() {
        // Used count is non-decreasing across an arbitrary push/grow sequence
        // and earlier rows are never altered by growth.
        let mut list = ComponentList::<f32>::new(2, 1);
        let mut last_len = 0;
        for round in 0..10 {
            if list.remaining() == 0 {
                list.grow(list.capacity() * 2);
            }
            let v = round as f32;
            list.push(&[v, -v], [round, round + 1]);
            assert!(list.len() > last_len);
            last_len = list.len();
        }
        for round in 0..10 {
            let v = round as f32;
            assert_eq!(list.flux(round as usize), &[v, -v]);
            assert_eq!(list.position(round as usize), [round, round + 1]);
        }
    }

    #[test]
    #[should_panic(expected = "cannot shrink capacity")]
    fn test_grow_below_used_panics() {
        let mut list = ComponentList::<f32>::new(1, 4);
        list.push(&[1.0], [0, 0]);
        list.push(&[2.0], [1, 1]);
        list.grow(1);
    }

    #[test]
    fn test_translate_from() {
        let mut list = ComponentList::<f32>::new(1, 4);
        list.push(&[1.0], [5, 6]);
        list.push(&[2.0], [0, 1]);
        list.push(&[3.0], [2, 3]);
        list.translate_from(1, [100, 200]);
        assert_eq!(list.position(0), [5, 6]);
        assert_eq!(list.position(1), [100, 201]);
        assert_eq!(list.position(2), [102, 203]);
    }

    #[test]
    fn test_truncate() {
        let mut list = ComponentList::<f32>::new(2, 4);
        list.push(&[1.0, 2.0], [0, 0]);
        list.push(&[3.0, 4.0], [1, 1]);
        list.truncate(1);
        assert_eq!(list.len(), 1);
        assert_eq!(list.capacity(), 4);
        assert_eq!(list.flux(0), &[1.0, 2.0]);
    }

    #[test]
    fn test_flux_mut() {
        let mut list = ComponentList::<f32>::new(2, 4);
        list.push(&[1.0, 2.0], [0, 0]);
        list.flux_mut(0)[1] = 9.0;
        assert_eq!(list.flux(0), &[1.0, 9.0]);
    }
}
