//! Band-compressed recovery of Jacobians from dual-number residuals.
//!
//! A banded block with lower bandwidth `p` and upper bandwidth `q` is
//! recovered from `p + q + 1` directions: variable `j` of the block is
//! seeded in direction `dir_offset + j mod (p + q + 1)`. Two columns that
//! share a direction are at least `p + q + 1` apart and therefore never
//! both appear in one row, so entry `A[i, j]` can be read back verbatim
//! from direction `dir_offset + j mod (p + q + 1)` of residual `i`. This
//! identity is bit-exact; it is also what makes the AD Jacobian directly
//! comparable against the analytic one.

use crate::matrix::BandMatrix;
use crate::scalar::Active;

/// Seeds the state variables of one banded block for Jacobian compression.
pub fn prepare_band_seed_vectors(
    ad_y: &mut [Active],
    dir_offset: usize,
    lower: usize,
    upper: usize,
) {
    let stride = lower + upper + 1;
    for (j, y) in ad_y.iter_mut().enumerate() {
        y.set_grad(dir_offset + j % stride, 1.0);
    }
}

/// Reads a banded Jacobian out of the dual residual of one block.
pub fn extract_banded_jacobian(ad_res: &[Active], dir_offset: usize, mat: &mut BandMatrix) {
    let rows = mat.rows();
    let lower = mat.lower_bandwidth() as isize;
    let upper = mat.upper_bandwidth() as isize;
    let stride = mat.stride();
    for (row, res) in ad_res.iter().enumerate().take(rows) {
        for diag in -lower..=upper {
            let col = row as isize + diag;
            if col < 0 || col >= rows as isize {
                continue;
            }
            mat.set(row, diag, res.grad(dir_offset + col as usize % stride));
        }
    }
}

/// Maximum absolute difference between the AD-derived Jacobian of one block
/// and the analytic band matrix. Used to cross-check the analytic Jacobian.
pub fn compare_banded_jacobian(ad_res: &[Active], dir_offset: usize, mat: &BandMatrix) -> f64 {
    let rows = mat.rows();
    let lower = mat.lower_bandwidth() as isize;
    let upper = mat.upper_bandwidth() as isize;
    let stride = mat.stride();
    let mut max_diff: f64 = 0.0;
    for (row, res) in ad_res.iter().enumerate().take(rows) {
        for diag in -lower..=upper {
            let col = row as isize + diag;
            if col < 0 || col >= rows as isize {
                continue;
            }
            let ad = res.grad(dir_offset + col as usize % stride);
            max_diff = max_diff.max((ad - mat.get(row, diag)).abs());
        }
    }
    max_diff
}

/// Copies nominal values into a dual vector, keeping the seed directions.
pub fn copy_values_to_ad(src: &[f64], dst: &mut [Active]) {
    for (d, s) in dst.iter_mut().zip(src) {
        d.set_value(*s);
    }
}

/// Copies nominal values out of a dual vector.
pub fn copy_values_from_ad(src: &[Active], dst: &mut [f64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s.value();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Applies a known band matrix to a seeded dual state and checks that the
    // extraction reproduces the matrix entry by entry.
    #[test]
    fn seed_then_extract_roundtrip() {
        let n = 11;
        let (lower, upper) = (2, 3);
        let mut reference = BandMatrix::new(n, lower, upper);
        for row in 0..n {
            for col in row.saturating_sub(lower)..=(row + upper).min(n - 1) {
                reference.set(
                    row,
                    col as isize - row as isize,
                    (row * 31 + col * 7) as f64 * 0.01 - 1.0,
                );
            }
        }

        let dir_offset = 4;
        let mut y: Vec<Active> = (0..n).map(|i| Active::new(i as f64 * 0.3)).collect();
        prepare_band_seed_vectors(&mut y, dir_offset, lower, upper);

        let mut res = vec![Active::new(0.0); n];
        for (row, r) in res.iter_mut().enumerate() {
            for col in row.saturating_sub(lower)..=(row + upper).min(n - 1) {
                *r += reference.get(row, col as isize - row as isize) * &y[col];
            }
        }

        let mut extracted = BandMatrix::new(n, lower, upper);
        extract_banded_jacobian(&res, dir_offset, &mut extracted);
        for row in 0..n {
            for col in row.saturating_sub(lower)..=(row + upper).min(n - 1) {
                let diag = col as isize - row as isize;
                assert_abs_diff_eq!(
                    extracted.get(row, diag),
                    reference.get(row, diag),
                    epsilon = 1e-14
                );
            }
        }
        assert_abs_diff_eq!(
            compare_banded_jacobian(&res, dir_offset, &reference),
            0.0,
            epsilon = 1e-14
        );
    }

    #[test]
    fn value_copies_preserve_seeds() {
        let mut y = vec![Active::new(0.0); 4];
        prepare_band_seed_vectors(&mut y, 0, 1, 1);
        copy_values_to_ad(&[1.0, 2.0, 3.0, 4.0], &mut y);
        assert_eq!(y[2].value(), 3.0);
        assert_eq!(y[2].grad(2 % 3), 1.0);
        let mut out = vec![0.0; 4];
        copy_values_from_ad(&y, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
