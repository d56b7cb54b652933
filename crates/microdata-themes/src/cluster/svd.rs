//! Randomized truncated SVD.
//!
//! Projects rows onto their leading `k` singular directions using the
//! range finder of Halko, Martinsson and Tropp: sample the range with a
//! seeded Gaussian test matrix, refine with power iterations, then take the
//! exact SVD of the small projected matrix.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::ClusterError;

/// Extra sampled directions beyond `k`.
const OVERSAMPLES: usize = 10;

/// Reduce `data` (n x d) to at most `n_components` columns.
///
/// When `n_components >= d` the input is returned unchanged. Otherwise the
/// result is `U_k * S_k`, with each component's sign fixed so its largest
/// magnitude entry is positive. Output is a pure function of the input and
/// `random_state`.
pub fn truncated_svd(
    data: &DMatrix<f64>,
    n_components: usize,
    random_state: u64,
) -> Result<DMatrix<f64>, ClusterError> {
    let (n, d) = data.shape();
    if n_components >= d || n == 0 {
        return Ok(data.clone());
    }

    let k = n_components.min(n).max(1);
    let rank_bound = n.min(d);
    let l = (k + OVERSAMPLES).min(rank_bound);
    let n_iter = if (k as f64) < 0.1 * rank_bound as f64 { 7 } else { 4 };

    let mut rng = StdRng::seed_from_u64(random_state);
    let omega = DMatrix::<f64>::from_fn(d, l, |_, _| rng.sample(StandardNormal));

    let mut q = (data * &omega).qr().q();
    for _ in 0..n_iter {
        let z = (data.transpose() * &q).qr().q();
        q = (data * &z).qr().q();
    }

    // B = Q^T X is l x d with l <= d
    let b = q.transpose() * data;
    let svd = b.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| ClusterError::InvalidInput("SVD did not converge".to_string()))?;

    let sigma = DMatrix::from_diagonal(&svd.singular_values.rows(0, k).into_owned());
    let mut projected = q * u.columns(0, k) * sigma;
    fix_signs(&mut projected);
    Ok(projected)
}

/// Flip each column so its largest magnitude entry is positive.
fn fix_signs(m: &mut DMatrix<f64>) {
    for mut column in m.column_iter_mut() {
        let pivot = column
            .iter()
            .fold(0.0f64, |acc, &v| if v.abs() > acc.abs() { v } else { acc });
        if pivot < 0.0 {
            column.neg_mut();
        }
    }
}
