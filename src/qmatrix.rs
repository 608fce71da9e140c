//! Codon substitution rate matrices.
//!
//! The generator follows the Goldman-Yang/Muse-Gaut parameterization: only
//! single-nucleotide codon changes have nonzero rate, transitions are scaled
//! by kappa, nonsynonymous changes by omega, and every rate is proportional
//! to the target codon's background frequency. Matrices are returned
//! unnormalized together with their scale, the expected substitutions per
//! unit time at stationarity; dividing branch lengths by the scale expresses
//! them in expected substitutions per codon.

use ndarray::Array2;

use crate::codon::GeneticCode;
use crate::frequency::CodonFrequency;

/// Build an unnormalized rate matrix. Returns `(q, scale)` where
/// `scale = -sum_i pi_i q_ii`.
pub fn build_q(freq: &CodonFrequency, kappa: f64, omega: f64) -> (Array2<f64>, f64) {
    build_q_scaled(freq, kappa, omega, 1.0)
}

/// Like [`build_q`] but with every rate multiplied by `rate`, for site
/// classes that share a parameterization up to an overall factor.
pub fn build_q_scaled(
    freq: &CodonFrequency,
    kappa: f64,
    omega: f64,
    rate: f64,
) -> (Array2<f64>, f64) {
    let code: &GeneticCode = freq.code();
    let pi = freq.freq();
    let n = code.n_codon();
    let mut q = Array2::zeros((n, n));

    for i in 0..n {
        let mut row_sum = 0.0;
        for edge in code.neighbors(i) {
            let j = edge.to_codon;
            let mut r = rate * pi[j];
            if edge.is_transition {
                r *= kappa;
            }
            if !edge.is_synonymous {
                r *= omega;
            }
            q[[i, j]] = r;
            row_sum += r;
        }
        q[[i, i]] = -row_sum;
    }

    let scale = -(0..n).map(|i| pi[i] * q[[i, i]]).sum::<f64>();
    (q, scale)
}
