//! Cached eigendecomposition for reversible rate matrices.
//!
//! For a reversible Q with stationary frequencies pi, symmetrizing
//! S = Pi^{1/2} Q Pi^{-1/2} yields a real symmetric matrix, so LAPACK's
//! symmetric eigensolver applies and all eigenvalues are real. Then
//! exp(Qt) = U diag(exp(lambda t)) U^{-1} with U = Pi^{-1/2} V.
//!
//! The decomposition is O(n^3) and computed lazily on first use; each
//! subsequent exponential is two GEMMs. Replacing the rate matrix with
//! [`EMatrix::set`] drops the cached decomposition.

use std::sync::Arc;

use ndarray::prelude::*;
use ndarray_linalg::{Eigh, Inverse, UPLO};
use once_cell::sync::OnceCell;

use crate::error::{Error, Result};

/// Branch lengths at or above this are treated as infinite and clamped,
/// yielding the stationary distribution in every row.
const MAX_BRANCH_LENGTH: f64 = 1e6;

/// Products `scale * t` below this round to the identity matrix.
const MIN_SCALED_TIME: f64 = 1e-30;

#[derive(Debug)]
struct Decomposition {
    eigenvalues: Array1<f64>,
    /// U = Pi^{-1/2} V, columns are eigenvectors of Q.
    eigenvectors: Array2<f64>,
    eigenvectors_inv: Array2<f64>,
}

/// A rate matrix bundled with its stationary frequencies, scale, and a
/// lazily computed eigendecomposition.
///
/// Cloning is shallow: the clone shares the cached decomposition. Use
/// [`EMatrix::deep_copy`] when the copy must be independently mutable.
#[derive(Clone, Debug)]
pub struct EMatrix {
    q: Array2<f64>,
    freq: Array1<f64>,
    scale: f64,
    decomp: OnceCell<Arc<Decomposition>>,
}

impl EMatrix {
    /// Wrap an unnormalized rate matrix with its stationary frequencies
    /// and scale. Frequencies must be strictly positive for the
    /// symmetrization to be well defined.
    pub fn new(q: Array2<f64>, freq: Array1<f64>, scale: f64) -> Result<Self> {
        let n = q.nrows();
        if q.ncols() != n {
            return Err(Error::Decomposition(format!(
                "rate matrix must be square, got {}x{}",
                n,
                q.ncols()
            )));
        }
        if freq.len() != n {
            return Err(Error::Decomposition(format!(
                "frequency vector has length {}, expected {}",
                freq.len(),
                n
            )));
        }
        if freq.iter().any(|&p| !(p > 0.0)) {
            return Err(Error::Decomposition(
                "stationary frequencies must be strictly positive".into(),
            ));
        }
        Ok(Self {
            q,
            freq,
            scale,
            decomp: OnceCell::new(),
        })
    }

    /// Replace the rate matrix, dropping any cached decomposition.
    /// Dimension and frequencies are unchanged.
    pub fn set(&mut self, q: Array2<f64>, scale: f64) -> Result<()> {
        if q.nrows() != self.q.nrows() || q.ncols() != self.q.ncols() {
            return Err(Error::Decomposition(format!(
                "replacement matrix is {}x{}, expected {}x{}",
                q.nrows(),
                q.ncols(),
                self.q.nrows(),
                self.q.ncols()
            )));
        }
        self.q = q;
        self.scale = scale;
        self.decomp.take();
        Ok(())
    }

    pub fn n(&self) -> usize {
        self.q.nrows()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn q(&self) -> &Array2<f64> {
        &self.q
    }

    pub fn freq(&self) -> &Array1<f64> {
        &self.freq
    }

    /// An independent copy whose decomposition cache is not shared.
    pub fn deep_copy(&self) -> Self {
        Self {
            q: self.q.clone(),
            freq: self.freq.clone(),
            scale: self.scale,
            decomp: OnceCell::new(),
        }
    }

    fn decomposition(&self) -> Result<&Arc<Decomposition>> {
        self.decomp.get_or_try_init(|| {
            let n = self.q.nrows();
            let sqrt_pi = self.freq.mapv(f64::sqrt);
            let inv_sqrt_pi = self.freq.mapv(|p| 1.0 / p.sqrt());

            // S = Pi^{1/2} Q Pi^{-1/2}, symmetric under detailed balance
            let mut s = Array2::zeros((n, n));
            for i in 0..n {
                for j in 0..n {
                    s[[i, j]] = sqrt_pi[i] * self.q[[i, j]] * inv_sqrt_pi[j];
                }
            }

            let (eigenvalues, vecs) = s
                .eigh(UPLO::Lower)
                .map_err(|e| Error::Decomposition(format!("eigendecomposition failed: {e}")))?;

            // U = Pi^{-1/2} V
            let mut eigenvectors = Array2::zeros((n, n));
            for i in 0..n {
                for j in 0..n {
                    eigenvectors[[i, j]] = inv_sqrt_pi[i] * vecs[[i, j]];
                }
            }

            let eigenvectors_inv = eigenvectors
                .inv()
                .map_err(|e| Error::Decomposition(format!("eigenvector inversion failed: {e}")))?;

            Ok(Arc::new(Decomposition {
                eigenvalues,
                eigenvectors,
                eigenvectors_inv,
            }))
        })
    }

    /// Force the eigendecomposition now instead of on first [`EMatrix::exp`].
    pub fn eigen(&self) -> Result<()> {
        self.decomposition().map(|_| ())
    }

    /// Transition probability matrix exp(Q t).
    ///
    /// `t` is in the branch's own time units; callers normalize by
    /// [`EMatrix::scale`] beforehand when branch lengths are expressed in
    /// expected substitutions. Effectively-zero times return the identity
    /// without touching the decomposition, and infinite times clamp to a
    /// length at which the chain has reached stationarity.
    pub fn exp(&self, t: f64) -> Result<Array2<f64>> {
        let n = self.q.nrows();

        if (self.scale * t).abs() < MIN_SCALED_TIME {
            return Ok(Array2::eye(n));
        }
        let t = if t > MAX_BRANCH_LENGTH {
            MAX_BRANCH_LENGTH
        } else {
            t
        };

        let d = self.decomposition()?;
        let exp_lambda_t = d.eigenvalues.mapv(|lambda| (lambda * t).exp());

        // U diag(exp(lambda t)) U^{-1}
        let mut u_scaled = d.eigenvectors.clone();
        for (j, &s) in exp_lambda_t.iter().enumerate() {
            u_scaled.column_mut(j).mapv_inplace(|x| x * s);
        }
        let mut p = u_scaled.dot(&d.eigenvectors_inv);

        // roundoff can leave tiny negative entries in near-zero cells
        p.mapv_inplace(f64::abs);
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codon::GeneticCode;
    use crate::frequency::CodonFrequency;
    use crate::qmatrix::build_q;
    use approx::assert_abs_diff_eq;

    fn codon_ematrix(kappa: f64, omega: f64) -> EMatrix {
        let freq = CodonFrequency::f0(GeneticCode::standard());
        let (q, scale) = build_q(&freq, kappa, omega);
        EMatrix::new(q, freq.freq().clone(), scale).unwrap()
    }

    #[test]
    fn exp_zero_is_identity_without_decomposing() {
        let em = codon_ematrix(2.0, 0.5);
        let p = em.exp(0.0).unwrap();
        assert_eq!(p, Array2::eye(61));
        assert!(em.decomp.get().is_none(), "identity path must not decompose");
    }

    #[test]
    fn rows_are_probability_distributions() {
        let em = codon_ematrix(2.0, 0.5);
        let p = em.exp(0.3).unwrap();
        for row in p.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
            assert!(row.iter().all(|&x| x >= 0.0));
        }
    }

    #[test]
    fn long_branches_reach_stationarity() {
        let em = codon_ematrix(2.0, 0.5);
        let p = em.exp(f64::INFINITY).unwrap();
        let pi = em.freq();
        for i in 0..61 {
            for j in 0..61 {
                assert_abs_diff_eq!(p[[i, j]], pi[j], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn set_drops_cached_decomposition() {
        let mut em = codon_ematrix(2.0, 0.5);
        let p_before = em.exp(0.2).unwrap();
        assert!(em.decomp.get().is_some());

        let freq = CodonFrequency::f0(GeneticCode::standard());
        let (q, scale) = build_q(&freq, 2.0, 2.0);
        em.set(q, scale).unwrap();
        assert!(em.decomp.get().is_none());

        let p_after = em.exp(0.2).unwrap();
        let diff = (&p_before - &p_after).mapv(f64::abs).sum();
        assert!(diff > 1e-6, "omega change must alter the exponential");
    }

    #[test]
    fn clone_shares_cache_deep_copy_does_not() {
        let em = codon_ematrix(2.0, 0.5);
        em.eigen().unwrap();

        let shallow = em.clone();
        assert!(Arc::ptr_eq(
            shallow.decomp.get().unwrap(),
            em.decomp.get().unwrap()
        ));

        let deep = em.deep_copy();
        assert!(deep.decomp.get().is_none());
    }

    #[test]
    fn zero_frequency_rejected() {
        let q = Array2::zeros((3, 3));
        let freq = ndarray::arr1(&[0.5, 0.5, 0.0]);
        assert!(EMatrix::new(q, freq, 0.0).is_err());
    }

    #[test]
    fn expm_matches_series_on_small_matrix() {
        // 3-state reversible chain, compare against a truncated series
        let pi = ndarray::arr1(&[0.3, 0.5, 0.2]);
        let mut q = Array2::zeros((3, 3));
        q[[0, 1]] = pi[1];
        q[[1, 0]] = pi[0];
        q[[1, 2]] = pi[2] * 0.5;
        q[[2, 1]] = pi[1] * 0.5;
        q[[0, 2]] = pi[2] * 0.2;
        q[[2, 0]] = pi[0] * 0.2;
        for i in 0..3 {
            let row_sum: f64 = q.row(i).sum() - q[[i, i]];
            q[[i, i]] = -row_sum;
        }

        let em = EMatrix::new(q.clone(), pi, 1.0).unwrap();
        let p = em.exp(0.1).unwrap();

        let qt = q.mapv(|x| x * 0.1);
        let mut series = Array2::eye(3);
        let mut term = Array2::eye(3);
        for k in 1..20 {
            term = term.dot(&qt) / k as f64;
            series = series + &term;
        }
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(p[[i, j]], series[[i, j]], epsilon = 1e-10);
            }
        }
    }
}
