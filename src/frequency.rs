//! Codon background frequencies.
//!
//! F0 assigns every sense codon equal weight; F3X4 derives codon frequencies
//! from empirical nucleotide frequencies at each codon position, renormalized
//! over sense codons. Frequencies are immutable once computed and carry the
//! genetic code they were estimated under.

use std::sync::Arc;

use ndarray::Array1;

use crate::alignment::CodonAlignment;
use crate::codon::{GeneticCode, NUCLEOTIDES};
use crate::error::{Error, Result};

/// Immutable per-codon background frequency vector tied to a genetic code.
#[derive(Clone, Debug)]
pub struct CodonFrequency {
    code: Arc<GeneticCode>,
    freq: Array1<f64>,
}

impl CodonFrequency {
    /// F0: uniform frequency 1/NCodon for every sense codon.
    pub fn f0(code: Arc<GeneticCode>) -> Self {
        let n = code.n_codon();
        let freq = Array1::from_elem(n, 1.0 / n as f64);
        Self { code, freq }
    }

    /// F3X4: codon frequency proportional to the product of empirical
    /// nucleotide frequencies at the three codon positions, renormalized
    /// over sense codons. Unresolved codons are skipped during counting.
    pub fn f3x4(aln: &CodonAlignment) -> Result<Self> {
        let code = Arc::clone(aln.code());
        let mut counts = [[0.0_f64; 4]; 3];

        for seq in aln.sequences() {
            for &c in seq.codons() {
                if c < 0 {
                    continue;
                }
                for (pos, nuc) in code.codon(c as usize).chars().enumerate() {
                    let k = NUCLEOTIDES
                        .iter()
                        .position(|&x| x == nuc)
                        .ok_or_else(|| Error::Frequency("corrupt codon table".into()))?;
                    counts[pos][k] += 1.0;
                }
            }
        }

        for pos in &mut counts {
            let total: f64 = pos.iter().sum();
            if total <= 0.0 {
                return Err(Error::Frequency(
                    "no resolved codons to estimate F3X4 from".into(),
                ));
            }
            for x in pos.iter_mut() {
                *x /= total;
            }
        }

        let n = code.n_codon();
        let mut freq = Array1::zeros(n);
        for i in 0..n {
            let mut f = 1.0;
            for (pos, nuc) in code.codon(i).chars().enumerate() {
                let k = NUCLEOTIDES.iter().position(|&x| x == nuc).unwrap();
                f *= counts[pos][k];
            }
            freq[i] = f;
        }
        let total = freq.sum();
        if total <= 0.0 {
            return Err(Error::Frequency(
                "F3X4 frequencies sum to zero; alignment too degenerate".into(),
            ));
        }
        freq /= total;

        Ok(Self { code, freq })
    }

    /// Frequencies supplied by the caller (e.g. read from a file).
    /// Must have one non-negative entry per sense codon; renormalized if
    /// the sum deviates slightly from 1.
    pub fn from_vec(code: Arc<GeneticCode>, values: Vec<f64>) -> Result<Self> {
        if values.len() != code.n_codon() {
            return Err(Error::Frequency(format!(
                "expected {} frequencies, got {}",
                code.n_codon(),
                values.len()
            )));
        }
        if values.iter().any(|&v| !v.is_finite() || v < 0.0) {
            return Err(Error::Frequency(
                "frequencies must be finite and non-negative".into(),
            ));
        }
        let total: f64 = values.iter().sum();
        if (total - 1.0).abs() > 1e-2 {
            return Err(Error::Frequency(format!(
                "frequencies sum to {}, expected 1",
                total
            )));
        }
        let freq = Array1::from_vec(values) / total;
        Ok(Self { code, freq })
    }

    pub fn code(&self) -> &Arc<GeneticCode> {
        &self.code
    }

    pub fn freq(&self) -> &Array1<f64> {
        &self.freq
    }
}
