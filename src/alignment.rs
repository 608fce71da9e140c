//! Codon sequences and alignments.
//!
//! Sequences store dense sense-codon indices (`i32`, [`NOCODON`] for
//! missing/ambiguous triplets). An alignment owns sequences of identical
//! codon length; the pruning engine reorders it once so that the physical
//! row index equals the tree leaf ID, keeping the hot path free of name
//! lookups.

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::Array2;

use crate::codon::{GeneticCode, NOCODON};
use crate::error::{Error, Result};

/// A named coding sequence as sense-codon indices.
#[derive(Clone, Debug)]
pub struct CodonSequence {
    name: String,
    codons: Vec<i32>,
}

impl CodonSequence {
    /// Encode a nucleotide sequence into codon states. Triplets containing
    /// anything but upper-case A/C/G/T (gaps, IUPAC ambiguity codes) become
    /// [`NOCODON`]; an in-frame stop codon is a construction error.
    pub fn from_dna(code: &GeneticCode, name: &str, dna: &str) -> Result<Self> {
        if dna.len() % 3 != 0 {
            return Err(Error::SequenceLength {
                name: name.to_string(),
                length: dna.len(),
            });
        }

        let mut codons = Vec::with_capacity(dna.len() / 3);
        for (pos, chunk) in dna.as_bytes().chunks(3).enumerate() {
            let triplet = std::str::from_utf8(chunk)
                .map_err(|_| Error::Alignment(format!("sequence '{}': non-ASCII data", name)))?;
            match code.encode(triplet) {
                Some(c) => codons.push(c as i32),
                None if code.is_stop(triplet) => {
                    return Err(Error::StopCodon {
                        name: name.to_string(),
                        codon: triplet.to_string(),
                        position: pos,
                    })
                }
                None => codons.push(NOCODON),
            }
        }

        Ok(Self {
            name: name.to_string(),
            codons,
        })
    }

    /// Build a sequence from raw codon states (tests, simulators).
    pub fn from_states(name: &str, codons: Vec<i32>) -> Self {
        Self {
            name: name.to_string(),
            codons,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codons(&self) -> &[i32] {
        &self.codons
    }

    /// Number of codon positions.
    pub fn len(&self) -> usize {
        self.codons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codons.is_empty()
    }
}

/// A codon alignment: sequences of equal codon length with unique names.
#[derive(Clone, Debug)]
pub struct CodonAlignment {
    code: Arc<GeneticCode>,
    seqs: Vec<CodonSequence>,
    length: usize,
}

impl CodonAlignment {
    pub fn new(code: Arc<GeneticCode>, seqs: Vec<CodonSequence>) -> Result<Self> {
        let first = seqs
            .first()
            .ok_or_else(|| Error::Alignment("no sequences".into()))?;
        let length = first.len();
        if length == 0 {
            return Err(Error::Alignment("zero-length alignment".into()));
        }

        let mut names = HashSet::new();
        for s in &seqs {
            if s.len() != length {
                return Err(Error::Alignment(format!(
                    "sequence '{}' has {} codons, expected {}",
                    s.name, s.len(), length
                )));
            }
            if !names.insert(s.name.clone()) {
                return Err(Error::Alignment(format!("duplicate sequence '{}'", s.name)));
            }
        }

        Ok(Self { code, seqs, length })
    }

    /// Encode aligned DNA strings into a codon alignment.
    pub fn from_dna(
        code: Arc<GeneticCode>,
        named_dna: &[(&str, &str)],
    ) -> Result<Self> {
        let seqs = named_dna
            .iter()
            .map(|(name, dna)| CodonSequence::from_dna(&code, name, dna))
            .collect::<Result<Vec<_>>>()?;
        Self::new(code, seqs)
    }

    pub fn code(&self) -> &Arc<GeneticCode> {
        &self.code
    }

    pub fn sequences(&self) -> &[CodonSequence] {
        &self.seqs
    }

    /// Number of aligned codon positions.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn n_sequences(&self) -> usize {
        self.seqs.len()
    }

    pub fn by_name(&self, name: &str) -> Option<&CodonSequence> {
        self.seqs.iter().find(|s| s.name == name)
    }

    /// Distinct resolved codon states observed at a position, sorted, plus
    /// whether any sequence is unresolved there.
    pub fn observed_states(&self, pos: usize) -> (Vec<usize>, bool) {
        let mut states: Vec<usize> = Vec::new();
        let mut has_absent = false;
        for s in &self.seqs {
            let c = s.codons[pos];
            if c < 0 {
                has_absent = true;
            } else if !states.contains(&(c as usize)) {
                states.push(c as usize);
            }
        }
        states.sort_unstable();
        (states, has_absent)
    }

    /// Dense (leaf, position) state matrix with rows ordered by `names`.
    /// Errors if any requested name is missing.
    pub fn state_matrix(&self, names: &[String]) -> Result<Array2<i32>> {
        let mut m = Array2::zeros((names.len(), self.length));
        for (row, name) in names.iter().enumerate() {
            let seq = self
                .by_name(name)
                .ok_or_else(|| Error::MissingSequence(name.clone()))?;
            for (col, &c) in seq.codons.iter().enumerate() {
                m[[row, col]] = c;
            }
        }
        Ok(m)
    }
}
