//! Genetic codes and codon indexing.
//!
//! A [`GeneticCode`] maps the 64 nucleotide triplets to amino acids, assigns
//! every sense (non-stop) codon a dense index in `0..n_codon()`, and carries a
//! pre-computed graph of all single-nucleotide codon substitutions. Codes are
//! explicit immutable values, so several genetic codes can coexist in one
//! process; the common tables are cached behind lazy statics and shared via
//! `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// Nucleotide order used for codon enumeration (PAML convention).
/// T=0, C=1, A=2, G=3.
pub const NUCLEOTIDES: [char; 4] = ['T', 'C', 'A', 'G'];

/// Sentinel codon state for missing or ambiguous data at a position.
pub const NOCODON: i32 = -1;

/// NCBI translation table 1 (standard code), codons enumerated in
/// T/C/A/G order at each position.
const STANDARD_AA: &str = "FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

/// NCBI translation table 2 (vertebrate mitochondrial): TGA=W, AGA/AGG=*,
/// ATA=M. 60 sense codons.
const VERTEBRATE_MT_AA: &str = "FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIMMTTTTNNKKSS**VVVVAAAADDEEGGGG";

static STANDARD: Lazy<Arc<GeneticCode>> =
    Lazy::new(|| Arc::new(GeneticCode::from_table("standard", STANDARD_AA).unwrap()));

static VERTEBRATE_MT: Lazy<Arc<GeneticCode>> = Lazy::new(|| {
    Arc::new(GeneticCode::from_table("vertebrate mitochondrial", VERTEBRATE_MT_AA).unwrap())
});

/// Check if a nucleotide substitution is a transition (A<->G or C<->T).
#[inline]
pub fn is_transition(nuc1: char, nuc2: char) -> bool {
    matches!(
        (nuc1, nuc2),
        ('A', 'G') | ('G', 'A') | ('C', 'T') | ('T', 'C')
    )
}

/// A single-nucleotide substitution from one sense codon to another.
#[derive(Clone, Copy, Debug)]
pub struct CodonEdge {
    /// Target sense-codon index.
    pub to_codon: usize,
    /// Is the differing nucleotide pair a transition (A<->G or C<->T)?
    pub is_transition: bool,
    /// Do both codons encode the same amino acid?
    pub is_synonymous: bool,
}

/// An immutable genetic code: codon indexing, amino-acid translation, and
/// the single-nucleotide substitution graph over sense codons.
#[derive(Clone, Debug)]
pub struct GeneticCode {
    name: String,
    /// Sense codons in enumeration order; index into this is the codon state.
    codons: Vec<String>,
    /// Amino acid for each sense codon.
    amino_acids: Vec<char>,
    /// Triplet string -> sense-codon index.
    index: HashMap<String, usize>,
    /// Amino acid (or '*') for each of the 64 triplets, enumeration order.
    table: Vec<char>,
    /// edges[i] holds all single-nucleotide neighbors of sense codon i.
    edges: Vec<Vec<CodonEdge>>,
}

impl GeneticCode {
    /// Build a genetic code from a 64-character NCBI-style amino-acid table
    /// ('*' marks stop codons), codons enumerated T/C/A/G at each position.
    pub fn from_table(name: &str, aa_table: &str) -> Result<Self> {
        let table: Vec<char> = aa_table.chars().collect();
        if table.len() != 64 {
            return Err(Error::GeneticCode(format!(
                "amino-acid table must have 64 entries, got {}",
                table.len()
            )));
        }

        let mut codons = Vec::new();
        let mut amino_acids = Vec::new();
        for (i, &aa) in table.iter().enumerate() {
            if aa != '*' {
                codons.push(triplet(i));
                amino_acids.push(aa);
            }
        }
        if codons.is_empty() {
            return Err(Error::GeneticCode("table has no sense codons".into()));
        }

        let index: HashMap<String, usize> = codons
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();

        let edges = build_edges(&codons, &amino_acids);

        Ok(Self {
            name: name.to_string(),
            codons,
            amino_acids,
            index,
            table,
            edges,
        })
    }

    /// The standard genetic code (61 sense codons), shared process-wide.
    pub fn standard() -> Arc<Self> {
        Arc::clone(&STANDARD)
    }

    /// The vertebrate mitochondrial code (60 sense codons).
    pub fn vertebrate_mitochondrial() -> Arc<Self> {
        Arc::clone(&VERTEBRATE_MT)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of sense codons (61 for the standard code).
    #[inline]
    pub fn n_codon(&self) -> usize {
        self.codons.len()
    }

    /// Triplet string for a sense-codon index.
    #[inline]
    pub fn codon(&self, index: usize) -> &str {
        &self.codons[index]
    }

    /// Amino acid encoded by a sense codon.
    #[inline]
    pub fn amino_acid(&self, index: usize) -> char {
        self.amino_acids[index]
    }

    /// Sense-codon index for a triplet; `None` for stop codons and triplets
    /// containing anything but upper-case A/C/G/T.
    #[inline]
    pub fn encode(&self, codon: &str) -> Option<usize> {
        self.index.get(codon).copied()
    }

    /// Is the triplet a stop codon under this code?
    pub fn is_stop(&self, codon: &str) -> bool {
        triplet_rank(codon).map_or(false, |r| self.table[r] == '*')
    }

    /// All single-nucleotide substitution neighbors of a sense codon.
    #[inline]
    pub fn neighbors(&self, codon_index: usize) -> &[CodonEdge] {
        &self.edges[codon_index]
    }
}

/// Triplet string for enumeration rank 0..64.
fn triplet(rank: usize) -> String {
    format!(
        "{}{}{}",
        NUCLEOTIDES[rank / 16],
        NUCLEOTIDES[(rank / 4) % 4],
        NUCLEOTIDES[rank % 4]
    )
}

/// Enumeration rank of a triplet, if it is a valid A/C/G/T triplet.
fn triplet_rank(codon: &str) -> Option<usize> {
    if codon.len() != 3 {
        return None;
    }
    let mut rank = 0;
    for c in codon.chars() {
        let n = NUCLEOTIDES.iter().position(|&x| x == c)?;
        rank = rank * 4 + n;
    }
    Some(rank)
}

fn build_edges(codons: &[String], amino_acids: &[char]) -> Vec<Vec<CodonEdge>> {
    let n = codons.len();
    let mut edges = vec![Vec::new(); n];

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let diffs: Vec<(char, char)> = codons[i]
                .chars()
                .zip(codons[j].chars())
                .filter(|(a, b)| a != b)
                .collect();
            if diffs.len() != 1 {
                continue;
            }
            let (ni, nj) = diffs[0];
            edges[i].push(CodonEdge {
                to_codon: j,
                is_transition: is_transition(ni, nj),
                is_synonymous: amino_acids[i] == amino_acids[j],
            });
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_code_has_61_sense_codons() {
        let code = GeneticCode::standard();
        assert_eq!(code.n_codon(), 61);
    }

    #[test]
    fn no_stop_codons_indexed() {
        let code = GeneticCode::standard();
        for stop in ["TAA", "TAG", "TGA"] {
            assert!(code.is_stop(stop), "{} should be a stop codon", stop);
            assert_eq!(code.encode(stop), None);
        }
    }

    #[test]
    fn codon_indexing_round_trip() {
        let code = GeneticCode::standard();
        for i in 0..code.n_codon() {
            assert_eq!(code.encode(code.codon(i)), Some(i));
        }
    }

    #[test]
    fn translation_spot_checks() {
        let code = GeneticCode::standard();
        assert_eq!(code.amino_acid(code.encode("ATG").unwrap()), 'M');
        assert_eq!(code.amino_acid(code.encode("TTT").unwrap()), 'F');
        assert_eq!(code.amino_acid(code.encode("GGG").unwrap()), 'G');
        assert_eq!(code.amino_acid(code.encode("AAA").unwrap()), 'K');
    }

    #[test]
    fn transition_classification() {
        assert!(is_transition('A', 'G'));
        assert!(is_transition('G', 'A'));
        assert!(is_transition('C', 'T'));
        assert!(is_transition('T', 'C'));
        assert!(!is_transition('A', 'T'));
        assert!(!is_transition('A', 'C'));
        assert!(!is_transition('G', 'C'));
        assert!(!is_transition('G', 'T'));
    }

    #[test]
    fn neighbor_counts_bounded() {
        // Every codon has 9 single-nucleotide mutations, minus those
        // hitting a stop codon.
        let code = GeneticCode::standard();
        for i in 0..code.n_codon() {
            let n = code.neighbors(i).len();
            assert!(
                (6..=9).contains(&n),
                "codon {} ({}) has {} neighbors",
                i,
                code.codon(i),
                n
            );
        }
    }

    #[test]
    fn edge_properties_ttt() {
        let code = GeneticCode::standard();
        let ttt = code.encode("TTT").unwrap();
        let ttc = code.encode("TTC").unwrap();
        let edge = code
            .neighbors(ttt)
            .iter()
            .find(|e| e.to_codon == ttc)
            .expect("TTT-TTC edge");
        assert!(edge.is_synonymous, "TTT/TTC are both Phe");
        assert!(edge.is_transition, "T->C is a transition");

        let tta = code.encode("TTA").unwrap();
        let edge = code
            .neighbors(ttt)
            .iter()
            .find(|e| e.to_codon == tta)
            .expect("TTT-TTA edge");
        assert!(!edge.is_synonymous, "Phe vs Leu");
        assert!(!edge.is_transition, "T->A is a transversion");
    }

    #[test]
    fn edges_are_symmetric() {
        let code = GeneticCode::standard();
        for i in 0..code.n_codon() {
            for edge in code.neighbors(i) {
                let back = code
                    .neighbors(edge.to_codon)
                    .iter()
                    .find(|e| e.to_codon == i)
                    .expect("reverse edge");
                assert_eq!(edge.is_transition, back.is_transition);
                assert_eq!(edge.is_synonymous, back.is_synonymous);
            }
        }
    }

    #[test]
    fn mitochondrial_code_differs() {
        let mt = GeneticCode::vertebrate_mitochondrial();
        assert_eq!(mt.n_codon(), 60);
        assert!(!mt.is_stop("TGA"));
        assert_eq!(mt.amino_acid(mt.encode("TGA").unwrap()), 'W');
        assert!(mt.is_stop("AGA"));
        assert_eq!(mt.amino_acid(mt.encode("ATA").unwrap()), 'M');
    }

    #[test]
    fn bad_table_rejected() {
        assert!(GeneticCode::from_table("short", "FFLL").is_err());
    }
}
