//! Maximum-likelihood codon substitution models on phylogenetic trees.
//!
//! The crate computes log-likelihoods of coding-sequence alignments under
//! dN/dS rate matrices (M0 and the branch-site model A), built from:
//!
//! * a genetic code with a precomputed single-substitution codon graph;
//! * background codon frequencies (F0, F3X4, or user-supplied);
//! * cached eigendecompositions so each rate matrix pays its O(n^3)
//!   factorization once and every branch exponential is two GEMMs;
//! * a pruning engine with per-branch staleness tracking, so optimizers
//!   that move one branch length at a time recompute one exponential.
//!
//! ```no_run
//! use codonml::{CodonAlignment, CodonFrequency, GeneticCode, M0, Model, ModelData, Tree};
//!
//! # fn main() -> codonml::Result<()> {
//! let code = GeneticCode::standard();
//! let tree = Tree::from_newick("((A:0.1,B:0.2):0.12,(C:0.3,D:0.15):0.05);")?;
//! let aln = CodonAlignment::from_dna(
//!     code.clone(),
//!     &[("A", "ATGGCT"), ("B", "ATGGCC"), ("C", "ATGGCT"), ("D", "ATGGCA")],
//! )?;
//! let freq = CodonFrequency::f3x4(&aln)?;
//! let mut model = M0::new(ModelData::new(tree, &aln, freq)?, 2.0, 0.5)?;
//! println!("lnL = {}", model.likelihood()?);
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod alignment;
pub mod branch_site;
pub mod codon;
pub mod ematrix;
pub mod error;
pub mod frequency;
pub mod m0;
pub mod model;
pub mod qmatrix;
pub mod tree;

pub use alignment::{CodonAlignment, CodonSequence};
pub use branch_site::BranchSiteModel;
pub use codon::{GeneticCode, NOCODON};
pub use ematrix::EMatrix;
pub use error::{Error, Result};
pub use frequency::CodonFrequency;
pub use m0::M0;
pub use model::{AggMode, BaseModel, FloatParameter, Model, ModelData};
pub use qmatrix::{build_q, build_q_scaled};
pub use tree::{Node, Tree};
