//! Error types for codonml.
//!
//! Construction-time errors identify the offending input (sequence name,
//! codon triple, parameter name). Numerical failures during likelihood
//! evaluation surface as [`Error::Decomposition`]; callers driving an
//! optimizer are expected to reject the parameter point rather than abort.

use thiserror::Error;

/// Errors produced by codonml construction and likelihood evaluation.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed genetic code table.
    #[error("invalid genetic code table: {0}")]
    GeneticCode(String),

    /// Sequence length is not a whole number of codons.
    #[error("sequence '{name}': length {length} is not a multiple of 3")]
    SequenceLength { name: String, length: usize },

    /// In-frame stop codon in a coding sequence.
    #[error("sequence '{name}': in-frame stop codon '{codon}' at codon position {position}")]
    StopCodon {
        name: String,
        codon: String,
        position: usize,
    },

    /// Alignment construction error (empty, ragged lengths, duplicates).
    #[error("alignment: {0}")]
    Alignment(String),

    /// Invalid codon frequency vector.
    #[error("invalid frequencies: {0}")]
    Frequency(String),

    /// Tree construction or Newick parsing error.
    #[error("tree: {0}")]
    Tree(String),

    /// Alignment sequence missing from the tree leaves (or vice versa).
    #[error("sequence '{0}' has no matching tree leaf")]
    MissingSequence(String),

    /// Eigendecomposition failed (non-diagonalizable Q or singular
    /// eigenvector matrix). The likelihood is undefined at this
    /// parameter point.
    #[error("eigendecomposition failed: {0}")]
    Decomposition(String),

    /// Parameter name not recognized by the model.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Parameter value outside its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for codonml operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_offending_input() {
        let err = Error::StopCodon {
            name: "gi|12345".into(),
            codon: "TAA".into(),
            position: 17,
        };
        let msg = err.to_string();
        assert!(msg.contains("gi|12345"));
        assert!(msg.contains("TAA"));
        assert!(msg.contains("17"));
    }

    #[test]
    fn display_parameter_errors() {
        assert!(Error::UnknownParameter("alpha".into())
            .to_string()
            .contains("alpha"));
        assert!(Error::SequenceLength {
            name: "s1".into(),
            length: 10
        }
        .to_string()
        .contains("multiple of 3"));
    }
}
