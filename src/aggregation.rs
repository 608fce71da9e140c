//! Per-site Felsenstein pruning strategies.
//!
//! All three routines compute the same quantity, the site likelihood
//! `sum_i pi_i L_root(i)`, with different amounts of work:
//!
//! * [`site_likelihood_full`] materializes conditional likelihood rows for
//!   every node, leaves included. The baseline the shortcuts are checked
//!   against.
//! * [`site_likelihood_observed`] skips leaf rows entirely: a resolved leaf
//!   child contributes one column of its transition matrix, an unresolved
//!   leaf contributes a factor of one because transition rows sum to one.
//!   Exact, and much cheaper on alignments with many leaves.
//! * [`invariant_site_likelihood`] handles sites where every leaf carries
//!   the same resolved codon, so the result depends only on that codon and
//!   can be shared across sites.
//!
//! Transition matrices are passed per node id; the root entry is unused.
//! A missing entry on a needed branch yields NaN, which the caller maps to
//! negative infinity in log space.

use std::sync::Arc;

use ndarray::prelude::*;

use crate::tree::Tree;

pub type BranchMatrices = [Option<Arc<Array2<f64>>>];

/// Full pruning over every node. `plh` is caller-owned scratch of shape
/// `[n_nodes, n_states]`, reused across calls.
pub fn site_likelihood_full(
    tree: &Tree,
    codons: &ArrayView2<i32>,
    pos: usize,
    freq: &Array1<f64>,
    pmats: &BranchMatrices,
    plh: &mut Array2<f64>,
) -> f64 {
    let n = freq.len();

    for &node in tree.postorder() {
        if tree.is_leaf(node) {
            let mut row = plh.row_mut(node);
            let state = codons[[tree.node(node).leaf_id.unwrap_or(node), pos]];
            if state >= 0 && (state as usize) < n {
                row.fill(0.0);
                row[state as usize] = 1.0;
            } else {
                row.fill(1.0);
            }
        } else {
            let mut acc = Array1::from_elem(n, 1.0);
            for &child in tree.children(node) {
                let p = match &pmats[child] {
                    Some(p) => p,
                    None => return f64::NAN,
                };
                let v = p.dot(&plh.row(child));
                acc *= &v;
            }
            plh.row_mut(node).assign(&acc);
        }
    }

    freq.dot(&plh.row(tree.root()))
}

/// Pruning restricted to internal nodes, folding leaf observations in as
/// transition matrix columns. Agrees with [`site_likelihood_full`] to
/// roundoff.
pub fn site_likelihood_observed(
    tree: &Tree,
    codons: &ArrayView2<i32>,
    pos: usize,
    freq: &Array1<f64>,
    pmats: &BranchMatrices,
    plh: &mut Array2<f64>,
) -> f64 {
    let n = freq.len();

    for &node in tree.postorder() {
        if tree.is_leaf(node) {
            continue;
        }
        let mut acc = Array1::from_elem(n, 1.0);
        for &child in tree.children(node) {
            let p = match &pmats[child] {
                Some(p) => p,
                None => return f64::NAN,
            };
            if tree.is_leaf(child) {
                let state = codons[[tree.node(child).leaf_id.unwrap_or(child), pos]];
                if state >= 0 && (state as usize) < n {
                    acc *= &p.column(state as usize);
                }
                // unresolved leaf: rows of P sum to one, factor drops out
            } else {
                let v = p.dot(&plh.row(child));
                acc *= &v;
            }
        }
        plh.row_mut(node).assign(&acc);
    }

    freq.dot(&plh.row(tree.root()))
}

/// Likelihood of a site where every leaf holds the resolved codon `state`.
/// Depends only on the codon, so one evaluation serves every such site.
pub fn invariant_site_likelihood(
    tree: &Tree,
    state: usize,
    freq: &Array1<f64>,
    pmats: &BranchMatrices,
    plh: &mut Array2<f64>,
) -> f64 {
    let n = freq.len();

    for &node in tree.postorder() {
        if tree.is_leaf(node) {
            continue;
        }
        let mut acc = Array1::from_elem(n, 1.0);
        for &child in tree.children(node) {
            let p = match &pmats[child] {
                Some(p) => p,
                None => return f64::NAN,
            };
            if tree.is_leaf(child) {
                acc *= &p.column(state);
            } else {
                let v = p.dot(&plh.row(child));
                acc *= &v;
            }
        }
        plh.row_mut(node).assign(&acc);
    }

    freq.dot(&plh.row(tree.root()))
}
