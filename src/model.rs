//! Base likelihood engine shared by the concrete codon models.
//!
//! A model is a set of site classes, each assigning one rate matrix per
//! branch, plus mixing proportions. The engine owns the transition matrix
//! cache and its staleness bookkeeping:
//!
//! * replacing any rate matrix or the proportions marks every branch stale;
//! * changing one branch length marks only that branch stale.
//!
//! [`BaseModel::expand_branches`] then recomputes exactly the stale
//! exponentials, de-duplicating by rate matrix identity so that classes
//! sharing an [`EMatrix`] share one LAPACK call and one cached product.
//! Both the exponential phase and the per-site phase run on the rayon pool.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::prelude::*;
use rayon::prelude::*;

use crate::aggregation::{
    invariant_site_likelihood, site_likelihood_full, site_likelihood_observed,
};
use crate::alignment::CodonAlignment;
use crate::codon::GeneticCode;
use crate::ematrix::EMatrix;
use crate::error::{Error, Result};
use crate::frequency::CodonFrequency;
use crate::tree::Tree;

/// Scales below this are degenerate; branch lengths collapse to zero time.
const SMALL_SCALE: f64 = 1e-20;

/// Immutable problem data: tree, encoded alignment, frequencies.
/// The state matrix rows are ordered by the tree's leaf ids.
#[derive(Clone, Debug)]
pub struct ModelData {
    code: Arc<GeneticCode>,
    freq: CodonFrequency,
    tree: Tree,
    codons: Array2<i32>,
    n_sites: usize,
}

impl ModelData {
    pub fn new(tree: Tree, aln: &CodonAlignment, freq: CodonFrequency) -> Result<Self> {
        if !Arc::ptr_eq(aln.code(), freq.code()) {
            return Err(Error::Alignment(
                "alignment and frequencies use different genetic codes".into(),
            ));
        }
        let codons = aln.state_matrix(&tree.leaf_names())?;
        let n_sites = aln.length();
        Ok(Self {
            code: Arc::clone(aln.code()),
            freq,
            tree,
            codons,
            n_sites,
        })
    }

    pub fn code(&self) -> &Arc<GeneticCode> {
        &self.code
    }

    pub fn freq(&self) -> &CodonFrequency {
        &self.freq
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }
}

/// How the per-site phase treats leaf observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggMode {
    /// Full pruning with materialized leaf rows.
    None,
    /// Fold leaf observations in as transition matrix columns and reuse one
    /// evaluation per codon for invariant sites. Same result, less work.
    Observed,
}

#[derive(Clone, Copy, Debug)]
enum SitePattern {
    /// Every leaf resolved and equal to this codon.
    Invariant(usize),
    Variable,
}

/// A named scalar parameter exposed to optimizers.
#[derive(Clone, Debug)]
pub struct FloatParameter {
    pub name: String,
    pub value: f64,
}

/// Optimizer-facing surface of a codon model.
pub trait Model: Send {
    /// Log-likelihood of the data under the current parameters. Never NaN:
    /// numerically impossible configurations report negative infinity.
    fn likelihood(&mut self) -> Result<f64>;

    /// Current free parameters, in a stable order.
    fn float_parameters(&self) -> Vec<FloatParameter>;

    /// Set one parameter by name.
    fn set_float_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    /// Independent copy for parallel optimizer restarts. Immutable state
    /// (decompositions, cached exponentials) is shared, mutable state is not.
    fn copy(&self) -> Box<dyn Model>;
}

/// Shared likelihood engine: site classes, proportions, and the transition
/// matrix cache with per-branch staleness.
#[derive(Clone, Debug)]
pub struct BaseModel {
    data: ModelData,
    n_classes: usize,
    prop: Vec<f64>,
    /// Rate matrix per class and node; the root entry stays `None`.
    qs: Vec<Vec<Option<Arc<EMatrix>>>>,
    /// Proportion-weighted scale per node, refreshed with the matrices.
    scale: Vec<f64>,
    /// Cached exp(Qt) per class and node.
    eqts: Vec<Vec<Option<Arc<Array2<f64>>>>>,
    exp_all_br: bool,
    exp_br: Vec<bool>,
    patterns: Vec<SitePattern>,
    agg_mode: AggMode,
}

impl BaseModel {
    pub fn new(data: ModelData, n_classes: usize, prop: Vec<f64>) -> Result<Self> {
        if n_classes == 0 {
            return Err(Error::InvalidParameter("need at least one site class".into()));
        }
        check_proportions(&prop, n_classes)?;

        let n_nodes = data.tree.n_nodes();
        let n = data.code.n_codon();
        let patterns = (0..data.n_sites)
            .map(|pos| {
                let col = data.codons.column(pos);
                let first = col[0];
                if first >= 0
                    && (first as usize) < n
                    && col.iter().all(|&c| c == first)
                {
                    SitePattern::Invariant(first as usize)
                } else {
                    SitePattern::Variable
                }
            })
            .collect();

        Ok(Self {
            data,
            n_classes,
            prop,
            qs: vec![vec![None; n_nodes]; n_classes],
            scale: vec![0.0; n_nodes],
            eqts: vec![vec![None; n_nodes]; n_classes],
            exp_all_br: false,
            exp_br: vec![false; n_nodes],
            patterns,
            agg_mode: AggMode::Observed,
        })
    }

    pub fn data(&self) -> &ModelData {
        &self.data
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn proportions(&self) -> &[f64] {
        &self.prop
    }

    pub fn agg_mode(&self) -> AggMode {
        self.agg_mode
    }

    pub fn set_agg_mode(&mut self, mode: AggMode) {
        self.agg_mode = mode;
    }

    fn mark_all_stale(&mut self) {
        self.exp_all_br = false;
        for b in &mut self.exp_br {
            *b = false;
        }
    }

    /// Assign one rate matrix to every branch of a class.
    pub fn set_class_matrix(&mut self, class: usize, em: Arc<EMatrix>) -> Result<()> {
        self.check_class(class)?;
        let root = self.data.tree.root();
        for node in 0..self.data.tree.n_nodes() {
            self.qs[class][node] = if node == root {
                None
            } else {
                Some(Arc::clone(&em))
            };
        }
        self.mark_all_stale();
        Ok(())
    }

    /// Assign a rate matrix to a single branch of a class, for models where
    /// the process differs between branches.
    pub fn set_branch_matrix(&mut self, class: usize, node: usize, em: Arc<EMatrix>) -> Result<()> {
        self.check_class(class)?;
        if node >= self.data.tree.n_nodes() || node == self.data.tree.root() {
            return Err(Error::InvalidParameter(format!(
                "node {} has no branch",
                node
            )));
        }
        self.qs[class][node] = Some(em);
        self.mark_all_stale();
        Ok(())
    }

    pub fn set_proportions(&mut self, prop: Vec<f64>) -> Result<()> {
        check_proportions(&prop, self.n_classes)?;
        self.prop = prop;
        self.mark_all_stale();
        Ok(())
    }

    /// Update one branch length; only that branch's exponentials go stale.
    pub fn set_branch_length(&mut self, node: usize, length: f64) -> Result<()> {
        if node >= self.data.tree.n_nodes() || node == self.data.tree.root() {
            return Err(Error::InvalidParameter(format!(
                "node {} has no branch",
                node
            )));
        }
        self.data.tree.set_branch_length(node, length)?;
        self.exp_br[node] = false;
        Ok(())
    }

    fn check_class(&self, class: usize) -> Result<()> {
        if class >= self.n_classes {
            return Err(Error::InvalidParameter(format!(
                "class {} out of range ({} classes)",
                class, self.n_classes
            )));
        }
        Ok(())
    }

    /// Recompute every stale transition matrix.
    ///
    /// Branch lengths are divided by the proportion-weighted scale of the
    /// branch's matrices, expressing them as expected substitutions per
    /// codon. Within a node, classes that share a rate matrix (by pointer
    /// identity) share one exponential; distinct matrices across the stale
    /// set are computed in parallel.
    pub fn expand_branches(&mut self) -> Result<()> {
        let root = self.data.tree.root();
        for class in 0..self.n_classes {
            for node in 0..self.data.tree.n_nodes() {
                if node != root && self.qs[class][node].is_none() {
                    return Err(Error::InvalidParameter(format!(
                        "class {} has no rate matrix on node {}",
                        class, node
                    )));
                }
            }
        }

        let stale: Vec<usize> = (0..self.data.tree.n_nodes())
            .filter(|&node| node != root && (!self.exp_all_br || !self.exp_br[node]))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        if !self.exp_all_br {
            for &node in &stale {
                self.scale[node] = (0..self.n_classes)
                    .map(|c| self.prop[c] * self.qs[c][node].as_ref().unwrap().scale())
                    .sum();
            }
        }
        log::debug!("expanding {} stale branches", stale.len());

        // One job per distinct matrix on a stale node; classes that alias
        // the same matrix are attached to the job.
        struct ExpJob {
            node: usize,
            t: f64,
            em: Arc<EMatrix>,
            classes: Vec<usize>,
        }
        let mut jobs: Vec<ExpJob> = Vec::new();
        for &node in &stale {
            let scale = self.scale[node];
            let t = if scale.abs() <= SMALL_SCALE {
                0.0
            } else {
                self.data.tree.branch_length(node) / scale
            };
            let mut node_jobs: Vec<usize> = Vec::new();
            for class in 0..self.n_classes {
                let em = self.qs[class][node].as_ref().unwrap();
                match node_jobs
                    .iter()
                    .find(|&&j| Arc::ptr_eq(&jobs[j].em, em))
                {
                    Some(&j) => jobs[j].classes.push(class),
                    None => {
                        node_jobs.push(jobs.len());
                        jobs.push(ExpJob {
                            node,
                            t,
                            em: Arc::clone(em),
                            classes: vec![class],
                        });
                    }
                }
            }
        }

        let results: Vec<(usize, Vec<usize>, Arc<Array2<f64>>)> = jobs
            .into_par_iter()
            .map(|job| {
                let p = job.em.exp(job.t)?;
                Ok((job.node, job.classes, Arc::new(p)))
            })
            .collect::<Result<_>>()?;

        for (node, classes, p) in results {
            for class in classes {
                self.eqts[class][node] = Some(Arc::clone(&p));
            }
        }
        for &node in &stale {
            self.exp_br[node] = true;
        }
        self.exp_all_br = true;
        Ok(())
    }

    /// Per-site log-likelihoods under the current parameters.
    pub fn site_likelihoods(&mut self) -> Result<Vec<f64>> {
        self.expand_branches()?;

        let tree = &self.data.tree;
        let n = self.data.code.n_codon();
        let n_nodes = tree.n_nodes();
        let freq = self.data.freq.freq();
        let codons = self.data.codons.view();
        let eqts = &self.eqts;

        // Invariant sites depend only on (class, codon); evaluate each pair
        // once and share the value across sites.
        let invariant_table: HashMap<(usize, usize), f64> = if self.agg_mode == AggMode::Observed
        {
            let mut pairs: Vec<(usize, usize)> = Vec::new();
            for pat in &self.patterns {
                if let SitePattern::Invariant(c) = *pat {
                    for class in 0..self.n_classes {
                        if !pairs.contains(&(class, c)) {
                            pairs.push((class, c));
                        }
                    }
                }
            }
            pairs
                .into_par_iter()
                .map_init(
                    || Array2::zeros((n_nodes, n)),
                    |plh, (class, c)| {
                        let l = invariant_site_likelihood(tree, c, freq, &eqts[class], plh);
                        ((class, c), l)
                    },
                )
                .collect()
        } else {
            HashMap::new()
        };

        let prop = &self.prop;
        let patterns = &self.patterns;
        let agg_mode = self.agg_mode;
        let n_classes = self.n_classes;

        let lnls: Vec<f64> = (0..self.data.n_sites)
            .into_par_iter()
            .map_init(
                || Array2::zeros((n_nodes, n)),
                |plh: &mut Array2<f64>, pos| {
                    let mut site_l = 0.0;
                    for class in 0..n_classes {
                        let l = match (agg_mode, patterns[pos]) {
                            (AggMode::Observed, SitePattern::Invariant(c)) => {
                                invariant_table[&(class, c)]
                            }
                            (AggMode::Observed, SitePattern::Variable) => {
                                site_likelihood_observed(
                                    tree,
                                    &codons,
                                    pos,
                                    freq,
                                    &eqts[class],
                                    plh,
                                )
                            }
                            (AggMode::None, _) => site_likelihood_full(
                                tree,
                                &codons,
                                pos,
                                freq,
                                &eqts[class],
                                plh,
                            ),
                        };
                        site_l += prop[class] * l;
                    }
                    let lnl = site_l.ln();
                    if lnl.is_nan() {
                        f64::NEG_INFINITY
                    } else {
                        lnl
                    }
                },
            )
            .collect();

        Ok(lnls)
    }

    /// Total log-likelihood; negative infinity when any site underflows to
    /// zero or turns non-finite.
    pub fn likelihood(&mut self) -> Result<f64> {
        Ok(self.site_likelihoods()?.into_iter().sum())
    }
}

fn check_proportions(prop: &[f64], n_classes: usize) -> Result<()> {
    if prop.len() != n_classes {
        return Err(Error::InvalidParameter(format!(
            "{} proportions for {} classes",
            prop.len(),
            n_classes
        )));
    }
    if prop.iter().any(|&p| !(0.0..=1.0).contains(&p) || !p.is_finite()) {
        return Err(Error::InvalidParameter(
            "proportions must lie in [0, 1]".into(),
        ));
    }
    let total: f64 = prop.iter().sum();
    if (total - 1.0).abs() > 1e-8 {
        return Err(Error::InvalidParameter(format!(
            "proportions sum to {}, expected 1",
            total
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qmatrix::build_q;

    fn fixture_data() -> ModelData {
        let structure = [
            (0, Some(4)),
            (1, Some(4)),
            (2, Some(5)),
            (3, Some(5)),
            (4, Some(6)),
            (5, Some(6)),
            (6, None),
        ];
        let bl = [0.1, 0.2, 0.3, 0.15, 0.12, 0.05, 0.0];
        let names: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let tree = Tree::from_structure(&structure, &bl, &names, &[0, 1, 2, 3]).unwrap();

        let code = GeneticCode::standard();
        let aln = CodonAlignment::from_dna(
            Arc::clone(&code),
            &[
                ("A", "ATGGCTAAATGGCTCGATCCATTT"),
                ("B", "ATGGCCAAATGGCTGGATCCATTC"),
                ("C", "ATGGCTAAGTGGCTCGAACCGTTT"),
                ("D", "ATGGC-AAATGGCTCGATCCATTT"),
            ],
        )
        .unwrap();
        let freq = CodonFrequency::f0(code);
        ModelData::new(tree, &aln, freq).unwrap()
    }

    fn single_class_model(kappa: f64, omega: f64) -> BaseModel {
        let data = fixture_data();
        let freq = data.freq().clone();
        let mut model = BaseModel::new(data, 1, vec![1.0]).unwrap();
        let (q, scale) = build_q(&freq, kappa, omega);
        let em = Arc::new(EMatrix::new(q, freq.freq().clone(), scale).unwrap());
        model.set_class_matrix(0, em).unwrap();
        model
    }

    #[test]
    fn invariant_patterns_detected() {
        let model = single_class_model(2.0, 0.5);
        // site 0 is ATG in every sequence; site 1 varies; site 2 has a gap
        assert!(matches!(model.patterns[0], SitePattern::Invariant(_)));
        assert!(matches!(model.patterns[1], SitePattern::Variable));
    }

    #[test]
    fn aggregation_modes_agree() {
        let mut model = single_class_model(2.0, 0.5);
        model.set_agg_mode(AggMode::Observed);
        let a = model.likelihood().unwrap();
        model.set_agg_mode(AggMode::None);
        let b = model.likelihood().unwrap();
        assert!((a - b).abs() < 1e-6, "observed {} vs full {}", a, b);
    }

    #[test]
    fn branch_update_refreshes_only_that_branch() {
        let mut model = single_class_model(2.0, 0.5);
        model.likelihood().unwrap();
        assert!(model.exp_all_br);

        let before: Vec<_> = (0..7).map(|n| model.eqts[0][n].clone()).collect();
        model.set_branch_length(1, 0.35).unwrap();
        assert!(!model.exp_br[1]);
        model.likelihood().unwrap();

        for node in [0, 2, 3, 4, 5] {
            assert!(
                Arc::ptr_eq(
                    before[node].as_ref().unwrap(),
                    model.eqts[0][node].as_ref().unwrap()
                ),
                "node {} should keep its cached exponential",
                node
            );
        }
        assert!(!Arc::ptr_eq(
            before[1].as_ref().unwrap(),
            model.eqts[0][1].as_ref().unwrap()
        ));
    }

    #[test]
    fn shared_matrices_share_exponentials() {
        let data = fixture_data();
        let freq = data.freq().clone();
        let mut model = BaseModel::new(data, 2, vec![0.4, 0.6]).unwrap();
        let (q, scale) = build_q(&freq, 2.0, 0.5);
        let em = Arc::new(EMatrix::new(q, freq.freq().clone(), scale).unwrap());
        model.set_class_matrix(0, Arc::clone(&em)).unwrap();
        model.set_class_matrix(1, em).unwrap();
        model.expand_branches().unwrap();

        for node in 0..6 {
            assert!(Arc::ptr_eq(
                model.eqts[0][node].as_ref().unwrap(),
                model.eqts[1][node].as_ref().unwrap()
            ));
        }
    }

    #[test]
    fn missing_class_matrix_is_an_error() {
        let data = fixture_data();
        let mut model = BaseModel::new(data, 1, vec![1.0]).unwrap();
        assert!(model.expand_branches().is_err());
    }

    #[test]
    fn branch_length_rejects_root_and_bad_ids() {
        let mut model = single_class_model(2.0, 0.5);
        let root = model.data().tree().root();
        assert!(model.set_branch_length(root, 0.1).is_err());
        assert!(model.set_branch_length(99, 0.1).is_err());
        model.set_branch_length(0, 0.1).unwrap();
    }

    #[test]
    fn bad_proportions_rejected() {
        let data = fixture_data();
        assert!(BaseModel::new(data.clone(), 2, vec![0.7, 0.7]).is_err());
        assert!(BaseModel::new(data, 2, vec![1.0]).is_err());
    }
}
