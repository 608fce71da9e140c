//! Branch-site model A: positive selection on labeled foreground branches.
//!
//! Four site classes over two branch partitions (label 0 = background,
//! any other label = foreground):
//!
//! | class | proportion                     | background | foreground |
//! |-------|--------------------------------|------------|------------|
//! | 0     | p0                             | omega0     | omega0     |
//! | 1     | p1                             | 1          | 1          |
//! | 2a    | (1-p0-p1) * p0 / (p0+p1)       | omega0     | omega2     |
//! | 2b    | (1-p0-p1) * p1 / (p0+p1)       | 1          | omega2     |
//!
//! Only three distinct rate matrices exist (omega0, 1, omega2); classes
//! share them by pointer so the engine computes each branch exponential
//! at most three times regardless of class count.

use std::sync::Arc;

use crate::ematrix::EMatrix;
use crate::error::{Error, Result};
use crate::model::{BaseModel, FloatParameter, Model, ModelData};
use crate::qmatrix::build_q;

#[derive(Clone)]
pub struct BranchSiteModel {
    base: BaseModel,
    kappa: f64,
    omega0: f64,
    omega2: f64,
    p0: f64,
    p1: f64,
}

impl BranchSiteModel {
    pub fn new(
        data: ModelData,
        kappa: f64,
        omega0: f64,
        omega2: f64,
        p0: f64,
        p1: f64,
    ) -> Result<Self> {
        if !(kappa > 0.0) || !kappa.is_finite() {
            return Err(Error::InvalidParameter(format!("bad kappa {}", kappa)));
        }
        if !(0.0..=1.0).contains(&omega0) {
            return Err(Error::InvalidParameter(format!(
                "omega0 must lie in [0, 1], got {}",
                omega0
            )));
        }
        if !(omega2 >= 1.0) || !omega2.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "omega2 must be >= 1, got {}",
                omega2
            )));
        }
        check_p0_p1(p0, p1)?;

        if data
            .tree()
            .postorder()
            .iter()
            .all(|&node| data.tree().label(node) == 0)
        {
            return Err(Error::Tree(
                "branch-site model needs at least one labeled foreground branch".into(),
            ));
        }

        let base = BaseModel::new(data, 4, proportions(p0, p1))?;
        let mut model = Self {
            base,
            kappa,
            omega0,
            omega2,
            p0,
            p1,
        };
        model.update_matrices()?;
        Ok(model)
    }

    fn update_matrices(&mut self) -> Result<()> {
        let freq = self.base.data().freq().clone();
        let make = |omega: f64| -> Result<Arc<EMatrix>> {
            let (q, scale) = build_q(&freq, self.kappa, omega);
            Ok(Arc::new(EMatrix::new(q, freq.freq().clone(), scale)?))
        };
        let em0 = make(self.omega0)?;
        let em1 = make(1.0)?;
        let em2 = make(self.omega2)?;

        let tree = self.base.data().tree().clone();
        let root = tree.root();
        for node in 0..tree.n_nodes() {
            if node == root {
                continue;
            }
            let foreground = tree.label(node) != 0;
            // class layout: [0, 1, 2a, 2b]
            let per_class: [&Arc<EMatrix>; 4] = if foreground {
                [&em0, &em1, &em2, &em2]
            } else {
                [&em0, &em1, &em0, &em1]
            };
            for (class, em) in per_class.iter().enumerate() {
                self.base.set_branch_matrix(class, node, Arc::clone(em))?;
            }
        }
        Ok(())
    }

    pub fn base(&self) -> &BaseModel {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

fn proportions(p0: f64, p1: f64) -> Vec<f64> {
    let rest = 1.0 - p0 - p1;
    let p2a = rest * p0 / (p0 + p1);
    let p2b = rest * p1 / (p0 + p1);
    vec![p0, p1, p2a, p2b]
}

fn check_p0_p1(p0: f64, p1: f64) -> Result<()> {
    if !(p0 > 0.0) || !(p1 > 0.0) || p0 + p1 > 1.0 {
        return Err(Error::InvalidParameter(format!(
            "need p0 > 0, p1 > 0, p0 + p1 <= 1; got p0 = {}, p1 = {}",
            p0, p1
        )));
    }
    Ok(())
}

impl Model for BranchSiteModel {
    fn likelihood(&mut self) -> Result<f64> {
        self.base.likelihood()
    }

    fn float_parameters(&self) -> Vec<FloatParameter> {
        [
            ("kappa", self.kappa),
            ("omega0", self.omega0),
            ("omega2", self.omega2),
            ("p0", self.p0),
            ("p1", self.p1),
        ]
        .into_iter()
        .map(|(name, value)| FloatParameter {
            name: name.into(),
            value,
        })
        .collect()
    }

    fn set_float_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "kappa" => {
                if !(value > 0.0) || !value.is_finite() {
                    return Err(Error::InvalidParameter(format!("bad kappa {}", value)));
                }
                self.kappa = value;
                self.update_matrices()
            }
            "omega0" => {
                if !(0.0..=1.0).contains(&value) {
                    return Err(Error::InvalidParameter(format!(
                        "omega0 must lie in [0, 1], got {}",
                        value
                    )));
                }
                self.omega0 = value;
                self.update_matrices()
            }
            "omega2" => {
                if !(value >= 1.0) || !value.is_finite() {
                    return Err(Error::InvalidParameter(format!(
                        "omega2 must be >= 1, got {}",
                        value
                    )));
                }
                self.omega2 = value;
                self.update_matrices()
            }
            "p0" => {
                check_p0_p1(value, self.p1)?;
                self.p0 = value;
                self.base.set_proportions(proportions(self.p0, self.p1))
            }
            "p1" => {
                check_p0_p1(self.p0, value)?;
                self.p1 = value;
                self.base.set_proportions(proportions(self.p0, self.p1))
            }
            _ => Err(Error::UnknownParameter(name.to_string())),
        }
    }

    fn copy(&self) -> Box<dyn Model> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::CodonAlignment;
    use crate::codon::GeneticCode;
    use crate::frequency::CodonFrequency;
    use crate::tree::Tree;

    fn fixture() -> ModelData {
        // foreground on the (A,B) ancestral branch
        let tree =
            Tree::from_newick("((A:0.1,B:0.2)#1:0.12,(C:0.3,D:0.15):0.05);").unwrap();
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

    #[test]
    fn proportions_partition_to_one() {
        let p = proportions(0.6, 0.3);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((p[2] - 0.1 * 0.6 / 0.9).abs() < 1e-12);
    }

    #[test]
    fn requires_a_foreground_branch() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.12,(C:0.3,D:0.15):0.05);").unwrap();
        let code = GeneticCode::standard();
        let aln = CodonAlignment::from_dna(
            Arc::clone(&code),
            &[
                ("A", "ATGGCT"),
                ("B", "ATGGCC"),
                ("C", "ATGGCT"),
                ("D", "ATGGCA"),
            ],
        )
        .unwrap();
        let data = ModelData::new(tree, &aln, CodonFrequency::f0(code)).unwrap();
        assert!(BranchSiteModel::new(data, 2.0, 0.1, 2.0, 0.6, 0.3).is_err());
    }

    #[test]
    fn neutral_collapse_matches_m0() {
        // omega0 = 1 and omega2 = 1 make every class neutral, so the
        // mixture equals single-class M0 with omega = 1.
        let mut bs = BranchSiteModel::new(fixture(), 2.0, 1.0, 1.0, 0.6, 0.3).unwrap();
        let mut m0 = crate::m0::M0::new(fixture(), 2.0, 1.0).unwrap();
        let a = bs.likelihood().unwrap();
        let b = m0.likelihood().unwrap();
        assert!((a - b).abs() < 1e-9, "branch-site {} vs m0 {}", a, b);
    }

    #[test]
    fn foreground_omega_changes_likelihood() {
        let mut bs = BranchSiteModel::new(fixture(), 2.0, 0.1, 1.0, 0.6, 0.3).unwrap();
        let l1 = bs.likelihood().unwrap();
        bs.set_float_parameter("omega2", 4.0).unwrap();
        let l2 = bs.likelihood().unwrap();
        assert!((l1 - l2).abs() > 1e-9);
    }

    #[test]
    fn parameter_validation() {
        assert!(BranchSiteModel::new(fixture(), 2.0, 1.5, 2.0, 0.6, 0.3).is_err());
        assert!(BranchSiteModel::new(fixture(), 2.0, 0.1, 0.5, 0.6, 0.3).is_err());
        assert!(BranchSiteModel::new(fixture(), 2.0, 0.1, 2.0, 0.8, 0.4).is_err());

        let mut bs = BranchSiteModel::new(fixture(), 2.0, 0.1, 2.0, 0.6, 0.3).unwrap();
        assert!(bs.set_float_parameter("omega0", 2.0).is_err());
        assert!(bs.set_float_parameter("p0", 0.9).is_err());
        assert!(bs.set_float_parameter("nope", 1.0).is_err());
    }
}
