//! M0: one omega shared by every site and branch.

use std::sync::Arc;

use crate::ematrix::EMatrix;
use crate::error::{Error, Result};
use crate::model::{BaseModel, FloatParameter, Model, ModelData};
use crate::qmatrix::build_q;

/// The simplest codon model: a single site class with parameters kappa
/// (transition/transversion rate ratio) and omega (dN/dS).
#[derive(Clone)]
pub struct M0 {
    base: BaseModel,
    kappa: f64,
    omega: f64,
}

impl M0 {
    pub fn new(data: ModelData, kappa: f64, omega: f64) -> Result<Self> {
        check_kappa(kappa)?;
        check_omega(omega)?;
        let base = BaseModel::new(data, 1, vec![1.0])?;
        let mut model = Self { base, kappa, omega };
        model.update_matrices()?;
        Ok(model)
    }

    fn update_matrices(&mut self) -> Result<()> {
        let freq = self.base.data().freq().clone();
        let (q, scale) = build_q(&freq, self.kappa, self.omega);
        let em = Arc::new(EMatrix::new(q, freq.freq().clone(), scale)?);
        self.base.set_class_matrix(0, em)
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    pub fn set_kappa(&mut self, kappa: f64) -> Result<()> {
        check_kappa(kappa)?;
        self.kappa = kappa;
        self.update_matrices()
    }

    pub fn set_omega(&mut self, omega: f64) -> Result<()> {
        check_omega(omega)?;
        self.omega = omega;
        self.update_matrices()
    }

    pub fn base(&self) -> &BaseModel {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

impl Model for M0 {
    fn likelihood(&mut self) -> Result<f64> {
        self.base.likelihood()
    }

    fn float_parameters(&self) -> Vec<FloatParameter> {
        vec![
            FloatParameter {
                name: "kappa".into(),
                value: self.kappa,
            },
            FloatParameter {
                name: "omega".into(),
                value: self.omega,
            },
        ]
    }

    fn set_float_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "kappa" => self.set_kappa(value),
            "omega" => self.set_omega(value),
            _ => Err(Error::UnknownParameter(name.to_string())),
        }
    }

    fn copy(&self) -> Box<dyn Model> {
        Box::new(self.clone())
    }
}

fn check_kappa(kappa: f64) -> Result<()> {
    if !(kappa > 0.0) || !kappa.is_finite() {
        return Err(Error::InvalidParameter(format!(
            "kappa must be positive and finite, got {}",
            kappa
        )));
    }
    Ok(())
}

fn check_omega(omega: f64) -> Result<()> {
    if !(omega >= 0.0) || !omega.is_finite() {
        return Err(Error::InvalidParameter(format!(
            "omega must be non-negative and finite, got {}",
            omega
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::CodonAlignment;
    use crate::codon::GeneticCode;
    use crate::frequency::CodonFrequency;
    use crate::tree::Tree;

    fn fixture() -> ModelData {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.12,(C:0.3,D:0.15):0.05);").unwrap();
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
    fn parameters_round_trip() {
        let mut m = M0::new(fixture(), 2.0, 0.5).unwrap();
        let params = m.float_parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "kappa");
        assert_eq!(params[1].value, 0.5);

        m.set_float_parameter("omega", 1.5).unwrap();
        assert_eq!(m.omega(), 1.5);
        assert!(m.set_float_parameter("gamma", 1.0).is_err());
        assert!(m.set_kappa(-1.0).is_err());
        assert!(m.set_omega(f64::NAN).is_err());
    }

    #[test]
    fn copy_is_independent() {
        let mut m = M0::new(fixture(), 2.0, 0.5).unwrap();
        let l0 = m.likelihood().unwrap();

        let mut c = m.copy();
        c.set_float_parameter("omega", 2.0).unwrap();
        let l_copy = c.likelihood().unwrap();
        let l_again = m.likelihood().unwrap();

        assert_eq!(l0, l_again, "copy must not disturb the original");
        assert!((l0 - l_copy).abs() > 1e-6);
    }
}
