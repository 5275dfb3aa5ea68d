use ndarray::{Array2, ArrayView2};

use super::ActFn;
use crate::{MlErr, Result};

/// An element-wise activation layer, it keeps its input around for the backward pass.
#[derive(Debug, Clone)]
pub struct Activation {
    act_fn: ActFn,
    z: Option<Array2<f32>>,
}

impl Activation {
    pub fn new(act_fn: ActFn) -> Self {
        Self { act_fn, z: None }
    }

    pub fn act_fn(&self) -> ActFn {
        self.act_fn
    }

    pub fn forward(&mut self, z: ArrayView2<f32>) -> Array2<f32> {
        let act_fn = self.act_fn;
        let a = z.mapv(|z| act_fn.f(z));
        self.z = Some(z.to_owned());
        a
    }

    pub fn backward(&mut self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        let act_fn = self.act_fn;
        let z = self.z.as_ref().ok_or(MlErr::NotForwarded("activation"))?;

        d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
        Ok(d)
    }
}
