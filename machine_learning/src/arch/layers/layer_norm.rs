use ndarray::{Axis, Zip, prelude::*};

use crate::{
    MlErr, Result,
    arch::{Param, ParamVisitor},
    initialization::ConstParamGen,
};

/// Normalizes every row to zero mean and unit variance, then applies a learned scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    dim: usize,
    eps: f32,
    gamma: Param,
    beta: Param,

    // Forward metadata
    x_hat: Option<Array2<f32>>,
    inv_std: Option<Array1<f32>>,
}

impl LayerNorm {
    /// Creates a new `LayerNorm` with unit scale and zero shift.
    ///
    /// # Arguments
    /// * `dim` - The width of the normalized rows.
    /// * `eps` - Added to the variance for numerical stability.
    pub fn new(dim: usize, eps: f32) -> Result<Self> {
        Ok(Self {
            dim,
            eps,
            gamma: Param::generate(&[dim], &mut ConstParamGen::ones(dim))?,
            beta: Param::generate(&[dim], &mut ConstParamGen::zeros(dim))?,
            x_hat: None,
            inv_std: None,
        })
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.gamma.set_trainable(trainable);
        self.beta.set_trainable(trainable);
    }

    pub fn is_trainable(&self) -> bool {
        self.gamma.is_trainable() || self.beta.is_trainable()
    }

    pub fn size(&self) -> usize {
        2 * self.dim
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim {
            return Err(MlErr::SizeMismatch {
                what: "layer norm input columns",
                got: x.ncols(),
                expected: self.dim,
            });
        }

        let n = self.dim as f32;
        let mean = x.sum_axis(Axis(1)) / n;
        let centered = &x - &mean.view().insert_axis(Axis(1));
        let var = centered.mapv(|c| c * c).sum_axis(Axis(1)) / n;
        let inv_std = var.mapv(|v| 1. / (v + self.eps).sqrt());
        let x_hat = centered * &inv_std.view().insert_axis(Axis(1));

        let y = &x_hat * &self.gamma.view1()? + &self.beta.view1()?;

        self.x_hat = Some(x_hat);
        self.inv_std = Some(inv_std);
        Ok(y)
    }

    pub fn backward(&mut self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let x_hat = self.x_hat.as_ref().ok_or(MlErr::NotForwarded("layer norm"))?;
        let inv_std = self.inv_std.as_ref().ok_or(MlErr::NotForwarded("layer norm"))?;

        if let Some(mut dgamma) = self.gamma.grad_view1_mut()? {
            dgamma += &(&d * x_hat).sum_axis(Axis(0));
        }

        if let Some(mut dbeta) = self.beta.grad_view1_mut()? {
            dbeta += &d.sum_axis(Axis(0));
        }

        let n = self.dim as f32;
        let dx_hat = &d * &self.gamma.view1()?;
        let sum = dx_hat.sum_axis(Axis(1));
        let dot = (&dx_hat * x_hat).sum_axis(Axis(1));

        let mut dx = Array2::zeros(d.raw_dim());
        Zip::from(dx.rows_mut())
            .and(dx_hat.rows())
            .and(x_hat.rows())
            .and(inv_std)
            .and(&sum)
            .and(&dot)
            .for_each(|mut dx, dx_hat, x_hat, &inv_std, &sum, &dot| {
                Zip::from(&mut dx)
                    .and(&dx_hat)
                    .and(&x_hat)
                    .for_each(|dx, &g, &h| *dx = inv_std / n * (n * g - sum - h * dot));
            });

        Ok(dx)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        f(&format!("{prefix}.weight"), &mut self.gamma)?;
        f(&format!("{prefix}.bias"), &mut self.beta)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn rows_are_normalized() {
        let mut ln = LayerNorm::new(4, 1e-12).unwrap();
        let y = ln.forward(array![[1., 2., 3., 4.], [10., 10., 10., 14.]].view()).unwrap();

        for row in y.rows() {
            assert_abs_diff_eq!(row.mean().unwrap(), 0., epsilon = 1e-5);
            assert_abs_diff_eq!(row.mapv(|v| v * v).mean().unwrap(), 1., epsilon = 1e-4);
        }
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        const EPS: f32 = 1e-2;

        let x = array![[0.5, -1.0, 2.0], [0.1, 0.3, -0.2]];
        let r = array![[0.2, -0.4, 0.9], [1.0, 0.5, -0.3]];

        let mut ln = LayerNorm::new(3, 1e-5).unwrap();
        ln.set_trainable(true);
        ln.forward(x.view()).unwrap();
        let dx = ln.backward(r.view()).unwrap();

        for i in 0..2 {
            for j in 0..3 {
                let mut plus = x.clone();
                plus[[i, j]] += EPS;
                let mut minus = x.clone();
                minus[[i, j]] -= EPS;

                let lp = (ln.forward(plus.view()).unwrap() * &r).sum();
                let lm = (ln.forward(minus.view()).unwrap() * &r).sum();
                assert_abs_diff_eq!(dx[[i, j]], (lp - lm) / (2. * EPS), epsilon = 2e-2);
            }
        }
    }

    #[test]
    fn beta_gradient_is_column_sum() {
        let mut ln = LayerNorm::new(2, 1e-5).unwrap();
        ln.set_trainable(true);
        ln.forward(array![[1., 2.], [3., 5.]].view()).unwrap();
        ln.backward(array![[1., 2.], [3., 4.]].view()).unwrap();

        let mut beta_grad = Vec::new();
        ln.visit_params("ln", &mut |name, p| {
            if name.ends_with("bias") {
                beta_grad = p.grad().unwrap().to_vec();
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(beta_grad, vec![4., 6.]);
    }
}
