use ndarray::{Axis, linalg, prelude::*};

use crate::{
    MlErr, Result,
    arch::{Param, ParamVisitor},
    initialization::ParamGen,
};

/// A fully connected layer: `y = x Wᵀ + b`.
///
/// The weight is stored as `(out, in)`, the same layout pretrained checkpoints use, so they
/// can be loaded without transposing.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    weight: Param,
    bias: Param,

    // Forward metadata
    x: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense` layer from already built parameters.
    ///
    /// # Arguments
    /// * `dim` - The (input, output) dimensions of the layer.
    /// * `weight` - A `(output, input)` parameter.
    /// * `bias` - A `(output)` parameter.
    ///
    /// # Returns
    /// A new `Dense` or an error if the parameter shapes don't match `dim`.
    pub fn new(dim: (usize, usize), weight: Param, bias: Param) -> Result<Self> {
        let (n, m) = dim;

        if weight.shape() != [m, n] {
            return Err(MlErr::ShapeMismatch {
                what: "dense weight".into(),
                got: weight.shape().to_vec(),
                expected: vec![m, n],
            });
        }

        if bias.shape() != [m] {
            return Err(MlErr::ShapeMismatch {
                what: "dense bias".into(),
                got: bias.shape().to_vec(),
                expected: vec![m],
            });
        }

        Ok(Self {
            dim,
            weight,
            bias,
            x: None,
        })
    }

    /// Creates a new `Dense` layer sampling its parameters from generators.
    ///
    /// # Arguments
    /// * `dim` - The (input, output) dimensions of the layer.
    /// * `weight_gen` - The generator for the weights.
    /// * `bias_gen` - The generator for the biases.
    pub fn init<W, B>(dim: (usize, usize), weight_gen: &mut W, bias_gen: &mut B) -> Result<Self>
    where
        W: ParamGen + ?Sized,
        B: ParamGen + ?Sized,
    {
        let weight = Param::generate(&[dim.1, dim.0], weight_gen)?;
        let bias = Param::generate(&[dim.1], bias_gen)?;
        Self::new(dim, weight, bias)
    }

    /// Returns the (input, output) dimensions of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.weight.set_trainable(trainable);
        self.bias.set_trainable(trainable);
    }

    pub fn is_trainable(&self) -> bool {
        self.weight.is_trainable() || self.bias.is_trainable()
    }

    /// Makes a forward pass through the layer, keeping `x` for the backward pass.
    ///
    /// # Arguments
    /// * `x` - A `(rows, input)` matrix.
    ///
    /// # Returns
    /// The `(rows, output)` result or an error if `x` has the wrong amount of columns.
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (n, m) = self.dim;

        if x.ncols() != n {
            return Err(MlErr::SizeMismatch {
                what: "dense input columns",
                got: x.ncols(),
                expected: n,
            });
        }

        let w = self.weight.view2(m, n)?;
        let b = self.bias.view1()?;

        let mut z = Array2::zeros((x.nrows(), m));
        linalg::general_mat_mul(1.0, &x, &w.t(), 0.0, &mut z);
        z += &b;

        self.x = Some(x.to_owned());
        Ok(z)
    }

    /// Propagates the delta `d` backwards. Gradients are only accumulated into the trainable
    /// parameters.
    ///
    /// # Arguments
    /// * `d` - The `(rows, output)` delta of this layer's output.
    ///
    /// # Returns
    /// The `(rows, input)` delta of this layer's input.
    pub fn backward(&mut self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (n, m) = self.dim;
        let x = self.x.as_ref().ok_or(MlErr::NotForwarded("dense"))?;

        if let Some(mut dw) = self.weight.grad_view2_mut(m, n)? {
            linalg::general_mat_mul(1.0, &d.t(), x, 1.0, &mut dw);
        }

        if let Some(mut db) = self.bias.grad_view1_mut()? {
            db += &d.sum_axis(Axis(0));
        }

        let w = self.weight.view2(m, n)?;
        let mut dx = Array2::zeros((d.nrows(), n));
        linalg::general_mat_mul(1.0, &d, &w, 0.0, &mut dx);

        Ok(dx)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        f(&format!("{prefix}.weight"), &mut self.weight)?;
        f(&format!("{prefix}.bias"), &mut self.bias)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    fn layer() -> Dense {
        let weight = Param::new(&[2, 3], vec![0.1, -0.2, 0.3, 0.4, 0.5, -0.6]).unwrap();
        let bias = Param::new(&[2], vec![0.5, -0.5]).unwrap();
        Dense::new((3, 2), weight, bias).unwrap()
    }

    #[test]
    fn forward_known_values() {
        let mut dense = layer();
        let x = array![[1., 2., 3.]];

        let y = dense.forward(x.view()).unwrap();

        assert_abs_diff_eq!(y[[0, 0]], 0.1 - 0.4 + 0.9 + 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(y[[0, 1]], 0.4 + 1.0 - 1.8 - 0.5, epsilon = 1e-6);
    }

    #[test]
    fn wrong_input_width() {
        let mut dense = layer();
        assert!(dense.forward(array![[1., 2.]].view()).is_err());
    }

    #[test]
    fn backward_before_forward() {
        let mut dense = layer();
        assert!(matches!(
            dense.backward(array![[1., 1.]].view()),
            Err(MlErr::NotForwarded(_))
        ));
    }

    #[test]
    fn frozen_layer_gets_no_gradient() {
        let mut dense = layer();
        dense.forward(array![[1., 2., 3.]].view()).unwrap();
        dense.backward(array![[1., 1.]].view()).unwrap();

        let mut grads = 0;
        dense
            .visit_params("dense", &mut |_, p| {
                grads += p.grad().is_some() as usize;
                Ok(())
            })
            .unwrap();

        assert_eq!(grads, 0);
    }

    #[test]
    fn gradients_match_finite_differences() {
        const EPS: f32 = 1e-2;

        let x = array![[1., 2., 3.], [-1., 0.5, 0.]];
        let r = array![[0.3, -0.7], [1.1, 0.2]];
        let loss = |dense: &mut Dense| (dense.forward(x.view()).unwrap() * &r).sum();

        let mut dense = layer();
        dense.set_trainable(true);
        dense.forward(x.view()).unwrap();
        let dx = dense.backward(r.view()).unwrap();

        // dL/dW_ij = sum_rows r_i * x_j
        let mut grads = Vec::new();
        dense
            .visit_params("dense", &mut |_, p| {
                grads.push(p.grad().unwrap().to_vec());
                Ok(())
            })
            .unwrap();

        let mut perturbed = layer();
        let base = loss(&mut perturbed);
        for (k, analytic) in grads[0].iter().enumerate() {
            let mut values = layer().weight.value().to_vec();
            values[k] += EPS;
            perturbed.weight.assign("w", &[2, 3], &values).unwrap();
            let numeric = (loss(&mut perturbed) - base) / EPS;
            assert_abs_diff_eq!(*analytic, numeric, epsilon = 1e-2);
        }

        assert_abs_diff_eq!(grads[1][0], 1.4, epsilon = 1e-6);
        assert_abs_diff_eq!(grads[1][1], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(dx[[0, 0]], 0.3 * 0.1 - 0.7 * 0.4, epsilon = 1e-6);
    }
}
