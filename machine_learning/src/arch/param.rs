use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

use crate::{MlErr, Result, initialization::ParamGen};

/// A model tensor stored as a flat buffer together with its shape.
///
/// A parameter is either frozen, in which case it has no gradient buffer and is never
/// updated, or trainable, in which case backward passes accumulate into its gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    shape: Vec<usize>,
    value: Vec<f32>,
    grad: Option<Vec<f32>>,
}

impl Param {
    /// Creates a new frozen `Param`.
    ///
    /// # Arguments
    /// * `shape` - The shape of the tensor.
    /// * `value` - The row-major values of the tensor.
    ///
    /// # Returns
    /// A new `Param` or an error if `value` doesn't hold exactly `shape.product()` values.
    pub fn new(shape: &[usize], value: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product();

        if value.len() != expected {
            return Err(MlErr::SizeMismatch {
                what: "param values",
                got: value.len(),
                expected,
            });
        }

        Ok(Self {
            shape: shape.to_vec(),
            value,
            grad: None,
        })
    }

    /// Creates a new frozen `Param` drawing its values from a generator.
    ///
    /// # Arguments
    /// * `shape` - The shape of the tensor.
    /// * `param_gen` - The generator for the initial values.
    ///
    /// # Returns
    /// A new `Param` or an error if the generator got exhausted.
    pub fn generate<G>(shape: &[usize], param_gen: &mut G) -> Result<Self>
    where
        G: ParamGen + ?Sized,
    {
        let expected: usize = shape.iter().product();
        let value = param_gen.sample(expected).unwrap_or_default();
        Self::new(shape, value)
    }

    /// Marks this parameter as trainable or frozen. Freezing drops the gradient buffer.
    pub fn set_trainable(&mut self, trainable: bool) {
        match (trainable, &self.grad) {
            (true, None) => self.grad = Some(vec![0.; self.value.len()]),
            (false, Some(_)) => self.grad = None,
            _ => {}
        }
    }

    /// Builder flavored version of `set_trainable(true)`.
    pub fn trainable(mut self) -> Self {
        self.set_trainable(true);
        self
    }

    pub fn is_trainable(&self) -> bool {
        self.grad.is_some()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn value(&self) -> &[f32] {
        &self.value
    }

    pub fn grad(&self) -> Option<&[f32]> {
        self.grad.as_deref()
    }

    /// Gives mutable access to the values together with the gradient, the way an optimizer
    /// needs them.
    ///
    /// # Returns
    /// The values and the gradient, `None` in the latter if the parameter is frozen.
    pub fn value_and_grad_mut(&mut self) -> (&mut [f32], Option<&[f32]>) {
        (&mut self.value, self.grad.as_deref())
    }

    /// Sets the gradient buffer back to zero.
    pub fn zero_grad(&mut self) {
        if let Some(grad) = &mut self.grad {
            grad.fill(0.);
        }
    }

    /// Replaces the values of this parameter keeping its trainability.
    ///
    /// # Arguments
    /// * `what` - The name of this parameter, used in the error.
    /// * `shape` - The shape of the incoming values.
    /// * `value` - The incoming values.
    ///
    /// # Returns
    /// An error if the shapes don't match.
    pub fn assign(&mut self, what: &str, shape: &[usize], value: &[f32]) -> Result<()> {
        if shape != self.shape.as_slice() || value.len() != self.value.len() {
            return Err(MlErr::ShapeMismatch {
                what: what.to_string(),
                got: shape.to_vec(),
                expected: self.shape.clone(),
            });
        }

        self.value.copy_from_slice(value);
        Ok(())
    }

    /// Views the values as a vector.
    pub fn view1(&self) -> Result<ArrayView1<'_, f32>> {
        Ok(ArrayView1::from_shape(self.value.len(), &self.value)?)
    }

    /// Views the values as a `(rows, cols)` matrix.
    pub fn view2(&self, rows: usize, cols: usize) -> Result<ArrayView2<'_, f32>> {
        Ok(ArrayView2::from_shape((rows, cols), &self.value)?)
    }

    /// Views the gradient as a vector, `None` if the parameter is frozen.
    pub fn grad_view1_mut(&mut self) -> Result<Option<ArrayViewMut1<'_, f32>>> {
        let Some(grad) = &mut self.grad else {
            return Ok(None);
        };

        let len = grad.len();
        Ok(Some(ArrayViewMut1::from_shape(len, grad.as_mut_slice())?))
    }

    /// Views the gradient as a `(rows, cols)` matrix, `None` if the parameter is frozen.
    pub fn grad_view2_mut(&mut self, rows: usize, cols: usize) -> Result<Option<ArrayViewMut2<'_, f32>>> {
        let Some(grad) = &mut self.grad else {
            return Ok(None);
        };

        Ok(Some(ArrayViewMut2::from_shape((rows, cols), grad.as_mut_slice())?))
    }
}

/// The visitor signature used to walk over every parameter of a model.
pub type ParamVisitor<'a> = dyn FnMut(&str, &mut Param) -> Result<()> + 'a;
