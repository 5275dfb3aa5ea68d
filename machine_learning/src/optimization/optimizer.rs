use crate::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the accumulated gradient.
    ///
    /// # Arguments
    /// * `params` - The parameters to update.
    /// * `grad` - The gradient of the loss with respect to `params`.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;

    /// Sets the learning rate used by the following updates, the way a schedule does.
    fn set_learning_rate(&mut self, learning_rate: f32);
}
