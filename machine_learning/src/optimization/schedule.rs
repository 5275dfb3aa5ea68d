/// A learning rate that grows linearly from zero during the warmup steps and then decays
/// linearly back to zero at the last step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSchedule {
    base_lr: f32,
    warmup_steps: usize,
    total_steps: usize,
}

impl LinearSchedule {
    /// Creates a new `LinearSchedule`.
    ///
    /// # Arguments
    /// * `base_lr` - The peak learning rate, reached at the end of the warmup.
    /// * `warmup_steps` - The amount of steps to warm up for.
    /// * `total_steps` - The amount of optimization steps of the whole training.
    pub fn new(base_lr: f32, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
        }
    }

    pub fn base_lr(&self) -> f32 {
        self.base_lr
    }

    /// The learning rate for the optimization step `step`, counting from zero.
    pub fn lr_at(&self, step: usize) -> f32 {
        if step < self.warmup_steps {
            return self.base_lr * step as f32 / self.warmup_steps.max(1) as f32;
        }

        let remaining = self.total_steps.saturating_sub(step) as f32;
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f32;
        self.base_lr * (remaining / decay_steps).max(0.)
    }
}
