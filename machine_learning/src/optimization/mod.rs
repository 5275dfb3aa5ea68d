mod adam;
mod gradient_descent;
mod optimizer;
mod schedule;

pub use adam::AdamW;
pub use gradient_descent::GradientDescent;
pub use optimizer::Optimizer;
pub use schedule::LinearSchedule;
