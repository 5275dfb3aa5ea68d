use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    LabelOutOfRange {
        label: usize,
        num_labels: usize,
    },
    EmptyInput(&'static str),
    MissingParam(String),
    NotForwarded(&'static str),
    InvalidConfig(String),
    Shape(ShapeError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::LabelOutOfRange { label, num_labels } => write!(
                f,
                "The label {label} is out of range for a model with {num_labels} labels"
            ),
            MlErr::EmptyInput(what) => write!(f, "Tried to compute {what} over an empty input"),
            MlErr::MissingParam(name) => write!(f, "The parameter {name} is missing"),
            MlErr::NotForwarded(what) => {
                write!(f, "Called backward on {what} before any forward pass")
            }
            MlErr::InvalidConfig(msg) => write!(f, "invalid model config: {msg}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}
