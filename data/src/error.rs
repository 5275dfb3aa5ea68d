use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use image::ImageError;
use ndarray::ShapeError;

/// The result type used in the entire data module.
pub type Result<T> = std::result::Result<T, DataErr>;

/// The data module's error type.
#[derive(Debug)]
pub enum DataErr {
    Io(io::Error),
    Image(ImageError),
    Shape(ShapeError),
    /// A dataset file doesn't follow the expected layout.
    Format(String),
    UnknownDataset(String),
    UnknownSplit(String),
    LabelOutOfRange {
        label: usize,
        num_classes: usize,
    },
    /// An example in a batch doesn't have the shape of the first one.
    ShapeMismatch {
        index: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    EmptyBatch,
    InvalidConfig(String),
}

impl Display for DataErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataErr::Io(e) => write!(f, "io error: {e}"),
            DataErr::Image(e) => write!(f, "image error: {e}"),
            DataErr::Shape(e) => write!(f, "shape error: {e}"),
            DataErr::Format(msg) => write!(f, "malformed dataset: {msg}"),
            DataErr::UnknownDataset(name) => write!(f, "unknown dataset {name:?}"),
            DataErr::UnknownSplit(name) => {
                write!(f, "unknown split {name:?}, expected \"train\" or \"test\"")
            }
            DataErr::LabelOutOfRange { label, num_classes } => write!(
                f,
                "the label {label} is out of range for a dataset with {num_classes} classes"
            ),
            DataErr::ShapeMismatch {
                index,
                got,
                expected,
            } => write!(
                f,
                "example {index} has shape {got:?} but the batch expects {expected:?}"
            ),
            DataErr::EmptyBatch => write!(f, "tried to collate an empty batch"),
            DataErr::InvalidConfig(msg) => write!(f, "invalid data config: {msg}"),
        }
    }
}

impl Error for DataErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataErr::Io(e) => Some(e),
            DataErr::Image(e) => Some(e),
            DataErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DataErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ImageError> for DataErr {
    fn from(value: ImageError) -> Self {
        Self::Image(value)
    }
}

impl From<ShapeError> for DataErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
