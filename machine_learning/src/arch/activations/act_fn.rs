use std::{f32::consts::PI, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Element-wise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFn {
    #[default]
    Gelu,
    Relu,
    Swish,
}
use ActFn::*;

impl ActFn {
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Gelu => 0.5 * x * (1. + erf(x / std::f32::consts::SQRT_2)),
            Relu => x.max(0.),
            Swish => x * sigmoid(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Gelu => {
                let cdf = 0.5 * (1. + erf(x / std::f32::consts::SQRT_2));
                let pdf = (-0.5 * x * x).exp() / (2. * PI).sqrt();
                cdf + x * pdf
            }
            Relu => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
            Swish => {
                let s = sigmoid(x);
                s + x * s * (1. - s)
            }
        }
    }
}

impl FromStr for ActFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gelu" => Ok(Gelu),
            "relu" => Ok(Relu),
            "swish" | "silu" => Ok(Swish),
            other => Err(format!("unknown activation function: {other}")),
        }
    }
}

impl fmt::Display for ActFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Gelu => "gelu",
            Relu => "relu",
            Swish => "swish",
        };

        f.write_str(s)
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f32) -> f32 {
    const A: [f32; 5] = [0.254829592, -0.284496736, 1.421413741, -1.453152027, 1.061405429];
    const P: f32 = 0.3275911;

    let sign = x.signum();
    let x = x.abs();
    let t = 1. / (1. + P * x);
    let poly = A.iter().rev().fold(0., |acc, a| acc * t + a) * t;

    sign * (1. - poly * (-x * x).exp())
}
