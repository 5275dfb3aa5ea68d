use ndarray::{Axis, s, prelude::*};

use super::Dense;
use crate::{MlErr, Result, arch::ParamVisitor};

/// Multi-head scaled dot-product self attention over sequences of `tokens` rows.
///
/// Inputs are `(batch * tokens, hidden)` matrices where the rows of every sequence are
/// contiguous.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    heads: usize,
    head_dim: usize,
    query: Dense,
    key: Dense,
    value: Dense,
    output: Dense,

    // Forward metadata
    cache: Option<AttentionCache>,
}

#[derive(Debug, Clone)]
struct AttentionCache {
    tokens: usize,
    q: Array2<f32>,
    k: Array2<f32>,
    v: Array2<f32>,
    // One `(tokens, tokens)` probability matrix per (sequence, head).
    probs: Vec<Array2<f32>>,
}

impl MultiHeadAttention {
    /// Creates a new `MultiHeadAttention`.
    ///
    /// # Arguments
    /// * `heads` - The amount of attention heads.
    /// * `query`, `key`, `value` - The `(hidden, hidden)` input projections.
    /// * `output` - The `(hidden, hidden)` output projection.
    ///
    /// # Returns
    /// A new `MultiHeadAttention` or an error if `hidden` isn't divisible by `heads`.
    pub fn new(heads: usize, query: Dense, key: Dense, value: Dense, output: Dense) -> Result<Self> {
        let hidden = query.dim().1;

        if heads == 0 || hidden % heads != 0 {
            return Err(MlErr::InvalidConfig(format!(
                "hidden size {hidden} is not divisible by {heads} attention heads"
            )));
        }

        for dense in [&key, &value, &output] {
            if dense.dim() != (hidden, hidden) {
                return Err(MlErr::InvalidConfig(format!(
                    "attention projections must be ({hidden}, {hidden}), got {:?}",
                    dense.dim()
                )));
            }
        }

        Ok(Self {
            heads,
            head_dim: hidden / heads,
            query,
            key,
            value,
            output,
            cache: None,
        })
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        for dense in [
            &mut self.query,
            &mut self.key,
            &mut self.value,
            &mut self.output,
        ] {
            dense.set_trainable(trainable);
        }
    }

    pub fn is_trainable(&self) -> bool {
        [&self.query, &self.key, &self.value, &self.output]
            .iter()
            .any(|dense| dense.is_trainable())
    }

    pub fn forward(&mut self, x: ArrayView2<f32>, tokens: usize) -> Result<Array2<f32>> {
        if tokens == 0 || x.nrows() % tokens != 0 {
            return Err(MlErr::SizeMismatch {
                what: "attention rows",
                got: x.nrows(),
                expected: tokens,
            });
        }

        let q = self.query.forward(x)?;
        let k = self.key.forward(x)?;
        let v = self.value.forward(x)?;

        let scale = 1. / (self.head_dim as f32).sqrt();
        let sequences = x.nrows() / tokens;
        let mut context = Array2::zeros(q.raw_dim());
        let mut probs = Vec::with_capacity(sequences * self.heads);

        for b in 0..sequences {
            let rows = b * tokens..(b + 1) * tokens;

            for h in 0..self.heads {
                let cols = h * self.head_dim..(h + 1) * self.head_dim;
                let qh = q.slice(s![rows.clone(), cols.clone()]);
                let kh = k.slice(s![rows.clone(), cols.clone()]);
                let vh = v.slice(s![rows.clone(), cols.clone()]);

                let mut p = qh.dot(&kh.t()) * scale;
                softmax_rows(&mut p);

                context
                    .slice_mut(s![rows.clone(), cols])
                    .assign(&p.dot(&vh));
                probs.push(p);
            }
        }

        let out = self.output.forward(context.view())?;
        self.cache = Some(AttentionCache {
            tokens,
            q,
            k,
            v,
            probs,
        });

        Ok(out)
    }

    pub fn backward(&mut self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let d_context = self.output.backward(d)?;
        let AttentionCache {
            tokens,
            q,
            k,
            v,
            probs,
        } = self.cache.as_ref().ok_or(MlErr::NotForwarded("attention"))?;

        let scale = 1. / (self.head_dim as f32).sqrt();
        let mut dq = Array2::zeros(q.raw_dim());
        let mut dk = Array2::zeros(k.raw_dim());
        let mut dv = Array2::zeros(v.raw_dim());

        for (i, p) in probs.iter().enumerate() {
            let (b, h) = (i / self.heads, i % self.heads);
            let rows = b * tokens..(b + 1) * tokens;
            let cols = h * self.head_dim..(h + 1) * self.head_dim;

            let dctx = d_context.slice(s![rows.clone(), cols.clone()]);
            let qh = q.slice(s![rows.clone(), cols.clone()]);
            let kh = k.slice(s![rows.clone(), cols.clone()]);
            let vh = v.slice(s![rows.clone(), cols.clone()]);

            let dp = dctx.dot(&vh.t());
            dv.slice_mut(s![rows.clone(), cols.clone()])
                .assign(&p.t().dot(&dctx));

            // softmax backward: ds = p * (dp - rowsum(dp * p))
            let row_dot = (&dp * p).sum_axis(Axis(1)).insert_axis(Axis(1));
            let ds = (dp - &row_dot) * p * scale;

            dq.slice_mut(s![rows.clone(), cols.clone()])
                .assign(&ds.dot(&kh));
            dk.slice_mut(s![rows, cols]).assign(&ds.t().dot(&qh));
        }

        let mut dx = self.query.backward(dq.view())?;
        dx += &self.key.backward(dk.view())?;
        dx += &self.value.backward(dv.view())?;

        Ok(dx)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        self.query
            .visit_params(&format!("{prefix}.attention.query"), f)?;
        self.key.visit_params(&format!("{prefix}.attention.key"), f)?;
        self.value
            .visit_params(&format!("{prefix}.attention.value"), f)?;
        self.output
            .visit_params(&format!("{prefix}.output.dense"), f)
    }
}

/// Numerically stable in-place softmax over every row.
pub fn softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use approx::assert_abs_diff_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::initialization::{ConstParamGen, RandParamGen};

    fn attention(hidden: usize, heads: usize) -> MultiHeadAttention {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(7)));
        let dense = || {
            let mut w = RandParamGen::normal(rng.clone(), hidden * hidden, 0., 0.5).unwrap();
            let mut b = RandParamGen::normal(rng.clone(), hidden, 0., 0.1).unwrap();
            Dense::init((hidden, hidden), &mut w, &mut b).unwrap()
        };

        MultiHeadAttention::new(heads, dense(), dense(), dense(), dense()).unwrap()
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut x = ndarray::array![[1., 2., 3.], [1000., 1000., 1000.]];
        softmax_rows(&mut x);

        for row in x.rows() {
            assert_abs_diff_eq!(row.sum(), 1., epsilon = 1e-6);
        }
        assert_abs_diff_eq!(x[[1, 0]], 1. / 3., epsilon = 1e-6);
    }

    #[test]
    fn heads_must_divide_hidden() {
        let mut param_gen = ConstParamGen::zeros(usize::MAX);
        let mut dense =
            || Dense::init((6, 6), &mut param_gen, &mut ConstParamGen::zeros(6)).unwrap();
        let (q, k, v, o) = (dense(), dense(), dense(), dense());

        assert!(MultiHeadAttention::new(4, q, k, v, o).is_err());
    }

    #[test]
    fn sequences_do_not_attend_to_each_other() {
        let mut attn = attention(4, 2);
        let x = Array2::from_shape_fn((6, 4), |(i, j)| ((i * 4 + j) as f32 * 0.37).sin());

        let full = attn.forward(x.view(), 3).unwrap();
        let first = attn.forward(x.slice(s![0..3, ..]), 3).unwrap();

        for (a, b) in full.slice(s![0..3, ..]).iter().zip(first.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        const EPS: f32 = 1e-2;

        let mut attn = attention(4, 2);
        let x = Array2::from_shape_fn((6, 4), |(i, j)| ((i * 4 + j) as f32 * 0.53).cos());
        let r = Array2::from_shape_fn((6, 4), |(i, j)| ((i + 2 * j) as f32 * 0.29).sin());

        attn.forward(x.view(), 3).unwrap();
        let dx = attn.backward(r.view()).unwrap();

        for i in 0..6 {
            for j in 0..4 {
                let mut plus = x.clone();
                plus[[i, j]] += EPS;
                let mut minus = x.clone();
                minus[[i, j]] -= EPS;

                let lp = (attn.forward(plus.view(), 3).unwrap() * &r).sum();
                let lm = (attn.forward(minus.view(), 3).unwrap() * &r).sum();
                assert_abs_diff_eq!(dx[[i, j]], (lp - lm) / (2. * EPS), epsilon = 2e-2);
            }
        }
    }
}
