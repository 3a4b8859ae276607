//! Retention: multi-head attention whose scores are damped by a learned per-head exponential decay
//! over the query-key time distance, and whose output is gated by the input.
//!
//! References:
//! - Retentive Network: A Successor to Transformer for Large Language Models (https://arxiv.org/abs/2307.08621)

use crate::rotary::{AngleLayout, RotaryEmbedding, RotaryEmbeddingConfig};
use crate::utils::{silu::Silu, uniform_init};
use burn::module::Param;
use burn::nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig};
use burn::prelude::*;

#[derive(Module, Debug)]
pub struct Retention<B: Backend> {
    /// Input channel: embed_dim.
    /// Output channel: embed_dim.
    pub w_q: Linear<B>,

    /// Input channel: embed_dim.
    /// Output channel: embed_dim.
    pub w_k: Linear<B>,

    /// Input channel: embed_dim.
    /// Output channel: embed_dim.
    pub w_v: Linear<B>,

    /// Output gate projection.
    ///
    /// Input channel: embed_dim.
    /// Output channel: embed_dim.
    pub gate: Linear<B>,

    /// Pre-sigmoid decay rate, one per head.
    ///
    /// Dims: [heads].
    pub gamma: Param<Tensor<B, 1>>,

    /// Applied on Q and K, with dim = head_dim.
    pub rotary: RotaryEmbedding<B>,

    pub dropout: Dropout,

    pub heads: usize,
}

#[derive(Config, Debug)]
pub struct RetentionConfig {
    /// Hidden dimension. Must be divisible by `heads`.
    pub embed_dim: usize,

    #[config(default = 8)]
    pub heads: usize,

    #[config(default = 0.1)]
    pub dropout: f64,

    #[config(default = "AngleLayout::Concatenated")]
    pub rotary_layout: AngleLayout,
}

impl RetentionConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Retention<B> {
        assert!(self.heads > 0, "heads must be positive");
        assert_eq!(
            self.embed_dim % self.heads,
            0,
            "embed_dim ({}) must be divisible by heads ({})",
            self.embed_dim,
            self.heads
        );
        let head_dim = self.head_dim();

        let linear = || {
            LinearConfig::new(self.embed_dim, self.embed_dim)
                .with_bias(true)
                // follows PyTorch's default initializer
                .with_initializer(uniform_init(self.embed_dim))
                .init::<B>(device)
        };

        Retention {
            w_q: linear(),
            w_k: linear(),
            w_v: linear(),
            gate: linear(),
            gamma: Initializer::Normal {
                mean: 0.0,
                std: 1.0,
            }
            .init([self.heads], device),
            rotary: RotaryEmbeddingConfig::new(head_dim)
                .with_layout(self.rotary_layout)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            heads: self.heads,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.heads
    }
}

impl<B: Backend> Retention<B> {
    /// # Shapes
    ///   - Input [batch, sequence, embed_dim]
    ///   - Output [batch, sequence, embed_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, sequence, embed_dim] = x.dims();
        let heads = self.heads;
        let head_dim = embed_dim / heads;
        assert_eq!(embed_dim, heads * head_dim);

        let split_heads = |t: Tensor<B, 3>| -> Tensor<B, 4> {
            t.reshape([batch, sequence, heads, head_dim]).swap_dims(1, 2)
        };
        let q = split_heads(self.w_q.forward(x.clone()));
        let k = split_heads(self.w_k.forward(x.clone()));
        let v = split_heads(self.w_v.forward(x.clone()));
        assert_eq!([batch, heads, sequence, head_dim], q.dims());

        let q = self.rotary.forward(q);
        let k = self.rotary.forward(k);

        let scores = q.matmul(k.swap_dims(2, 3)) / (head_dim as f64).sqrt();
        assert_eq!([batch, heads, sequence, sequence], scores.dims());

        let decay = self
            .decay_weights(sequence, &x.device())
            .unsqueeze_dim::<4>(0)
            .expand([batch, heads, sequence, sequence]);
        let out = (scores * decay).matmul(v);
        assert_eq!([batch, heads, sequence, head_dim], out.dims());

        // concat heads
        let out = out.swap_dims(1, 2).reshape([batch, sequence, embed_dim]);

        // the gate sees the mixer input, not the rotated projections
        let gate = Silu::new().forward(self.gate.forward(x));
        assert_eq!([batch, sequence, embed_dim], gate.dims());

        self.dropout.forward(gate * out)
    }

    /// Per-head decay weights `w[h, i, j] = exp(-sigmoid(gamma_h) * max(i - j, 0))`.
    ///
    /// `i` indexes the query and `j` the key. Keys after the query (`j > i`) are not masked: their
    /// distance clamps to zero, so they get the undamped weight 1.
    ///
    /// # Shapes
    ///   - Output [heads, sequence, sequence]
    pub fn decay_weights(&self, sequence: usize, device: &B::Device) -> Tensor<B, 3> {
        let heads = self.heads;
        let shape = [heads, sequence, sequence];

        let idx = Tensor::<B, 1, Int>::arange(0..sequence as i64, device).float();
        let query = idx.clone().reshape([sequence, 1]).expand([sequence, sequence]);
        let key = idx.reshape([1, sequence]).expand([sequence, sequence]);
        let distance = (query - key).clamp_min(0.0);
        let distance = distance.unsqueeze_dim::<3>(0).expand(shape);

        let gamma = burn::tensor::activation::sigmoid(self.gamma.val());
        let gamma = gamma.reshape([heads, 1, 1]).expand(shape);

        (gamma.neg() * distance).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::all_finite;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn decay_is_one_for_present_and_future_keys() {
        let device = Default::default();
        let mut retention = RetentionConfig::new(8).with_heads(2).init::<TestBackend>(&device);
        retention.gamma = Param::from_tensor(Tensor::from_floats([0.0, 1.5], &device));

        let sequence = 5;
        let w = retention.decay_weights(sequence, &device);
        assert_eq!([2, sequence, sequence], w.dims());
        let w = w.into_data().to_vec::<f32>().unwrap();

        let gammas = [0.5f32, 1.0 / (1.0 + (-1.5f32).exp())];
        for (h, gamma) in gammas.iter().enumerate() {
            for i in 0..sequence {
                for j in 0..sequence {
                    let value = w[(h * sequence + i) * sequence + j];
                    if i <= j {
                        assert_eq!(1.0, value, "w[{h}, {i}, {j}]");
                    } else {
                        let expected = (-gamma * (i - j) as f32).exp();
                        assert!((value - expected).abs() < 1e-6, "w[{h}, {i}, {j}]");
                    }
                }
            }
        }
    }

    #[test]
    fn output_keeps_the_input_shape() {
        let device = Default::default();
        let retention = RetentionConfig::new(16).with_heads(4).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::random([3, 7, 16], Distribution::Default, &device);

        let y = retention.forward(x);

        assert_eq!([3, 7, 16], y.dims());
        assert!(all_finite(&y));
    }

    #[test]
    fn future_tokens_influence_earlier_positions() {
        let device = Default::default();
        let retention = RetentionConfig::new(8)
            .with_heads(2)
            .with_dropout(0.0)
            .init::<TestBackend>(&device);

        let values: Vec<f32> = (0..4 * 8).map(|i| ((i as f32) * 0.37).sin()).collect();
        let x = Tensor::<TestBackend, 3>::from_data(TensorData::new(values.clone(), [1, 4, 8]), &device);
        let mut changed = values;
        for value in changed[3 * 8..].iter_mut() {
            *value += 1.0;
        }
        let x_changed = Tensor::<TestBackend, 3>::from_data(TensorData::new(changed, [1, 4, 8]), &device);

        // only the last position differs, yet the first position's output moves
        let first = retention.forward(x).narrow(1, 0, 1);
        let first_changed = retention.forward(x_changed).narrow(1, 0, 1);
        let delta = (first - first_changed).abs().max().into_scalar();

        assert!(delta > 1e-6);
    }

    #[test]
    #[should_panic(expected = "must be divisible by heads")]
    fn rejects_indivisible_heads() {
        let device = Default::default();
        RetentionConfig::new(10).with_heads(4).init::<TestBackend>(&device);
    }
}
