use crate::utils::{silu::Silu, uniform_init};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

/// SiLU-gated feed-forward: `w3(silu(w1(x)) * w2(x))`.
#[derive(Module, Debug)]
pub struct GatedFeedForward<B: Backend> {
    /// Input channel: embed_dim.
    /// Output channel: ffn_dim.
    pub w1: Linear<B>,

    /// Input channel: embed_dim.
    /// Output channel: ffn_dim.
    pub w2: Linear<B>,

    /// Input channel: ffn_dim.
    /// Output channel: embed_dim.
    pub w3: Linear<B>,
}

#[derive(Config, Debug)]
pub struct GatedFeedForwardConfig {
    pub embed_dim: usize,

    /// By default, set to 4 * embed_dim.
    pub ffn_dim: Option<usize>,
}

impl GatedFeedForwardConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedFeedForward<B> {
        let ffn_dim = self.ffn_dim();
        assert_ne!(ffn_dim, 0, "ffn_dim must be positive");

        let linear = |d_input: usize, d_output: usize| {
            LinearConfig::new(d_input, d_output)
                .with_bias(true)
                // follows PyTorch's default initializer
                .with_initializer(uniform_init(d_input))
                .init::<B>(device)
        };

        GatedFeedForward {
            w1: linear(self.embed_dim, ffn_dim),
            w2: linear(self.embed_dim, ffn_dim),
            w3: linear(ffn_dim, self.embed_dim),
        }
    }

    pub fn ffn_dim(&self) -> usize {
        self.ffn_dim.unwrap_or(4 * self.embed_dim)
    }
}

impl<B: Backend> GatedFeedForward<B> {
    /// # Shapes
    ///   - Input [batch, sequence, embed_dim]
    ///   - Output [batch, sequence, embed_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, sequence, embed_dim] = x.dims();
        let [_, ffn_dim] = self.w1.weight.dims();

        let gate = Silu::new().forward(self.w1.forward(x.clone()));
        let up = self.w2.forward(x);
        assert_eq!([batch, sequence, ffn_dim], gate.dims());
        assert_eq!([batch, sequence, ffn_dim], up.dims());

        let y = self.w3.forward(gate * up);
        assert_eq!([batch, sequence, embed_dim], y.dims());

        y
    }
}
