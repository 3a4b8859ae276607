//! Stacks [`DillNetBlock`]s, alternating Retention and selective state-space mixers, into the
//! full DillNet model.
//!
//! References:
//! - Retentive Network: A Successor to Transformer for Large Language Models (https://arxiv.org/abs/2307.08621)
//! - Mamba: Linear-Time Sequence Modeling with Selective State Spaces (https://arxiv.org/abs/2312.00752)

use crate::dillnet::{DillNetBlock, DillNetBlockConfig, MixerKind};
use crate::rotary::AngleLayout;
use crate::utils::rms_norm::{RmsNorm, RmsNormConfig};
use burn::prelude::*;

#[derive(Module, Debug)]
pub struct DillNet<B: Backend> {
    pub blocks: Vec<DillNetBlock<B>>,
    pub final_norm: RmsNorm<B>,
}

#[derive(Config, Debug)]
pub struct DillNetConfig {
    /// Hidden dimension, shared by every layer.
    pub embed_dim: usize,

    /// Number of layers.
    pub depth: usize,

    /// Retention heads. `embed_dim` must be divisible by `heads`, and `embed_dim / heads` must be
    /// even.
    #[config(default = 8)]
    pub heads: usize,

    /// By default, set to 4 * embed_dim.
    pub ffn_dim: Option<usize>,

    #[config(default = 0.1)]
    pub dropout: f64,

    #[config(default = 16)]
    pub d_state: usize,

    #[config(default = 4)]
    pub d_conv: usize,

    /// By default, set to ceil(embed_dim / 16).
    pub dt_rank: Option<usize>,

    #[config(default = 1e-8)]
    pub norm_eps: f64,

    #[config(default = "AngleLayout::Concatenated")]
    pub rotary_layout: AngleLayout,
}

impl DillNetConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DillNet<B> {
        assert!(self.heads > 0, "heads must be positive");
        assert_eq!(
            self.embed_dim % self.heads,
            0,
            "embed_dim ({}) must be divisible by heads ({})",
            self.embed_dim,
            self.heads
        );
        assert_eq!(
            (self.embed_dim / self.heads) % 2,
            0,
            "head dim (embed_dim / heads = {}) must be even",
            self.embed_dim / self.heads
        );

        let mut blocks = Vec::with_capacity(self.depth);
        for layer_idx in 0..self.depth {
            let block = self.block(layer_idx).init(device);
            blocks.push(block);
        }

        DillNet {
            blocks,
            final_norm: RmsNormConfig::new(self.embed_dim)
                .with_epsilon(self.norm_eps)
                .init(device),
        }
    }

    /// Config of the layer at `layer_idx`.
    pub fn block(&self, layer_idx: usize) -> DillNetBlockConfig {
        DillNetBlockConfig::new(self.embed_dim, MixerKind::for_layer(layer_idx))
            .with_heads(self.heads)
            .with_ffn_dim(self.ffn_dim)
            .with_dropout(self.dropout)
            .with_d_state(self.d_state)
            .with_d_conv(self.d_conv)
            .with_dt_rank(self.dt_rank)
            .with_norm_eps(self.norm_eps)
            .with_rotary_layout(self.rotary_layout)
    }
}

impl<B: Backend> DillNet<B> {
    pub fn embed_dim(&self) -> usize {
        let [embed_dim] = self.final_norm.gamma.dims();
        embed_dim
    }

    /// # Shapes
    ///   - Input [batch, sequence, embed_dim]
    ///   - Output [batch, sequence, embed_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, sequence, channels] = x.dims();
        let embed_dim = self.embed_dim();
        assert_eq!(
            channels, embed_dim,
            "DillNet expects {embed_dim} input channels, got {channels}"
        );

        let mut x = x;
        for block in self.blocks.iter() {
            x = block.forward(x);
        }
        assert_eq!([batch, sequence, embed_dim], x.dims());

        self.final_norm.forward(x)
    }
}
