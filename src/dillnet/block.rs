use crate::dillnet::{GatedFeedForward, GatedFeedForwardConfig, Mixer, MixerKind};
use crate::mamba_block::MambaBlockConfig;
use crate::retention::RetentionConfig;
use crate::rotary::AngleLayout;
use crate::utils::rms_norm::{RmsNorm, RmsNormConfig};
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::*;

/// Pre-norm residual layer: a sequence mixer followed by a gated feed-forward.
#[derive(Module, Debug)]
pub struct DillNetBlock<B: Backend> {
    pub norm1: RmsNorm<B>,
    pub mixer: Mixer<B>,
    pub norm2: RmsNorm<B>,
    pub ffn: GatedFeedForward<B>,
    /// Applied on the feed-forward output.
    pub dropout: Dropout,
}

#[derive(Config, Debug)]
pub struct DillNetBlockConfig {
    pub embed_dim: usize,

    pub mixer: MixerKind,

    /// Retention heads. `embed_dim / heads` must be even.
    #[config(default = 8)]
    pub heads: usize,

    /// By default, set to 4 * embed_dim.
    pub ffn_dim: Option<usize>,

    /// Used by the Retention output and the feed-forward output.
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

impl DillNetBlockConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DillNetBlock<B> {
        assert!(
            (0.0..1.0).contains(&self.dropout),
            "dropout must be in [0, 1), got {}",
            self.dropout
        );

        let mixer = match self.mixer {
            MixerKind::Retention => Mixer::Retention(
                RetentionConfig::new(self.embed_dim)
                    .with_heads(self.heads)
                    .with_dropout(self.dropout)
                    .with_rotary_layout(self.rotary_layout)
                    .init(device),
            ),
            MixerKind::SelectiveStateSpace => Mixer::SelectiveStateSpace(
                MambaBlockConfig::new(self.embed_dim)
                    .with_d_state(self.d_state)
                    .with_d_conv(self.d_conv)
                    .with_dt_rank(self.dt_rank)
                    .init(device),
            ),
        };

        DillNetBlock {
            norm1: RmsNormConfig::new(self.embed_dim)
                .with_epsilon(self.norm_eps)
                .init(device),
            mixer,
            norm2: RmsNormConfig::new(self.embed_dim)
                .with_epsilon(self.norm_eps)
                .init(device),
            ffn: GatedFeedForwardConfig::new(self.embed_dim)
                .with_ffn_dim(self.ffn_dim)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

impl<B: Backend> DillNetBlock<B> {
    /// # Shapes
    ///   - Input [batch, sequence, embed_dim]
    ///   - Output [batch, sequence, embed_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, sequence, embed_dim] = x.dims();

        let res = x.clone();
        let x = self.norm1.forward(x);
        let x = self.mixer.forward(x);
        assert_eq!([batch, sequence, embed_dim], x.dims());
        let x = x + res;

        let res = x.clone();
        let x = self.norm2.forward(x);
        let x = self.dropout.forward(self.ffn.forward(x));
        assert_eq!([batch, sequence, embed_dim], x.dims());

        x + res
    }
}
