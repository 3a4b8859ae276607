use crate::mamba_block::MambaBlock;
use crate::retention::Retention;
use burn::prelude::*;

/// Which sequence mixer a layer uses.
#[derive(Config, Debug, PartialEq, Eq, Copy)]
pub enum MixerKind {
    Retention,
    SelectiveStateSpace,
}

impl MixerKind {
    /// Layers alternate by index parity, starting with [`MixerKind::Retention`] at index 0.
    pub fn for_layer(layer_idx: usize) -> Self {
        if layer_idx % 2 == 0 {
            MixerKind::Retention
        } else {
            MixerKind::SelectiveStateSpace
        }
    }
}

#[derive(Module, Debug)]
pub enum Mixer<B: Backend> {
    Retention(Retention<B>),
    SelectiveStateSpace(MambaBlock<B>),
}

impl<B: Backend> Mixer<B> {
    pub fn kind(&self) -> MixerKind {
        match self {
            Mixer::Retention(_) => MixerKind::Retention,
            Mixer::SelectiveStateSpace(_) => MixerKind::SelectiveStateSpace,
        }
    }

    /// # Shapes
    ///   - Input [batch, sequence, embed_dim]
    ///   - Output [batch, sequence, embed_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            Mixer::Retention(retention) => retention.forward(x),
            Mixer::SelectiveStateSpace(mamba_block) => mamba_block.forward(x),
        }
    }
}
