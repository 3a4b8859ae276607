//! DillNet: a hybrid sequence model alternating Retention and selective state-space mixers.

#[cfg(feature = "autodiff")]
pub mod checkpoint;
pub mod dillnet;
pub mod mamba_block;
pub mod retention;
pub mod rotary;
pub mod scan;

pub mod prelude {
    #[cfg(feature = "autodiff")]
    pub use crate::checkpoint::*;
    pub use crate::dillnet::*;
    pub use crate::mamba_block::{MambaBlock, MambaBlockConfig};
    pub use crate::retention::{Retention, RetentionConfig};
    pub use crate::rotary::{AngleLayout, RotaryEmbedding, RotaryEmbeddingConfig};
    pub use crate::scan::{AffineComposition, ScanOperator, associative_scan};
    pub use crate::utils::rms_norm::{RmsNorm, RmsNormConfig};
}

pub mod utils;
