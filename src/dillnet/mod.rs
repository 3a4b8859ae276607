mod block;
mod feed_forward;
mod mixer;
mod network;

pub use block::{DillNetBlock, DillNetBlockConfig};
pub use feed_forward::{GatedFeedForward, GatedFeedForwardConfig};
pub use mixer::{Mixer, MixerKind};
pub use network::{DillNet, DillNetConfig};
