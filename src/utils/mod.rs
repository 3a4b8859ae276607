use burn::prelude::*;

pub mod rms_norm;
pub mod silu;
pub mod softplus;

/// Returns `true` when no element of `t` is NaN or ±Inf.
///
/// Pulls the tensor data back to the host, so this is meant for checks outside of the hot path.
pub fn all_finite<B: Backend, const D: usize>(t: &Tensor<B, D>) -> bool {
    t.clone()
        .into_data()
        .iter::<f32>()
        .all(|value| value.is_finite())
}

/// PyTorch's default `nn.Linear`/`nn.Conv1d` initializer: `U(-1/√fan_in, 1/√fan_in)`.
pub fn uniform_init(fan_in: usize) -> burn::nn::Initializer {
    let bound = 1.0 / (fan_in as f64).sqrt();
    burn::nn::Initializer::Uniform {
        min: -bound,
        max: bound,
    }
}
