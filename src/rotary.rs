//! Rotary position encoding.
//!
//! References:
//! - RoFormer: Enhanced Transformer with Rotary Position Embedding (https://arxiv.org/abs/2104.09864)

use burn::module::{Content, DisplaySettings, ModuleDisplay};
use burn::prelude::*;

/// How the per-frequency angles are spread over the full feature width.
#[derive(Config, Debug, PartialEq, Eq, Copy)]
pub enum AngleLayout {
    /// `[θ0, θ1, …, θ(n-1), θ0, θ1, …, θ(n-1)]`.
    ///
    /// Note that the rotation itself pairs neighbouring features `(2i, 2i + 1)`, so with this layout
    /// the two members of a pair generally see different angles.
    ///
    /// This is the layout used by default.
    Concatenated,
    /// `[θ0, θ0, θ1, θ1, …, θ(n-1), θ(n-1)]`.
    ///
    /// Each `(2i, 2i + 1)` pair is rotated by a single angle, which makes the encoding a proper
    /// rotation (norm-preserving per pair).
    Interleaved,
}

#[derive(Config, Debug)]
pub struct RotaryEmbeddingConfig {
    /// Feature size being rotated (the head dimension). Must be even.
    pub dim: usize,

    /// Base of the geometric frequency progression.
    #[config(default = 10000.0)]
    pub base: f64,

    #[config(default = "AngleLayout::Concatenated")]
    pub layout: AngleLayout,
}

impl RotaryEmbeddingConfig {
    /// Returns the initialized module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RotaryEmbedding<B> {
        assert!(self.dim > 0, "rotary dim must be positive");
        assert_eq!(self.dim % 2, 0, "rotary dim must be even, got {}", self.dim);
        let half = self.dim / 2;

        // inv_freq[i] = base^(-2i / dim)
        let exponent = Tensor::<B, 1, Int>::arange(0..half as i64, device).float() * 2.
            / self.dim as f64;
        let inv_freq = (exponent * (-self.base.ln())).exp();
        assert_eq!([half], inv_freq.dims());

        RotaryEmbedding {
            inv_freq,
            interleaved: self.layout == AngleLayout::Interleaved,
        }
    }
}

/// Rotates stride-2 feature pairs by position-dependent angles.
///
/// Has no learned parameters: only the inverse frequencies are cached, the angles are rebuilt for
/// the sequence length of every call.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct RotaryEmbedding<B: Backend> {
    /// Dims: [dim / 2].
    pub inv_freq: Tensor<B, 1>,

    /// See [`AngleLayout::Interleaved`].
    pub interleaved: bool,
}

impl<B: Backend> RotaryEmbedding<B> {
    pub fn dim(&self) -> usize {
        let [half] = self.inv_freq.dims();
        2 * half
    }

    /// Angles for every position and feature.
    ///
    /// # Shapes
    ///   - Output [sequence, dim]
    pub fn angles(&self, sequence: usize) -> Tensor<B, 2> {
        let device = &self.inv_freq.device();
        let [half] = self.inv_freq.dims();

        let t = Tensor::<B, 1, Int>::arange(0..sequence as i64, device)
            .float()
            .reshape([sequence, 1]);
        let freqs = t.matmul(self.inv_freq.clone().reshape([1, half]));
        assert_eq!([sequence, half], freqs.dims());

        if self.interleaved {
            freqs
                .unsqueeze_dim::<3>(2)
                .expand([sequence, half, 2])
                .reshape([sequence, 2 * half])
        } else {
            Tensor::cat(vec![freqs.clone(), freqs], 1)
        }
    }

    /// # Shapes
    ///   - Input [..., sequence, dim]
    ///   - Output [..., sequence, dim]
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        assert!(D >= 2, "rotary input needs at least [sequence, dim] axes");
        let shape = x.dims();
        let sequence = shape[D - 2];
        let dim = shape[D - 1];
        assert_eq!(self.dim(), dim, "rotary dim mismatch");
        let half = dim / 2;
        let lead: usize = shape[..D - 2].iter().product();

        let x = x.reshape([lead, sequence, dim]);

        let angles = self.angles(sequence).unsqueeze_dim::<3>(0).expand([lead, sequence, dim]);
        let cos = angles.clone().cos();
        let sin = angles.sin();

        // split the features into their (even, odd) stride-2 pairs
        let pairs = x.clone().reshape([lead, sequence, half, 2]);
        let even = pairs.clone().narrow(3, 0, 1);
        let odd = pairs.narrow(3, 1, 1);
        assert_eq!([lead, sequence, half, 1], even.dims());

        // (x0, x1) -> (-x1, x0), interleaved back to the full width
        let rotated = Tensor::cat(vec![odd.neg(), even], 3).reshape([lead, sequence, dim]);

        let y = x * cos + rotated * sin;
        assert_eq!([lead, sequence, dim], y.dims());

        y.reshape(shape)
    }
}

impl<B: Backend> ModuleDisplay for RotaryEmbedding<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("dim", &self.dim())
            .add("interleaved", &self.interleaved)
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn angles_follow_the_layout() {
        let device = Default::default();
        let concat = RotaryEmbeddingConfig::new(4).init::<TestBackend>(&device);
        let interleaved = RotaryEmbeddingConfig::new(4)
            .with_layout(AngleLayout::Interleaved)
            .init::<TestBackend>(&device);

        // position 1: frequencies are [1, 1/100]
        let concat = concat.angles(2).narrow(0, 1, 1).into_data().to_vec::<f32>().unwrap();
        let interleaved = interleaved
            .angles(2)
            .narrow(0, 1, 1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let expected_concat = [1.0, 0.01, 1.0, 0.01];
        let expected_interleaved = [1.0, 1.0, 0.01, 0.01];
        for i in 0..4 {
            assert!((concat[i] - expected_concat[i]).abs() < 1e-6);
            assert!((interleaved[i] - expected_interleaved[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn rotation_matches_hand_computed_values() {
        let device = Default::default();
        let rotary = RotaryEmbeddingConfig::new(4).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0], [2, 4]),
            &device,
        );

        let y = rotary.forward(x).into_data().to_vec::<f32>().unwrap();

        // position 0 is the identity
        for (i, expected) in [1.0f32, 2.0, 3.0, 4.0].iter().enumerate() {
            assert!((y[i] - expected).abs() < 1e-6);
        }

        // position 1, concatenated angles [1, 0.01, 1, 0.01], rotated = [-2, 1, -4, 3]
        let angles = [1.0f32, 0.01, 1.0, 0.01];
        let xs = [1.0f32, 2.0, 3.0, 4.0];
        let rotated = [-2.0f32, 1.0, -4.0, 3.0];
        for i in 0..4 {
            let expected = xs[i] * angles[i].cos() + rotated[i] * angles[i].sin();
            assert!((y[4 + i] - expected).abs() < 1e-5, "feature {i}");
        }
    }

    #[test]
    fn concatenated_layout_does_not_preserve_pair_norms() {
        let device = Default::default();
        let rotary = RotaryEmbeddingConfig::new(4).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0], [2, 4]),
            &device,
        );

        let y = rotary.forward(x).into_data().to_vec::<f32>().unwrap();

        // at position 1 the first pair (1, 2) sees angles 1 and 0.01
        let y0 = 1.0f32.cos() - 2.0 * 1.0f32.sin();
        let y1 = 2.0 * 0.01f32.cos() + 0.01f32.sin();
        assert!((y[4] - y0).abs() < 1e-5);
        assert!((y[5] - y1).abs() < 1e-5);

        let before = 1.0f32 + 4.0;
        let after = y[4] * y[4] + y[5] * y[5];
        assert!((after - before).abs() > 0.1, "{after} ~ {before}");
    }

    #[test]
    fn interleaved_layout_preserves_pair_norms() {
        let device = Default::default();
        let rotary = RotaryEmbeddingConfig::new(8)
            .with_layout(AngleLayout::Interleaved)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 7, 8], Distribution::Default, &device);

        let y = rotary.forward(x.clone());
        assert_eq!([2, 3, 7, 8], y.dims());

        let pair_norms = |t: Tensor<TestBackend, 4>| {
            t.reshape([2, 3, 7, 4, 2])
                .powf_scalar(2.0)
                .sum_dim(4)
                .into_data()
                .to_vec::<f32>()
                .unwrap()
        };
        for (before, after) in pair_norms(x).into_iter().zip(pair_norms(y)) {
            assert!((before - after).abs() < 1e-5, "{before} != {after}");
        }
    }
}
