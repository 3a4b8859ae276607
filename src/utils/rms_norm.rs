use burn::module::{Content, DisplaySettings, ModuleDisplay, Param};
use burn::nn::Initializer;
use burn::prelude::*;
use burn::tensor::{DType, Element};

/// Configuration to create a [RmsNorm](RmsNorm) layer.
#[derive(Config, Debug)]
pub struct RmsNormConfig {
    /// The size of the input features.
    pub d_model: usize,
    /// A value required for numerical stability. Default: 1e-8
    #[config(default = 1e-8)]
    pub epsilon: f64,
}

impl RmsNormConfig {
    /// Initialize a new [RmsNorm](RmsNorm) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RmsNorm<B> {
        assert!(self.epsilon >= 0.0, "epsilon must not be negative.");

        let gamma = Initializer::Ones.init([self.d_model], device);
        RmsNorm {
            gamma,
            epsilon: self.epsilon,
        }
    }
}

/// Applies Rms Normalization over an input tensor along the last dimension.
///
/// `Y = X / sqrt(mean(X^2) + eps) * gamma`
///
/// Where:
/// - `X` is the input tensor
/// - `Y` is the output tensor
/// - `gamma` is the learnable weight
/// - `mean` is the mean operation
/// - `eps` is a small value to avoid division by zero.
///
/// The normalization runs in the backend's float precision. On f16, each row is first scaled by
/// its largest magnitude so that `X^2` cannot overflow.
///
/// Should be created using the [RmsNormConfig](RmsNormConfig) configuration.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct RmsNorm<B: Backend> {
    /// The learnable parameter to scale the normalized tensor.
    pub gamma: Param<Tensor<B, 1>>,
    /// A value required for numerical stability.
    pub epsilon: f64,
}

impl<B: Backend> RmsNorm<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    /// - input `x`: `[..., any, d_model]`
    /// - output: `[..., any, d_model]`
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let shape = x.dims();
        let [d_model] = self.gamma.dims();
        assert_eq!(
            shape[D - 1],
            d_model,
            "rms norm expects {d_model} features, got {}",
            shape[D - 1]
        );

        let normalized = match <B::FloatElem as Element>::dtype() {
            DType::F64 | DType::F32 | DType::Flex32 | DType::BF16 => {
                let rsqrt = (x.clone().powf_scalar(2.0).mean_dim(D - 1) + self.epsilon)
                    .sqrt()
                    .recip()
                    .expand(shape);
                x * rsqrt
            }
            DType::F16 => {
                // x = s * x_ with |x_| <= 1, so
                // x / √(mean(x²) + eps) = x_ / √(mean(x_²) + eps / s²)
                // s is a constant for autodiff: the result does not depend on its value
                let scale = x.clone().detach().abs().max_dim(D - 1).clamp_min(1e-4);
                let x_ = x / scale.clone().expand(shape);
                // (√eps / s)² stays <= eps / 1e-8, 1 / s² alone would overflow
                let eps = (scale.recip() * self.epsilon.sqrt()).powf_scalar(2.0);
                let rsqrt = (x_.clone().powf_scalar(2.0).mean_dim(D - 1) + eps)
                    .sqrt()
                    .recip()
                    .expand(shape);
                x_ * rsqrt
            }
            DType::I64
            | DType::I32
            | DType::I16
            | DType::I8
            | DType::U64
            | DType::U32
            | DType::U16
            | DType::U8
            | DType::Bool => {
                unreachable!("float backend element")
            }
            DType::QFloat(_) => {
                unimplemented!("rms norm over quantized tensors")
            }
        };

        normalized * self.gamma.val().unsqueeze()
    }
}

impl<B: Backend> ModuleDisplay for RmsNorm<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let [d_model] = self.gamma.shape().dims();
        content
            .add("d_model", &d_model)
            .add("epsilon", &self.epsilon)
            .optional()
    }
}
