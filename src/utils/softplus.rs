use burn::prelude::*;

/// Applies the SoftPlus function element-wise.
///
/// The SoftPlus function is a smooth approximation of the ReLU function.
pub fn softplus<const D: usize, B: Backend>(x: Tensor<B, D>) -> Tensor<B, D> {
    // (x.exp() + 1.).log() overflows for large x, so use the rewritten form:
    //
    // max(a,b) = (a + b + |a-b|)/2
    // softplus = max(x, 0) + log(e^-|x| + 1)
    //          = (x + |x|) / 2 + log(e^-|x| + 1)
    let xabs = x.clone().abs();
    (x + xabs.clone()) / 2. + xabs.neg().exp().log1p()
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn softplus_is_positive_and_stable() {
        let device = Default::default();
        let xs = [-30.0f32, -1.0, 0.0, 1.0, 100.0];
        let input = Tensor::<TestBackend, 1>::from_floats(xs, &device);

        let output = softplus(input).into_data().to_vec::<f32>().unwrap();

        for (x, y) in xs.iter().zip(output.iter()) {
            let expected = x.max(0.0) + (-x.abs()).exp().ln_1p();
            assert!(y.is_finite());
            assert!(*y >= 0.0);
            assert!((expected - y).abs() < 1e-5, "softplus({x}) = {y}, expected {expected}");
        }
        // large inputs pass through
        assert!((output[4] - 100.0).abs() < 1e-4);
    }
}
