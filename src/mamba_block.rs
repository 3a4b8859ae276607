//! Selective state-space mixer.
//!
//! References:
//! - Mamba: Linear-Time Sequence Modeling with Selective State Spaces (https://arxiv.org/abs/2312.00752)
//! - https://github.com/johnma2006/mamba-minimal/blob/61f01953ca153f8c4a850d7111beecbf4be9cee1/

use crate::scan::associative_scan;
use crate::utils::{silu::Silu, softplus::softplus, uniform_init};
use burn::module::{Module, Param};
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, PaddingConfig1d};
use burn::prelude::*;

#[derive(Module, Debug)]
pub struct MambaBlock<B: Backend> {
    /// Input channel: d_model.
    /// Output channel: 2 * d_model.
    pub in_proj: Linear<B>,

    /// Input channel: d_model.
    /// Output channel: d_model.
    /// Kernel: d_conv.
    /// Padding: d_conv - 1 (both sides, the right side is trimmed after the conv).
    /// Groups: d_model.
    pub conv1d: Conv1d<B>,

    /// Input channel: d_model.
    /// Output channel: dt_rank + 2 * d_state.
    pub x_proj: Linear<B>,

    /// Input channel: dt_rank.
    /// Output channel: d_model.
    pub dt_proj: Linear<B>,

    /// Shared by every channel.
    ///
    /// Dims: [1, d_state].
    pub a_log: Param<Tensor<B, 2>>,

    /// Dims: [d_model].
    pub d: Param<Tensor<B, 1>>,

    /// Input channel: d_model.
    /// Output channel: d_model.
    pub out_proj: Linear<B>,
}

#[derive(Config, Debug)]
pub struct MambaBlockConfig {
    /// Hidden dimension.
    pub d_model: usize,

    /// latent state dimension (`N` in Algorithm 2 from the Mamba paper).
    #[config(default = 16)]
    pub d_state: usize,

    /// Rank of Δ (See Section 3.6 "Parameterization of ∆" from the Mamba paper).
    /// Δ or delta: input-dependent step size.
    ///
    /// By default, set to ceil(d_model / 16).
    pub dt_rank: Option<usize>,

    #[config(default = 4)]
    pub d_conv: usize,
}

impl MambaBlockConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> MambaBlock<B> {
        let d_model = self.d_model;
        let dt_rank = self.dt_rank();
        assert_ne!(d_model, 0, "d_model must be positive");
        assert_ne!(self.d_state, 0, "d_state must be positive");
        assert_ne!(self.d_conv, 0, "d_conv must be positive");
        assert_ne!(dt_rank, 0, "dt_rank must be positive");

        let a_log = {
            let a_row: Tensor<B, 1> =
                Tensor::<B, 1, Int>::arange(1..self.d_state as i64 + 1, device).float();
            assert_eq!([self.d_state], a_row.dims());
            let a_row = a_row.unsqueeze::<2>();
            assert_eq!([1, self.d_state], a_row.dims());
            Param::from_tensor(a_row.log())
        };

        MambaBlock {
            in_proj: LinearConfig::new(d_model, 2 * d_model)
                .with_bias(true)
                // follows PyTorch's default initializer
                .with_initializer(uniform_init(d_model))
                .init(device),
            conv1d: Conv1dConfig::new(d_model, d_model, self.d_conv)
                .with_padding(PaddingConfig1d::Explicit(self.d_conv - 1))
                .with_groups(d_model)
                .with_bias(true)
                // follows PyTorch's default initializer
                // fan_in = in_channels / groups * kernel_size
                .with_initializer(uniform_init(self.d_conv))
                .init(device),
            x_proj: LinearConfig::new(d_model, dt_rank + 2 * self.d_state)
                .with_bias(true)
                .with_initializer(uniform_init(d_model))
                .init(device),
            dt_proj: LinearConfig::new(dt_rank, d_model)
                .with_bias(true)
                .with_initializer(uniform_init(dt_rank))
                .init(device),
            a_log,
            d: Initializer::Ones.init([d_model], device),
            out_proj: LinearConfig::new(d_model, d_model)
                .with_bias(true)
                .with_initializer(uniform_init(d_model))
                .init(device),
        }
    }

    pub fn dt_rank(&self) -> usize {
        self.dt_rank.unwrap_or(self.d_model.div_ceil(16))
    }
}

impl<B: Backend> MambaBlock<B> {
    /// # Shapes
    ///   - Input [batch, sequence, d_model]
    ///   - Output [batch, sequence, d_model]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, sequence, d_model] = x.dims();
        let [_, _, d_conv] = self.conv1d.weight.dims();

        // layer 1 (in_proj)
        let (xs, res) = {
            // projects the input d_model into 2 * d_model
            let xs_and_res = self.in_proj.forward(x);
            assert_eq!([batch, sequence, 2 * d_model], xs_and_res.dims());

            let split = xs_and_res.split_with_sizes(vec![d_model, d_model], 2);
            assert_eq!(split.len(), 2);
            (split[0].clone(), split[1].clone())
        };
        assert_eq!([batch, sequence, d_model], xs.dims());
        assert_eq!([batch, sequence, d_model], res.dims());

        // layer 2 (conv1d)
        let xs = {
            let xs = xs.swap_dims(1, 2);
            assert_eq!([batch, d_model, sequence], xs.dims());

            let xs = self.conv1d.forward(xs);
            assert_eq!([batch, d_model, sequence + d_conv - 1], xs.dims());

            // keeping the first positions makes the conv causal
            let xs = xs.narrow(2, 0, sequence);
            assert_eq!([batch, d_model, sequence], xs.dims());

            // restore original positioning as per before the layer 2
            let xs = xs.swap_dims(1, 2);
            assert_eq!([batch, sequence, d_model], xs.dims());

            // activation
            Silu::new().forward(xs)
        };
        assert_eq!([batch, sequence, d_model], xs.dims());

        let ss = self.ss(xs);
        assert_eq!([batch, sequence, d_model], ss.dims());

        // activation
        let ys = ss * Silu::new().forward(res);
        assert_eq!([batch, sequence, d_model], ys.dims());

        let y = self.out_proj.forward(ys);
        assert_eq!([batch, sequence, d_model], y.dims());

        y
    }

    /// Computes the input-dependent state space parameters and runs the selective scan.
    ///
    /// # Shapes
    ///   - Input [batch, sequence, d_model]
    ///   - Output [batch, sequence, d_model]
    pub fn ss(&self, u: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, sequence, d_model] = u.dims();
        let [_, d_state] = self.a_log.dims();
        let [dt_rank, _d_model] = self.dt_proj.weight.dims();

        // Compute ∆ A B C D, the state space parameters.

        // A
        // this is input independent (see Section 3.5.2 "Interpretation of A" form the Mamba paper for why A isn't selective)
        let a = self.a_log.val().exp().neg();
        assert_eq!([1, d_state], a.dims());

        let x_dbl = self.x_proj.forward(u.clone());
        assert_eq!([batch, sequence, dt_rank + 2 * d_state], x_dbl.dims());

        // ∆ (part 1/2)
        // ∆ is input-dependent
        // B and C are input-dependent
        let split = x_dbl.split_with_sizes(vec![dt_rank, d_state, d_state], 2);
        let delta = split[0].clone();
        let b = split[1].clone();
        let c = split[2].clone();
        assert_eq!([batch, sequence, dt_rank], delta.dims());
        assert_eq!([batch, sequence, d_state], b.dims());
        assert_eq!([batch, sequence, d_state], c.dims());

        // ∆ (part 2/2)
        let delta = softplus(self.dt_proj.forward(delta));
        assert_eq!([batch, sequence, d_model], delta.dims());

        Self::selective_scan(delta, a, b, c, self.d.val(), u)
    }

    /// Selective Scan.
    ///
    /// Discretizes (A, B) per step and evaluates the recurrence over the sequence with the parallel
    /// [`associative_scan`]. See:
    /// - Section 2 State Space Models from the Mamba paper;
    /// - Algorithm 2 in Section 3.2 from the Mamba paper;
    /// - run_SSM(A, B, C, u) from The Annotated S4.
    ///
    /// # Shapes
    ///   - Input delta [batch, sequence, d_model]
    ///   - Input a [1, d_state]
    ///   - Input b [batch, sequence, d_state]
    ///   - Input c [batch, sequence, d_state]
    ///   - Input d [d_model]
    ///   - Input u [batch, sequence, d_model]
    ///   - Output [batch, sequence, d_model]
    pub fn selective_scan(
        delta: Tensor<B, 3>,
        a: Tensor<B, 2>,
        b: Tensor<B, 3>,
        c: Tensor<B, 3>,
        d: Tensor<B, 1>,
        u: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [batch, sequence, d_model] = delta.dims();
        let [_, d_state] = a.dims();
        assert_eq!([1, d_state], a.dims());
        assert_eq!([batch, sequence, d_state], b.dims());
        assert_eq!([batch, sequence, d_state], c.dims());
        assert_eq!([d_model], d.dims());
        assert_eq!([batch, sequence, d_model], u.dims());
        let outer_shape = [batch, sequence, d_model, d_state];

        // Discretize continuous parameters (A, B)
        //  - A is discretized using zero-order hold (ZOH) discretization (see Section 2 Equation 4 in the Mamba paper)
        //  - B is discretized using a simplified Euler discretization instead of ZOH. From a discussion with authors:
        //    "A is the more important term and the performance doesn't change much with the simplification on B"
        let (delta_a, delta_bu) = {
            let delta = delta.unsqueeze_dim::<4>(3).expand(outer_shape);

            let a = a.unsqueeze_dims::<4>(&[0, 1]);
            assert_eq!([1, 1, 1, d_state], a.dims());
            let a = a.expand(outer_shape);
            let delta_a = (delta.clone() * a).exp();

            let b = b.unsqueeze_dim::<4>(2);
            assert_eq!([batch, sequence, 1, d_state], b.dims());
            let delta_b = delta * b.expand(outer_shape);

            let u = u.clone().unsqueeze_dim::<4>(3);
            assert_eq!([batch, sequence, d_model, 1], u.dims());
            let delta_bu = delta_b * u.expand(outer_shape);

            (delta_a, delta_bu)
        };
        assert_eq!(outer_shape, delta_a.dims());
        assert_eq!(outer_shape, delta_bu.dims());

        // the scan runs along the leading axis
        let delta_a = delta_a.swap_dims(0, 1);
        let delta_bu = delta_bu.swap_dims(0, 1);
        assert_eq!([sequence, batch, d_model, d_state], delta_a.dims());

        let (_, xs) = associative_scan((delta_a, delta_bu));
        assert_eq!([sequence, batch, d_model, d_state], xs.dims());

        let xs = xs.swap_dims(0, 1);
        assert_eq!(outer_shape, xs.dims());

        let c = c.unsqueeze_dim::<4>(2).expand(outer_shape);
        let ys = (xs * c).sum_dim(3).reshape([batch, sequence, d_model]);

        let d = d.unsqueeze_dims::<3>(&[0, 1]);
        assert_eq!([1, 1, d_model], d.dims());
        let d = d.expand([batch, sequence, d_model]);

        let ys = ys + (d * u);
        assert_eq!([batch, sequence, d_model], ys.dims());

        ys
    }
}
