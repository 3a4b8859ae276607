//! Parallel prefix scan over associative pair operators.
//!
//! The selective state-space recurrence `h_t = A_t * h_(t-1) + Bu_t` is a running composition of
//! affine maps. Composition is associative, so all prefixes can be evaluated with a work-efficient
//! (up-sweep / down-sweep) scan in `O(log L)` rounds, each of which is a handful of elementwise
//! tensor ops over every position at once, instead of `L` sequential steps.
//!
//! References:
//! - Blelloch, "Prefix Sums and Their Applications" (1990)
//! - Brent & Kung, "A Regular Layout for Parallel Adders" (1982)
//! - Section 3.3.2 "Parallel Scan" from the Mamba paper

use burn::prelude::*;

/// A pair of same-shaped tensors whose leading axis is the scan axis.
pub type ScanPair<B, const D: usize> = (Tensor<B, D>, Tensor<B, D>);

/// Associative (not necessarily commutative) combination of two scan pairs.
///
/// `combine(earlier, later)` must return the element equivalent to applying `earlier` first and
/// `later` second. Implementations must be elementwise: every position of the non-scan axes is
/// combined independently.
pub trait ScanOperator {
    fn combine<B: Backend, const D: usize>(
        &self,
        earlier: ScanPair<B, D>,
        later: ScanPair<B, D>,
    ) -> ScanPair<B, D>;
}

/// Composition of elementwise affine maps `x -> A * x + Bu`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineComposition;

impl ScanOperator for AffineComposition {
    fn combine<B: Backend, const D: usize>(
        &self,
        earlier: ScanPair<B, D>,
        later: ScanPair<B, D>,
    ) -> ScanPair<B, D> {
        binary_operator(earlier, later)
    }
}

/// Composes `(A_i, Bu_i)` followed by `(A_j, Bu_j)`:
///
/// `(A_j * A_i, A_j * Bu_i + Bu_j)`
pub fn binary_operator<B: Backend, const D: usize>(
    q_i: ScanPair<B, D>,
    q_j: ScanPair<B, D>,
) -> ScanPair<B, D> {
    let (a_i, bu_i) = q_i;
    let (a_j, bu_j) = q_j;
    (a_j.clone() * a_i, a_j * bu_i + bu_j)
}

/// Inclusive scan of `elems` along axis 0 with the [`AffineComposition`] operator.
///
/// `output.1[k]` is the recurrence value `h_k` started from the zero state `h_(-1) = 0`, and
/// `output.0[k]` is the accumulated decay `A_k * … * A_0`.
///
/// # Shapes
///   - Input elems.0 [sequence, ...]
///   - Input elems.1 [sequence, ...]
///   - Output.0 [sequence, ...]
///   - Output.1 [sequence, ...]
pub fn associative_scan<B: Backend, const D: usize>(elems: ScanPair<B, D>) -> ScanPair<B, D> {
    associative_scan_with(elems, &AffineComposition)
}

/// Inclusive scan of `elems` along axis 0 with any associative `op`.
///
/// All axes but the first are flattened into one for the duration of the scan and restored on
/// return. Sequences of length 0 or 1 are returned unchanged.
///
/// Every round replaces the working buffers with freshly assembled ones (`narrow` + `cat`), the
/// inputs of a round are never written to.
pub fn associative_scan_with<B: Backend, const D: usize, Op: ScanOperator>(
    elems: ScanPair<B, D>,
    op: &Op,
) -> ScanPair<B, D> {
    let (a, bu) = elems;
    let shape = a.dims();
    assert_eq!(
        shape,
        bu.dims(),
        "scan pair members must have the same shape"
    );

    let sequence = shape[0];
    if sequence <= 1 {
        return (a, bu);
    }
    let width: usize = shape[1..].iter().product();

    let mut a: Tensor<B, 2> = a.reshape([sequence, width]);
    let mut bu: Tensor<B, 2> = bu.reshape([sequence, width]);

    // up-sweep: reduce blocks of 2, 4, 8, … into their last position
    let mut stride = 1;
    while 2 * stride <= sequence {
        (a, bu) = combine_strided((a, bu), stride, op);
        stride *= 2;
    }

    // down-sweep: push the block prefixes into the positions still missing them
    stride /= 2;
    while stride > 0 {
        if sequence - stride >= 2 * stride {
            let head_a = a.clone().narrow(0, 0, stride);
            let head_bu = bu.clone().narrow(0, 0, stride);
            let tail = (
                a.narrow(0, stride, sequence - stride),
                bu.narrow(0, stride, sequence - stride),
            );
            let (tail_a, tail_bu) = combine_strided(tail, stride, op);
            a = Tensor::cat(vec![head_a, tail_a], 0);
            bu = Tensor::cat(vec![head_bu, tail_bu], 0);
        }
        stride /= 2;
    }
    assert_eq!([sequence, width], a.dims());
    assert_eq!([sequence, width], bu.dims());

    (a.reshape(shape), bu.reshape(shape))
}

/// One scan round.
///
/// Splits the sequence into windows of `2 * stride` positions and, for every full window, combines
/// the position `stride - 1` (earlier) into the last position `2 * stride - 1` (later). The partial
/// window at the end, if any, is passed through.
///
/// # Shapes
///   - Input elems.0 [sequence, width]
///   - Input elems.1 [sequence, width]
///   - Output.0 [sequence, width]
///   - Output.1 [sequence, width]
fn combine_strided<B: Backend, Op: ScanOperator>(
    elems: ScanPair<B, 2>,
    stride: usize,
    op: &Op,
) -> ScanPair<B, 2> {
    let (a, bu) = elems;
    let [sequence, width] = a.dims();
    let span = 2 * stride;
    let windows = sequence / span;
    if windows == 0 {
        return (a, bu);
    }
    let covered = windows * span;
    let rest = sequence - covered;

    let window = |t: Tensor<B, 2>| -> Tensor<B, 3> {
        t.narrow(0, 0, covered).reshape([windows, span, width])
    };
    let a_w = window(a.clone());
    let bu_w = window(bu.clone());

    let earlier = (
        a_w.clone().narrow(1, stride - 1, 1),
        bu_w.clone().narrow(1, stride - 1, 1),
    );
    let later = (
        a_w.clone().narrow(1, span - 1, 1),
        bu_w.clone().narrow(1, span - 1, 1),
    );
    let (a_new, bu_new) = op.combine(earlier, later);
    assert_eq!([windows, 1, width], a_new.dims());

    let rebuild = |w: Tensor<B, 3>, combined: Tensor<B, 3>, full: Tensor<B, 2>| -> Tensor<B, 2> {
        let body = Tensor::cat(vec![w.narrow(1, 0, span - 1), combined], 1).reshape([covered, width]);
        if rest == 0 {
            body
        } else {
            Tensor::cat(vec![body, full.narrow(0, covered, rest)], 0)
        }
    };

    (rebuild(a_w, a_new, a), rebuild(bu_w, bu_new, bu))
}

/// Reference left-to-right fold of `op` along axis 0.
///
/// Produces the same values as [`associative_scan_with`] up to floating-point regrouping, but
/// takes `sequence` dependent steps.
///
/// # Shapes
///   - Input elems.0 [sequence, ...]
///   - Input elems.1 [sequence, ...]
///   - Output.0 [sequence, ...]
///   - Output.1 [sequence, ...]
pub fn sequential_scan_with<B: Backend, const D: usize, Op: ScanOperator>(
    elems: ScanPair<B, D>,
    op: &Op,
) -> ScanPair<B, D> {
    let (a, bu) = elems;
    let sequence = a.dims()[0];
    if sequence <= 1 {
        return (a, bu);
    }

    let mut acc = (a.clone().narrow(0, 0, 1), bu.clone().narrow(0, 0, 1));
    let mut a_out = Vec::with_capacity(sequence);
    let mut bu_out = Vec::with_capacity(sequence);
    a_out.push(acc.0.clone());
    bu_out.push(acc.1.clone());
    for t in 1..sequence {
        let step = (a.clone().narrow(0, t, 1), bu.clone().narrow(0, t, 1));
        acc = op.combine(acc, step);
        a_out.push(acc.0.clone());
        bu_out.push(acc.1.clone());
    }

    (Tensor::cat(a_out, 0), Tensor::cat(bu_out, 0))
}

/// [`sequential_scan_with`] using the [`AffineComposition`] operator.
pub fn sequential_scan<B: Backend, const D: usize>(elems: ScanPair<B, D>) -> ScanPair<B, D> {
    sequential_scan_with(elems, &AffineComposition)
}
