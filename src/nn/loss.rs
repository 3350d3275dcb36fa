//! # Loss functions.
//!
//! The purpose of a loss function is to compute the quantity that a model should seek to minimize
//! during training.
//!
//! All losses are provided via function handles.
//!
//! * [`nll_loss`] - Measures the negative log likelihood between the target and the input.
//!
//! * [`cross_entropy`] - Measures the cross entropy between the target and the logits.
use ndarray::{Ix0, Ix1, Ix2};

use crate::{Var, VarDiff};

pub use crate::Reduction;

/// A classification loss: unnormalized scores of shape *(N, C)* and *N* class indices in, a
/// scalar out.
///
/// [`cross_entropy`] is one.
pub type Loss = fn(VarDiff<Ix2>, Var<Ix1>) -> VarDiff<Ix0>;

/// Computes the **negative log likelihood** between the target **y** and input **x**.
///
/// ```text
///         1   n
/// Lᴏss =  ―   ∑  - xₙ,ᵧₙ
///         n  i=1
/// ```
///
/// The input given is expected to contain log-probabilities for each class, this is typically
/// achieved by using [`.log_softmax()`]. The input has to be of shape *(minibatch, C)*. The
/// target that this loss expects should be a class index in the range *[0, C)*, stored as an
/// `f32`. When the given reduction is equal to [`Reduction::Mean`] the total loss is divided by
/// the batch size.
///
/// [`.log_softmax()`]: VarDiff::log_softmax()
///
/// # Panics
///
/// If the number of targets differs from the number of samples in `input`.
pub fn nll_loss(input: VarDiff<Ix2>, target: Var<Ix1>, reduction: Reduction) -> VarDiff<Ix0> {
    input.nll(target, reduction)
}

/// Computes the **cross entropy** between the class indices in `labels` and the unnormalized
/// scores in `logits`, averaged over the batch.
///
/// This is [`nll_loss`] applied to the log-softmax of `logits` along the class axis.
///
/// ```
/// use ndarray::array;
/// use patchwork::nn::loss::cross_entropy;
///
/// let logits = patchwork::from_ndarray(array![[2., 0.], [0., 2.]]).requires_grad();
/// let labels = patchwork::from_ndarray(array![0., 1.]);
///
/// let loss = cross_entropy(logits, labels);
/// loss.forward();
///
/// assert!((loss.item() - (1. + (-2f32).exp()).ln()).abs() < 1e-6);
/// ```
pub fn cross_entropy(logits: VarDiff<Ix2>, labels: Var<Ix1>) -> VarDiff<Ix0> {
    nll_loss(logits.log_softmax(1), labels, Reduction::Mean)
}
