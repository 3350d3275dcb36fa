//! Gradient-based procedures that treat a [`Model`] as an opaque differentiable function.
//!
//! * [`PgdAttack`] - perturbs a batch within an *L∞* ball of radius *ε* through projected
//! signed gradient steps.
//!
//! * [`Adversarial`] - a model wrapper that trains on the perturbations produced by a
//! [`PgdAttack`].
//!
//! * [`GradAttention`] - extracts a single channel saliency map from the gradient of the loss
//! with respect to the input.
//!
//! Both procedures run the model in inference mode and put it back in the mode it was in once
//! they return, whether they succeed or not. This is done by means of the scoped guards
//! [`EvalGuard`] and [`FrozenParameters`], which can also be used on their own.
use ndarray::{Array1, Array2, Array4, Axis, Ix4};
use tracing::trace;

use crate::{
    error::Result,
    nn::{loss::Loss, Model, ModelStatus},
    Param, VarDiff,
};

mod pgd;
mod saliency;

#[cfg(test)]
mod test;

pub use pgd::{Adversarial, AttackConfig, PgdAttack};
pub use saliency::GradAttention;

/// Switches a model in inference mode for as long as the guard lives.
///
/// The mode the model was in when the guard was acquired is restored on drop.
///
/// ```
/// use patchwork::{explain::EvalGuard, nn::ModelStatus};
///
/// let status = ModelStatus::default();
/// {
///     let _guard = EvalGuard::new(&status);
///     assert!(!status.is_training());
/// }
/// assert!(status.is_training());
/// ```
#[derive(Debug)]
pub struct EvalGuard<'a> {
    status: &'a ModelStatus,
    was_training: bool,
}

impl<'a> EvalGuard<'a> {
    pub fn new(status: &'a ModelStatus) -> Self {
        let was_training = status.is_training();
        status.eval();
        trace!(was_training, "entered inference mode");

        Self {
            status,
            was_training,
        }
    }
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        if self.was_training {
            self.status.train();
        }
        trace!(training = self.was_training, "restored model mode");
    }
}

/// Marks a set of parameters as non-trainable for as long as the guard lives.
///
/// Each parameter gets back the `requires_grad` flag it had when the guard was acquired.
#[derive(Debug)]
pub struct FrozenParameters {
    params: Vec<(Param, bool)>,
}

impl FrozenParameters {
    pub fn new(params: Vec<Param>) -> Self {
        let params = params
            .into_iter()
            .map(|param| {
                let requires_grad = param.requires_grad();
                param.set_requires_grad(false);
                (param, requires_grad)
            })
            .collect::<Vec<_>>();
        trace!(count = params.len(), "froze parameters");

        Self { params }
    }
}

impl Drop for FrozenParameters {
    /// Flags are restored last-acquired first, so a parameter listed more than once ends up with
    /// the flag it had before the first acquisition.
    fn drop(&mut self) {
        for (param, requires_grad) in self.params.iter().rev() {
            param.set_requires_grad(*requires_grad);
        }
        trace!(count = self.params.len(), "unfroze parameters");
    }
}

/// Index of the highest scoring class of every sample, ties going to the lowest index.
pub(crate) fn most_confident(logits: &Array2<f32>) -> Array1<f32> {
    select_class(logits, |score, selected| score > selected)
}

/// Index of the lowest scoring class of every sample, ties going to the lowest index.
pub(crate) fn least_confident(logits: &Array2<f32>) -> Array1<f32> {
    select_class(logits, |score, selected| score < selected)
}

fn select_class(logits: &Array2<f32>, prefer: fn(f32, f32) -> bool) -> Array1<f32> {
    logits.map_axis(Axis(1), |row| {
        let mut selected = 0;
        for (class, &score) in row.iter().enumerate().skip(1) {
            if prefer(score, row[selected]) {
                selected = class;
            }
        }

        selected as f32
    })
}

/// Builds the graph of `model` on a fresh differentiable leaf holding `input`, labels every
/// sample with `label` and back-propagates `loss`, returning the input leaf and the loss value.
///
/// The model is evaluated once. The labels leaf is filled in between the evaluation of the
/// logits and that of the loss.
fn input_gradient<M>(
    model: &M,
    input: Array4<f32>,
    loss: Loss,
    label: fn(&Array2<f32>) -> Array1<f32>,
) -> Result<(VarDiff<Ix4>, f32)>
where
    M: Model + ?Sized,
{
    let x = crate::from_ndarray(input).requires_grad();
    let logits = model.forward(x.clone())?;
    let labels = crate::zeros(logits.data().len_of(Axis(0)));
    let objective = loss(logits.clone(), labels.clone());

    logits.forward();
    *labels.data_mut() = label(&logits.data());
    objective.forward_from(&logits);
    objective.backward(1.);

    Ok((x, objective.item()))
}
