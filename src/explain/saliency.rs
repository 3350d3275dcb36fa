use ndarray::{Array4, Axis};
use tracing::debug;

use super::{input_gradient, most_confident, EvalGuard, FrozenParameters};
use crate::{
    error::Result,
    nn::{
        loss::{cross_entropy, Loss},
        Model,
    },
};

/// Gradient magnitude saliency.
///
/// The saliency of a pixel is the largest absolute value, across channels, of the gradient of
/// the loss between the logits and the predicted class with respect to that pixel. The loss is
/// [`cross_entropy`] unless another one is given with
/// [`.with_loss()`](GradAttention::with_loss()).
#[derive(Clone, Copy, Debug)]
pub struct GradAttention {
    loss: Loss,
}

impl GradAttention {
    pub fn new() -> Self {
        Self {
            loss: cross_entropy,
        }
    }

    /// Replaces the loss whose gradient is inspected.
    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Computes the saliency map of every image in `input`.
    ///
    /// For an input of shape *(N, C, H, W)* the map is of shape *(N, 1, H, W)* and all of its
    /// values are non-negative. The parameters of `model` are frozen and the model runs in
    /// inference mode for the duration of the call. Both are restored afterwards.
    ///
    /// # Errors
    ///
    /// Fails when `model` does.
    pub fn saliency<M>(&self, model: &M, input: &Array4<f32>) -> Result<Array4<f32>>
    where
        M: Model + ?Sized,
    {
        let _frozen = FrozenParameters::new(model.parameters());
        let _eval = EvalGuard::new(model.status());

        let (x, _) = input_gradient(model, input.clone(), self.loss, most_confident)?;
        let map = x
            .grad()
            .fold_axis(Axis(1), 0f32, |&max, &grad| max.max(grad.abs()))
            .insert_axis(Axis(1));

        debug!(samples = map.len_of(Axis(0)), shape = ?map.shape(), "saliency map");

        Ok(map)
    }
}

impl Default for GradAttention {
    fn default() -> Self {
        Self::new()
    }
}
