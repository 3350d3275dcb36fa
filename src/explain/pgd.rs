use ndarray::{Array4, Ix2, Ix4, Zip};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use tracing::{debug_span, trace};

use super::{input_gradient, least_confident, EvalGuard, FrozenParameters};
use crate::{
    error::{ConvError, Result},
    nn::{
        loss::{cross_entropy, Loss},
        Model, ModelStatus,
    },
    VarDiff,
};

/// Settings of a [`PgdAttack`].
///
/// ```
/// use patchwork::explain::AttackConfig;
///
/// let config = AttackConfig::default();
///
/// assert_eq!(config.num_steps, 10);
/// assert_eq!(config.data_range, None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct AttackConfig {
    /// Number of projected gradient steps.
    pub num_steps: usize,
    /// Size of each signed gradient step.
    pub step_size: f32,
    /// Radius of the *L∞* ball around the original input. Must not be negative.
    pub epsilon: f32,
    /// Valid range of the input values, enforced after the projection on the ball.
    pub data_range: Option<(f32, f32)>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            num_steps: 10,
            step_size: 0.01,
            epsilon: 0.1,
            data_range: None,
        }
    }
}

/// Iterative *L∞* adversarial perturbation, also known as projected gradient descent.
///
/// Every step evaluates the model on the current candidate, labels each sample with its least
/// confident class and descends the sign of the gradient of the loss against those labels.
/// The candidate is then clamped into the *ε*-ball around the original input and, when one is
/// configured, into the valid data range. The labels are recomputed at every step.
///
/// The loss is [`cross_entropy`] unless another one is given with
/// [`.with_loss()`](PgdAttack::with_loss()).
#[derive(Clone, Copy, Debug)]
pub struct PgdAttack {
    config: AttackConfig,
    loss: Loss,
}

impl PgdAttack {
    pub fn new(config: AttackConfig) -> Self {
        Self {
            config,
            loss: cross_entropy,
        }
    }

    /// Replaces the loss whose gradient drives the steps.
    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Returns a perturbed copy of `input`.
    ///
    /// For the duration of the call `model` runs in inference mode and its parameters are
    /// frozen, so their gradients are left untouched. Both are restored on every exit path.
    /// With `num_steps` equal to zero the result equals `input`.
    ///
    /// # Errors
    ///
    /// Fails when `epsilon` is negative or not a number, and when `model` fails.
    pub fn perturb<M>(&self, model: &M, input: &Array4<f32>) -> Result<Array4<f32>>
    where
        M: Model + ?Sized,
    {
        let AttackConfig {
            num_steps,
            step_size,
            epsilon,
            data_range,
        } = self.config;

        if epsilon.is_nan() || epsilon < 0. {
            return Err(ConvError::InvalidRadius(epsilon));
        }

        let span = debug_span!("pgd", num_steps, step_size, epsilon, shape = ?input.shape());
        let _enter = span.enter();

        let _frozen = FrozenParameters::new(model.parameters());
        let _eval = EvalGuard::new(model.status());

        let mut candidate = input.clone();
        for step in 0..num_steps {
            let (x, loss) = input_gradient(model, candidate.clone(), self.loss, least_confident)?;
            trace!(step, loss, "projected gradient step");

            Zip::from(&mut candidate)
                .and(&*x.grad())
                .and(input)
                .for_each(|value, &grad, &origin| {
                    let stepped = *value - step_size * sign(grad);
                    let projected = stepped.max(origin - epsilon).min(origin + epsilon);

                    *value = match data_range {
                        Some((low, high)) => projected.max(low).min(high),
                        None => projected,
                    };
                });
        }

        Ok(candidate)
    }
}

impl Default for PgdAttack {
    fn default() -> Self {
        Self::new(AttackConfig::default())
    }
}

/// Sign of `value`, zero included.
fn sign(value: f32) -> f32 {
    if value > 0. {
        1.
    } else if value < 0. {
        -1.
    } else {
        0.
    }
}

/// A model that, in training mode, is fed the adversarial perturbation of its input.
///
/// In inference mode the input is forwarded unchanged. The perturbation is computed with the
/// wrapped model in inference mode, so it never triggers itself.
pub struct Adversarial<M> {
    model: M,
    attack: PgdAttack,
}

impl<M> Adversarial<M>
where
    M: Model,
{
    pub fn new(model: M, config: AttackConfig) -> Self {
        Self {
            model,
            attack: PgdAttack::new(config),
        }
    }

    /// The wrapped model.
    pub fn inner(&self) -> &M {
        &self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }
}

impl<M> Model for Adversarial<M>
where
    M: Model,
{
    /// In training mode `input` is evaluated right away and its data perturbed. The graph is
    /// then built on a fresh differentiable leaf holding the perturbed batch, so nothing is
    /// back-propagated into `input`.
    fn forward(&self, input: VarDiff<Ix4>) -> Result<VarDiff<Ix2>> {
        if !self.model.status().is_training() {
            return self.model.forward(input);
        }

        input.forward();
        let original = input.data().clone();
        let perturbed = self.attack.perturb(&self.model, &original)?;

        self.model
            .forward(crate::from_ndarray(perturbed).requires_grad())
    }

    fn status(&self) -> &ModelStatus {
        self.model.status()
    }
}

#[cfg(test)]
mod test {
    use super::sign;

    #[test]
    fn sign_of_zero() {
        assert_eq!(sign(0.), 0.);
        assert_eq!(sign(-0.), 0.);
        assert_eq!(sign(3.), 1.);
        assert_eq!(sign(-1e-12), -1.);
    }
}
