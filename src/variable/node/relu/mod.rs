use std::rc::Rc;

use ndarray::{Array, Dimension, Zip};

use super::{Backward, Forward};
use crate::variable::{gradient::Gradient, utils::Shared};

/// Rectified linear unit, *max(0, x)*.
#[allow(clippy::upper_case_acronyms)]
pub(crate) struct ReLU<D>
where
    D: Dimension,
{
    operand_data: Shared<Array<f32, D>>,
    data: Shared<Array<f32, D>>,
}

impl<D> ReLU<D>
where
    D: Dimension,
{
    pub(crate) fn new(operand_data: Shared<Array<f32, D>>, data: Shared<Array<f32, D>>) -> Self {
        Self { operand_data, data }
    }
}

impl<D> Forward for ReLU<D>
where
    D: Dimension,
{
    fn forward(&self) {
        let operand_data = self.operand_data.borrow();
        self.data
            .borrow_mut()
            .zip_mut_with(&*operand_data, |activation, &input| {
                *activation = input.max(0.)
            });
    }
}

/// Lets the gradient through wherever the activation is positive.
///
/// The activation is positive exactly where the input is, so the node's own data doubles as
/// the mask.
#[allow(clippy::upper_case_acronyms)]
pub(crate) struct ReLUBackward<D>
where
    D: Dimension,
{
    operand_gradient: Rc<Gradient<D>>,
    activation: Shared<Array<f32, D>>,
    gradient: Rc<Gradient<D>>,
}

impl<D> ReLUBackward<D>
where
    D: Dimension,
{
    pub(crate) fn new(
        operand_gradient: Rc<Gradient<D>>,
        activation: Shared<Array<f32, D>>,
        gradient: Rc<Gradient<D>>,
    ) -> Self {
        Self {
            operand_gradient,
            activation,
            gradient,
        }
    }
}

impl<D> Backward for ReLUBackward<D>
where
    D: Dimension,
{
    fn backward(&self) {
        if !self.operand_gradient.requires_grad() {
            return;
        }

        Zip::from(&mut *self.operand_gradient.borrow_mut())
            .and(&*self.gradient.borrow())
            .and(&*self.activation.borrow())
            .for_each(|operand_grad, &grad, &activation| {
                if activation > 0. {
                    *operand_grad += grad;
                }
            });
    }
}

#[cfg(test)]
mod test;
