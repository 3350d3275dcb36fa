use std::rc::Rc;

use ndarray::{arr0, Array0, Array1, Array2, Axis, Ix0, Ix2, Zip};

use super::{Backward, Forward};
use crate::variable::{gradient::Gradient, utils::Shared, Reduction};

/// Picks the log-probability of the target class of every sample.
///
/// Targets are class indices stored as `f32`.
#[allow(clippy::upper_case_acronyms)]
pub(crate) struct NegativeLogLikelihood {
    input_data: Shared<Array2<f32>>,
    target_data: Shared<Array1<f32>>,
    data: Shared<Array0<f32>>,
    reduction: Reduction,
}

impl NegativeLogLikelihood {
    pub(crate) fn new(
        input_data: Shared<Array2<f32>>,
        target_data: Shared<Array1<f32>>,
        data: Shared<Array0<f32>>,
        reduction: Reduction,
    ) -> Self {
        Self {
            input_data,
            target_data,
            data,
            reduction,
        }
    }
}

impl Forward for NegativeLogLikelihood {
    fn forward(&self) {
        let (input_data, target_data) = (self.input_data.borrow(), self.target_data.borrow());

        let total_loss = Zip::from(input_data.outer_iter())
            .and(&*target_data)
            .fold(0., |loss, sample, &target| loss - sample[target as usize]);

        *self.data.borrow_mut() = match self.reduction {
            Reduction::Mean => arr0(total_loss / input_data.len_of(Axis(0)) as f32),
            Reduction::Sum => arr0(total_loss),
        };
    }
}

#[allow(clippy::upper_case_acronyms)]
pub(crate) struct NegativeLogLikelihoodBackward {
    target_data: Shared<Array1<f32>>,
    input_gradient: Rc<Gradient<Ix2>>,
    gradient: Rc<Gradient<Ix0>>,
    reduction: Reduction,
}

impl NegativeLogLikelihoodBackward {
    pub(crate) fn new(
        target_data: Shared<Array1<f32>>,
        input_gradient: Rc<Gradient<Ix2>>,
        gradient: Rc<Gradient<Ix0>>,
        reduction: Reduction,
    ) -> Self {
        Self {
            target_data,
            input_gradient,
            gradient,
            reduction,
        }
    }
}

impl Backward for NegativeLogLikelihoodBackward {
    fn backward(&self) {
        if !self.input_gradient.requires_grad() {
            return;
        }

        let target_data = self.target_data.borrow();
        let scale = match self.reduction {
            Reduction::Mean => self.gradient.borrow()[()] / target_data.len() as f32,
            Reduction::Sum => self.gradient.borrow()[()],
        };

        Zip::from(self.input_gradient.borrow_mut().outer_iter_mut())
            .and(&*target_data)
            .for_each(|mut sample, &target| sample[target as usize] -= scale);
    }
}
