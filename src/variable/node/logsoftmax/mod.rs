use std::rc::Rc;

use ndarray::{Array, Axis, Dimension, Zip};

use super::{Backward, Forward};
use crate::variable::{gradient::Gradient, utils::Shared};

/// Log-softmax along `axis`, computed as *(x - max) - ln ∑ exp(x - max)*.
pub(crate) struct LogSoftmax<D>
where
    D: Dimension,
{
    operand_data: Shared<Array<f32, D>>,
    data: Shared<Array<f32, D>>,
    axis: Axis,
}

impl<D> LogSoftmax<D>
where
    D: Dimension,
{
    pub(crate) fn new(
        operand_data: Shared<Array<f32, D>>,
        data: Shared<Array<f32, D>>,
        axis: usize,
    ) -> Self {
        Self {
            operand_data,
            data,
            axis: Axis(axis),
        }
    }
}

impl<D> Forward for LogSoftmax<D>
where
    D: Dimension,
{
    fn forward(&self) {
        Zip::from(self.data.borrow_mut().lanes_mut(self.axis))
            .and(self.operand_data.borrow().lanes(self.axis))
            .for_each(|mut data_lane, operand_lane| {
                let max = operand_lane.fold(f32::NEG_INFINITY, |acc, &el| acc.max(el));
                let log_sum_exp = operand_lane.fold(0., |acc, &el| acc + (el - max).exp()).ln();
                Zip::from(&mut data_lane)
                    .and(&operand_lane)
                    .for_each(|v, &o| *v = (o - max) - log_sum_exp);
            });
    }
}

pub(crate) struct LogSoftmaxBackward<D>
where
    D: Dimension,
{
    operand_gradient: Rc<Gradient<D>>,
    data: Shared<Array<f32, D>>,
    gradient: Rc<Gradient<D>>,
    axis: Axis,
}

impl<D> LogSoftmaxBackward<D>
where
    D: Dimension,
{
    pub(crate) fn new(
        operand_gradient: Rc<Gradient<D>>,
        data: Shared<Array<f32, D>>,
        gradient: Rc<Gradient<D>>,
        axis: usize,
    ) -> Self {
        Self {
            operand_gradient,
            data,
            gradient,
            axis: Axis(axis),
        }
    }
}

impl<D> Backward for LogSoftmaxBackward<D>
where
    D: Dimension,
{
    fn backward(&self) {
        if !self.operand_gradient.requires_grad() {
            return;
        }

        Zip::from(self.operand_gradient.borrow_mut().lanes_mut(self.axis))
            .and(self.gradient.borrow().lanes(self.axis))
            .and(self.data.borrow().lanes(self.axis))
            .for_each(|mut op_grad_lane, grad_lane, data_lane| {
                let gradient_sum = grad_lane.sum();
                Zip::from(&mut op_grad_lane)
                    .and(&grad_lane)
                    .and(&data_lane)
                    .for_each(|op_grad_el, &grad_el, &data_el| {
                        *op_grad_el += grad_el - data_el.exp() * gradient_sum
                    })
            });
    }
}
