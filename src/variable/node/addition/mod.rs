use std::rc::Rc;

use ndarray::{Array, DimMax, Dimension, Zip};

use super::{Backward, Forward};
use crate::variable::{
    gradient::Gradient,
    utils::{accumulate, Broadcast, Shared},
};

pub(crate) struct Addition<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    left_data: Shared<Array<f32, D>>,
    right_data: Shared<Array<f32, E>>,
    data: Shared<Array<f32, Broadcast<D, E>>>,
}

impl<D, E> Addition<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    pub(crate) fn new(
        left_data: Shared<Array<f32, D>>,
        right_data: Shared<Array<f32, E>>,
        data: Shared<Array<f32, Broadcast<D, E>>>,
    ) -> Self {
        Self {
            left_data,
            right_data,
            data,
        }
    }
}

impl<D, E> Forward for Addition<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    fn forward(&self) {
        Zip::from(&mut *self.data.borrow_mut())
            .and_broadcast(&*self.left_data.borrow())
            .and_broadcast(&*self.right_data.borrow())
            .for_each(|v, &l, &r| *v = l + r);
    }
}

/// Routes the gradient of a broadcasting sum back to both operands, undoing the broadcast.
pub(crate) struct AdditionBackward<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    left_gradient: Rc<Gradient<D>>,
    right_gradient: Rc<Gradient<E>>,
    gradient: Rc<Gradient<Broadcast<D, E>>>,
}

impl<D, E> AdditionBackward<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    pub(crate) fn new(
        left_gradient: Rc<Gradient<D>>,
        right_gradient: Rc<Gradient<E>>,
        gradient: Rc<Gradient<Broadcast<D, E>>>,
    ) -> Self {
        Self {
            left_gradient,
            right_gradient,
            gradient,
        }
    }
}

impl<D, E> Backward for AdditionBackward<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    fn backward(&self) {
        let gradient = self.gradient.borrow();

        if self.left_gradient.requires_grad() {
            accumulate(&mut self.left_gradient.borrow_mut(), &gradient);
        }
        if self.right_gradient.requires_grad() {
            accumulate(&mut self.right_gradient.borrow_mut(), &gradient);
        }
    }
}
