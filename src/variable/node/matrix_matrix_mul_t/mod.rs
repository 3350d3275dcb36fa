use std::rc::Rc;

use ndarray::{linalg::general_mat_mul, Array2, Ix2};

use super::{Backward, Forward};
use crate::variable::{gradient::Gradient, utils::Shared};

/// Computes `left · rightᵀ`.
pub(crate) struct MatrixMatrixMulT {
    left_data: Shared<Array2<f32>>,
    right_data: Shared<Array2<f32>>,
    data: Shared<Array2<f32>>,
}

impl MatrixMatrixMulT {
    pub(crate) fn new(
        left_data: Shared<Array2<f32>>,
        right_data: Shared<Array2<f32>>,
        data: Shared<Array2<f32>>,
    ) -> Self {
        Self {
            left_data,
            right_data,
            data,
        }
    }
}

impl Forward for MatrixMatrixMulT {
    fn forward(&self) {
        general_mat_mul(
            1.,
            &*self.left_data.borrow(),
            &self.right_data.borrow().t(),
            0.,
            &mut *self.data.borrow_mut(),
        );
    }
}

pub(crate) struct MatrixMatrixMulTBackward {
    left_data: Shared<Array2<f32>>,
    left_gradient: Rc<Gradient<Ix2>>,
    right_data: Shared<Array2<f32>>,
    right_gradient: Rc<Gradient<Ix2>>,
    gradient: Rc<Gradient<Ix2>>,
}

impl MatrixMatrixMulTBackward {
    pub(crate) fn new(
        left_data: Shared<Array2<f32>>,
        left_gradient: Rc<Gradient<Ix2>>,
        right_data: Shared<Array2<f32>>,
        right_gradient: Rc<Gradient<Ix2>>,
        gradient: Rc<Gradient<Ix2>>,
    ) -> Self {
        Self {
            left_data,
            left_gradient,
            right_data,
            right_gradient,
            gradient,
        }
    }
}

impl Backward for MatrixMatrixMulTBackward {
    fn backward(&self) {
        let gradient = self.gradient.borrow();

        if self.left_gradient.requires_grad() {
            general_mat_mul(
                1.,
                &*gradient,
                &*self.right_data.borrow(),
                1.,
                &mut *self.left_gradient.borrow_mut(),
            );
        }
        if self.right_gradient.requires_grad() {
            general_mat_mul(
                1.,
                &gradient.t(),
                &*self.left_data.borrow(),
                1.,
                &mut *self.right_gradient.borrow_mut(),
            );
        }
    }
}
