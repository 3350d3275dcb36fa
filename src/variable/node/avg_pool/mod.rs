use std::rc::Rc;

use ndarray::{Array2, Array4, Axis, Ix2, Ix4, Zip};

use super::{Backward, Forward};
use crate::variable::{gradient::Gradient, utils::Shared};

fn spatial_area(shape: &[usize]) -> f32 {
    (shape[2] * shape[3]) as f32
}

/// Averages every channel of a *(N, C, H, W)* batch over its spatial extent, yielding
/// *(N, C)*.
pub(crate) struct GlobalAvgPool {
    operand_data: Shared<Array4<f32>>,
    data: Shared<Array2<f32>>,
}

impl GlobalAvgPool {
    pub(crate) fn new(operand_data: Shared<Array4<f32>>, data: Shared<Array2<f32>>) -> Self {
        Self { operand_data, data }
    }
}

impl Forward for GlobalAvgPool {
    fn forward(&self) {
        let operand_data = self.operand_data.borrow();
        let area = spatial_area(operand_data.shape());
        let pooled = operand_data.sum_axis(Axis(3)).sum_axis(Axis(2));

        Zip::from(&mut *self.data.borrow_mut())
            .and(&pooled)
            .for_each(|v, &s| *v = s / area);
    }
}

pub(crate) struct GlobalAvgPoolBackward {
    operand_gradient: Rc<Gradient<Ix4>>,
    gradient: Rc<Gradient<Ix2>>,
}

impl GlobalAvgPoolBackward {
    pub(crate) fn new(operand_gradient: Rc<Gradient<Ix4>>, gradient: Rc<Gradient<Ix2>>) -> Self {
        Self {
            operand_gradient,
            gradient,
        }
    }
}

impl Backward for GlobalAvgPoolBackward {
    fn backward(&self) {
        if !self.operand_gradient.requires_grad() {
            return;
        }

        let mut operand_gradient = self.operand_gradient.borrow_mut();
        let area = spatial_area(operand_gradient.shape());
        let spread = self
            .gradient
            .borrow()
            .mapv(|el| el / area)
            .insert_axis(Axis(2))
            .insert_axis(Axis(3));

        *operand_gradient += &spread;
    }
}

#[cfg(test)]
mod test;
