use std::{error::Error, rc::Rc};

use ndarray::{array, Array};

use super::{Backward, Forward, ReLU, ReLUBackward};
use crate::variable::{
    gradient::Gradient,
    utils::{are_similar, new_shared},
};

mod forward {
    use super::*;

    #[test]
    fn creation() -> Result<(), Box<dyn Error>> {
        let op = ReLU::new(
            new_shared(array![[-1., 2.], [0., -3.]]),
            new_shared(Array::zeros((2, 2))),
        );
        op.forward();

        are_similar(op.data.borrow(), &array![[0., 2.], [0., 0.]])
    }
}

mod backward {
    use super::*;

    #[test]
    fn gradient_is_masked() -> Result<(), Box<dyn Error>> {
        let operand_gradient = Rc::new(Gradient::zeros(ndarray::Ix2(2, 2), true));
        let gradient = Rc::new(Gradient::zeros(ndarray::Ix2(2, 2), true));
        gradient.borrow_mut().fill(3.);

        let op = ReLUBackward::new(
            operand_gradient.clone(),
            new_shared(array![[0., 2.], [0., 5.]]),
            gradient,
        );

        op.backward();
        are_similar(operand_gradient.borrow(), &array![[0., 3.], [0., 3.]])?;

        op.backward();
        are_similar(operand_gradient.borrow(), &array![[0., 6.], [0., 6.]])
    }

    #[test]
    fn frozen_operand_is_skipped() -> Result<(), Box<dyn Error>> {
        let operand_gradient = Rc::new(Gradient::zeros(ndarray::Ix1(3), false));
        let gradient = Rc::new(Gradient::zeros(ndarray::Ix1(3), true));
        gradient.borrow_mut().fill(1.);

        ReLUBackward::new(
            operand_gradient.clone(),
            new_shared(array![1., 1., 1.]),
            gradient,
        )
        .backward();

        are_similar(operand_gradient.borrow(), &Array::zeros(3))
    }
}
