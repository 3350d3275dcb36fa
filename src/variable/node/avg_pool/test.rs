use std::{error::Error, rc::Rc};

use ndarray::{array, Array, Axis, Ix2, Ix4};

use super::{Backward, Forward, GlobalAvgPool, GlobalAvgPoolBackward};
use crate::variable::{
    gradient::Gradient,
    utils::{are_similar, new_shared},
};

mod forward {
    use super::*;

    #[test]
    fn creation() -> Result<(), Box<dyn Error>> {
        let input = Array::range(0., 16., 1.).into_shape((2, 2, 2, 2))?;
        let op = GlobalAvgPool::new(new_shared(input), new_shared(Array::zeros((2, 2))));
        op.forward();

        are_similar(op.data.borrow(), &array![[1.5, 5.5], [9.5, 13.5]])
    }
}

mod backward {
    use super::*;

    #[test]
    fn gradient_is_spread() -> Result<(), Box<dyn Error>> {
        let operand_gradient = Rc::new(Gradient::zeros(Ix4(1, 2, 2, 2), true));
        let gradient = Rc::new(Gradient::zeros(Ix2(1, 2), true));
        *gradient.borrow_mut() = array![[4., -8.]];

        let op = GlobalAvgPoolBackward::new(operand_gradient.clone(), gradient);

        op.backward();
        are_similar(
            operand_gradient.borrow(),
            &array![[[1., 1.], [1., 1.]], [[-2., -2.], [-2., -2.]]].insert_axis(Axis(0)),
        )?;

        op.backward();
        are_similar(
            operand_gradient.borrow(),
            &array![[[2., 2.], [2., 2.]], [[-4., -4.], [-4., -4.]]].insert_axis(Axis(0)),
        )
    }
}
