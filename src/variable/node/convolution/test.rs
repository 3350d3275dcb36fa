use std::{error::Error, rc::Rc};

use ndarray::{array, Array, Array4, Axis, Ix1, Ix4};

use super::{Backward, Convolution, ConvolutionBackward, Forward};
use crate::{
    conv::ConvParams,
    variable::{
        gradient::Gradient,
        utils::{are_similar, new_shared},
    },
};

fn input() -> Array4<f32> {
    Array::range(0., 16., 1.).into_shape((1, 1, 4, 4)).unwrap()
}

fn weight() -> Array4<f32> {
    array![[[1., 2.], [3., 4.]]].insert_axis(Axis(0))
}

/// Gradient of the sum of the 3x3 output of `input` convolved with `weight` at stride 1.
fn expected_weight_gradient() -> Array4<f32> {
    array![[[45., 54.], [81., 90.]]].insert_axis(Axis(0))
}

mod forward {
    use super::*;

    #[test]
    fn creation() -> Result<(), Box<dyn Error>> {
        let context = new_shared(None);
        let op = Convolution::new(
            new_shared(input()),
            new_shared(weight()),
            Some(new_shared(array![1.])),
            new_shared(Array::zeros((1, 1, 3, 3))),
            ConvParams::new(2, 1, 0)?,
            Some(context.clone()),
        );
        op.forward();

        are_similar(
            op.data.borrow(),
            &array![[
                [35., 45., 55.],
                [75., 85., 95.],
                [115., 125., 135.]
            ]].insert_axis(Axis(0)),
        )?;
        assert!(context.borrow().is_some());

        Ok(())
    }

    #[test]
    fn context_can_be_discarded() -> Result<(), Box<dyn Error>> {
        let op = Convolution::new(
            new_shared(input()),
            new_shared(weight()),
            None,
            new_shared(Array::zeros((1, 1, 2, 2))),
            ConvParams::new(2, 2, 0)?,
            None,
        );
        op.forward();

        are_similar(
            op.data.borrow(),
            &array![[[34., 54.], [114., 134.]]].insert_axis(Axis(0)),
        )
    }
}

mod backward {
    use super::*;

    fn setup(
        requires_input: bool,
    ) -> Result<
        (
            Convolution,
            ConvolutionBackward,
            Rc<Gradient<Ix4>>,
            Rc<Gradient<Ix4>>,
            Rc<Gradient<Ix1>>,
        ),
        Box<dyn Error>,
    > {
        let context = new_shared(None);
        let params = ConvParams::new(2, 1, 0)?;
        let forward = Convolution::new(
            new_shared(input()),
            new_shared(weight()),
            Some(new_shared(array![0.])),
            new_shared(Array::zeros((1, 1, 3, 3))),
            params,
            Some(context.clone()),
        );

        let input_gradient = Rc::new(Gradient::zeros(Ix4(1, 1, 4, 4), requires_input));
        let weight_gradient = Rc::new(Gradient::zeros(Ix4(1, 1, 2, 2), true));
        let bias_gradient = Rc::new(Gradient::zeros(Ix1(1), true));
        let gradient = Rc::new(Gradient::zeros(Ix4(1, 1, 3, 3), true));
        gradient.borrow_mut().fill(1.);

        let backward = ConvolutionBackward::new(
            Some(input_gradient.clone()),
            weight_gradient.clone(),
            Some(bias_gradient.clone()),
            gradient,
            context,
        );

        Ok((forward, backward, input_gradient, weight_gradient, bias_gradient))
    }

    #[test]
    fn all_gradients() -> Result<(), Box<dyn Error>> {
        let (forward, backward, input_gradient, weight_gradient, bias_gradient) = setup(true)?;

        forward.forward();
        backward.backward();
        are_similar(
            input_gradient.borrow(),
            &array![[
                [1., 3., 3., 2.],
                [4., 10., 10., 6.],
                [4., 10., 10., 6.],
                [3., 7., 7., 4.]
            ]].insert_axis(Axis(0)),
        )?;
        are_similar(weight_gradient.borrow(), &expected_weight_gradient())?;
        are_similar(bias_gradient.borrow(), &array![9.])?;

        forward.forward();
        backward.backward();
        are_similar(weight_gradient.borrow(), &(expected_weight_gradient() * 2.))?;
        are_similar(bias_gradient.borrow(), &array![18.])
    }

    #[test]
    fn frozen_input() -> Result<(), Box<dyn Error>> {
        let (forward, backward, input_gradient, weight_gradient, _) = setup(false)?;

        forward.forward();
        backward.backward();
        are_similar(input_gradient.borrow(), &Array::zeros((1, 1, 4, 4)))?;
        are_similar(weight_gradient.borrow(), &expected_weight_gradient())
    }

    #[test]
    fn non_differentiable_input() -> Result<(), Box<dyn Error>> {
        let context = new_shared(None);
        let forward = Convolution::new(
            new_shared(input()),
            new_shared(weight()),
            None,
            new_shared(Array::zeros((1, 1, 3, 3))),
            ConvParams::new(2, 1, 0)?,
            Some(context.clone()),
        );
        let weight_gradient = Rc::new(Gradient::zeros(Ix4(1, 1, 2, 2), true));
        let gradient = Rc::new(Gradient::zeros(Ix4(1, 1, 3, 3), true));
        gradient.borrow_mut().fill(1.);
        let backward =
            ConvolutionBackward::new(None, weight_gradient.clone(), None, gradient, context);

        forward.forward();
        backward.backward();

        are_similar(weight_gradient.borrow(), &expected_weight_gradient())
    }

    #[test]
    #[should_panic(expected = "convolution context already consumed")]
    fn backward_without_forward() {
        let (_, backward, ..) = setup(true).unwrap();
        backward.backward();
    }
}
