use std::{cell::Cell, rc::Rc};

use ndarray::{Array, Dimension, Zip};
use rand::thread_rng;
use rand_distr::{Bernoulli, Distribution};

use super::{Backward, Forward};
use crate::variable::{gradient::Gradient, utils::Shared};

/// Zeroes each element with probability `p` while `status` reads *train*, scaling the
/// survivors by *1 / (1 - p)*. Acts as the identity otherwise.
pub(crate) struct Dropout<D>
where
    D: Dimension,
{
    operand_data: Shared<Array<f32, D>>,
    data: Shared<Array<f32, D>>,
    noise: Shared<Array<f32, D>>,
    distr: Bernoulli,
    p: f64,
    status: Rc<Cell<bool>>,
}

impl<D> Dropout<D>
where
    D: Dimension,
{
    /// # Panics
    ///
    /// If `p` is not a probability.
    pub(crate) fn new(
        operand_data: Shared<Array<f32, D>>,
        data: Shared<Array<f32, D>>,
        p: f64,
        noise: Shared<Array<f32, D>>,
        status: Rc<Cell<bool>>,
    ) -> Self {
        let distr = match Bernoulli::new(1. - p) {
            Ok(distr) => distr,
            Err(_) => panic!("Wrong probability received: {}.", p),
        };

        Self {
            operand_data,
            data,
            noise,
            distr,
            p,
            status,
        }
    }
}

impl<D> Forward for Dropout<D>
where
    D: Dimension,
{
    fn forward(&self) {
        let mut noise = self.noise.borrow_mut();

        if !self.status.get() || self.p == 0. {
            noise.fill(1.);
            self.data.borrow_mut().assign(&*self.operand_data.borrow());
            return;
        }

        if self.p == 1. {
            noise.fill(0.);
            self.data.borrow_mut().fill(0.);
            return;
        }

        let scale = 1. / (1. - self.p as f32);
        let mut rng = thread_rng();
        noise.map_inplace(|el| *el = self.distr.sample(&mut rng) as u8 as f32 * scale);

        Zip::from(&mut *self.data.borrow_mut())
            .and(&*self.operand_data.borrow())
            .and(&*noise)
            .for_each(|v, &o, &n| *v = o * n);
    }
}

/// The mask drawn by the last forward pass, already scaled, is reused as is.
pub(crate) struct DropoutBackward<D>
where
    D: Dimension,
{
    operand_gradient: Rc<Gradient<D>>,
    gradient: Rc<Gradient<D>>,
    noise: Shared<Array<f32, D>>,
}

impl<D> DropoutBackward<D>
where
    D: Dimension,
{
    pub(crate) fn new(
        operand_gradient: Rc<Gradient<D>>,
        gradient: Rc<Gradient<D>>,
        noise: Shared<Array<f32, D>>,
    ) -> Self {
        Self {
            operand_gradient,
            gradient,
            noise,
        }
    }
}

impl<D> Backward for DropoutBackward<D>
where
    D: Dimension,
{
    fn backward(&self) {
        if !self.operand_gradient.requires_grad() {
            return;
        }

        Zip::from(&mut *self.operand_gradient.borrow_mut())
            .and(&*self.gradient.borrow())
            .and(&*self.noise.borrow())
            .for_each(|op_grad_el, &grad_el, &noise_el| *op_grad_el += grad_el * noise_el);
    }
}
