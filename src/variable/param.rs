use std::{fmt::Debug, rc::Rc};

use ndarray::{Array, ArrayD, Dimension};

use super::{
    gradient::{Gradient, Reset},
    utils::Shared,
};

/// Dimension-erased view over a learnable leaf.
trait Parameter {
    fn shape(&self) -> Vec<usize>;

    fn data(&self) -> ArrayD<f32>;

    fn grad(&self) -> ArrayD<f32>;

    fn zero_grad(&self);

    fn requires_grad(&self) -> bool;

    fn set_requires_grad(&self, requires_grad: bool);
}

struct Leaf<D>
where
    D: Dimension,
{
    data: Shared<Array<f32, D>>,
    grad: Rc<Gradient<D>>,
}

impl<D> Parameter for Leaf<D>
where
    D: Dimension,
{
    fn shape(&self) -> Vec<usize> {
        self.data.borrow().shape().to_vec()
    }

    fn data(&self) -> ArrayD<f32> {
        self.data.borrow().clone().into_dyn()
    }

    fn grad(&self) -> ArrayD<f32> {
        self.grad.borrow().clone().into_dyn()
    }

    fn zero_grad(&self) {
        self.grad.reset()
    }

    fn requires_grad(&self) -> bool {
        self.grad.requires_grad()
    }

    fn set_requires_grad(&self, requires_grad: bool) {
        self.grad.set_requires_grad(requires_grad)
    }
}

/// A handle to a learnable parameter.
///
/// Handles are cheap to clone and all refer to the same underlying storage, so freezing a
/// parameter through any of them freezes it for every model that uses it.
#[derive(Clone)]
pub struct Param {
    inner: Rc<dyn Parameter>,
}

impl Param {
    pub(crate) fn new<D>(data: Shared<Array<f32, D>>, grad: Rc<Gradient<D>>) -> Self
    where
        D: 'static + Dimension,
    {
        Self {
            inner: Rc::new(Leaf { data, grad }),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.inner.shape()
    }

    /// Returns a copy of the parameter's values.
    pub fn data(&self) -> ArrayD<f32> {
        self.inner.data()
    }

    /// Returns a copy of the parameter's accumulated gradient.
    pub fn grad(&self) -> ArrayD<f32> {
        self.inner.grad()
    }

    pub fn zero_grad(&self) {
        self.inner.zero_grad()
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad()
    }

    /// Marks the parameter as trainable or frozen. The gradient of a frozen parameter is
    /// neither computed nor accumulated.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.inner.set_requires_grad(requires_grad)
    }
}

impl Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad())
            .finish()
    }
}
