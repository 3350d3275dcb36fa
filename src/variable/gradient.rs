use std::cell::{Cell, Ref, RefCell, RefMut};

use ndarray::{Array, Dimension};

/// Gradient storage of a differentiable node.
///
/// The `requires_grad` flag tells the backward nodes reading this gradient whether they have
/// to compute it at all.
pub(crate) struct Gradient<D>
where
    D: Dimension,
{
    array: RefCell<Array<f32, D>>,
    requires_grad: Cell<bool>,
}

impl<D> Gradient<D>
where
    D: Dimension,
{
    pub(crate) fn zeros(shape: D, requires_grad: bool) -> Self {
        Self {
            array: RefCell::new(Array::zeros(shape)),
            requires_grad: Cell::new(requires_grad),
        }
    }

    pub(crate) fn borrow(&self) -> Ref<Array<f32, D>> {
        self.array.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<Array<f32, D>> {
        self.array.borrow_mut()
    }

    pub(crate) fn shape(&self) -> D {
        self.array.borrow().raw_dim()
    }

    pub(crate) fn requires_grad(&self) -> bool {
        self.requires_grad.get()
    }

    pub(crate) fn set_requires_grad(&self, requires_grad: bool) {
        self.requires_grad.set(requires_grad)
    }
}

/// Zeroes a gradient regardless of its dimensionality.
pub(crate) trait Reset {
    fn reset(&self);
}

impl<D> Reset for Gradient<D>
where
    D: Dimension,
{
    fn reset(&self) {
        self.array.borrow_mut().fill(0.);
    }
}
