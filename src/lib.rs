//! The `patchwork` crate provides a two-dimensional convolution built from first principles on
//! top of patch matrices, a small define-by-run autodiff engine that threads the convolution
//! through a computational graph, and two gradient-based explanation procedures: a projected
//! gradient descent attack and a saliency map extractor.
//!
//! # Variables
//!
//! The main building blocks of patchwork are:
//!
//! * [`Var`] - a non-differentiable variable.
//!
//! * [`VarDiff`] - a differentiable variable.
//!
//! Leaves are created with the constructors found at the crate root and can be promoted to
//! differentiable leaves with [`.requires_grad()`](Var::requires_grad()).
//!
//!```
//! let x = patchwork::rand((1, 3, 8, 8));
//! let w = patchwork::rand((4, 3, 3, 3)).requires_grad();
//!
//! assert_eq!(x.data().shape(), &[1, 3, 8, 8]);
//! assert!(w.requires_grad());
//!```
//!
//! # Computational Graph
//!
//! A computational graph is implicitly created as you write your program. It is *lazily*
//! evaluated: building an expression only records it, and you must call `.forward()` in order
//! to obtain the actual result of the computation. Once evaluated, a differentiable graph can be
//! differentiated with respect to its leaves by using [`.backward()`](VarDiff::backward()).
//!
//!```
//! use patchwork::conv::ConvParams;
//!
//! let x = patchwork::ones((1, 1, 4, 4)).requires_grad();
//! let w = patchwork::ones((1, 1, 2, 2)).requires_grad();
//!
//! let y = x.clone().conv2d(w.clone(), None, ConvParams::new(2, 1, 0).unwrap()).unwrap();
//! y.forward();
//! y.backward(1.);
//!
//! assert_eq!(y.data().shape(), &[1, 1, 3, 3]);
//! assert_eq!(w.grad()[[0, 0, 0, 0]], 9.);
//!```
//!
//! # Modules
//!
//! * [`conv`] - the patch extraction and accumulation primitives and the convolution's forward
//! and backward rules, working on plain arrays.
//!
//! * [`nn`] - layers, initializers, losses and the model interface.
//!
//! * [`explain`] - adversarial perturbation and saliency.
use ndarray::{Array, Dimension, ShapeBuilder};
use ndarray_rand::{rand_distr::Uniform, RandomExt};

pub mod conv;
pub mod error;
pub mod explain;
pub mod nn;
mod variable;

pub use error::{ConvError, Result};
pub use variable::{Convolve, Param, Reduction, Var, VarDiff};

/// Creates a variable from a **[ndarray]** array that owns its data.
///
/// # Examples
///
/// ```
/// let a = ndarray::array![[1., 2.], [3., 4.]];
/// let t = patchwork::from_ndarray(a.clone());
///
/// assert_eq!(*t.data(), a);
/// ```
pub fn from_ndarray<D>(array: Array<f32, D>) -> Var<D>
where
    D: 'static + Dimension,
{
    Var::leaf(array)
}

/// Creates a variable with zeroed data.
///
/// The shape is of type [`ndarray::ShapeBuilder`].
///
/// # Examples
///
/// ```
/// let t1 = patchwork::zeros(1);
/// let t2 = patchwork::zeros((1, 5));
/// let t3 = patchwork::zeros([1, 2, 3, 4]);
///
/// assert_eq!(t1.data().shape(), &[1]);
/// assert_eq!(t2.data().shape(), &[1, 5]);
/// assert_eq!(t3.data().shape(), &[1, 2, 3, 4]);
/// ```
pub fn zeros<D, Sh>(shape: Sh) -> Var<D>
where
    D: 'static + Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    Var::leaf(Array::from_elem(shape, 0.))
}

/// Creates a variable with data filled with ones.
///
/// The shape is of type [`ndarray::ShapeBuilder`].
///
/// # Examples
///
/// ```
/// let t = patchwork::ones((2, 5));
///
/// assert_eq!(t.data().sum(), 10.);
/// ```
pub fn ones<D, Sh>(shape: Sh) -> Var<D>
where
    D: 'static + Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    Var::leaf(Array::from_elem(shape, 1.))
}

/// Creates a variable with data filled with a constant value.
///
/// `elem` must be `f32` and the shape of type [`ndarray::ShapeBuilder`].
///
/// # Examples
///
/// ```
/// let t = patchwork::full((1, 5), 6.);
///
/// assert!(t.data().iter().all(|&el| el == 6.));
/// ```
pub fn full<D, Sh>(shape: Sh, elem: f32) -> Var<D>
where
    D: 'static + Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    Var::leaf(Array::from_elem(shape, elem))
}

/// Creates a variable with values sampled from a uniform distribution on the interval *[0,1)*.
///
/// The shape is of type [`ndarray::ShapeBuilder`].
///
/// # Examples
///
/// ```
/// let t = patchwork::rand([4, 5, 6]);
///
/// assert_eq!(t.data().shape(), &[4, 5, 6]);
/// ```
pub fn rand<D, Sh>(shape: Sh) -> Var<D>
where
    D: 'static + Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    Var::leaf(Array::random(shape, Uniform::new(0., 1.)))
}
