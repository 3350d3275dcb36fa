use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    fmt::{Debug, Display},
    ops::Add,
    rc::Rc,
};

use ndarray::{arr0, Array, Array1, Array2, DimMax, Dimension, Ix0, Ix1, Ix2, Ix4};

use super::{
    history::History,
    node::{
        Addition, ContextSlot, Convolution, Dropout, Forward, GlobalAvgPool, LogSoftmax,
        MatrixMatrixMulT, NegativeLogLikelihood, ReLU,
    },
    utils::{cobroadcasted_zeros, Broadcast, Shared},
    Reduction, VarDiff,
};
use crate::{
    conv::{self, ConvParams},
    error::Result,
};

/// A non-differentiable variable.
///
/// This, together with its differentiable counterpart [`VarDiff`], is the main building block of
/// every computation.
///
/// Conceptually, it can be thought of as a [`ndarray::Array`] for which the computations are
/// automatically kept track of. Building an expression out of variables only records it: the
/// values are computed by [`.forward()`](Var::forward()).
#[derive(Clone)]
pub struct Var<D>
where
    D: Dimension,
{
    pub(crate) data: Shared<Array<f32, D>>,
    pub(crate) past: History<Rc<dyn Forward>>,
    pub(crate) computed: Rc<Cell<bool>>,
}

impl<D> Var<D>
where
    D: 'static + Dimension,
{
    pub(crate) fn leaf(array: Array<f32, D>) -> Self {
        Self {
            data: Rc::new(RefCell::new(array)),
            past: History::default(),
            computed: Rc::new(Cell::new(true)),
        }
    }

    pub(crate) fn node(
        data: Shared<Array<f32, D>>,
        op: Rc<dyn Forward>,
        mut past: History<Rc<dyn Forward>>,
    ) -> Self {
        past.insert(Rc::as_ptr(&op) as *const () as usize, op);

        Self {
            data,
            past,
            computed: Rc::new(Cell::new(false)),
        }
    }

    /// Promotes `self` to a differentiable variable. A subsequent call to [`.backward()`]
    /// will compute its grad.
    ///
    /// [`.backward()`]: VarDiff::backward()
    ///
    /// ```
    /// let x = patchwork::ones(5).requires_grad();
    ///
    /// assert!(x.requires_grad());
    /// ```
    pub fn requires_grad(self) -> VarDiff<D> {
        VarDiff::leaf(self)
    }

    /// Propagates the computations forwards and populates all the variables from the leaves of the
    /// graph to `self`.
    pub fn forward(&self) {
        self.past.iter().for_each(|op| op.forward());
        self.computed.set(true);
    }

    /// Evaluates only the nodes of `self` that are not ancestors of `evaluated`, whose data must
    /// already be up to date.
    pub(crate) fn forward_from<E>(&self, evaluated: &Var<E>)
    where
        E: Dimension,
    {
        self.past
            .iter_beyond(&evaluated.past)
            .for_each(|op| op.forward());
        self.computed.set(true);
    }

    /// Returns an immutable reference to the data inside `self`.
    pub fn data(&self) -> Ref<Array<f32, D>> {
        self.data.borrow()
    }

    /// Returns a mutable reference to the data inside `self`.
    pub fn data_mut(&self) -> RefMut<Array<f32, D>> {
        self.data.borrow_mut()
    }

    /// Applies the *rectified linear unit* element-wise.
    ///
    /// *ReLU(x) = max(0, x)*
    pub fn relu(self) -> Var<D> {
        let data = Rc::new(RefCell::new(Array::zeros(self.data.borrow().raw_dim())));
        let op = ReLU::new(self.data, data.clone());

        Var::node(data, Rc::new(op), self.past)
    }

    /// Applies log-softmax along `axis`.
    ///
    /// *LogSoftmax(xᵢ) = ln(exp(xᵢ) / ∑ⱼ exp(xⱼ))*
    pub fn log_softmax(self, axis: usize) -> Var<D> {
        let data = Rc::new(RefCell::new(Array::zeros(self.data.borrow().raw_dim())));
        let op = LogSoftmax::new(self.data, data.clone(), axis);

        Var::node(data, Rc::new(op), self.past)
    }

    /// Randomly zeroes some elements with probability `p` while `status` is `true`, scaling
    /// the remaining ones by *1 / (1 - p)*. When `status` is `false` this is the identity.
    ///
    /// # Panics
    ///
    /// If `p` is not in *[0, 1]*.
    pub fn dropout(self, p: f64, status: Rc<Cell<bool>>) -> Var<D> {
        let noise = Rc::new(RefCell::new(Array::zeros(self.data.borrow().raw_dim())));

        self.dropout_with_noise(p, noise, status)
    }

    pub(crate) fn dropout_with_noise(
        self,
        p: f64,
        noise: Shared<Array<f32, D>>,
        status: Rc<Cell<bool>>,
    ) -> Var<D> {
        let data = Rc::new(RefCell::new(Array::zeros(self.data.borrow().raw_dim())));
        let op = Dropout::new(self.data, data.clone(), p, noise, status);

        Var::node(data, Rc::new(op), self.past)
    }
}

impl Var<Ix0> {
    /// Returns the value of a scalar variable.
    pub fn item(&self) -> f32 {
        self.data()[()]
    }
}

impl Var<Ix2> {
    /// Multiplies `self` by the transpose of `rhs`.
    ///
    /// If `self` is *(n, k)* and `rhs` is *(m, k)* the output is *(n, m)*.
    ///
    /// # Panics
    ///
    /// If the inner dimensions differ.
    pub fn mm_t(mut self, rhs: Var<Ix2>) -> Var<Ix2> {
        let shape = mm_t_shape(self.data.borrow().raw_dim(), rhs.data.borrow().raw_dim());

        self.past.merge(rhs.past);
        let data = Rc::new(RefCell::new(Array2::zeros(shape)));
        let op = MatrixMatrixMulT::new(self.data, rhs.data, data.clone());

        Var::node(data, Rc::new(op), self.past)
    }

    /// Negative log-likelihood of the log-probabilities in `self` given the class indices in
    /// `target`.
    pub fn nll(mut self, target: Var<Ix1>, reduction: Reduction) -> Var<Ix0> {
        check_targets(&self.data.borrow(), &target.data.borrow());

        self.past.merge(target.past);
        let data = Rc::new(RefCell::new(arr0(0.)));
        let op = NegativeLogLikelihood::new(self.data, target.data, data.clone(), reduction);

        Var::node(data, Rc::new(op), self.past)
    }
}

/// Convolution of a batch of images with a kernel.
///
/// The result is differentiable when either operand is: a [`Var`] batch convolved with a
/// [`Var`] kernel gives a [`Var`], every other combination gives a [`VarDiff`]. A
/// non-differentiable batch never receives a gradient.
pub trait Convolve<Kernel>: Sized {
    /// The bias that goes with the kernel.
    type Bias;
    /// The type of the convolution's result.
    type Output;

    /// Convolves `self` *(N, C_i, H, W)* with `kernel` *(C_o, C_i, K, K)*.
    ///
    /// # Errors
    ///
    /// Fails when the operands violate any of the preconditions listed in
    /// [`conv::forward`](crate::conv::forward()).
    fn convolve(
        self,
        kernel: Kernel,
        bias: Option<Self::Bias>,
        params: ConvParams,
    ) -> Result<Self::Output>;
}

impl Convolve<Var<Ix4>> for Var<Ix4> {
    type Bias = Var<Ix1>;
    type Output = Var<Ix4>;

    fn convolve(
        self,
        kernel: Var<Ix4>,
        bias: Option<Var<Ix1>>,
        params: ConvParams,
    ) -> Result<Var<Ix4>> {
        self.conv2d_with_context(kernel, bias, params, None)
    }
}

impl Var<Ix4> {
    /// Convolves `self` *(N, C_i, H, W)* with `weight` *(C_o, C_i, K, K)*, adding `bias` *(C_o)*
    /// to every output position when present.
    ///
    /// `weight` and `bias` are either both non-differentiable or both differentiable, see
    /// [`Convolve`].
    ///
    /// ```
    /// use patchwork::conv::ConvParams;
    ///
    /// let images = patchwork::ones((1, 1, 3, 3));
    /// let weight = patchwork::ones((2, 1, 2, 2)).requires_grad();
    ///
    /// let y = images.conv2d(weight.clone(), None, ConvParams::new(2, 1, 0).unwrap()).unwrap();
    /// y.forward();
    /// y.backward(1.);
    ///
    /// assert_eq!(weight.grad().sum(), 32.);
    /// ```
    ///
    /// # Errors
    ///
    /// Fails when the operands violate any of the preconditions listed in
    /// [`conv::forward`](crate::conv::forward()).
    pub fn conv2d<K>(
        self,
        weight: K,
        bias: Option<<Self as Convolve<K>>::Bias>,
        params: ConvParams,
    ) -> Result<<Self as Convolve<K>>::Output>
    where
        Self: Convolve<K>,
    {
        self.convolve(weight, bias, params)
    }

    pub(crate) fn conv2d_with_context(
        mut self,
        weight: Var<Ix4>,
        bias: Option<Var<Ix1>>,
        params: ConvParams,
        context: Option<ContextSlot>,
    ) -> Result<Var<Ix4>> {
        let (out_height, out_width) = conv::check_args(
            self.data.borrow().shape(),
            weight.data.borrow().shape(),
            bias.as_ref().map(|bias| bias.data.borrow().len()),
            &params,
        )?;
        let shape = (
            self.data.borrow().len_of(ndarray::Axis(0)),
            weight.data.borrow().len_of(ndarray::Axis(0)),
            out_height,
            out_width,
        );

        self.past.merge(weight.past);
        let bias_data = bias.map(|bias| {
            self.past.merge(bias.past);
            bias.data
        });
        let data = Rc::new(RefCell::new(Array::zeros(shape)));
        let op = Convolution::new(self.data, weight.data, bias_data, data.clone(), params, context);

        Ok(Var::node(data, Rc::new(op), self.past))
    }

    /// Averages every channel over its spatial extent, turning *(N, C, H, W)* into *(N, C)*.
    pub fn global_avg_pool(self) -> Var<Ix2> {
        let (batch, channels, _, _) = self.data.borrow().dim();
        let data = Rc::new(RefCell::new(Array2::zeros((batch, channels))));
        let op = GlobalAvgPool::new(self.data, data.clone());

        Var::node(data, Rc::new(op), self.past)
    }
}

pub(crate) fn mm_t_shape(left: Ix2, right: Ix2) -> Ix2 {
    assert_eq!(
        left[1], right[1],
        "Shapes {:?} and {:?} are not compatible for a transposed matrix product.",
        left, right
    );

    Ix2(left[0], right[0])
}

pub(crate) fn check_targets(input: &Array2<f32>, target: &Array1<f32>) {
    assert_eq!(
        input.nrows(),
        target.len(),
        "Got {} samples but {} targets.",
        input.nrows(),
        target.len()
    );
}

impl<D, E> Add<Var<E>> for Var<D>
where
    D: 'static + Dimension + DimMax<E>,
    E: 'static + Dimension,
{
    type Output = Var<Broadcast<D, E>>;

    fn add(mut self, rhs: Var<E>) -> Self::Output {
        self.past.merge(rhs.past);

        let data = Rc::new(RefCell::new(cobroadcasted_zeros(
            &self.data.borrow(),
            &rhs.data.borrow(),
        )));
        let op = Rc::new(Addition::new(self.data, rhs.data, data.clone()));

        Var::node(data, op, self.past)
    }
}

impl<D> Debug for Var<D>
where
    D: Dimension,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var")
            .field("data", &self.data.borrow())
            .field("past", &self.past.len())
            .finish()
    }
}

impl<D> Display for Var<D>
where
    D: Dimension,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.data.borrow())
    }
}
