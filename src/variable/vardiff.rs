use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    fmt::{Debug, Display},
    ops::Add,
    rc::Rc,
};

use ndarray::{Array, DimMax, Dimension, Ix0, Ix1, Ix2, Ix4};

use super::{
    gradient::{Gradient, Reset},
    history::History,
    node::{
        AdditionBackward, Backward, ConvolutionBackward, DropoutBackward, GlobalAvgPoolBackward,
        LogSoftmaxBackward, MatrixMatrixMulTBackward, NegativeLogLikelihoodBackward,
        ReLUBackward,
    },
    utils::{cobroadcast, Broadcast},
    Convolve, Param, Reduction, Var,
};
use crate::{conv::ConvParams, error::Result};

type BackwardEntry = (Rc<dyn Backward>, Rc<dyn Reset>);

/// A differentiable variable.
///
/// Differentiable variables are created by calling [`.requires_grad()`](Var::requires_grad())
/// on a non-differentiable leaf, or as the result of an operation involving other
/// differentiable variables.
///
/// Each differentiable variable carries a `requires_grad` flag. Leaves start with the flag set;
/// clearing it with [`.set_requires_grad(false)`](VarDiff::set_requires_grad()) freezes the
/// leaf, so that back-propagation skips computing its gradient. The flag of every other node
/// is set when the node is built and is the disjunction of the flags of its operands.
#[derive(Clone)]
pub struct VarDiff<D>
where
    D: Dimension,
{
    pub(crate) var: Var<D>,
    pub(crate) grad: Rc<Gradient<D>>,
    pub(crate) history: History<BackwardEntry>,
}

impl<D> VarDiff<D>
where
    D: 'static + Dimension,
{
    pub(crate) fn leaf(var: Var<D>) -> Self {
        let grad = Rc::new(Gradient::zeros(var.data.borrow().raw_dim(), true));

        Self {
            var,
            grad,
            history: History::default(),
        }
    }

    pub(crate) fn node(
        var: Var<D>,
        grad: Rc<Gradient<D>>,
        op: BackwardEntry,
        mut history: History<BackwardEntry>,
    ) -> Self {
        history.insert(Rc::as_ptr(&op.0) as *const () as usize, op);

        Self { var, grad, history }
    }

    /// Allocates the gradient of a node computed from operands with the given flags.
    fn gradient(shape: D, requires_grad: bool) -> Rc<Gradient<D>> {
        Rc::new(Gradient::zeros(shape, requires_grad))
    }

    /// Returns an immutable reference to the data inside `self`.
    ///
    /// At the differentiable variable's creation the data is filled with zeros. You can populate it
    /// with a call to [`.forward()`](VarDiff::forward()).
    pub fn data(&self) -> Ref<Array<f32, D>> {
        self.var.data()
    }

    /// Returns a mutable reference to the data inside `self`.
    pub fn data_mut(&self) -> RefMut<Array<f32, D>> {
        self.var.data_mut()
    }

    /// Returns an immutable reference to the gradient inside `self`.
    ///
    /// The gradient of a leaf accumulates over successive calls to
    /// [`.backward()`](VarDiff::backward()) until it is reset with
    /// [`.zero_grad()`](VarDiff::zero_grad()).
    pub fn grad(&self) -> Ref<Array<f32, D>> {
        self.grad.borrow()
    }

    /// Returns a mutable reference to the gradient inside `self`.
    pub fn grad_mut(&self) -> RefMut<Array<f32, D>> {
        self.grad.borrow_mut()
    }

    /// Sets the variable's gradient to zero.
    pub fn zero_grad(&self) {
        self.grad.reset();
    }

    pub fn requires_grad(&self) -> bool {
        self.grad.requires_grad()
    }

    /// Freezes or unfreezes `self`. Only meaningful for leaves.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.grad.set_requires_grad(requires_grad);
    }

    /// Returns a handle to `self` as a learnable parameter.
    pub fn param(&self) -> Param {
        Param::new(self.var.data.clone(), self.grad.clone())
    }

    /// Returns a new non-differentiable leaf holding a copy of the current data of `self`.
    pub fn detach(&self) -> Var<D> {
        Var::leaf(self.data().clone())
    }

    /// Propagates the computations forwards and populates all the variables and differentiable
    /// variables from the leaves of the graph to `self`.
    pub fn forward(&self) {
        self.var.forward();
    }

    /// Evaluates only the part of the graph of `self` that lies downstream of `evaluated`, which
    /// must have been evaluated already.
    pub(crate) fn forward_from<E>(&self, evaluated: &VarDiff<E>)
    where
        E: Dimension,
    {
        self.var.forward_from(&evaluated.var);
    }

    /// Back-propagates through the computational graph and accumulates the gradients of the
    /// differentiable leaves that are ancestors of `self`. Before back-propagating the gradient
    /// of `self` is seeded with `seed`, thus, the leaves' gradients will be scaled accordingly.
    ///
    /// The gradients of the intermediate nodes are cleared first, so that each call starts
    /// from a clean slate. Each call must be preceded by a call to
    /// [`.forward()`](VarDiff::forward()), as convolutions consume the state their forward
    /// pass left behind.
    ///
    /// # Panics
    ///
    /// If `self` has never been evaluated.
    pub fn backward(&self, seed: f32) {
        assert!(
            self.var.computed.get(),
            "Perhaps you forgot to call .forward()?"
        );

        self.history.iter().for_each(|(_, gradient)| gradient.reset());
        self.grad.borrow_mut().fill(seed);
        self.history.iter().rev().for_each(|(op, _)| op.backward());
    }

    /// Applies the *rectified linear unit* element-wise.
    ///
    /// *ReLU(x) = max(0, x)*
    pub fn relu(self) -> VarDiff<D> {
        let grad = Self::gradient(self.grad.shape(), self.requires_grad());
        let var = self.var.relu();
        let op = ReLUBackward::new(self.grad, var.data.clone(), grad.clone());

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }

    /// Applies log-softmax along `axis`.
    pub fn log_softmax(self, axis: usize) -> VarDiff<D> {
        let grad = Self::gradient(self.grad.shape(), self.requires_grad());
        let var = self.var.log_softmax(axis);
        let op = LogSoftmaxBackward::new(self.grad, var.data.clone(), grad.clone(), axis);

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }

    /// Randomly zeroes some elements with probability `p` while `status` is `true`, scaling
    /// the remaining ones by *1 / (1 - p)*. When `status` is `false` this is the identity.
    ///
    /// # Panics
    ///
    /// If `p` is not in *[0, 1]*.
    pub fn dropout(self, p: f64, status: Rc<Cell<bool>>) -> VarDiff<D> {
        let noise = Rc::new(RefCell::new(Array::zeros(self.grad.shape())));
        let grad = Self::gradient(self.grad.shape(), self.requires_grad());
        let op = DropoutBackward::new(self.grad, grad.clone(), noise.clone());
        let var = self.var.dropout_with_noise(p, noise, status);

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }
}

impl VarDiff<Ix0> {
    /// Returns the value of a scalar differentiable variable.
    pub fn item(&self) -> f32 {
        self.var.item()
    }
}

impl VarDiff<Ix2> {
    /// Multiplies `self` by the transpose of `rhs`.
    ///
    /// If `self` is *(n, k)* and `rhs` is *(m, k)* the output is *(n, m)*.
    ///
    /// # Panics
    ///
    /// If the inner dimensions differ.
    pub fn mm_t(mut self, rhs: VarDiff<Ix2>) -> VarDiff<Ix2> {
        let requires_grad = self.requires_grad() || rhs.requires_grad();
        let left_data = self.var.data.clone();
        let right_data = rhs.var.data.clone();
        let var = self.var.mm_t(rhs.var);

        let grad = Self::gradient(var.data.borrow().raw_dim(), requires_grad);
        let op = MatrixMatrixMulTBackward::new(
            left_data,
            self.grad,
            right_data,
            rhs.grad,
            grad.clone(),
        );
        self.history.merge(rhs.history);

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }

    /// Negative log-likelihood of the log-probabilities in `self` given the class indices in
    /// `target`.
    pub fn nll(self, target: Var<Ix1>, reduction: Reduction) -> VarDiff<Ix0> {
        let target_data = target.data.clone();
        let grad = VarDiff::<Ix0>::gradient(Ix0(), self.requires_grad());
        let op = NegativeLogLikelihoodBackward::new(target_data, self.grad, grad.clone(), reduction);
        let var = self.var.nll(target, reduction);

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }
}

impl VarDiff<Ix4> {
    /// Convolves `self` *(N, C_i, H, W)* with `weight` *(C_o, C_i, K, K)*, adding `bias` *(C_o)*
    /// to every output position when present.
    ///
    /// The context produced by the forward pass of the convolution is handed over to its
    /// backward pass and dropped there.
    ///
    /// # Errors
    ///
    /// Fails when the operands violate any of the preconditions listed in
    /// [`conv::forward`](crate::conv::forward()).
    pub fn conv2d(
        mut self,
        weight: VarDiff<Ix4>,
        bias: Option<VarDiff<Ix1>>,
        params: ConvParams,
    ) -> Result<VarDiff<Ix4>> {
        let requires_grad = self.requires_grad()
            || weight.requires_grad()
            || bias.as_ref().map_or(false, |bias| bias.requires_grad());

        let context = Rc::new(RefCell::new(None));
        let (bias_var, bias_grad) = match bias {
            Some(bias) => {
                self.history.merge(bias.history);
                (Some(bias.var), Some(bias.grad))
            }
            None => (None, None),
        };
        let var = self
            .var
            .conv2d_with_context(weight.var, bias_var, params, Some(context.clone()))?;

        let grad = Self::gradient(var.data.borrow().raw_dim(), requires_grad);
        let op = ConvolutionBackward::new(
            Some(self.grad),
            weight.grad,
            bias_grad,
            grad.clone(),
            context,
        );
        self.history.merge(weight.history);

        Ok(VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history))
    }

    /// Averages every channel over its spatial extent, turning *(N, C, H, W)* into *(N, C)*.
    pub fn global_avg_pool(self) -> VarDiff<Ix2> {
        let requires_grad = self.requires_grad();
        let var = self.var.global_avg_pool();
        let grad = VarDiff::<Ix2>::gradient(var.data.borrow().raw_dim(), requires_grad);
        let op = GlobalAvgPoolBackward::new(self.grad, grad.clone());

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }
}

impl<D, E> Add<VarDiff<E>> for VarDiff<D>
where
    D: 'static + Dimension + DimMax<E>,
    E: 'static + Dimension,
{
    type Output = VarDiff<Broadcast<D, E>>;

    fn add(mut self, rhs: VarDiff<E>) -> Self::Output {
        let grad = Rc::new(Gradient::zeros(
            cobroadcast(self.grad.shape(), rhs.grad.shape()),
            self.requires_grad() || rhs.requires_grad(),
        ));
        let op = AdditionBackward::new(self.grad, rhs.grad, grad.clone());
        let var = self.var + rhs.var;
        self.history.merge(rhs.history);

        VarDiff::node(var, grad.clone(), (Rc::new(op), grad), self.history)
    }
}

impl<D> Debug for VarDiff<D>
where
    D: Dimension,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarDiff")
            .field("data", &self.var.data.borrow())
            .field("grad", &self.grad.borrow())
            .field("requires_grad", &self.grad.requires_grad())
            .field("history", &self.history.len())
            .finish()
    }
}

impl<D> Display for VarDiff<D>
where
    D: Dimension,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.var)
    }
}

impl Convolve<VarDiff<Ix4>> for Var<Ix4> {
    type Bias = VarDiff<Ix1>;
    type Output = VarDiff<Ix4>;

    fn convolve(
        self,
        mut kernel: VarDiff<Ix4>,
        bias: Option<VarDiff<Ix1>>,
        params: ConvParams,
    ) -> Result<VarDiff<Ix4>> {
        let requires_grad =
            kernel.requires_grad() || bias.as_ref().map_or(false, |bias| bias.requires_grad());

        let context = Rc::new(RefCell::new(None));
        let (bias_var, bias_grad) = match bias {
            Some(bias) => {
                kernel.history.merge(bias.history);
                (Some(bias.var), Some(bias.grad))
            }
            None => (None, None),
        };
        let var = self.conv2d_with_context(kernel.var, bias_var, params, Some(context.clone()))?;

        let grad = VarDiff::<Ix4>::gradient(var.data.borrow().raw_dim(), requires_grad);
        let op = ConvolutionBackward::new(None, kernel.grad, bias_grad, grad.clone(), context);

        Ok(VarDiff::node(var, grad.clone(), (Rc::new(op), grad), kernel.history))
    }
}

impl Convolve<VarDiff<Ix4>> for VarDiff<Ix4> {
    type Bias = VarDiff<Ix1>;
    type Output = VarDiff<Ix4>;

    fn convolve(
        self,
        kernel: VarDiff<Ix4>,
        bias: Option<VarDiff<Ix1>>,
        params: ConvParams,
    ) -> Result<VarDiff<Ix4>> {
        self.conv2d(kernel, bias, params)
    }
}
