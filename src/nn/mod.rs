//! Basic building blocks for neural networks.
//!
//! patchwork provides some pre-assembled components, you can either use them individually or
//! combine them into a bigger architecture. Take a look at the [complete list](#layers) to know
//! more.
//!
//! You can also customize the initialization of the parameters of such components, and that of
//! any other differentiable variable, by picking the function that best fits your needs from
//! the [`nn::init`](module@init) module.
//!
//! Refer to the [`nn::loss`](module@loss) module for loss functions.
//!
//! # Assembling a model
//!
//! The suggested way of building a model is by declaring a struct holding its components and a
//! [`ModelStatus`]. Every component is registered to the status as it is created, this makes
//! its parameters enumerable and ties its behavior to the model's train and eval modes.
//!
//! Implementing [`Model`] is what makes a network usable by the procedures in
//! [`explain`](crate::explain).
//!
//! ```
//! use ndarray::{Ix2, Ix4};
//! use patchwork::{
//!     nn::{Conv2d, Conv2dConfig, Dropout, Linear, Model, ModelStatus},
//!     Result, VarDiff,
//! };
//!
//! struct Classifier {
//!     conv: Conv2d,
//!     drop: Dropout,
//!     lin: Linear,
//!     status: ModelStatus,
//! }
//!
//! impl Classifier {
//!     fn new() -> Result<Self> {
//!         let mut status = ModelStatus::default();
//!
//!         Ok(Self {
//!             conv: status.register(Conv2d::new(Conv2dConfig::new(3, 8, 3).padding(1))?),
//!             drop: status.register(Dropout::new(0.25)),
//!             lin: status.register(Linear::new(8, 10)),
//!             status,
//!         })
//!     }
//! }
//!
//! impl Model for Classifier {
//!     fn forward(&self, input: VarDiff<Ix4>) -> Result<VarDiff<Ix2>> {
//!         let features = self.conv.forward(input)?.relu().global_avg_pool();
//!
//!         Ok(self.lin.forward(self.drop.forward(features)))
//!     }
//!
//!     fn status(&self) -> &ModelStatus {
//!         &self.status
//!     }
//! }
//!
//! let model = Classifier::new().unwrap();
//! assert_eq!(model.parameters().len(), 4);
//!
//! model.eval();
//! assert!(!model.status().is_training());
//! ```
//!
//! # Train and Eval
//!
//! The status of a model determines the behavior of its components. Certain building blocks,
//! such as the [`Dropout`], are turned on and off depending on whether the model is running in
//! *training mode* or in *inference mode*.
//!
//! # Layers
//!
//! * [`nn::Linear`](struct@Linear) - Applies a linear transformation to the incoming data.
//!
//! * [`nn::Conv2d`](struct@Conv2d) - Applies a spatial convolution over an input signal
//! composed of several input planes.
//!
//! * [`nn::Dropout`](struct@Dropout) - During training, randomly zeroes some of the elements of
//! the input variable with probability *p* using samples from a Bernoulli distribution.
use std::{
    cell::Cell,
    fmt::{self, Display},
    rc::Rc,
};

use ndarray::{Dimension, Ix1, Ix2, Ix4};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{
    conv::ConvParams,
    error::{ConvError, Result},
    Convolve, Param, VarDiff,
};

pub mod init;
pub mod loss;


/// A network that maps a batch of images to a batch of logits.
///
/// This is the interface consumed by [`PgdAttack`](crate::explain::PgdAttack) and
/// [`GradAttention`](crate::explain::GradAttention).
pub trait Model {
    /// Builds the computational graph of the network on top of `input`.
    ///
    /// `input` must be of shape *(N, C, H, W)*, the output is of shape *(N, classes)*. The graph
    /// is only built, call `.forward()` on the output to evaluate it.
    ///
    /// # Errors
    ///
    /// Fails when `input` is not compatible with the layers of the network.
    fn forward(&self, input: VarDiff<Ix4>) -> Result<VarDiff<Ix2>>;

    /// The status every component of the network is registered to.
    fn status(&self) -> &ModelStatus;

    /// Switches the network in training mode.
    fn train(&self) {
        self.status().train()
    }

    /// Switches the network in inference mode.
    fn eval(&self) {
        self.status().eval()
    }

    /// Returns the learnable parameters of the network.
    fn parameters(&self) -> Vec<Param> {
        self.status().parameters()
    }
}

/// A component that can be registered to a [`ModelStatus`].
pub trait Register {
    /// Ties the component to the train flag of a model. Components whose behavior does not
    /// depend on the mode can ignore it.
    fn register_status(&mut self, _status: Rc<Cell<bool>>) {}

    /// Appends the learnable parameters of the component to `params`.
    fn register_params(&self, params: &mut Vec<Param>);
}

/// A component with its own default initialization scheme.
pub trait Initialize {
    /// Re-draws the learnable parameters of the component.
    fn reset_parameters(&self);
}

/// Train flag and parameters of a model.
///
/// A freshly created status is in training mode.
#[derive(Debug)]
pub struct ModelStatus {
    train: Rc<Cell<bool>>,
    params: Vec<Param>,
}

impl ModelStatus {
    /// Registers `component`, returning it back.
    pub fn register<T>(&mut self, mut component: T) -> T
    where
        T: Register,
    {
        component.register_status(self.train.clone());
        component.register_params(&mut self.params);

        component
    }

    /// Returns the parameters registered so far.
    pub fn parameters(&self) -> Vec<Param> {
        self.params.clone()
    }

    pub fn train(&self) {
        self.train.set(true)
    }

    pub fn eval(&self) {
        self.train.set(false)
    }

    pub fn is_training(&self) -> bool {
        self.train.get()
    }
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self {
            train: Rc::new(Cell::new(true)),
            params: Vec::new(),
        }
    }
}

/// Applies a **linear transformation** to the incoming data.
///
/// ```text
/// ʏ = xAᵀ + b
/// ```
pub struct Linear {
    pub weight: VarDiff<Ix2>,
    pub bias: VarDiff<Ix1>,
}

impl Linear {
    /// Creates a linear layer.
    ///
    /// # Arguments
    ///
    /// * `in_features` – size of each input sample.
    ///
    /// * `out_features` – size of each output sample.
    ///
    /// The learnable weight of the layer is of shape `(out_features, in_features)`. The learnable
    /// bias of the layer is of shape `out_features`.
    ///
    /// The values for both the weight and bias are initialized from *U(-k, k)* where
    /// `k = (1. / in_features as f32).sqrt()`.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        let weight = crate::zeros((out_features, in_features)).requires_grad();
        let bias = crate::zeros(out_features).requires_grad();
        let linear = Self { weight, bias };
        linear.reset_parameters();

        linear
    }

    /// Applies the linear transformation *y = xA^T + b* to the incoming data.
    ///
    /// # Arguments
    ///
    /// `input` - a variable of shape *(N, in_features)*, the output's shape will be
    /// *(N, out_features)*.
    pub fn forward(&self, input: VarDiff<Ix2>) -> VarDiff<Ix2> {
        input.mm_t(self.weight.clone()) + self.bias.clone()
    }
}

impl Initialize for Linear {
    fn reset_parameters(&self) {
        let (fan_in, _) = init::calculate_fan_in_fan_out(&self.weight);
        let k = (1. / fan_in).sqrt();
        init::uniform(&self.weight, -k, k);
        init::uniform(&self.bias, -k, k);
    }
}

impl Register for Linear {
    fn register_params(&self, params: &mut Vec<Param>) {
        params.push(self.weight.param());
        params.push(self.bias.param());
    }
}

/// During training, randomly zeroes some of the elements of the input variable with probability
/// *p* using samples from a Bernoulli distribution. The surviving elements are scaled by
/// *1 / (1 - p)*. In inference mode the layer is the identity.
pub struct Dropout {
    pub p: f64,
    status: Rc<Cell<bool>>,
}

impl Dropout {
    /// Creates a dropout layer in training mode. Register it to a [`ModelStatus`] to let the
    /// model drive its mode.
    ///
    /// # Panics
    ///
    /// If `p` is not in *[0, 1]*.
    pub fn new(p: f64) -> Self {
        assert!(
            (0. ..=1.).contains(&p),
            "Dropout probability must be in [0, 1], got {}.",
            p
        );

        Self {
            p,
            status: Rc::new(Cell::new(true)),
        }
    }

    pub fn forward<D>(&self, input: VarDiff<D>) -> VarDiff<D>
    where
        D: 'static + Dimension,
    {
        input.dropout(self.p, self.status.clone())
    }
}

impl Register for Dropout {
    fn register_status(&mut self, status: Rc<Cell<bool>>) {
        self.status = status;
    }

    fn register_params(&self, _: &mut Vec<Param>) {}
}

/// Hyper-parameters of a [`Conv2d`] layer.
///
/// `dilation` and `groups` exist for interface compatibility only; any value but `1` is
/// rejected when the layer is built.
///
/// ```
/// use patchwork::nn::Conv2dConfig;
///
/// let config = Conv2dConfig::new(3, 16, 3).padding(1);
/// assert_eq!(config.to_string(), "3, 16, kernel_size=3, stride=1, padding=1");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    pub groups: usize,
    pub bias: bool,
}

impl Conv2dConfig {
    /// A convolution with unit stride, no padding and a bias.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: 0,
            dilation: 1,
            groups: 1,
            bias: true,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Validates the configuration and extracts the parameters of the convolution.
    ///
    /// # Errors
    ///
    /// Fails on a zero kernel size or stride and on any dilation or group count other than `1`.
    pub fn params(&self) -> Result<ConvParams> {
        if self.dilation != 1 {
            return Err(ConvError::Unsupported {
                name: "dilation",
                value: self.dilation,
            });
        }
        if self.groups != 1 {
            return Err(ConvError::Unsupported {
                name: "groups",
                value: self.groups,
            });
        }

        ConvParams::new(self.kernel_size, self.stride, self.padding)
    }
}

impl Display for Conv2dConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, kernel_size={}, stride={}, padding={}",
            self.in_channels, self.out_channels, self.kernel_size, self.stride, self.padding
        )?;
        if self.dilation != 1 {
            write!(f, ", dilation={}", self.dilation)?;
        }
        if self.groups != 1 {
            write!(f, ", groups={}", self.groups)?;
        }
        if !self.bias {
            write!(f, ", bias=false")?;
        }

        Ok(())
    }
}

/// Applies a **spatial convolution** over an input signal composed of several input planes.
///
/// The convolution is computed by [`conv::forward`](crate::conv::forward()) and differentiated
/// by [`conv::backward`](crate::conv::backward()).
pub struct Conv2d {
    pub weight: VarDiff<Ix4>,
    pub bias: Option<VarDiff<Ix1>>,
    config: Conv2dConfig,
    params: ConvParams,
}

impl Conv2d {
    /// Creates a new Conv2d.
    ///
    /// The learnable weight is of shape *(out_channels, in_channels, kernel_size, kernel_size)*
    /// and is initialized with [`kaiming_uniform`](init::kaiming_uniform()) for a leaky rectifier
    /// of slope *√5*. The learnable bias, when present, is of shape *(out_channels)* and is
    /// initialized from *U(-k, k)* where `k = (1. / fan_in).sqrt()`.
    ///
    /// # Errors
    ///
    /// Fails when [`Conv2dConfig::params`] does.
    pub fn new(config: Conv2dConfig) -> Result<Self> {
        let params = config.params()?;
        let weight = crate::zeros((
            config.out_channels,
            config.in_channels,
            config.kernel_size,
            config.kernel_size,
        ))
        .requires_grad();
        let bias = config
            .bias
            .then(|| crate::zeros(config.out_channels).requires_grad());

        let conv = Self {
            weight,
            bias,
            config,
            params,
        };
        conv.reset_parameters();

        Ok(conv)
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    /// Computes a 2-dimensional convolution *(cross correlation)*.
    ///
    /// The **input** must be of shape *(N, Cin, H, W)*
    /// * **N** is the batch size
    /// * **Cin** is the number of input channels
    /// * **H** is the **height** of the input
    /// * **W** is the **width** of the input
    ///
    /// The resulting output shape will be *(N, Cout, Hout, Wout)*.
    ///
    /// `input` can be either a [`Var`](crate::Var) or a [`VarDiff`]. A non-differentiable input
    /// is not back-propagated into, only the layer's parameters are.
    ///
    /// # Errors
    ///
    /// Fails when the number of channels of `input` differs from `in_channels` or when the
    /// kernel does not fit the padded input.
    pub fn forward<I>(&self, input: I) -> Result<VarDiff<Ix4>>
    where
        I: Convolve<VarDiff<Ix4>, Bias = VarDiff<Ix1>, Output = VarDiff<Ix4>>,
    {
        input.convolve(self.weight.clone(), self.bias.clone(), self.params)
    }
}

impl Initialize for Conv2d {
    fn reset_parameters(&self) {
        init::kaiming_uniform(&self.weight, 5f32.sqrt());

        if let Some(bias) = &self.bias {
            let (fan_in, _) = init::calculate_fan_in_fan_out(&self.weight);
            let bound = 1. / fan_in.sqrt();
            init::uniform(bias, -bound, bound);
        }
    }
}

impl Register for Conv2d {
    fn register_params(&self, params: &mut Vec<Param>) {
        params.push(self.weight.param());
        if let Some(bias) = &self.bias {
            params.push(bias.param());
        }
    }
}

impl Display for Conv2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conv2d({})", self.config)
    }
}
