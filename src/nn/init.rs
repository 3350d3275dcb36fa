//! Layers' parameters initialization functions.
//!
//! These initializers define a way to set the initial random weights of patchwork's layers.
//!
//! # Using an initializer
//!
//! You can freely access any learnable component of any layer, as their visibility is public,
//! and pass them, via a reference, to the initialization function of your choice.
//!
//! ```
//! use patchwork::nn::{self, init::{calculate_gain, kaiming_normal}, Conv2dConfig};
//!
//! let conv = nn::Conv2d::new(Conv2dConfig::new(3, 8, 3)).unwrap();
//!
//! kaiming_normal(&conv.weight, 0.);
//! assert!(calculate_gain("relu") > 1.);
//! ```
use ndarray::Dimension;
use rand::thread_rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::VarDiff;

/// Returns the recommended gain value for the given non-linearity function.
///
/// Supported non-linearities are:
/// * linear
/// * sigmoid
/// * tanh
/// * relu
/// * leaky_relu
///
/// # Arguments
///
/// `non_linearity` - a non-linearity function's name.
///
/// # Panics
///
/// If `non_linearity` is not among those listed above.
pub fn calculate_gain(non_linearity: &str) -> f32 {
    match non_linearity {
        "linear" | "sigmoid" => 1.0,
        "tanh" => 5.0 / 3.0,
        "relu" => 2.0_f32.sqrt(),
        "leaky_relu" => leaky_relu_gain(0.01),
        _ => panic!("error: unsupported nonlinearity: {}", non_linearity),
    }
}

fn leaky_relu_gain(negative_slope: f32) -> f32 {
    (2.0 / (1.0 + negative_slope.powi(2))).sqrt()
}

/// Returns the *fan_in* and the *fan_out*.
///
/// For *MLPs* *fan_in* and *fan_out* are respectively the number of inputs and outputs to an
/// hidden unit of the layer. For *CNNs* however, the number of input feature maps and the size
/// of the receptive field must be taken into account.
///
/// # Arguments
///
/// `param` - differentiable variable for which the *fan in* and the *fan out* must be
/// calculated.
///
/// # Panics
///
/// If `param` has fewer than two dimensions.
pub fn calculate_fan_in_fan_out<D>(param: &VarDiff<D>) -> (f32, f32)
where
    D: 'static + Dimension,
{
    let data = param.data();
    let shape = data.shape();
    assert!(
        shape.len() >= 2,
        "error: fan in and fan out can not be computed for a variable with fewer than 2 dimensions."
    );

    let receptive_field_size: usize = shape[2..].iter().product();
    let fan_in = (shape[1] * receptive_field_size) as f32;
    let fan_out = (shape[0] * receptive_field_size) as f32;

    (fan_in, fan_out)
}

/// Fills the differentiable leaf variable with a constant value.
pub fn constant<D>(param: &VarDiff<D>, value: f32)
where
    D: 'static + Dimension,
{
    param.data_mut().fill(value);
}

/// Fills the differentiable leaf variable with zeros.
pub fn zeros<D>(param: &VarDiff<D>)
where
    D: 'static + Dimension,
{
    constant(param, 0.);
}

/// Fills the differentiable leaf variable with ones.
pub fn ones<D>(param: &VarDiff<D>)
where
    D: 'static + Dimension,
{
    constant(param, 1.);
}

/// Fills the differentiable leaf variable with elements drawn from the uniform distribution
/// *U(low, high)*.
///
/// # Arguments
///
/// * `param` - differentiable variable to initialize.
///
/// * `low` - lower bound of the uniform distribution.
///
/// * `high` - upper bound of the uniform distribution.
///
/// # Panics
///
/// If `low` >= `high`.
pub fn uniform<D>(param: &VarDiff<D>, low: f32, high: f32)
where
    D: 'static + Dimension,
{
    let unif_dstr = Uniform::new(low, high);
    let mut t_rng = thread_rng();
    param
        .data_mut()
        .map_inplace(|el| *el = unif_dstr.sample(&mut t_rng));
}

/// Fills the differentiable leaf variable with elements drawn from the normal distribution
/// *N(mean, std^2)*.
///
/// # Panics
///
/// If `std` is negative or not finite.
pub fn normal<D>(param: &VarDiff<D>, mean: f32, std: f32)
where
    D: 'static + Dimension,
{
    let norm_dstr = match Normal::new(mean, std) {
        Ok(distr) => distr,
        Err(_) => panic!("error: invalid standard deviation: {}", std),
    };
    let mut t_rng = thread_rng();
    param
        .data_mut()
        .map_inplace(|el| *el = norm_dstr.sample(&mut t_rng));
}

/// Fills the differentiable leaf variable with values according to the method described in
/// [Delving deep into rectifiers: Surpassing human-level performance on ImageNet
/// classification](https://arxiv.org/abs/1502.01852) - He, K. et al. (2015), using a uniform
/// distribution *U(-bound, bound)* where *bound = gain · √(3 / fan_in)*.
///
/// # Arguments
///
/// * `param` - differentiable variable to initialize.
///
/// * `negative_slope` - negative slope of the leaky rectifier following this layer, `0.` for
/// a plain ReLU.
pub fn kaiming_uniform<D>(param: &VarDiff<D>, negative_slope: f32)
where
    D: 'static + Dimension,
{
    let (fan_in, _) = calculate_fan_in_fan_out(param);
    let bound = leaky_relu_gain(negative_slope) * (3. / fan_in).sqrt();

    uniform(param, -bound, bound);
}

/// Fills the differentiable leaf variable with values according to the method described in
/// [Delving deep into rectifiers: Surpassing human-level performance on ImageNet
/// classification](https://arxiv.org/abs/1502.01852) - He, K. et al. (2015), using a normal
/// distribution *N(0, std²)* where *std = gain / √fan_in*.
///
/// Also known as **He initialization**.
pub fn kaiming_normal<D>(param: &VarDiff<D>, negative_slope: f32)
where
    D: 'static + Dimension,
{
    let (fan_in, _) = calculate_fan_in_fan_out(param);
    let std = leaky_relu_gain(negative_slope) / fan_in.sqrt();

    normal(param, 0., std);
}
