//! Two-dimensional convolution on top of patch matrices.
//!
//! The forward pass unfolds every receptive field of the input into a column, turning the
//! convolution into one matrix product per sample. The backward pass is the transpose of that
//! pipeline: the input gradient is folded back from patch space, the weight gradient is a
//! batch reduction of per-sample outer products and the bias gradient is a plain sum.
//!
//! The functions in this module work on bare [`ndarray`] arrays and know nothing about the
//! autodiff graph. [`forward`] returns a [`ConvContext`] which must be handed, by value, to the
//! matching [`backward`] call.
//!
//! ```
//! use ndarray::{Array, Array4};
//! use patchwork::conv::{self, ConvParams, NeedsGrad};
//!
//! let input = Array::linspace(0., 15., 16).into_shape((1, 1, 4, 4)).unwrap();
//! let weight = Array4::<f32>::ones((1, 1, 2, 2));
//! let params = ConvParams::new(2, 1, 0).unwrap();
//!
//! let (output, context) = conv::forward(input.view(), weight.view(), None, params).unwrap();
//! assert_eq!(output.shape(), &[1, 1, 3, 3]);
//!
//! let grad_output = Array4::<f32>::ones(output.raw_dim());
//! let grads = conv::backward(context, grad_output.view(), NeedsGrad::all()).unwrap();
//! assert!(grads.bias.is_none());
//! ```
mod patches;

#[cfg(test)]
mod test;

pub use patches::{fold, overlap_counts, unfold};

use crate::error::{ConvError, Result};
use ndarray::{
    linalg::general_mat_mul, Array1, Array2, Array3, Array4, ArrayView1, ArrayView4, Axis, Zip,
};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hyper-parameters of a square convolution, shared by both spatial axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct ConvParams {
    pub(crate) kernel_size: usize,
    pub(crate) stride: usize,
    pub(crate) padding: usize,
}

impl ConvParams {
    /// Creates a new set of convolution hyper-parameters.
    ///
    /// # Errors
    ///
    /// Fails if `kernel_size` or `stride` is zero.
    pub fn new(kernel_size: usize, stride: usize, padding: usize) -> Result<Self> {
        let params = Self {
            kernel_size,
            stride,
            padding,
        };
        params.validate()?;

        Ok(params)
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    fn validate(&self) -> Result<()> {
        if self.kernel_size == 0 {
            return Err(ConvError::EmptyKernel);
        }
        if self.stride == 0 {
            return Err(ConvError::InvalidStride(self.stride));
        }

        Ok(())
    }

    /// Computes the spatial size of the output for an input of size `height` x `width`.
    ///
    /// Each side is *⌊(n + 2p − k) / s⌋ + 1*.
    ///
    /// # Errors
    ///
    /// Fails with [`ConvError::KernelTooLarge`] when the kernel does not fit the padded input.
    pub fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        self.validate()?;

        let (padded_height, padded_width) = (height + 2 * self.padding, width + 2 * self.padding);
        if self.kernel_size > padded_height || self.kernel_size > padded_width {
            return Err(ConvError::KernelTooLarge {
                kernel_size: self.kernel_size,
                padded_height,
                padded_width,
            });
        }

        Ok((
            (padded_height - self.kernel_size) / self.stride + 1,
            (padded_width - self.kernel_size) / self.stride + 1,
        ))
    }
}

/// State carried from [`forward`] to the matching [`backward`].
///
/// The weight is stored by value, so a parameter update happening between the two calls can
/// never leak into the input gradient.
#[derive(Clone, Debug)]
pub struct ConvContext {
    params: ConvParams,
    input_size: (usize, usize),
    columns: Array3<f32>,
    weight: Array4<f32>,
    has_bias: bool,
}

impl ConvContext {
    pub fn params(&self) -> ConvParams {
        self.params
    }

    /// Spatial size of the input the context was created from.
    pub fn input_size(&self) -> (usize, usize) {
        self.input_size
    }

    /// The patch matrix extracted during the forward pass.
    pub fn columns(&self) -> &Array3<f32> {
        &self.columns
    }

    pub fn has_bias(&self) -> bool {
        self.has_bias
    }

    /// Shape of the output produced by the forward pass that created this context.
    fn output_shape(&self) -> Result<[usize; 4]> {
        let (height, width) = self.input_size;
        let (out_height, out_width) = self.params.output_size(height, width)?;

        Ok([
            self.columns.len_of(Axis(0)),
            self.weight.len_of(Axis(0)),
            out_height,
            out_width,
        ])
    }
}

/// Which gradients the backward pass has to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeedsGrad {
    pub input: bool,
    pub weight: bool,
    pub bias: bool,
}

impl NeedsGrad {
    pub fn all() -> Self {
        Self {
            input: true,
            weight: true,
            bias: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Output of [`backward`]. A gradient is `None` when it was not requested.
#[derive(Clone, Debug, Default)]
pub struct ConvGradients {
    pub input: Option<Array4<f32>>,
    pub weight: Option<Array4<f32>>,
    pub bias: Option<Array1<f32>>,
}

/// Checks the operands of a convolution and returns the spatial size of its output.
pub(crate) fn check_args(
    input_shape: &[usize],
    weight_shape: &[usize],
    bias_len: Option<usize>,
    params: &ConvParams,
) -> Result<(usize, usize)> {
    let (kernel_height, kernel_width) = (weight_shape[2], weight_shape[3]);
    if kernel_height != kernel_width {
        return Err(ConvError::NonSquareKernel {
            height: kernel_height,
            width: kernel_width,
        });
    }
    if kernel_height != params.kernel_size {
        return Err(ConvError::KernelMismatch {
            expected: params.kernel_size,
            found: kernel_height,
        });
    }
    if input_shape[1] != weight_shape[1] {
        return Err(ConvError::ChannelMismatch {
            input: input_shape[1],
            kernel: weight_shape[1],
        });
    }
    if let Some(bias) = bias_len.filter(|&len| len != weight_shape[0]) {
        return Err(ConvError::BiasMismatch {
            bias,
            out_channels: weight_shape[0],
        });
    }

    params.output_size(input_shape[2], input_shape[3])
}

/// Convolves `input` *(N, C_i, H, W)* with `weight` *(C_o, C_i, K, K)*, optionally adding
/// `bias` *(C_o)* to every output position.
///
/// Returns the *(N, C_o, H_o, W_o)* output together with the context needed by [`backward`].
///
/// # Errors
///
/// Fails if the kernel is not square or does not match `params`, if the channel counts of
/// `input` and `weight` disagree, if the bias length differs from *C_o* or if the kernel does
/// not fit the padded input.
pub fn forward(
    input: ArrayView4<f32>,
    weight: ArrayView4<f32>,
    bias: Option<ArrayView1<f32>>,
    params: ConvParams,
) -> Result<(Array4<f32>, ConvContext)> {
    let (out_height, out_width) = check_args(
        input.shape(),
        weight.shape(),
        bias.as_ref().map(|bias| bias.len()),
        &params,
    )?;
    let (batch, _, height, width) = input.dim();
    let out_channels = weight.len_of(Axis(0));

    let columns = unfold(&input, &params)?;
    let flat_weight = weight.to_shape((out_channels, columns.len_of(Axis(1))))?;

    let mut output = Array3::<f32>::zeros((batch, out_channels, out_height * out_width));
    Zip::from(columns.axis_iter(Axis(0)))
        .and(output.axis_iter_mut(Axis(0)))
        .par_for_each(|sample_columns, mut sample_output| {
            general_mat_mul(1., &flat_weight, &sample_columns, 0., &mut sample_output)
        });

    if let Some(bias) = bias.as_ref() {
        output += &bias.view().insert_axis(Axis(1));
    }
    let output = output.into_shape((batch, out_channels, out_height, out_width))?;

    debug!(
        input = ?input.shape(),
        weight = ?weight.shape(),
        output = ?output.shape(),
        "convolution forward"
    );

    let context = ConvContext {
        params,
        input_size: (height, width),
        columns,
        weight: weight.to_owned(),
        has_bias: bias.is_some(),
    };

    Ok((output, context))
}

/// Propagates `grad_output` back through the convolution that produced `context`.
///
/// Only the gradients flagged in `needs` are computed. The bias gradient is produced only
/// when the forward pass had a bias.
///
/// # Errors
///
/// Fails with [`ConvError::GradientShape`] when `grad_output` does not have the shape of the
/// forward output.
pub fn backward(
    context: ConvContext,
    grad_output: ArrayView4<f32>,
    needs: NeedsGrad,
) -> Result<ConvGradients> {
    let expected = context.output_shape()?;
    if grad_output.shape() != &expected[..] {
        return Err(ConvError::GradientShape {
            expected: expected.to_vec(),
            found: grad_output.shape().to_vec(),
        });
    }

    let ConvContext {
        params,
        input_size,
        columns,
        weight: kernel,
        has_bias,
    } = context;
    let [batch, out_channels, out_height, out_width] = expected;
    let patch_len = columns.len_of(Axis(1));

    debug!(
        grad_output = ?grad_output.shape(),
        input = needs.input,
        weight = needs.weight,
        bias = needs.bias && has_bias,
        "convolution backward"
    );

    let flat_grad = grad_output.to_shape((batch, out_channels, out_height * out_width))?;
    let flat_weight = kernel.to_shape((out_channels, patch_len))?;

    let input = if needs.input {
        let mut input_columns = Array3::<f32>::zeros(columns.raw_dim());
        Zip::from(flat_grad.axis_iter(Axis(0)))
            .and(input_columns.axis_iter_mut(Axis(0)))
            .par_for_each(|sample_grad, mut sample_columns| {
                general_mat_mul(1., &flat_weight.t(), &sample_grad, 0., &mut sample_columns)
            });
        Some(fold(&input_columns, &params, input_size)?)
    } else {
        None
    };

    let weight = if needs.weight {
        let reduced = flat_grad
            .axis_iter(Axis(0))
            .into_par_iter()
            .zip(columns.axis_iter(Axis(0)))
            .map(|(sample_grad, sample_columns)| sample_grad.dot(&sample_columns.t()))
            .reduce(
                || Array2::<f32>::zeros((out_channels, patch_len)),
                |acc, partial| acc + partial,
            );
        Some(reduced.into_shape(kernel.raw_dim())?)
    } else {
        None
    };

    let bias = if needs.bias && has_bias {
        Some(
            grad_output
                .sum_axis(Axis(3))
                .sum_axis(Axis(2))
                .sum_axis(Axis(0)),
        )
    } else {
        None
    };

    Ok(ConvGradients {
        input,
        weight,
        bias,
    })
}
