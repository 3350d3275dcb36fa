mod addition;
mod avg_pool;
mod convolution;
mod dropout;
mod logsoftmax;
mod matrix_matrix_mul_t;
mod nll;
mod relu;

pub(crate) use addition::*;
pub(crate) use avg_pool::*;
pub(crate) use convolution::*;
pub(crate) use dropout::*;
pub(crate) use logsoftmax::*;
pub(crate) use matrix_matrix_mul_t::*;
pub(crate) use nll::*;
pub(crate) use relu::*;

/// Computes the data of a node from the data of its operands.
pub(crate) trait Forward {
    fn forward(&self);
}

/// Pushes the gradient of a node into the gradients of its operands.
///
/// Implementors skip every operand whose gradient does not require to be computed.
pub(crate) trait Backward {
    fn backward(&self);
}
