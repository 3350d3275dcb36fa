//! Variables, differentiable variables and the computational graph they build.
mod gradient;
mod history;
mod node;
mod param;
mod utils;
mod var;
mod vardiff;

pub use param::Param;
pub use var::{Convolve, Var};
pub use vardiff::VarDiff;

/// Specifies the reduction to apply to the per-sample losses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    /// The losses are summed.
    Sum,
    /// The losses are averaged over the batch.
    Mean,
}
