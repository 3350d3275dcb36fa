use thiserror::Error;

/// Failures reported by the convolution primitives and by the layers built on them.
///
/// Every variant describes a violated precondition; no partial output is ever produced
/// alongside one of these.
#[derive(Debug, Error)]
pub enum ConvError {
    #[error("kernel size must be positive")]
    EmptyKernel,

    #[error("kernel must be square, got {height}x{width}")]
    NonSquareKernel { height: usize, width: usize },

    #[error("kernel has size {found} but the convolution was configured for {expected}")]
    KernelMismatch { expected: usize, found: usize },

    #[error("input has {input} channels but the kernel expects {kernel}")]
    ChannelMismatch { input: usize, kernel: usize },

    #[error("bias has length {bias} but the kernel has {out_channels} output channels")]
    BiasMismatch { bias: usize, out_channels: usize },

    #[error("stride must be a positive integer, got {0}")]
    InvalidStride(usize),

    #[error(
        "kernel of size {kernel_size} does not fit the padded input of size \
         {padded_height}x{padded_width}"
    )]
    KernelTooLarge {
        kernel_size: usize,
        padded_height: usize,
        padded_width: usize,
    },

    #[error("patch matrix of shape {found:?} does not match the expected layout {expected:?}")]
    ColumnsShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("gradient of shape {found:?} does not match the forward output shape {expected:?}")]
    GradientShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{name} = {value} is not supported, only {name} = 1 is")]
    Unsupported { name: &'static str, value: usize },

    #[error("attack radius must be a non-negative number, got {0}")]
    InvalidRadius(f32),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, ConvError>;
