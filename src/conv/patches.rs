use super::ConvParams;
use crate::error::{ConvError, Result};
use itertools::iproduct;
use ndarray::{Array2, Array3, Array4, ArrayBase, Axis, Data, Ix3, Ix4, Zip};

/// Maps an output coordinate and a kernel offset to the input coordinate it reads, or `None`
/// when the read falls into the zero padding.
fn source_index(
    position: usize,
    offset: usize,
    stride: usize,
    padding: usize,
    len: usize,
) -> Option<usize> {
    (position * stride + offset)
        .checked_sub(padding)
        .filter(|&index| index < len)
}

/// Rearranges the sliding windows of `input` into columns.
///
/// The result has shape *(N, C · K · K, L)*, where *L = H_o · W_o*. Column `l` holds the
/// receptive field of output position `l`, enumerated row-major over the output grid. Within
/// a column the entries are ordered channel first, then kernel row, then kernel column.
///
/// Padding is logical: reads that land outside of the input resolve to zero and nothing is
/// ever written around `input`.
///
/// # Errors
///
/// Fails with [`ConvError::KernelTooLarge`] when the kernel does not fit the padded input.
pub fn unfold<S>(input: &ArrayBase<S, Ix4>, params: &ConvParams) -> Result<Array3<f32>>
where
    S: Data<Elem = f32>,
{
    let (batch, channels, height, width) = input.dim();
    let (out_height, out_width) = params.output_size(height, width)?;
    let (kernel, stride, padding) = (params.kernel_size, params.stride, params.padding);

    let mut columns = Array3::zeros((batch, channels * kernel * kernel, out_height * out_width));
    Zip::from(columns.axis_iter_mut(Axis(0)))
        .and(input.axis_iter(Axis(0)))
        .par_for_each(|mut sample_columns, sample| {
            for (channel, ki, kj) in iproduct!(0..channels, 0..kernel, 0..kernel) {
                let mut lane = sample_columns.row_mut((channel * kernel + ki) * kernel + kj);
                for oh in 0..out_height {
                    let ih = match source_index(oh, ki, stride, padding, height) {
                        Some(ih) => ih,
                        None => continue,
                    };
                    for ow in 0..out_width {
                        if let Some(iw) = source_index(ow, kj, stride, padding, width) {
                            lane[oh * out_width + ow] = sample[[channel, ih, iw]];
                        }
                    }
                }
            }
        });

    Ok(columns)
}

/// Scatters a patch matrix back onto a *(N, C, H, W)* grid, summing wherever receptive
/// fields overlap.
///
/// This is the adjoint of [`unfold`]: `fold(unfold(x))` equals `x` scaled, element-wise, by
/// the number of windows covering each position. The number of channels is inferred from the
/// row count of `columns`.
///
/// # Errors
///
/// Fails with [`ConvError::ColumnsShape`] when `columns` does not have the layout [`unfold`]
/// would produce for an input of spatial size `(height, width)`.
pub fn fold<S>(
    columns: &ArrayBase<S, Ix3>,
    params: &ConvParams,
    (height, width): (usize, usize),
) -> Result<Array4<f32>>
where
    S: Data<Elem = f32>,
{
    let (batch, rows, positions) = columns.dim();
    let (out_height, out_width) = params.output_size(height, width)?;
    let (kernel, stride, padding) = (params.kernel_size, params.stride, params.padding);
    let channels = rows / (kernel * kernel);

    if rows % (kernel * kernel) != 0 || positions != out_height * out_width {
        return Err(ConvError::ColumnsShape {
            expected: vec![batch, channels * kernel * kernel, out_height * out_width],
            found: vec![batch, rows, positions],
        });
    }

    let mut output = Array4::zeros((batch, channels, height, width));
    Zip::from(output.axis_iter_mut(Axis(0)))
        .and(columns.axis_iter(Axis(0)))
        .par_for_each(|mut sample, sample_columns| {
            for (channel, ki, kj) in iproduct!(0..channels, 0..kernel, 0..kernel) {
                let lane = sample_columns.row((channel * kernel + ki) * kernel + kj);
                let mut plane = sample.index_axis_mut(Axis(0), channel);
                for oh in 0..out_height {
                    let ih = match source_index(oh, ki, stride, padding, height) {
                        Some(ih) => ih,
                        None => continue,
                    };
                    for ow in 0..out_width {
                        if let Some(iw) = source_index(ow, kj, stride, padding, width) {
                            plane[[ih, iw]] += lane[oh * out_width + ow];
                        }
                    }
                }
            }
        });

    Ok(output)
}

/// Number of windows covering each input position, as a *(H, W)* grid.
///
/// Obtained by folding a patch matrix of ones, so it is exactly the factor by which
/// `fold(unfold(x))` scales `x`.
pub fn overlap_counts(params: &ConvParams, (height, width): (usize, usize)) -> Result<Array2<f32>> {
    let (out_height, out_width) = params.output_size(height, width)?;
    let kernel = params.kernel_size;
    let ones = Array3::<f32>::ones((1, kernel * kernel, out_height * out_width));
    let counts = fold(&ones, params, (height, width))?;
    Ok(counts.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0))
}

