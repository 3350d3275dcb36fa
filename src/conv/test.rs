use super::{backward, fold, forward, overlap_counts, unfold, ConvError, ConvParams, NeedsGrad};
use ndarray::{array, Array, Array1, Array4, ArrayView1, ArrayView4, Axis, Dimension};
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use std::error::Error;

const EPSILON: f32 = 1e-4;

fn check<D: Dimension>(result: &Array<f32, D>, expected: &Array<f32, D>) -> Result<(), Box<dyn Error>> {
    if !result.abs_diff_eq(expected, EPSILON) {
        return Err(format!("Result: {} | Expected: {}", result, expected).into());
    }

    Ok(())
}

/// Textbook convolution with explicit bounds checks in place of padding.
fn reference(
    input: ArrayView4<f32>,
    weight: ArrayView4<f32>,
    bias: Option<ArrayView1<f32>>,
    stride: usize,
    padding: usize,
) -> Array4<f32> {
    let (batch, channels, height, width) = input.dim();
    let (out_channels, _, kernel, _) = weight.dim();
    let out_height = (height + 2 * padding - kernel) / stride + 1;
    let out_width = (width + 2 * padding - kernel) / stride + 1;

    let mut output = Array4::zeros((batch, out_channels, out_height, out_width));
    for ((n, o, oh, ow), value) in output.indexed_iter_mut() {
        let mut acc = bias.as_ref().map_or(0., |bias| bias[o]);
        for c in 0..channels {
            for ki in 0..kernel {
                for kj in 0..kernel {
                    let ih = (oh * stride + ki) as isize - padding as isize;
                    let iw = (ow * stride + kj) as isize - padding as isize;
                    if ih < 0 || iw < 0 || ih >= height as isize || iw >= width as isize {
                        continue;
                    }
                    acc += input[[n, c, ih as usize, iw as usize]] * weight[[o, c, ki, kj]];
                }
            }
        }
        *value = acc;
    }

    output
}

fn hand_input() -> Array4<f32> {
    Array::range(0., 16., 1.).into_shape((1, 1, 4, 4)).unwrap()
}

fn hand_weight() -> Array4<f32> {
    array![[[1., 2.], [3., 4.]]].insert_axis(Axis(0))
}

mod params {
    use super::*;

    #[test]
    fn output_size() -> Result<(), Box<dyn Error>> {
        assert_eq!(ConvParams::new(3, 1, 1)?.output_size(5, 7)?, (5, 7));
        assert_eq!(ConvParams::new(3, 2, 0)?.output_size(7, 8)?, (3, 3));
        assert_eq!(ConvParams::new(2, 3, 1)?.output_size(4, 4)?, (2, 2));
        assert_eq!(ConvParams::new(4, 1, 0)?.output_size(4, 4)?, (1, 1));

        Ok(())
    }

    #[test]
    fn zero_stride() {
        assert!(matches!(
            ConvParams::new(3, 0, 0),
            Err(ConvError::InvalidStride(0))
        ));
    }

    #[test]
    fn zero_kernel() {
        assert!(matches!(ConvParams::new(0, 1, 0), Err(ConvError::EmptyKernel)));
    }

    #[test]
    fn kernel_too_large() -> Result<(), Box<dyn Error>> {
        let params = ConvParams::new(5, 1, 0)?;
        assert!(matches!(
            params.output_size(4, 6),
            Err(ConvError::KernelTooLarge {
                kernel_size: 5,
                padded_height: 4,
                padded_width: 6
            })
        ));
        // The same kernel fits once padded.
        assert_eq!(ConvParams::new(5, 1, 1)?.output_size(4, 6)?, (2, 4));

        Ok(())
    }
}

mod patches {
    use super::*;

    #[test]
    fn unfold_layout() -> Result<(), Box<dyn Error>> {
        let input = hand_input();
        let columns = unfold(&input, &ConvParams::new(2, 2, 0)?)?;

        let expected = array![[
            [0., 2., 8., 10.],
            [1., 3., 9., 11.],
            [4., 6., 12., 14.],
            [5., 7., 13., 15.]
        ]];
        check(&columns, &expected)
    }

    #[test]
    fn unfold_padding_reads_zero() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::ones((1, 1, 2, 2));
        let columns = unfold(&input, &ConvParams::new(3, 1, 1)?)?;

        // Every window of a 2x2 input padded by one sees exactly four real values.
        assert_eq!(columns.shape(), &[1, 9, 4]);
        check(&columns.sum_axis(ndarray::Axis(1)), &array![[4., 4., 4., 4.]])?;
        // The top-left corner of the first window lies in the padding.
        assert_eq!(columns[[0, 0, 0]], 0.);
        assert_eq!(input, Array4::<f32>::ones((1, 1, 2, 2)));

        Ok(())
    }

    #[test]
    fn channel_major_rows() -> Result<(), Box<dyn Error>> {
        let mut input = Array4::<f32>::zeros((1, 2, 2, 2));
        input.slice_mut(ndarray::s![0, 1, .., ..]).fill(1.);
        let columns = unfold(&input, &ConvParams::new(2, 1, 0)?)?;

        check(
            &columns,
            &array![[[0.], [0.], [0.], [0.], [1.], [1.], [1.], [1.]]],
        )
    }

    #[test]
    fn fold_without_overlap_is_identity() -> Result<(), Box<dyn Error>> {
        let input = Array::random((2, 3, 6, 6), Uniform::new(-1f32, 1f32));

        for params in [ConvParams::new(2, 2, 0)?, ConvParams::new(3, 3, 0)?, ConvParams::new(2, 3, 0)?] {
            let columns = unfold(&input, &params)?;
            let folded = fold(&columns, &params, (6, 6))?;
            // Positions no window reaches are dropped.
            let counts = overlap_counts(&params, (6, 6))?;
            check(&folded, &(&input * &counts))?;
        }

        Ok(())
    }

    #[test]
    fn fold_with_overlap_scales_by_multiplicity() -> Result<(), Box<dyn Error>> {
        let input = Array::random((2, 2, 5, 4), Uniform::new(-1f32, 1f32));
        let params = ConvParams::new(3, 1, 1)?;

        let folded = fold(&unfold(&input, &params)?, &params, (5, 4))?;
        let counts = overlap_counts(&params, (5, 4))?;

        assert_eq!(counts[[0, 0]], 4.);
        assert_eq!(counts[[2, 2]], 9.);
        check(&folded, &(&input * &counts))
    }

    #[test]
    fn overlap_counts_hand() -> Result<(), Box<dyn Error>> {
        let counts = overlap_counts(&ConvParams::new(2, 1, 0)?, (4, 4))?;

        check(
            &counts,
            &array![
                [1., 2., 2., 1.],
                [2., 4., 4., 2.],
                [2., 4., 4., 2.],
                [1., 2., 2., 1.]
            ],
        )
    }

    #[test]
    fn fold_rejects_mismatched_columns() -> Result<(), Box<dyn Error>> {
        let params = ConvParams::new(2, 1, 0)?;
        let columns = ndarray::Array3::<f32>::zeros((1, 5, 9));

        assert!(matches!(
            fold(&columns, &params, (4, 4)),
            Err(ConvError::ColumnsShape { .. })
        ));

        Ok(())
    }

    #[test]
    fn adjoint_identity() -> Result<(), Box<dyn Error>> {
        // <unfold(x), y> == <x, fold(y)> for every x and y.
        let params = ConvParams::new(3, 2, 1)?;
        let x = Array::random((2, 3, 7, 5), Uniform::new(-1f32, 1f32));
        let unfolded = unfold(&x, &params)?;
        let y = Array::random(unfolded.raw_dim(), Uniform::new(-1f32, 1f32));

        let lhs = (&unfolded * &y).sum();
        let rhs = (&x * &fold(&y, &params, (7, 5))?).sum();
        assert!((lhs - rhs).abs() < EPSILON * 10.);

        Ok(())
    }
}

mod forward {
    use super::*;

    #[test]
    fn hand_scenario() -> Result<(), Box<dyn Error>> {
        let (input, weight) = (hand_input(), hand_weight());
        let (output, context) =
            forward(input.view(), weight.view(), None, ConvParams::new(2, 1, 0)?)?;

        check(
            &output,
            &array![[
                [34., 44., 54.],
                [74., 84., 94.],
                [114., 124., 134.]
            ]].insert_axis(Axis(0)),
        )?;
        assert!(!context.has_bias());
        assert_eq!(context.input_size(), (4, 4));
        assert_eq!(context.columns().shape(), &[1, 4, 9]);

        Ok(())
    }

    #[test]
    fn bias_is_broadcast() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::zeros((2, 1, 3, 3));
        let weight = Array4::<f32>::ones((2, 1, 2, 2));
        let bias = array![0.5, -1.];

        let (output, _) = forward(
            input.view(),
            weight.view(),
            Some(bias.view()),
            ConvParams::new(2, 1, 0)?,
        )?;

        let mut expected = Array4::<f32>::zeros((2, 2, 2, 2));
        expected.slice_mut(ndarray::s![.., 0, .., ..]).fill(0.5);
        expected.slice_mut(ndarray::s![.., 1, .., ..]).fill(-1.);
        check(&output, &expected)
    }

    #[test]
    fn matches_reference_unit_stride() -> Result<(), Box<dyn Error>> {
        let input = Array::random((2, 3, 6, 5), Uniform::new(-1f32, 1f32));
        let weight = Array::random((4, 3, 3, 3), Uniform::new(-1f32, 1f32));
        let bias = Array::random(4, Uniform::new(-1f32, 1f32));

        let (output, _) = forward(
            input.view(),
            weight.view(),
            Some(bias.view()),
            ConvParams::new(3, 1, 0)?,
        )?;

        assert_eq!(output.shape(), &[2, 4, 4, 3]);
        check(
            &output,
            &reference(input.view(), weight.view(), Some(bias.view()), 1, 0),
        )
    }

    #[test]
    fn matches_reference_strided_padded() -> Result<(), Box<dyn Error>> {
        let input = Array::random((3, 2, 7, 6), Uniform::new(-1f32, 1f32));
        let weight = Array::random((5, 2, 3, 3), Uniform::new(-1f32, 1f32));

        let (output, _) = forward(input.view(), weight.view(), None, ConvParams::new(3, 2, 2)?)?;

        assert_eq!(output.shape(), &[3, 5, 5, 4]);
        check(&output, &reference(input.view(), weight.view(), None, 2, 2))
    }

    #[test]
    fn output_shape_grid() -> Result<(), Box<dyn Error>> {
        let weight = Array4::<f32>::ones((2, 1, 3, 3));
        for (height, width, stride, padding) in [(3, 3, 1, 0), (5, 8, 2, 1), (9, 4, 3, 2), (4, 4, 4, 1)] {
            let input = Array4::<f32>::ones((2, 1, height, width));
            let (output, _) = forward(
                input.view(),
                weight.view(),
                None,
                ConvParams::new(3, stride, padding)?,
            )?;
            assert_eq!(
                output.shape(),
                &[
                    2,
                    2,
                    (height + 2 * padding - 3) / stride + 1,
                    (width + 2 * padding - 3) / stride + 1
                ]
            );
        }

        Ok(())
    }

    #[test]
    fn non_square_kernel() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::zeros((1, 1, 4, 4));
        let weight = Array4::<f32>::zeros((1, 1, 2, 3));

        assert!(matches!(
            forward(input.view(), weight.view(), None, ConvParams::new(2, 1, 0)?),
            Err(ConvError::NonSquareKernel {
                height: 2,
                width: 3
            })
        ));

        Ok(())
    }

    #[test]
    fn channel_mismatch() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::zeros((1, 3, 4, 4));
        let weight = Array4::<f32>::zeros((1, 2, 2, 2));

        assert!(matches!(
            forward(input.view(), weight.view(), None, ConvParams::new(2, 1, 0)?),
            Err(ConvError::ChannelMismatch {
                input: 3,
                kernel: 2
            })
        ));

        Ok(())
    }

    #[test]
    fn kernel_params_mismatch() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::zeros((1, 1, 4, 4));
        let weight = Array4::<f32>::zeros((1, 1, 2, 2));

        assert!(matches!(
            forward(input.view(), weight.view(), None, ConvParams::new(3, 1, 0)?),
            Err(ConvError::KernelMismatch {
                expected: 3,
                found: 2
            })
        ));

        Ok(())
    }

    #[test]
    fn bias_mismatch() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::zeros((1, 1, 4, 4));
        let weight = Array4::<f32>::zeros((2, 1, 2, 2));
        let bias = Array1::<f32>::zeros(3);

        assert!(matches!(
            forward(
                input.view(),
                weight.view(),
                Some(bias.view()),
                ConvParams::new(2, 1, 0)?
            ),
            Err(ConvError::BiasMismatch {
                bias: 3,
                out_channels: 2
            })
        ));

        Ok(())
    }

    #[test]
    fn kernel_does_not_fit() -> Result<(), Box<dyn Error>> {
        let input = Array4::<f32>::zeros((1, 1, 2, 2));
        let weight = Array4::<f32>::zeros((1, 1, 3, 3));

        assert!(matches!(
            forward(input.view(), weight.view(), None, ConvParams::new(3, 1, 0)?),
            Err(ConvError::KernelTooLarge { .. })
        ));

        Ok(())
    }
}

mod backward {
    use super::*;

    #[test]
    fn hand_scenario() -> Result<(), Box<dyn Error>> {
        let (input, weight, bias) = (hand_input(), hand_weight(), array![0.]);
        let (output, context) = forward(
            input.view(),
            weight.view(),
            Some(bias.view()),
            ConvParams::new(2, 1, 0)?,
        )?;

        let grad_output = Array4::<f32>::ones(output.raw_dim());
        let grads = backward(context, grad_output.view(), NeedsGrad::all())?;

        check(
            &grads.input.ok_or("missing input gradient")?,
            &array![[
                [1., 3., 3., 2.],
                [4., 10., 10., 6.],
                [4., 10., 10., 6.],
                [3., 7., 7., 4.]
            ]].insert_axis(Axis(0)),
        )?;
        check(
            &grads.weight.ok_or("missing weight gradient")?,
            &array![[[45., 54.], [81., 90.]]].insert_axis(Axis(0)),
        )?;
        check(&grads.bias.ok_or("missing bias gradient")?, &array![9.])
    }

    #[test]
    fn skips_unneeded_gradients() -> Result<(), Box<dyn Error>> {
        let (input, weight, bias) = (hand_input(), hand_weight(), array![1.]);
        let params = ConvParams::new(2, 1, 0)?;
        let grad_output = Array4::<f32>::ones((1, 1, 3, 3));

        let (_, context) = forward(input.view(), weight.view(), Some(bias.view()), params)?;
        let grads = backward(context, grad_output.view(), NeedsGrad::none())?;
        assert!(grads.input.is_none() && grads.weight.is_none() && grads.bias.is_none());

        let (_, context) = forward(input.view(), weight.view(), Some(bias.view()), params)?;
        let needs = NeedsGrad {
            weight: true,
            ..NeedsGrad::none()
        };
        let grads = backward(context, grad_output.view(), needs)?;
        assert!(grads.input.is_none() && grads.bias.is_none());
        assert!(grads.weight.is_some());

        Ok(())
    }

    #[test]
    fn no_bias_gradient_without_bias() -> Result<(), Box<dyn Error>> {
        let (input, weight) = (hand_input(), hand_weight());
        let (output, context) =
            forward(input.view(), weight.view(), None, ConvParams::new(2, 1, 0)?)?;

        let grad_output = Array4::<f32>::ones(output.raw_dim());
        let grads = backward(context, grad_output.view(), NeedsGrad::all())?;
        assert!(grads.bias.is_none());

        Ok(())
    }

    #[test]
    fn weight_gradient_sums_over_batch() -> Result<(), Box<dyn Error>> {
        let params = ConvParams::new(3, 2, 1)?;
        let input = Array::random((4, 2, 6, 6), Uniform::new(-1f32, 1f32));
        let weight = Array::random((3, 2, 3, 3), Uniform::new(-1f32, 1f32));
        let grad_output = Array::random((4, 3, 3, 3), Uniform::new(-1f32, 1f32));

        let (_, context) = forward(input.view(), weight.view(), None, params)?;
        let whole = backward(context, grad_output.view(), NeedsGrad::all())?
            .weight
            .ok_or("missing weight gradient")?;

        let mut summed = Array4::<f32>::zeros(weight.raw_dim());
        for n in 0..4 {
            let sample = input.slice(ndarray::s![n..n + 1, .., .., ..]);
            let sample_grad = grad_output.slice(ndarray::s![n..n + 1, .., .., ..]);
            let (_, context) = forward(sample, weight.view(), None, params)?;
            summed += &backward(context, sample_grad, NeedsGrad::all())?
                .weight
                .ok_or("missing weight gradient")?;
        }

        check(&whole, &summed)
    }

    #[test]
    fn gradient_shape_mismatch() -> Result<(), Box<dyn Error>> {
        let (input, weight) = (hand_input(), hand_weight());
        let (_, context) = forward(input.view(), weight.view(), None, ConvParams::new(2, 1, 0)?)?;

        let grad_output = Array4::<f32>::ones((1, 1, 2, 2));
        assert!(matches!(
            backward(context, grad_output.view(), NeedsGrad::all()),
            Err(ConvError::GradientShape { .. })
        ));

        Ok(())
    }
}
