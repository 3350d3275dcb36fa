use std::{cell::RefCell, rc::Rc};

use itertools::Itertools;
use ndarray::{Array, Axis, DimMax, Dimension};

/// Shorthand for `Rc<RefCell<T>>`.
pub(crate) type Shared<T> = Rc<RefCell<T>>;
/// A broadcasted ndarray's dimension.
pub(crate) type Broadcast<D, E> = <D as DimMax<E>>::Output;

/// Computes the shape resulting from broadcasting `left` against `right`.
///
/// # Panics
///
/// If the two shapes are not broadcast-compatible.
pub(crate) fn cobroadcast<D, E>(left: D, right: E) -> Broadcast<D, E>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    let (bigger, smaller) = if left.ndim() >= right.ndim() {
        (left.slice(), right.slice())
    } else {
        (right.slice(), left.slice())
    };
    let offset = bigger.len() - smaller.len();

    let mut out = Broadcast::<D, E>::zeros(bigger.len());
    for (axis, (out_len, &len)) in out.slice_mut().iter_mut().zip(bigger).enumerate() {
        *out_len = match axis.checked_sub(offset).map(|axis| smaller[axis]) {
            Some(other) if other == len || other == 1 => len,
            Some(other) if len == 1 => other,
            Some(other) => panic!(
                "the shapes {:?} and {:?} cannot be broadcast together ({} vs {})",
                bigger, smaller, len, other
            ),
            None => len,
        };
    }

    out
}

/// Creates a zeroed array shaped as the broadcast of `left` and `right`.
pub(crate) fn cobroadcasted_zeros<D, E>(
    left: &Array<f32, D>,
    right: &Array<f32, E>,
) -> Array<f32, Broadcast<D, E>>
where
    D: Dimension + DimMax<E>,
    E: Dimension,
{
    Array::zeros(cobroadcast(left.raw_dim(), right.raw_dim()))
}

/// Accumulates `source` into `target`, summing over the axes along which `target` was
/// broadcast.
pub(crate) fn accumulate<D, E>(target: &mut Array<f32, D>, source: &Array<f32, E>)
where
    D: Dimension,
    E: Dimension,
{
    debug_assert!(target.ndim() <= source.ndim());

    if source.shape() == target.shape() {
        *target += source;
        return;
    }

    let mut reduced = source.view().into_dyn().to_owned();
    while reduced.ndim() > target.ndim() {
        reduced = reduced.sum_axis(Axis(0));
    }
    let stretched = target
        .shape()
        .iter()
        .zip(reduced.shape())
        .positions(|(&len, &other)| len == 1 && other != 1)
        .collect::<Vec<_>>();
    for axis in stretched {
        reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
    }

    *target += &reduced;
}

#[cfg(test)]
pub(crate) const F16_EPSILON: f32 = 4.88e-04;

#[cfg(test)]
pub(crate) fn new_shared<T>(item: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(item))
}

#[cfg(test)]
pub(crate) fn are_similar<D: Dimension>(
    result: std::cell::Ref<Array<f32, D>>,
    expected: &Array<f32, D>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !result.abs_diff_eq(expected, F16_EPSILON) {
        return Err(format!("Result: {} | Expected: {}", result, expected).into());
    }

    Ok(())
}
