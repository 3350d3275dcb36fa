use std::rc::Rc;

use ndarray::{Array1, Array4, Ix1, Ix4};

use super::{Backward, Forward};
use crate::{
    conv::{self, ConvContext, ConvParams, NeedsGrad},
    variable::{gradient::Gradient, utils::Shared},
};

/// Slot through which a convolution hands its context from forward to backward.
pub(crate) type ContextSlot = Shared<Option<ConvContext>>;

pub(crate) struct Convolution {
    input_data: Shared<Array4<f32>>,
    weight_data: Shared<Array4<f32>>,
    bias_data: Option<Shared<Array1<f32>>>,
    data: Shared<Array4<f32>>,
    params: ConvParams,
    context: Option<ContextSlot>,
}

impl Convolution {
    /// When `context` is `None` the forward context is dropped straight away.
    pub(crate) fn new(
        input_data: Shared<Array4<f32>>,
        weight_data: Shared<Array4<f32>>,
        bias_data: Option<Shared<Array1<f32>>>,
        data: Shared<Array4<f32>>,
        params: ConvParams,
        context: Option<ContextSlot>,
    ) -> Self {
        Self {
            input_data,
            weight_data,
            bias_data,
            data,
            params,
            context,
        }
    }
}

impl Forward for Convolution {
    fn forward(&self) {
        let bias = self.bias_data.as_ref().map(|bias| bias.borrow());
        let result = conv::forward(
            self.input_data.borrow().view(),
            self.weight_data.borrow().view(),
            bias.as_ref().map(|bias| bias.view()),
            self.params,
        );

        let (output, context) = match result {
            Ok(result) => result,
            Err(error) => panic!("convolution forward failed: {}", error),
        };
        *self.data.borrow_mut() = output;
        if let Some(slot) = self.context.as_ref() {
            *slot.borrow_mut() = Some(context);
        }
    }
}

/// Back-propagates through a convolution. A non-differentiable input has no gradient.
pub(crate) struct ConvolutionBackward {
    input_gradient: Option<Rc<Gradient<Ix4>>>,
    weight_gradient: Rc<Gradient<Ix4>>,
    bias_gradient: Option<Rc<Gradient<Ix1>>>,
    gradient: Rc<Gradient<Ix4>>,
    context: ContextSlot,
}

impl ConvolutionBackward {
    pub(crate) fn new(
        input_gradient: Option<Rc<Gradient<Ix4>>>,
        weight_gradient: Rc<Gradient<Ix4>>,
        bias_gradient: Option<Rc<Gradient<Ix1>>>,
        gradient: Rc<Gradient<Ix4>>,
        context: ContextSlot,
    ) -> Self {
        Self {
            input_gradient,
            weight_gradient,
            bias_gradient,
            gradient,
            context,
        }
    }
}

impl Backward for ConvolutionBackward {
    /// # Panics
    ///
    /// If no forward pass left a context behind since the last backward pass.
    fn backward(&self) {
        let needs = NeedsGrad {
            input: self
                .input_gradient
                .as_ref()
                .map_or(false, |gradient| gradient.requires_grad()),
            weight: self.weight_gradient.requires_grad(),
            bias: self
                .bias_gradient
                .as_ref()
                .map_or(false, |gradient| gradient.requires_grad()),
        };

        let context = match self.context.borrow_mut().take() {
            Some(context) => context,
            None => panic!(
                "convolution context already consumed. Perhaps you forgot to call .forward()?"
            ),
        };
        let gradients = match conv::backward(context, self.gradient.borrow().view(), needs) {
            Ok(gradients) => gradients,
            Err(error) => panic!("convolution backward failed: {}", error),
        };

        if let (Some(input), Some(input_gradient)) = (gradients.input, &self.input_gradient) {
            *input_gradient.borrow_mut() += &input;
        }
        if let Some(weight) = gradients.weight {
            *self.weight_gradient.borrow_mut() += &weight;
        }
        if let (Some(bias), Some(bias_gradient)) = (gradients.bias, self.bias_gradient.as_ref()) {
            *bias_gradient.borrow_mut() += &bias;
        }
    }
}

#[cfg(test)]
mod test;
