use ndarray::array;

use super::{least_confident, most_confident, EvalGuard, FrozenParameters};
use crate::nn::ModelStatus;

mod labels {
    use super::*;

    #[test]
    fn extremes() {
        let logits = array![[0.1, 2., -1.], [3., 3., 0.5], [-2., -2., -2.]];

        assert_eq!(most_confident(&logits), array![1f32, 0., 0.]);
        assert_eq!(least_confident(&logits), array![2f32, 2., 0.]);
    }

    #[test]
    fn single_class() {
        let logits = array![[4.], [-4.]];

        assert_eq!(most_confident(&logits), array![0f32, 0.]);
        assert_eq!(least_confident(&logits), array![0f32, 0.]);
    }
}

mod guards {
    use super::*;

    #[test]
    fn eval_guard_keeps_inference_mode() {
        let status = ModelStatus::default();
        status.eval();

        drop(EvalGuard::new(&status));
        assert!(!status.is_training());
    }

    #[test]
    fn eval_guard_restores_on_unwind() {
        let status = ModelStatus::default();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = EvalGuard::new(&status);
            panic!("model failure");
        }));

        assert!(result.is_err());
        assert!(status.is_training());
    }

    #[test]
    fn frozen_parameters_restore_their_flags() {
        let trainable = crate::zeros((2, 2)).requires_grad();
        let frozen = crate::zeros(2).requires_grad();
        frozen.set_requires_grad(false);

        {
            let _guard = FrozenParameters::new(vec![trainable.param(), frozen.param()]);
            assert!(!trainable.requires_grad());
            assert!(!frozen.requires_grad());
        }

        assert!(trainable.requires_grad());
        assert!(!frozen.requires_grad());
    }

    #[test]
    fn frozen_parameters_listed_twice() {
        let shared = crate::ones(3).requires_grad();

        {
            let _guard = FrozenParameters::new(vec![shared.param(), shared.param()]);
            assert!(!shared.requires_grad());
        }

        assert!(shared.requires_grad());
    }
}
