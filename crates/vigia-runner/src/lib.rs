//! Drives one forward pass: load a model, validate the input vector against
//! the declared signature, run a single inference call, hand back the named
//! outputs. The model handle lives only for the duration of the call and is
//! released on every exit path.

use std::path::Path;

use anyhow::anyhow;
use tracing::debug;
use vigia_core::{
    Backend, BackendModel, DType, Device, Error, IOName, ModelArtifact, Result, Shape, Tensor,
};

pub fn run_once<B: Backend>(
    backend: &B,
    model_path: &Path,
    device: Device,
    input_values: &[f32],
) -> Result<Vec<(IOName, Tensor)>> {
    let artifact = ModelArtifact::OnnxPath(model_path.to_path_buf());

    debug!(backend = backend.name(), model = %model_path.display(), "loading model");
    let mut model = backend.load(&artifact, device)?;

    let spec = model.spec();
    if spec.inputs.len() != 1 {
        return Err(Error::Inference(anyhow!(
            "model declares {} inputs; exactly one is supported",
            spec.inputs.len()
        )));
    }
    let input_spec = &spec.inputs[0];
    if input_spec.dtype != DType::F32 {
        return Err(Error::Inference(anyhow!(
            "model input `{}` expects {} elements; only f32 is supported",
            input_spec.name.0,
            input_spec.dtype
        )));
    }
    if let Some(expected) = input_spec.feature_width() {
        if expected != input_values.len() {
            return Err(Error::ShapeMismatch {
                expected,
                got: input_values.len(),
            });
        }
    }

    let name = input_spec.name.clone();
    let tensor = Tensor::from_f32(Shape::from_slice(&[1, input_values.len()]), input_values);

    debug!(input = %name.0, features = input_values.len(), "running inference");
    model.infer(vec![(name, tensor)])
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::anyhow;
    use vigia_core::{ModelSpec, TensorSpec};

    use super::*;

    /// Backend double that records how many model handles are alive and how
    /// many inference calls ran, so release and short-circuit behavior are
    /// observable.
    struct StubBackend {
        width: usize,
        fail_load: bool,
        live_models: Arc<AtomicUsize>,
        infer_calls: Arc<AtomicUsize>,
    }

    impl StubBackend {
        fn new(width: usize) -> Self {
            Self {
                width,
                fail_load: false,
                live_models: Arc::new(AtomicUsize::new(0)),
                infer_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(width: usize) -> Self {
            Self {
                fail_load: true,
                ..Self::new(width)
            }
        }
    }

    struct StubModel {
        spec: ModelSpec,
        live_models: Arc<AtomicUsize>,
        infer_calls: Arc<AtomicUsize>,
    }

    impl Drop for StubModel {
        fn drop(&mut self) {
            self.live_models.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Backend for StubBackend {
        type Model = StubModel;

        fn name(&self) -> &'static str {
            "stub"
        }

        fn load(&self, artifact: &ModelArtifact, _device: Device) -> Result<Self::Model> {
            if self.fail_load {
                let ModelArtifact::OnnxPath(path) = artifact;
                return Err(Error::ModelLoad {
                    path: path.clone(),
                    source: anyhow!("stub load failure"),
                });
            }

            self.live_models.fetch_add(1, Ordering::SeqCst);
            let spec = ModelSpec {
                inputs: vec![TensorSpec {
                    name: IOName("float_input".to_string()),
                    dtype: DType::F32,
                    rank: 2,
                    dims: vec![None, Some(self.width)],
                }],
                outputs: vec![TensorSpec {
                    name: IOName("output".to_string()),
                    dtype: DType::F32,
                    rank: 2,
                    dims: vec![None, Some(1)],
                }],
            };
            Ok(StubModel {
                spec,
                live_models: self.live_models.clone(),
                infer_calls: self.infer_calls.clone(),
            })
        }
    }

    impl BackendModel for StubModel {
        fn spec(&self) -> &ModelSpec {
            &self.spec
        }

        fn infer(&mut self, inputs: Vec<(IOName, Tensor)>) -> Result<Vec<(IOName, Tensor)>> {
            self.infer_calls.fetch_add(1, Ordering::SeqCst);
            let (_, input) = &inputs[0];
            let values = input.f32_values().map_err(Error::Inference)?;
            let sum: f32 = values.iter().sum();
            Ok(vec![(
                IOName("output".to_string()),
                Tensor::from_f32(Shape::from_slice(&[1, 1]), &[sum]),
            )])
        }
    }

    fn model_path() -> PathBuf {
        PathBuf::from("model.onnx")
    }

    #[test]
    fn matching_width_yields_declared_output_signature() {
        let backend = StubBackend::new(3);
        let outputs =
            run_once(&backend, &model_path(), Device::Cpu, &[0.1, 0.9, 0.4]).expect("run");

        assert_eq!(outputs.len(), 1);
        let (name, tensor) = &outputs[0];
        assert_eq!(name.0, "output");
        assert_eq!(tensor.desc.shape, Shape::from_slice(&[1, 1]));
        assert_eq!(tensor.f32_values().unwrap().len(), 1);
    }

    #[test]
    fn mismatched_width_fails_before_inference() {
        let backend = StubBackend::new(3);
        let err = run_once(&backend, &model_path(), Device::Cpu, &[0.1, 0.9]).unwrap_err();

        assert!(
            matches!(err, Error::ShapeMismatch { expected: 3, got: 2 }),
            "got: {err}"
        );
        assert_eq!(backend.infer_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn load_failure_short_circuits() {
        let backend = StubBackend::failing(3);
        let err = run_once(&backend, &model_path(), Device::Cpu, &[0.1, 0.9, 0.4]).unwrap_err();

        assert!(matches!(err, Error::ModelLoad { .. }), "got: {err}");
        assert_eq!(backend.infer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.live_models.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn model_is_released_on_success_and_on_failure() {
        let backend = StubBackend::new(3);

        run_once(&backend, &model_path(), Device::Cpu, &[0.1, 0.9, 0.4]).expect("run");
        assert_eq!(backend.live_models.load(Ordering::SeqCst), 0);

        run_once(&backend, &model_path(), Device::Cpu, &[0.1]).unwrap_err();
        assert_eq!(backend.live_models.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let backend = StubBackend::new(3);
        let input = [0.1, 0.9, 0.4];

        let first = run_once(&backend, &model_path(), Device::Cpu, &input).expect("first run");
        let second = run_once(&backend, &model_path(), Device::Cpu, &input).expect("second run");

        assert_eq!(first.len(), second.len());
        for ((n1, t1), (n2, t2)) in first.iter().zip(second.iter()) {
            assert_eq!(n1, n2);
            assert_eq!(t1.f32_values().unwrap(), t2.f32_values().unwrap());
        }
    }

    #[test]
    fn dynamic_width_skips_validation() {
        // Wraps the stub to erase the static feature width, as sklearn
        // exporters sometimes do.
        struct DynBackend(StubBackend);
        impl Backend for DynBackend {
            type Model = StubModel;
            fn name(&self) -> &'static str {
                "stub-dyn"
            }
            fn load(&self, artifact: &ModelArtifact, device: Device) -> Result<Self::Model> {
                let mut model = self.0.load(artifact, device)?;
                model.spec.inputs[0].dims = vec![None, None];
                Ok(model)
            }
        }

        let backend = DynBackend(StubBackend::new(3));
        let outputs = run_once(&backend, &model_path(), Device::Cpu, &[0.5, 0.5]).expect("run");
        assert_eq!(outputs.len(), 1);
    }
}
