use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result as AnyResult};
use bytes::Bytes;
use ort::{
    session::{builder::SessionBuilder, Session, SessionInputValue},
    tensor::TensorElementType,
    value::{DynValue, ValueType},
};
use tracing::warn;
use vigia_core::{
    Backend, BackendModel, DType, Device, Error, IOName, ModelArtifact, ModelSpec, Result, Shape,
    Tensor, TensorSpec,
};

pub struct OrtBackend;

impl OrtBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OrtModel {
    spec: ModelSpec,
    session: Session,
}

impl Backend for OrtBackend {
    type Model = OrtModel;

    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn load(&self, artifact: &ModelArtifact, device: Device) -> Result<Self::Model> {
        let ModelArtifact::OnnxPath(path) = artifact;

        let builder = session_builder(path)?;
        let builder = configure_device(builder, device)?;

        let session = builder
            .commit_from_file(path)
            .map_err(|e| Error::ModelLoad {
                path: path.clone(),
                source: anyhow!(e).context("failed to load ONNX model"),
            })?;

        let spec = build_model_spec(&session).map_err(|source| Error::ModelLoad {
            path: path.clone(),
            source,
        })?;

        Ok(OrtModel { spec, session })
    }
}

impl BackendModel for OrtModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, inputs: Vec<(IOName, Tensor)>) -> Result<Vec<(IOName, Tensor)>> {
        let mut ort_inputs = Vec::with_capacity(inputs.len());
        for (name, input) in inputs {
            let value = tensor_to_ort_value(input).map_err(Error::Inference)?;
            ort_inputs.push((name.0, SessionInputValue::from(value)));
        }

        let outputs = self
            .session
            .run(ort_inputs)
            .map_err(|e| Error::Inference(anyhow!(e)))?;

        let mut named = Vec::with_capacity(outputs.len());
        for (name, value) in outputs.iter() {
            let ValueType::Tensor { .. } = value.dtype() else {
                // sklearn exporters emit ZipMap sequences next to the label tensor.
                warn!(output = %name, "skipping non-tensor output");
                continue;
            };
            let tensor = ort_value_to_tensor(&value).map_err(Error::Inference)?;
            named.push((IOName(name.to_string()), tensor));
        }

        Ok(named)
    }
}

fn session_builder(path: &Path) -> Result<SessionBuilder> {
    Session::builder()
        .and_then(|builder| {
            builder.with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
        })
        .map_err(|e| Error::ModelLoad {
            path: path.to_path_buf(),
            source: anyhow!(e).context("failed to configure ORT session builder"),
        })
}

fn configure_device(builder: SessionBuilder, device: Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda { device_id } => configure_cuda(builder, device_id),
    }
}

#[cfg(feature = "cuda")]
fn configure_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    use ort::execution_providers::cuda::CUDAExecutionProvider;

    let ep = CUDAExecutionProvider::default()
        .with_device_id(device_id as i32)
        .build();
    builder
        .with_execution_providers([ep])
        .map_err(|e| Error::ProviderUnavailable {
            provider: "cuda".to_string(),
            detail: e.to_string(),
        })
}

#[cfg(not(feature = "cuda"))]
fn configure_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    let _ = (builder, device_id);
    Err(Error::ProviderUnavailable {
        provider: "cuda".to_string(),
        detail: "built without the `cuda` feature".to_string(),
    })
}

fn build_model_spec(session: &Session) -> AnyResult<ModelSpec> {
    let inputs = session
        .inputs
        .iter()
        .map(|input| tensor_spec_from_value_type(&input.name, &input.input_type))
        .collect::<AnyResult<Vec<_>>>()?;

    let outputs = session
        .outputs
        .iter()
        .map(|output| tensor_spec_from_value_type(&output.name, &output.output_type))
        .collect::<AnyResult<Vec<_>>>()?;

    Ok(ModelSpec { inputs, outputs })
}

fn tensor_spec_from_value_type(name: &str, value_type: &ValueType) -> AnyResult<TensorSpec> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        // Tolerated on outputs at inference time; signatures still record
        // tensors only, so a non-tensor input is a hard error.
        bail!("unsupported non-tensor IO value type for `{name}`");
    };

    let dtype = ort_tensor_element_to_dtype(*ty)?;
    let dims = shape
        .iter()
        .map(|d| if *d < 0 { None } else { Some(*d as usize) })
        .collect::<Vec<_>>();

    Ok(TensorSpec {
        name: IOName(name.to_string()),
        dtype,
        rank: shape.len(),
        dims,
    })
}

fn ort_tensor_element_to_dtype(ty: TensorElementType) -> AnyResult<DType> {
    match ty {
        TensorElementType::Float32 => Ok(DType::F32),
        TensorElementType::Int64 => Ok(DType::I64),
        TensorElementType::Int32 => Ok(DType::I32),
        TensorElementType::Uint8 => Ok(DType::U8),
        _ => bail!("unsupported tensor element type: {ty}"),
    }
}

fn tensor_to_ort_value(tensor: Tensor) -> AnyResult<DynValue> {
    let shape: Vec<usize> = tensor.desc.shape.0.iter().copied().collect();
    let expected_bytes = tensor.desc.shape.numel() * tensor.desc.dtype.byte_size();
    ensure!(
        tensor.data.len() == expected_bytes,
        "input byte size mismatch: got {}, expected {}",
        tensor.data.len(),
        expected_bytes
    );

    let value = match tensor.desc.dtype {
        DType::F32 => {
            let data = bytes_to_f32(&tensor.data)?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::I64 => {
            let data = bytes_to_i64(&tensor.data)?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::I32 => {
            let data = bytes_to_i32(&tensor.data)?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::U8 => {
            let data = tensor.data.to_vec();
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
    };

    Ok(value)
}

fn ort_value_to_tensor(value: &ort::value::ValueRef<'_>) -> AnyResult<Tensor> {
    let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
        bail!("non-tensor outputs are not supported");
    };

    let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
    let out_shape = Shape::from_slice(&dims);

    match *ty {
        TensorElementType::Float32 => {
            let array = value.try_extract_array::<f32>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Ok(Tensor::from_cpu_bytes(
                DType::F32,
                out_shape,
                bytes_from_slice(slice),
            ))
        }
        TensorElementType::Int64 => {
            let array = value.try_extract_array::<i64>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Ok(Tensor::from_cpu_bytes(
                DType::I64,
                out_shape,
                bytes_from_slice(slice),
            ))
        }
        TensorElementType::Int32 => {
            let array = value.try_extract_array::<i32>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Ok(Tensor::from_cpu_bytes(
                DType::I32,
                out_shape,
                bytes_from_slice(slice),
            ))
        }
        TensorElementType::Uint8 => {
            let array = value.try_extract_array::<u8>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Ok(Tensor::from_cpu_bytes(
                DType::U8,
                out_shape,
                Bytes::copy_from_slice(slice),
            ))
        }
        _ => bail!("unsupported output tensor element type: {ty}"),
    }
}

#[allow(clippy::manual_is_multiple_of)]
fn bytes_to_f32(bytes: &Bytes) -> AnyResult<Vec<f32>> {
    ensure!(bytes.len() % 4 == 0, "f32 input has invalid byte length");
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[allow(clippy::manual_is_multiple_of)]
fn bytes_to_i64(bytes: &Bytes) -> AnyResult<Vec<i64>> {
    ensure!(bytes.len() % 8 == 0, "i64 input has invalid byte length");
    Ok(bytes
        .chunks_exact(8)
        .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

#[allow(clippy::manual_is_multiple_of)]
fn bytes_to_i32(bytes: &Bytes) -> AnyResult<Vec<i32>> {
    ensure!(bytes.len() % 4 == 0, "i32 input has invalid byte length");
    Ok(bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn bytes_from_slice<T>(slice: &[T]) -> Bytes {
    let byte_len = std::mem::size_of_val(slice);
    let ptr = slice.as_ptr().cast::<u8>();
    let bytes = unsafe { std::slice::from_raw_parts(ptr, byte_len) };
    Bytes::copy_from_slice(bytes)
}
