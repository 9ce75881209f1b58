use crate::{Device, IOName, ModelArtifact, ModelSpec, Result, Tensor};

pub trait Backend: Send + Sync + 'static {
    type Model: BackendModel;

    fn name(&self) -> &'static str;
    fn load(&self, artifact: &ModelArtifact, device: Device) -> Result<Self::Model>;
}

pub trait BackendModel: Send + 'static {
    fn spec(&self) -> &ModelSpec;

    /// One synchronous inference call: named inputs in, named outputs out,
    /// in the model's declared output order.
    fn infer(&mut self, inputs: Vec<(IOName, Tensor)>) -> Result<Vec<(IOName, Tensor)>>;
}
