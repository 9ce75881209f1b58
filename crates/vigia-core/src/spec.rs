#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub String);

#[derive(Clone, Debug)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: super::DType,
    pub rank: usize,
    pub dims: Vec<Option<usize>>, // None = dynamic
}

impl TensorSpec {
    /// Feature width of a `[batch, features]` input, when declared statically.
    pub fn feature_width(&self) -> Option<usize> {
        self.dims.get(1).copied().flatten()
    }
}

#[derive(Clone, Debug)]
pub struct ModelSpec {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    fn spec(dims: Vec<Option<usize>>) -> TensorSpec {
        TensorSpec {
            name: IOName("float_input".to_string()),
            dtype: DType::F32,
            rank: dims.len(),
            dims,
        }
    }

    #[test]
    fn static_feature_width() {
        assert_eq!(spec(vec![None, Some(3)]).feature_width(), Some(3));
    }

    #[test]
    fn dynamic_feature_width() {
        assert_eq!(spec(vec![None, None]).feature_width(), None);
        assert_eq!(spec(vec![Some(1)]).feature_width(), None);
    }
}
