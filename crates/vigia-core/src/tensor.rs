use std::fmt;

use anyhow::{ensure, Result};
use bytes::Bytes;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda { device_id: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    F32,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::I64 => 8,
            DType::U8 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::U8 => "u8",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }
}

#[derive(Clone, Debug)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
}

/// A dense CPU tensor: dtype + shape over owned little-endian bytes.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub data: Bytes,
}

impl Tensor {
    pub fn from_cpu_bytes(dtype: DType, shape: Shape, bytes: Bytes) -> Self {
        Self {
            desc: TensorDesc { dtype, shape },
            data: bytes,
        }
    }

    pub fn from_f32(shape: Shape, values: &[f32]) -> Self {
        let mut buf = Vec::with_capacity(values.len() * 4);
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Self::from_cpu_bytes(DType::F32, shape, Bytes::from(buf))
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn f32_values(&self) -> Result<Vec<f32>> {
        ensure!(
            self.desc.dtype == DType::F32,
            "expected f32 tensor, got {}",
            self.desc.dtype
        );
        ensure!(
            self.data.len() % 4 == 0,
            "f32 tensor has invalid byte length"
        );
        Ok(self
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Decodes every element to f64 for reporting, regardless of dtype.
    pub fn scalars(&self) -> Result<Vec<f64>> {
        let elem = self.desc.dtype.byte_size();
        ensure!(
            self.data.len() % elem == 0,
            "{} tensor has invalid byte length {}",
            self.desc.dtype,
            self.data.len()
        );
        let values = match self.desc.dtype {
            DType::F32 => self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            DType::I64 => self
                .data
                .chunks_exact(8)
                .map(|b| {
                    i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64
                })
                .collect(),
            DType::I32 => self
                .data
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            DType::U8 => self.data.iter().map(|b| *b as f64).collect(),
        };
        Ok(values)
    }
}
