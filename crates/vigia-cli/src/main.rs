mod cli;

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;
use vigia_backend_ort::OrtBackend;
use vigia_core::{Backend, BackendModel, Device, ModelArtifact, TensorSpec};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            model_path,
            device,
            values,
            input_file,
            log,
        } => {
            init_logging(&log);
            let device = parse_device(&device)?;
            let input = read_input(values.as_deref(), input_file.as_deref())?;

            let backend = OrtBackend::new();
            let outputs = vigia_runner::run_once(&backend, &model_path, device, &input)?;
            tracing::info!(outputs = outputs.len(), "inference complete");

            for (_, tensor) in &outputs {
                for value in tensor.scalars().context("failed to decode output tensor")? {
                    println!("Predicción: {value}");
                }
            }
            Ok(())
        }
        Command::Inspect {
            model_path,
            device,
            log,
        } => {
            init_logging(&log);
            let device = parse_device(&device)?;

            let backend = OrtBackend::new();
            let model = backend.load(&ModelArtifact::OnnxPath(model_path.clone()), device)?;

            println!("model: {}", model_path.display());
            for spec in &model.spec().inputs {
                println!("input   {}", fmt_tensor_spec(spec));
            }
            for spec in &model.spec().outputs {
                println!("output  {}", fmt_tensor_spec(spec));
            }
            Ok(())
        }
    }
}

fn init_logging(log: &str) {
    std::env::set_var("RUST_LOG", log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn parse_device(raw: &str) -> Result<Device> {
    if raw.eq_ignore_ascii_case("cpu") {
        return Ok(Device::Cpu);
    }

    if let Some(rest) = raw.strip_prefix("cuda:") {
        let device_id: u32 = rest.parse().context("invalid cuda device id")?;
        return Ok(Device::Cuda { device_id });
    }

    bail!("unsupported device: {raw} (expected cpu or cuda:N)");
}

fn read_input(values: Option<&str>, input_file: Option<&Path>) -> Result<Vec<f32>> {
    let raw = match (values, input_file) {
        (Some(v), None) => v.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file `{}`", path.display()))?,
        (Some(_), Some(_)) => bail!("pass either --values or --input-file, not both"),
        (None, None) => bail!("one of --values or --input-file is required"),
    };

    let mut input = Vec::new();
    for token in raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let value = token
            .parse::<f32>()
            .with_context(|| format!("invalid feature value `{token}`"))?;
        input.push(value);
    }

    ensure!(!input.is_empty(), "input vector is empty");
    Ok(input)
}

fn fmt_tensor_spec(spec: &TensorSpec) -> String {
    let dims = spec
        .dims
        .iter()
        .map(|d| match d {
            Some(n) => n.to_string(),
            None => "?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}  {}  [{}]", spec.name.0, spec.dtype, dims)
}
