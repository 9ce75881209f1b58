use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vigia", version, about = "Single-shot ONNX model inference runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one inference pass and print each prediction
    Run {
        /// Path to the ONNX model file
        #[arg(long)]
        model_path: PathBuf,

        /// Device for inference (cpu or cuda:N)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Comma-separated feature values, e.g. "0.1,0.9,0.4"
        #[arg(long, conflicts_with = "input_file")]
        values: Option<String>,

        /// File containing comma- or whitespace-separated feature values
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,
    },

    /// Print the model's input and output signature
    Inspect {
        /// Path to the ONNX model file
        #[arg(long)]
        model_path: PathBuf,

        /// Device for inference (cpu or cuda:N)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "warn")]
        log: String,
    },
}
