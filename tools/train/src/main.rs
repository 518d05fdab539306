//! Train a classifier head on top of a frozen pretrained backbone.
//!
//! Reads `train`, `valid` and `test` image folders, fits the head, reports
//! test accuracy and writes a checkpoint.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use transfer_core::{resolve_device, setup_cli_logging, Device, TrainingConfig};
use transfer_training::{run, Console, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(version)]
#[command(about = "Transfer-learning trainer for image folders", long_about = None)]
struct Args {
    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory with train/, valid/ and test/
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Backbone: vgg19, densenet121 or alexnet
    #[arg(short, long)]
    arch: Option<String>,

    /// Checkpoint file (or an existing directory to write checkpoint.json into)
    #[arg(short, long)]
    save_dir: Option<PathBuf>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Width of the first hidden layer
    #[arg(long)]
    hidden_units: Option<usize>,

    #[arg(short, long)]
    epochs: Option<usize>,

    /// Train on the GPU when one is available
    #[arg(long, default_value = "false")]
    gpu: bool,

    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Optimizer steps between validation passes
    #[arg(long)]
    print_every: Option<usize>,

    /// Crop size fed to the backbone
    #[arg(long)]
    image_size: Option<u32>,

    /// Shorter-side resize before the evaluation crop
    #[arg(long)]
    resize: Option<u32>,

    /// Directory with pretrained `<arch>.mpk` backbone records
    #[arg(long)]
    weights_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Hide the per-epoch progress bar
    #[arg(long, default_value = "false")]
    no_progress: bool,

    /// Validate and print the configuration, then exit
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

/// Merge the configuration file (or defaults) with command-line overrides.
fn build_config(args: &Args) -> transfer_core::Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::from_file(path)?,
        None => TrainingConfig::default(),
    };

    if let Some(arch) = &args.arch {
        config.set_architecture(arch)?;
    }
    if let Some(dir) = &args.data_dir {
        config.data.data_dir = dir.clone();
    }
    if let Some(path) = &args.save_dir {
        config.output.checkpoint_path = if path.is_dir() {
            path.join("checkpoint.json")
        } else {
            path.clone()
        };
    }
    if let Some(lr) = args.learning_rate {
        config.training.learning_rate = lr;
    }
    if let Some(units) = args.hidden_units {
        config.model.hidden_units = units;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.data.batch_size = batch_size;
    }
    if let Some(print_every) = args.print_every {
        config.training.print_every = print_every;
    }
    if let Some(size) = args.image_size {
        config.data.image_size = size;
    }
    if let Some(size) = args.resize {
        config.data.resize_size = size;
    }
    if let Some(dir) = &args.weights_dir {
        config.model.weights_dir = Some(dir.clone());
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if args.gpu {
        config.device.use_gpu = true;
    }
    if args.no_progress {
        config.training.show_progress = false;
    }

    config.validate()?;
    Ok(config)
}

fn print_config_summary(config: &TrainingConfig, device: Device) {
    println!("{}", "Transfer learning run".bold());
    println!("  Data:          {}", config.data.data_dir.display());
    println!("  Architecture:  {}", config.model.architecture);
    println!("  Hidden widths: {:?}", config.model.hidden_widths());
    println!("  Dropout:       {}", config.model.dropout);
    println!("  Epochs:        {}", config.training.epochs);
    println!("  Learning rate: {}", config.training.learning_rate);
    println!("  Batch size:    {}", config.data.batch_size);
    println!("  Print every:   {}", config.training.print_every);
    println!("  Device:        {}", device);
    println!("  Checkpoint:    {}", config.output.checkpoint_path.display());
    println!();
}

fn train_on_cpu(config: &TrainingConfig) -> transfer_core::Result<RunSummary> {
    let mut console = Console::stdout();
    run::<Autodiff<NdArray>, _>(config, &NdArrayDevice::Cpu, &mut console)
}

#[cfg(feature = "cuda")]
fn train_on_gpu(config: &TrainingConfig, index: usize) -> transfer_core::Result<RunSummary> {
    let mut console = Console::stdout();
    let device = burn_cuda::CudaDevice::new(index);
    run::<Autodiff<burn_cuda::Cuda>, _>(config, &device, &mut console)
}

#[cfg(not(feature = "cuda"))]
fn train_on_gpu(config: &TrainingConfig, _index: usize) -> transfer_core::Result<RunSummary> {
    train_on_cpu(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config = build_config(&args).context("Invalid configuration")?;
    let device = resolve_device(config.device.use_gpu, cfg!(feature = "cuda"));
    print_config_summary(&config, device);

    if args.dry_run {
        println!("{}", "Dry run: configuration is valid".green());
        return Ok(());
    }

    let summary = match device {
        Device::Cpu => train_on_cpu(&config),
        Device::Gpu(index) => train_on_gpu(&config, index),
    }
    .context("Training failed")?;

    info!(
        "Finished {} epochs ({} steps), test accuracy {}%, checkpoint {}",
        summary.state.epoch,
        summary.state.steps,
        summary.test.percent(),
        summary.checkpoint_path.display()
    );
    Ok(())
}
