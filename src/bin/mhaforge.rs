use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use mhaforge::{
    init_logging_default, reference_forward, Accumulator, Element, ExecutionMode, LayerWeights,
    MhaConfig, MultiHeadAttention, NumericKind,
};

#[derive(Parser, Debug)]
#[command(name = "mhaforge", version)]
#[command(about = "Run and inspect statically-shaped multi-head attention layers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a layer configuration and print its derived sizes
    CheckConfig {
        /// JSON configuration file
        config: PathBuf,
    },
    /// Run a layer on random weights and inputs
    Run {
        /// JSON configuration file
        #[arg(long)]
        config: PathBuf,
        /// Override the configured schedule
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Seed for the generated weights and inputs
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of timed invocations
        #[arg(long, default_value_t = 1)]
        iterations: usize,
        /// Compare the output against the f64 reference forward pass
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Parallel,
    Streaming,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Parallel => ExecutionMode::FullyParallel,
            ModeArg::Streaming => ExecutionMode::Streaming,
        }
    }
}

struct RunArgs {
    seed: u64,
    iterations: usize,
    verify: bool,
}

/// Linear congruential generator, values uniform in `[-0.5, 0.5)`
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) - 0.5
    }

    fn fill<T: Element>(&mut self, n: usize) -> Vec<T> {
        (0..n).map(|_| T::from_f64(self.next_f64())).collect()
    }
}

fn main() -> anyhow::Result<()> {
    init_logging_default();
    let cli = Cli::parse();
    match cli.command {
        Commands::CheckConfig { config } => check_config(config),
        Commands::Run {
            config,
            mode,
            seed,
            iterations,
            verify,
        } => {
            let mut config = MhaConfig::from_json_file(&config)?;
            if let Some(mode) = mode {
                config = config.with_mode(mode.into());
            }
            let args = RunArgs {
                seed,
                iterations: iterations.max(1),
                verify,
            };
            dispatch_weight(config, &args)
        }
    }
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = MhaConfig::from_json_file(&path)?;
    let layout = config.layout();
    println!("{}", config.to_json_string()?);
    println!("query/key weight elements: {}", layout.key_weight_len());
    println!("value weight elements:     {}", layout.value_weight_len());
    println!("output weight elements:    {}", layout.output_weight_len());
    println!("source elements:           {}", config.source_len());
    println!("head groups:               {}", config.head_groups());
    println!("workers:                   {}", config.worker_count());
    Ok(())
}

fn dispatch_weight(config: MhaConfig, args: &RunArgs) -> anyhow::Result<()> {
    match config.numeric.weight {
        NumericKind::F16 => dispatch_bias::<half::f16>(config, args),
        NumericKind::Bf16 => dispatch_bias::<half::bf16>(config, args),
        NumericKind::F32 => dispatch_bias::<f32>(config, args),
        NumericKind::F64 => dispatch_bias::<f64>(config, args),
    }
}

fn dispatch_bias<W: Element>(config: MhaConfig, args: &RunArgs) -> anyhow::Result<()> {
    match config.numeric.bias {
        NumericKind::F16 => dispatch_accumulator::<W, half::f16>(config, args),
        NumericKind::Bf16 => dispatch_accumulator::<W, half::bf16>(config, args),
        NumericKind::F32 => dispatch_accumulator::<W, f32>(config, args),
        NumericKind::F64 => dispatch_accumulator::<W, f64>(config, args),
    }
}

fn dispatch_accumulator<W: Element, B: Element>(
    config: MhaConfig,
    args: &RunArgs,
) -> anyhow::Result<()> {
    match config.numeric.accumulator {
        NumericKind::F32 => run_layer::<W, B, f32>(config, args),
        NumericKind::F64 => run_layer::<W, B, f64>(config, args),
        other => anyhow::bail!("{} cannot be used as accumulator", other),
    }
}

fn run_layer<W: Element, B: Element, A: Accumulator>(
    config: MhaConfig,
    args: &RunArgs,
) -> anyhow::Result<()> {
    let layout = config.layout();
    let mut rng = Lcg(args.seed);
    let query_weight: Vec<W> = rng.fill(layout.key_weight_len());
    let query_bias: Vec<B> = rng.fill(layout.key_bias_len());
    let key_weight: Vec<W> = rng.fill(layout.key_weight_len());
    let key_bias: Vec<B> = rng.fill(layout.key_bias_len());
    let value_weight: Vec<W> = rng.fill(layout.value_weight_len());
    let value_bias: Vec<B> = rng.fill(layout.value_bias_len());
    let output_weight: Vec<W> = rng.fill(layout.output_weight_len());
    let output_bias: Vec<B> = rng.fill(layout.output_bias_len());
    let input: Vec<A> = rng.fill(config.source_len());

    let weights = LayerWeights {
        query_weight: &query_weight,
        query_bias: &query_bias,
        key_weight: &key_weight,
        key_bias: &key_bias,
        value_weight: &value_weight,
        value_bias: &value_bias,
        output_weight: &output_weight,
        output_bias: &output_bias,
    };

    let layer = MultiHeadAttention::<W, B, A>::new(config.clone())?;
    println!(
        "heads={} seq_len={} feature_dim={} mode={:?} workers={} softmax={}",
        config.num_heads,
        config.seq_len,
        config.feature_dim,
        config.mode,
        layer.worker_count(),
        layer.softmax_name()
    );

    let mut output = None;
    let start = Instant::now();
    for _ in 0..args.iterations {
        output = Some(layer.forward(&input, &input, &weights)?);
    }
    let elapsed = start.elapsed();
    let output = output.ok_or_else(|| anyhow::anyhow!("no invocation ran"))?;

    let checksum: f64 = output.as_slice().iter().map(|v| v.to_f64()).sum();
    println!(
        "{} iteration(s), {:.3} ms per invocation, output checksum {:.6}",
        args.iterations,
        elapsed.as_secs_f64() * 1e3 / args.iterations as f64,
        checksum
    );

    if args.verify {
        let reference = reference_forward(&config, &input, &input, &weights)?;
        let diff = output.cast::<f64>().max_abs_diff(&reference)?;
        println!("max abs diff vs f64 reference: {:.3e}", diff);
        let tolerance = match A::KIND {
            NumericKind::F64 => 1e-9,
            _ => 1e-3,
        };
        if diff > tolerance {
            anyhow::bail!(
                "output deviates from reference by {:.3e} (tolerance {:.0e})",
                diff,
                tolerance
            );
        }
    }
    Ok(())
}
