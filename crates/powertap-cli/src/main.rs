//! CLI for powertap: live power and utilization for Apple Silicon.

mod commands;
mod tui;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "powertap")]
#[command(about = "powertap: live power and utilization dashboard for Apple Silicon")]
#[command(version = powertap_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Sampling flags shared by every command that runs the sampler.
/// Unset flags keep the value from `--config` (or the built-in default).
#[derive(Args)]
struct SamplingArgs {
    /// Sampling and refresh interval in seconds, float OK [default: 1.0]
    #[arg(long)]
    interval: Option<f64>,

    /// Window for averaged power values in seconds [default: 30]
    #[arg(long)]
    avg: Option<f64>,

    /// Restart powermetrics after this many samples (0 = every 300)
    #[arg(long)]
    max_count: Option<u32>,

    /// nice value for powermetrics, lower is higher priority [default: 10]
    #[arg(long, allow_negative_numbers = true)]
    nice: Option<i32>,

    /// Run powermetrics directly instead of through sudo
    #[arg(long)]
    no_sudo: bool,

    /// JSON config file applied before the flags above
    #[arg(long)]
    config: Option<String>,
}

impl SamplingArgs {
    fn options(&self) -> commands::SamplingOptions<'_> {
        commands::SamplingOptions {
            interval_secs: self.interval,
            avg_secs: self.avg,
            max_count: self.max_count,
            nice: self.nice,
            no_sudo: self.no_sudo,
            config_path: self.config.as_deref(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Live terminal dashboard: CPU/GPU/ANE utilization, RAM and power charts
    Monitor {
        #[command(flatten)]
        sampling: SamplingArgs,

        /// Show per-core gauges
        #[arg(long)]
        show_cores: bool,

        /// Colour scheme (0-8)
        #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(0..=8))]
        color: u8,

        /// Write logs to this file (the dashboard owns the terminal)
        #[arg(long)]
        log_file: Option<String>,
    },

    /// Stream metrics as JSON lines on stdout until Ctrl+C
    Stream {
        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Show detected SoC, core topology, memory and the matched power table
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_stderr_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

fn init_file_logging(path: &str) {
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: cannot open log file {path}: {e}");
            std::process::exit(1);
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            sampling,
            show_cores,
            color,
            log_file,
        } => {
            // Without a log file the dashboard runs with logging off.
            if let Some(path) = log_file.as_deref() {
                init_file_logging(path);
            }
            let config = commands::ingest_config(&sampling.options());
            commands::monitor::run(config, show_cores, color);
        }
        Commands::Stream { sampling } => {
            init_stderr_logging();
            let config = commands::ingest_config(&sampling.options());
            commands::stream::run(config);
        }
        Commands::Info { json } => {
            init_stderr_logging();
            commands::info::run(json);
        }
    }
}
