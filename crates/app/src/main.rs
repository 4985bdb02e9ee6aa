mod pipeline;

use clap::{Parser, ValueEnum};
use crossbeam::channel;
use std::path::PathBuf;

use rf_identity::index::LinearCosineIndex;
use rf_identity::model::RandomProjectionModel;
use rf_identity::resolver::IdentityResolver;
use rf_output::aggregator::{AggregatorConfig, CaptureAggregator};
use rf_output::sink::JsonBatchWriter;
use rf_protocol::iq::TrimWindow;

use pipeline::{DeviceEvent, PipelineConfig};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    /// Resolve each frame to a device label
    Identify,
    /// Buffer decoded frames and persist them in batches
    Capture,
}

#[derive(Parser, Debug)]
#[command(name = "rf-receiver")]
#[command(about = "WiFi transmitter re-identification receiver")]
struct Cli {
    /// UDP port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Processing mode
    #[arg(short, long, default_value = "identify", value_enum)]
    mode: Mode,

    /// Expected preamble length in samples (0 accepts any length)
    #[arg(long, default_value = "320")]
    vector_length: usize,

    /// Fingerprint embedding length
    #[arg(long, default_value = "512")]
    embedding_length: usize,

    /// Spectrogram window width in samples
    #[arg(long, default_value = "80")]
    spec_width: usize,

    /// Enrollment cosine-distance threshold
    #[arg(short, long, default_value = "0.497")]
    threshold: f64,

    /// IQ capture sample rate in Hz
    #[arg(long, default_value = "20000000")]
    sample_rate: f64,

    /// First kept sample of the preamble trim window
    #[arg(long, default_value = "400")]
    trim_start: usize,

    /// Length of the preamble trim window
    #[arg(long, default_value = "320")]
    trim_length: usize,

    /// Disable preamble trimming and keep whole frames
    #[arg(long)]
    no_trim: bool,

    /// Frames accumulated per persisted batch (capture mode)
    #[arg(long, default_value = "1000")]
    batch_frames: usize,

    /// Drop frames whose sample count differs from the fixed length
    #[arg(long)]
    strict_len: bool,

    /// Force the per-frame sample count (0 infers from the first frame)
    #[arg(long, default_value = "0")]
    frame_len: usize,

    /// Keep capturing after each flush instead of exiting
    #[arg(long)]
    rollover: bool,

    /// Directory for persisted capture batches
    #[arg(short, long, default_value = "captures")]
    out_dir: PathBuf,

    /// Seed for the built-in projection embedding backend
    #[arg(long, default_value = "42")]
    model_seed: u64,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.vector_length > 0 && cli.vector_length < 320 {
        eprintln!("vector length must be at least 320 samples (or 0 for any)");
        std::process::exit(1);
    }
    if cli.threshold < 0.0 {
        eprintln!("threshold must be non-negative");
        std::process::exit(1);
    }
    if cli.spec_width == 0 {
        eprintln!("spectrogram window width must be positive");
        std::process::exit(1);
    }

    let trim = if cli.no_trim {
        None
    } else {
        Some(TrimWindow {
            start: cli.trim_start,
            length: cli.trim_length,
        })
    };

    let cfg = PipelineConfig {
        port: cli.port,
        vector_len: cli.vector_length,
        sample_rate: cli.sample_rate,
        spec_width: cli.spec_width,
        threshold: cli.threshold,
        trim,
        batch_frames: cli.batch_frames,
        single_flush: !cli.rollover,
    };

    let result = match cli.mode {
        Mode::Identify => run_identify(&cli, &cfg),
        Mode::Capture => run_capture(&cli, &cfg),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_identify(cli: &Cli, cfg: &PipelineConfig) -> Result<(), String> {
    let model = RandomProjectionModel::new(cli.embedding_length, cli.model_seed)?;
    let index = LinearCosineIndex::new(cli.embedding_length);
    let mut resolver = IdentityResolver::new(Box::new(index));

    // Decision events stream to a separate printer thread; any other
    // presentation layer can take its place on this channel.
    let (tx, rx) = channel::bounded::<DeviceEvent>(64);
    let printer = std::thread::spawn(move || {
        for event in rx.iter() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("failed to encode event: {}", e),
            }
            if event.is_new_device {
                log::info!("NEW DEVICE: label {}", event.label);
            } else {
                log::info!("KNOWN DEVICE: label {}", event.label);
            }
        }
    });

    let result = pipeline::run_identify(cfg, &model, &mut resolver, tx);
    let _ = printer.join();
    result
}

fn run_capture(cli: &Cli, cfg: &PipelineConfig) -> Result<(), String> {
    let mut sink = JsonBatchWriter::new(&cli.out_dir)
        .map_err(|e| format!("failed to open {}: {}", cli.out_dir.display(), e))?;
    let mut aggregator = CaptureAggregator::new(AggregatorConfig {
        frame_len_override: (cli.frame_len > 0).then_some(cli.frame_len),
        strict_len: cli.strict_len,
    });
    pipeline::run_capture(cfg, &mut aggregator, &mut sink)
}
