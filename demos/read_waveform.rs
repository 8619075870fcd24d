// Waveform reading example
//
// This example reads one channel, either a range of record points or a time window,
// and writes it to a CSV file.

use clap::Parser;
use std::path::PathBuf;
use tekscope_rs::{ConnectionConfig, ReadRequest, TektronixScope};

#[derive(Parser)]
#[command(name = "read_waveform")]
#[command(about = "Read one channel of a Tektronix scope into a CSV file")]
struct Args {
    /// Resource to connect to, e.g. TCPIP::192.168.0.10::4000::SOCKET or /dev/ttyUSB0
    resource: String,

    /// Channel to read (1, "CH1", ...)
    #[arg(short, long, default_value = "CH1")]
    channel: String,

    /// First record point
    #[arg(long, conflicts_with_all = ["t0", "delta_t"])]
    start: Option<u32>,

    /// Last record point
    #[arg(long, conflicts_with_all = ["t0", "delta_t"])]
    stop: Option<u32>,

    /// Window start in seconds relative to the trigger
    #[arg(long, requires = "delta_t", allow_hyphen_values = true)]
    t0: Option<f64>,

    /// Window length in seconds
    #[arg(long, requires = "t0")]
    delta_t: Option<f64>,

    /// Output file
    #[arg(short, long, default_value = "waveform.csv")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut scope = TektronixScope::connect(&args.resource, &ConnectionConfig::default())?;

    let mut request = ReadRequest::new().channel(args.channel.as_str());
    if let (Some(t0), Some(delta_t)) = (args.t0, args.delta_t) {
        request = request.time_window(t0, delta_t);
    }
    if let Some(start) = args.start {
        request = request.data_start(start);
    }
    if let Some(stop) = args.stop {
        request = request.data_stop(stop);
    }

    let waveform = scope.read_data_one_channel(&request)?;
    println!(
        "Read {} points ({}..={}) from {}",
        waveform.len(),
        waveform.window.start,
        waveform.window.stop,
        args.channel
    );

    let (min, max) = waveform
        .y
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    println!("Min: {:.4} V, Max: {:.4} V", min, max);

    waveform.write_csv(&args.output)?;
    println!("Saved to {}", args.output.display());

    Ok(())
}
