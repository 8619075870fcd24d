// Fast data reading example
//
// This example reads the selected channels in a loop as fast as possible. After the first
// round only the data source is switched and the curve fetched.

use clap::Parser;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tekscope_rs::{ConnectionConfig, ReadRequest, TektronixScope};

#[derive(Parser)]
#[command(name = "fast_read")]
#[command(about = "High-speed repeated reads from a Tektronix scope")]
#[command(long_about = "Continuously read the given channels using the booster mode, which reuses the window and calibration of the first read. Do not touch the scope's horizontal or vertical settings while this runs.")]
struct Args {
    /// Resource to connect to, e.g. TCPIP::192.168.0.10::4000::SOCKET or /dev/ttyUSB0
    resource: String,

    /// Channels to read in turn
    #[arg(short, long, value_delimiter = ',', default_value = "1")]
    channels: Vec<u8>,

    /// Number of points per read, starting at the first record point
    #[arg(short, long, default_value_t = 1000)]
    points: u32,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
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

    println!("Tektronix Fast Data Reader");
    println!("==========================");
    println!("Channels: {:?}", args.channels);
    println!("Points: {}", args.points);
    println!("Press Ctrl+C to stop\n");

    let mut scope = TektronixScope::connect(&args.resource, &ConnectionConfig::default())?;

    // The first read sets the window; later ones must not touch it or the cache is dropped.
    let first = ReadRequest::new()
        .channel(args.channels.first().copied().unwrap_or(1))
        .window(1, args.points);
    scope.read_data_one_channel(&first)?;

    let mut read_count = 0u64;
    let mut point_count = 0u64;
    let start_time = Instant::now();

    loop {
        for &channel in &args.channels {
            let request = ReadRequest::new().channel(channel).booster(true);
            match scope.read_data_one_channel(&request) {
                Ok(waveform) => {
                    read_count += 1;
                    point_count += waveform.len() as u64;
                }
                Err(e) => {
                    eprintln!("\nError reading CH{}: {}", channel, e);
                    eprintln!("Retrying in 100ms...");
                    scope.invalidate_session();
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        let elapsed = start_time.elapsed().as_secs_f64();
        print!(
            "\r{} reads | {:.1} reads/s | {:.0} pts/s",
            read_count,
            read_count as f64 / elapsed,
            point_count as f64 / elapsed
        );
        io::stdout().flush()?;
    }
}
