// Basic connection example
//
// This example connects to a scope, prints its identity and the state of every channel.

use clap::Parser;
use tekscope_rs::{ConnectionConfig, TektronixScope};

#[derive(Parser)]
#[command(name = "basic_connection")]
#[command(about = "Connect to a Tektronix scope and print its channel settings")]
struct Args {
    /// Resource to connect to, e.g. TCPIP::192.168.0.10::4000::SOCKET or /dev/ttyUSB0
    resource: String,

    /// Baud rate for serial connections
    #[arg(short, long, default_value_t = ConnectionConfig::DEFAULT_BAUD_RATE)]
    baud_rate: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::init();

    println!("Tektronix Connection Example");
    println!("============================\n");

    println!("1. Connecting to {}...", args.resource);
    let config = ConnectionConfig::default().with_baud_rate(args.baud_rate);
    let mut scope = TektronixScope::connect(&args.resource, &config)?;
    println!("Successfully connected!");

    println!("\n2. Device information:");
    let identity = scope.identify()?;
    println!("  Model:    {}", identity.model);
    println!("  Serial:   {}", identity.serial_number);
    println!("  Firmware: {}", identity.firmware);

    println!("\n3. Horizontal settings:");
    println!("  Scale:         {} s/div", scope.get_horizontal_scale()?);
    println!("  Record length: {} points", scope.get_horizontal_record_length()?);

    let channel_count = scope.channel_count()?;
    println!("\n4. Channels ({}):", channel_count);
    for n in 1..=channel_count {
        let channel = scope.channel_name(n)?;
        if !scope.is_channel_selected(channel)? {
            println!("  {}: off", channel);
            continue;
        }
        println!(
            "  {}: {} V/div, offset {} V, position {} div, {:?} coupling, {} ohm",
            channel,
            scope.get_vertical_scale(channel)?,
            scope.get_channel_offset(channel)?,
            scope.get_channel_position(channel)?,
            scope.get_coupling(channel)?,
            scope.get_impedance(channel)?.ohms()
        );
    }

    println!("\n5. Connection test completed successfully!");

    Ok(())
}
