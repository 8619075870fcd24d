//! # TekScope RS
//!
//! A Rust library for reading waveforms from Tektronix oscilloscopes over SCPI.
//!
//! The driver talks to the scope through a [`Transport`] (serial line or raw TCP socket),
//! configures the waveform transfer, pulls the curve as a binary block and converts it to
//! volts and seconds.
//!
//! ## Features
//!
//! - **Serial and TCP transports**: `serialport` for USB/RS-232 adapters, raw sockets for LAN scopes
//! - **Channel settings**: offset, position, vertical scale, impedance and coupling
//! - **Windowed transfers**: by record index or by time relative to the trigger
//! - **Fast repeated reads**: the booster mode skips all setup queries after the first read
//! - **DataFrame output**: `polars` frames and CSV export of a waveform
//!
//! ## Examples
//!
//! ### Reading a Channel
//!
//! ```rust,no_run
//! use tekscope_rs::{ConnectionConfig, ReadRequest, TektronixScope};
//!
//! let mut scope = TektronixScope::connect(
//!     "TCPIP::192.168.0.10::4000::SOCKET",
//!     &ConnectionConfig::default(),
//! )?;
//!
//! let waveform = scope.read_data_one_channel(&ReadRequest::new().channel(1).x_axis_out(true))?;
//! println!("Captured {} samples", waveform.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Reading a Time Window
//!
//! ```rust,no_run
//! use tekscope_rs::{ConnectionConfig, ReadRequest, TektronixScope};
//!
//! let mut scope = TektronixScope::connect("/dev/ttyUSB0", &ConnectionConfig::default())?;
//!
//! // 2 µs starting 1 µs after the trigger
//! let request = ReadRequest::new().channel("CH2").time_window(1e-6, 2e-6);
//! let df = scope.read_data_one_channel(&request)?.to_lazy_frame()?.collect()?;
//! println!("{}", df);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Channel Settings
//!
//! ```rust,no_run
//! use tekscope_rs::{ConnectionConfig, Coupling, TektronixScope};
//!
//! let mut scope = TektronixScope::connect("10.0.0.2:4000", &ConnectionConfig::default())?;
//!
//! scope.set_impedance(1, 50)?;
//! scope.set_coupling(1, Coupling::Dc)?;
//! println!("CH1: {} V/div", scope.get_vertical_scale(1)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod block;
pub mod commands;
pub mod config;
pub mod error;
pub mod tek_connector;
pub mod tek_scope;
pub mod transport;
pub mod waveform;

// Re-export the main types for convenience
pub use commands::{Channel, ChannelRef, Coupling, Identity, Impedance};

pub use config::ConnectionConfig;

pub use error::{ParseError, ScopeError};

pub use transport::{
    DiscardInput, ScpiStream, SerialTransport, TcpTransport, Transport, TransportError,
};

pub use tek_connector::{ConnectorError, Resource, ScopeConnector};

pub use tek_scope::{SessionState, TektronixScope};

pub use waveform::{Calibration, ReadRequest, TimeWindow, Waveform, Window};
