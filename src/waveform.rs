use polars::prelude::*;
use std::fs::File;
use std::path::Path;

use crate::commands::{Channel, ChannelRef};
use crate::error::ParseError;

const TIME_COLUMN_NAME: &str = "time";
const VOLTAGE_COLUMN_NAME: &str = "voltage";
const ROW_INDEX_COLUMN_NAME: &str = "row_index";

/// Inclusive, 1-based range of record points to transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u32,
    pub stop: u32,
}

impl Window {
    pub fn new(start: u32, stop: u32) -> Self {
        Self { start, stop }
    }

    /// Number of points the scope should send for this window.
    pub fn len(&self) -> usize {
        if self.stop < self.start {
            0
        } else {
            (self.stop - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A slice of the record given in seconds: `[t0, t0 + delta_t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub t0: f64,
    pub delta_t: f64,
}

impl TimeWindow {
    pub fn new(t0: f64, delta_t: f64) -> Self {
        Self { t0, delta_t }
    }

    /// Convert to record indices using the horizontal zero `x_zero` and interval `x_increment`.
    ///
    /// The start is clamped to 1 and the stop to the start.
    pub fn to_window(&self, x_zero: f64, x_increment: f64) -> Result<Window, ParseError> {
        if !(x_increment.is_finite() && x_increment > 0.0) {
            return Err(ParseError::Sampling {
                interval: x_increment,
            });
        }

        let first = ((self.t0 - x_zero) / x_increment).floor() + 1.0;
        let last = ((self.t0 + self.delta_t - x_zero) / x_increment).floor();
        if first < 1.0 {
            log::debug!("Time window starts before the record, clamping to point 1");
        }

        let start = clamp_index(first, 1);
        let stop = clamp_index(last, start);
        Ok(Window::new(start, stop))
    }
}

fn clamp_index(value: f64, min: u32) -> u32 {
    if value.is_nan() || value < f64::from(min) {
        min
    } else if value > f64::from(u32::MAX) {
        u32::MAX
    } else {
        value as u32
    }
}

/// The affine map from raw sample codes to physical units, as reported by `WFMO:`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// `WFMO:YOFf?`, in raw code units.
    pub y_offset: f64,
    /// `WFMO:YMUlt?`, volts per code.
    pub y_multiplier: f64,
    /// `WFMO:XZERO?`, seconds.
    pub x_zero: f64,
    /// `WFMO:XIN?`, seconds per point.
    pub x_increment: f64,
}

impl Calibration {
    pub fn raw_to_voltage(&self, raw: i16) -> f64 {
        (f64::from(raw) - self.y_offset) * self.y_multiplier
    }

    /// Time of record point `index` (1-based).
    pub fn time_of_point(&self, index: u32) -> f64 {
        self.x_zero + f64::from(index.saturating_sub(1)) * self.x_increment
    }

    pub fn scale(&self, raw: &[i16]) -> Vec<f64> {
        raw.iter().map(|&code| self.raw_to_voltage(code)).collect()
    }

    /// Time axis for `len` points starting at record point `start`.
    pub fn time_axis(&self, start: u32, len: usize) -> Vec<f64> {
        let first = f64::from(start.saturating_sub(1));
        (0..len)
            .map(|i| self.x_zero + (first + i as f64) * self.x_increment)
            .collect()
    }
}

/// What to read and how. Built with chained setters:
///
/// ```
/// use tekscope_rs::ReadRequest;
///
/// let request = ReadRequest::new()
///     .channel(2)
///     .time_window(0.0, 1e-6)
///     .x_axis_out(true);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRequest {
    pub channel: Option<ChannelRef>,
    pub data_start: Option<u32>,
    pub data_stop: Option<u32>,
    pub time_window: Option<TimeWindow>,
    pub x_axis_out: bool,
    pub booster: bool,
}

impl ReadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel to read. Without it the current data source is read.
    pub fn channel(mut self, channel: impl Into<ChannelRef>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn data_start(mut self, data_start: u32) -> Self {
        self.data_start = Some(data_start);
        self
    }

    pub fn data_stop(mut self, data_stop: u32) -> Self {
        self.data_stop = Some(data_stop);
        self
    }

    pub fn window(self, data_start: u32, data_stop: u32) -> Self {
        self.data_start(data_start).data_stop(data_stop)
    }

    pub fn time_window(mut self, t0: f64, delta_t: f64) -> Self {
        self.time_window = Some(TimeWindow::new(t0, delta_t));
        self
    }

    /// Also compute the time of every sample.
    pub fn x_axis_out(mut self, x_axis_out: bool) -> Self {
        self.x_axis_out = x_axis_out;
        self
    }

    /// Reuse the window and calibration of the previous read instead of querying them again.
    /// Only the channel is still switched. Any change made on the scope in between goes
    /// unnoticed.
    pub fn booster(mut self, booster: bool) -> Self {
        self.booster = booster;
        self
    }

    pub fn has_explicit_window(&self) -> bool {
        self.data_start.is_some() || self.data_stop.is_some()
    }

    pub fn validate(&self) -> Result<(), crate::ScopeError> {
        if self.time_window.is_some() && self.has_explicit_window() {
            return Err(crate::ScopeError::ConflictingArguments);
        }
        Ok(())
    }
}

/// A calibrated waveform read from one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Source of the data, when it is known.
    pub channel: Option<Channel>,
    pub window: Window,
    pub calibration: Calibration,
    /// Sample times in seconds, present when the read asked for them.
    pub x: Option<Vec<f64>>,
    /// Sample values in volts.
    pub y: Vec<f64>,
}

impl Waveform {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn into_xy(self) -> (Option<Vec<f64>>, Vec<f64>) {
        (self.x, self.y)
    }

    /// Time and voltage columns. The time column is always present.
    pub fn to_lazy_frame(&self) -> PolarsResult<LazyFrame> {
        let df = DataFrame::new(vec![Column::new(
            VOLTAGE_COLUMN_NAME.into(),
            self.y.clone(),
        )])?;

        let first_point = self.window.start.saturating_sub(1) as IdxSize;
        Ok(df
            .lazy()
            .with_row_index(ROW_INDEX_COLUMN_NAME, Some(first_point))
            .with_columns([(lit(self.calibration.x_zero)
                + col(ROW_INDEX_COLUMN_NAME).cast(DataType::Float64)
                    * lit(self.calibration.x_increment))
            .alias(TIME_COLUMN_NAME)])
            .select([col(TIME_COLUMN_NAME), col(VOLTAGE_COLUMN_NAME)]))
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> PolarsResult<()> {
        let mut df = self.to_lazy_frame()?.collect()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> Calibration {
        Calibration {
            y_offset: 0.1,
            y_multiplier: 0.02,
            x_zero: -1.0e-3,
            x_increment: 1.0e-6,
        }
    }

    #[test]
    fn test_scale_matches_affine_map() {
        let y = calibration().scale(&[100, -100]);
        assert_eq!(y, vec![(100.0 - 0.1) * 0.02, (-100.0 - 0.1) * 0.02]);
    }

    #[test]
    fn test_time_axis_starts_at_window_start() {
        let cal = calibration();
        let x = cal.time_axis(11, 3);
        assert_eq!(x.len(), 3);
        assert_eq!(x[0], cal.x_zero + 10.0 * cal.x_increment);
        assert_eq!(x[0], cal.time_of_point(11));
        assert_eq!(x[2], cal.x_zero + 12.0 * cal.x_increment);
    }

    #[test]
    fn test_time_window_conversion() {
        // x0 = 0, dx = 1 ms: [2.5 ms, 2.5 ms + 4 ms) covers points 3..=6
        let window = TimeWindow::new(2.5e-3, 4.0e-3).to_window(0.0, 1.0e-3).unwrap();
        assert_eq!(window, Window::new(3, 6));
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn test_time_window_before_record_is_clamped() {
        let window = TimeWindow::new(-1.0, 0.5).to_window(0.0, 0.1).unwrap();
        assert_eq!(window, Window::new(1, 1));
    }

    #[test]
    fn test_time_window_rejects_bad_interval() {
        let window = TimeWindow::new(0.0, 1.0);
        assert!(matches!(window.to_window(0.0, 0.0), Err(ParseError::Sampling { .. })));
        assert!(matches!(window.to_window(0.0, f64::NAN), Err(ParseError::Sampling { .. })));
    }

    #[test]
    fn test_request_rejects_mixed_windows() {
        let request = ReadRequest::new().data_start(10).time_window(0.0, 1.0);
        assert!(matches!(request.validate(), Err(crate::ScopeError::ConflictingArguments)));

        let request = ReadRequest::new().data_stop(10).time_window(0.0, 1.0);
        assert!(request.validate().is_err());

        assert!(ReadRequest::new().window(1, 10).validate().is_ok());
    }

    #[test]
    fn test_lazy_frame_has_time_and_voltage() {
        let waveform = Waveform {
            channel: None,
            window: Window::new(11, 13),
            calibration: calibration(),
            x: None,
            y: vec![1.0, 2.0, 3.0],
        };

        let df = waveform.to_lazy_frame().unwrap().collect().unwrap();
        assert_eq!(df.height(), 3);
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(names, ["time", "voltage"]);

        let time: Vec<f64> = df
            .column(TIME_COLUMN_NAME)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(time, calibration().time_axis(11, 3));
    }
}
