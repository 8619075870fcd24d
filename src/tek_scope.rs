use std::collections::HashMap;

use crate::block;
use crate::commands::{
    channel_count_from_setup, cmds, parse_bool, parse_float, parse_int, parse_setup, reply_value,
    Channel, ChannelRef, Coupling, Identity, Impedance,
};
use crate::config::ConnectionConfig;
use crate::error::{ParseError, ScopeError};
use crate::tek_connector::{ScopeConnector, ConnectorError};
use crate::transport::Transport;
use crate::waveform::{Calibration, ReadRequest, Waveform, Window};

/// What the driver remembers between calls on one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    first_read: bool,
    window: Option<Window>,
    calibration: Option<Calibration>,
    setup: Option<HashMap<String, String>>,
    data_source: Option<Channel>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            first_read: true,
            window: None,
            calibration: None,
            setup: None,
            data_source: None,
        }
    }

    /// True until a waveform read has gone through the full protocol.
    pub fn is_first_read(&self) -> bool {
        self.first_read
    }

    pub fn window(&self) -> Option<Window> {
        self.window
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn data_source(&self) -> Option<Channel> {
        self.data_source
    }

    /// Window and calibration to reuse for a boosted read, if there are any yet.
    fn boosted(&self) -> Option<(Window, Calibration)> {
        if self.first_read {
            return None;
        }
        Some((self.window?, self.calibration?))
    }

    fn invalidate(&mut self) {
        self.window = None;
        self.calibration = None;
    }
}

/// A Tektronix scope behind some [`Transport`].
///
/// All calls block until the scope has answered. The session state makes the driver
/// unsuitable for sharing between threads without external locking.
pub struct TektronixScope<T: Transport = Box<dyn Transport>> {
    transport: T,
    session: SessionState,
}

impl TektronixScope<Box<dyn Transport>> {
    /// Open `resource` (e.g. `TCPIP::192.168.0.10::4000::SOCKET` or `ASRL/dev/ttyUSB0::INSTR`).
    pub fn connect(resource: &str, config: &ConnectionConfig) -> Result<Self, ConnectorError> {
        let transport = ScopeConnector::connect(resource, config)?;
        Ok(Self::new(transport))
    }
}

impl<T: Transport> TektronixScope<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            session: SessionState::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Forget the window and calibration of previous reads, so the next read takes the
    /// full path even when boosted.
    pub fn invalidate_session(&mut self) {
        log::debug!("Invalidating cached window and calibration");
        self.session.invalidate();
    }

    pub fn write(&mut self, command: &str) -> Result<(), ScopeError> {
        Ok(self.transport.write(command)?)
    }

    pub fn ask(&mut self, command: &str) -> Result<String, ScopeError> {
        Ok(self.transport.query(command)?)
    }

    pub fn ask_raw(&mut self, command: &str) -> Result<Vec<u8>, ScopeError> {
        Ok(self.transport.query_binary(command)?)
    }

    fn ask_float(&mut self, command: &str) -> Result<f64, ScopeError> {
        let reply = self.ask(command)?;
        Ok(parse_float(command, &reply)?)
    }

    fn ask_bool(&mut self, command: &str) -> Result<bool, ScopeError> {
        let reply = self.ask(command)?;
        Ok(parse_bool(command, &reply)?)
    }

    /// A 1-based record index.
    fn ask_index(&mut self, command: &str) -> Result<u32, ScopeError> {
        let reply = self.ask(command)?;
        let value = parse_int(command, &reply)?;
        u32::try_from(value).map_err(|_| {
            ParseError::Reply {
                command: command.to_string(),
                reply,
                expected: "record index",
            }
            .into()
        })
    }

    pub fn identify(&mut self) -> Result<Identity, ScopeError> {
        let reply = self.ask(cmds::IDN)?;
        Ok(Identity::parse(&reply)?)
    }

    // Acquisition

    pub fn start_acq(&mut self) -> Result<(), ScopeError> {
        self.write(cmds::ACQ_RUN)
    }

    pub fn stop_acq(&mut self) -> Result<(), ScopeError> {
        self.write(cmds::ACQ_STOP)
    }

    // Horizontal

    pub fn get_horizontal_scale(&mut self) -> Result<f64, ScopeError> {
        self.ask_float(&format!("{}?", cmds::HORIZONTAL_SCALE))
    }

    pub fn set_horizontal_scale(&mut self, seconds_per_division: f64) -> Result<(), ScopeError> {
        self.session.invalidate();
        self.write(&format!(
            "{} {}",
            cmds::HORIZONTAL_SCALE,
            seconds_per_division
        ))
    }

    pub fn get_horizontal_record_length(&mut self) -> Result<u32, ScopeError> {
        self.ask_index(&format!("{}?", cmds::RECORD_LENGTH))
    }

    pub fn set_horizontal_record_length(&mut self, points: u32) -> Result<(), ScopeError> {
        self.session.invalidate();
        self.write(&format!("{} {}", cmds::RECORD_LENGTH, points))
    }

    // Setup

    /// Query the whole setup again and replace the cached copy.
    pub fn load_setup(&mut self) -> Result<&HashMap<String, String>, ScopeError> {
        let reply = self.ask(cmds::SETUP)?;
        let setup = parse_setup(&reply);
        log::debug!("Loaded {} setup entries", setup.len());
        Ok(&*self.session.setup.insert(setup))
    }

    /// The cached setup, loaded on first use or when `force_load` is set.
    pub fn get_setup_dict(
        &mut self,
        force_load: bool,
    ) -> Result<&HashMap<String, String>, ScopeError> {
        if force_load || self.session.setup.is_none() {
            self.load_setup()?;
        }
        Ok(&*self.session.setup.get_or_insert_with(HashMap::new))
    }

    /// Raw value of one setup entry, e.g. `get_setup(":CH1:SCA")`.
    pub fn get_setup(&mut self, name: &str) -> Result<Option<String>, ScopeError> {
        Ok(self.get_setup_dict(false)?.get(name).cloned())
    }

    /// 4 or 2, depending on what the setup reports.
    pub fn channel_count(&mut self) -> Result<u8, ScopeError> {
        let setup = self.get_setup_dict(false)?;
        Ok(channel_count_from_setup(setup.keys()))
    }

    // Vertical

    /// Check a channel reference against the channels of this scope.
    pub fn channel_name(&mut self, channel: impl Into<ChannelRef>) -> Result<Channel, ScopeError> {
        let reference = channel.into();
        let channel_count = self.channel_count()?;
        Channel::resolve(&reference, channel_count)
    }

    pub fn is_channel_selected(
        &mut self,
        channel: impl Into<ChannelRef>,
    ) -> Result<bool, ScopeError> {
        let channel = self.channel_name(channel)?;
        self.ask_bool(&format!("SEL:{channel}?"))
    }

    pub fn get_channel_offset(&mut self, channel: impl Into<ChannelRef>) -> Result<f64, ScopeError> {
        let channel = self.channel_name(channel)?;
        self.ask_float(&format!("{channel}:OFFS?"))
    }

    pub fn get_channel_position(
        &mut self,
        channel: impl Into<ChannelRef>,
    ) -> Result<f64, ScopeError> {
        let channel = self.channel_name(channel)?;
        self.ask_float(&format!("{channel}:POS?"))
    }

    pub fn get_vertical_scale(&mut self, channel: impl Into<ChannelRef>) -> Result<f64, ScopeError> {
        let channel = self.channel_name(channel)?;
        self.ask_float(&format!("{channel}:SCA?"))
    }

    /// Accepts an [`Impedance`], a token such as `"fifty"` or `"MEG"`, or 50, 75 or 1e6 ohms.
    pub fn set_impedance<V>(
        &mut self,
        channel: impl Into<ChannelRef>,
        value: V,
    ) -> Result<(), ScopeError>
    where
        V: TryInto<Impedance>,
        ScopeError: From<V::Error>,
    {
        let impedance = value.try_into()?;
        let channel = self.channel_name(channel)?;
        self.write(&format!("{channel}:IMPedance {}", impedance.as_str()))
    }

    pub fn get_impedance(&mut self, channel: impl Into<ChannelRef>) -> Result<Impedance, ScopeError> {
        let channel = self.channel_name(channel)?;
        let command = format!("{channel}:IMPedance?");
        let reply = self.ask(&command)?;
        reply_value(&reply).parse().map_err(|_| {
            ParseError::Reply {
                command,
                reply,
                expected: "impedance",
            }
            .into()
        })
    }

    /// Accepts a [`Coupling`] or one of `"AC"`, `"DC"`, `"GND"` in any case.
    pub fn set_coupling<V>(
        &mut self,
        channel: impl Into<ChannelRef>,
        value: V,
    ) -> Result<(), ScopeError>
    where
        V: TryInto<Coupling>,
        ScopeError: From<V::Error>,
    {
        let coupling = value.try_into()?;
        let channel = self.channel_name(channel)?;
        self.write(&format!("{channel}:COUPling {}", coupling.as_str()))
    }

    pub fn get_coupling(&mut self, channel: impl Into<ChannelRef>) -> Result<Coupling, ScopeError> {
        let channel = self.channel_name(channel)?;
        let command = format!("{channel}:COUPling?");
        let reply = self.ask(&command)?;
        reply_value(&reply).parse().map_err(|_| {
            ParseError::Reply {
                command,
                reply,
                expected: "coupling",
            }
            .into()
        })
    }

    // Waveform transfer

    pub fn set_data_source(&mut self, channel: impl Into<ChannelRef>) -> Result<Channel, ScopeError> {
        let channel = self.channel_name(channel)?;
        self.write(&format!("{} {}", cmds::DATA_SOURCE, channel))?;
        self.session.data_source = Some(channel);
        Ok(channel)
    }

    pub fn get_data_source(&mut self) -> Result<Channel, ScopeError> {
        let command = format!("{}?", cmds::DATA_SOURCE);
        let reply = self.ask(&command)?;
        let channel_count = self.channel_count()?;
        let channel = Channel::resolve(&reply_value(&reply).into(), channel_count).map_err(|_| {
            ParseError::Reply {
                command,
                reply: reply.clone(),
                expected: "channel",
            }
        })?;
        self.session.data_source = Some(channel);
        Ok(channel)
    }

    /// First record point to transfer; 1 when `None`.
    pub fn set_data_start(&mut self, data_start: Option<u32>) -> Result<(), ScopeError> {
        let data_start = data_start.unwrap_or(1);
        self.session.invalidate();
        self.write(&format!("{} {}", cmds::DATA_START, data_start))
    }

    pub fn get_data_start(&mut self) -> Result<u32, ScopeError> {
        self.ask_index(&format!("{}?", cmds::DATA_START))
    }

    /// Last record point to transfer; the full record length when `None`.
    pub fn set_data_stop(&mut self, data_stop: Option<u32>) -> Result<(), ScopeError> {
        let data_stop = match data_stop {
            Some(data_stop) => data_stop,
            None => self.get_horizontal_record_length()?,
        };
        self.session.invalidate();
        self.write(&format!("{} {}", cmds::DATA_STOP, data_stop))
    }

    pub fn get_data_stop(&mut self) -> Result<u32, ScopeError> {
        self.ask_index(&format!("{}?", cmds::DATA_STOP))
    }

    pub fn get_waveform_x_increment(&mut self) -> Result<f64, ScopeError> {
        self.ask_float(cmds::X_INCREMENT)
    }

    pub fn get_waveform_x_zero(&mut self) -> Result<f64, ScopeError> {
        self.ask_float(cmds::X_ZERO)
    }

    pub fn get_waveform_y_multiplier(&mut self) -> Result<f64, ScopeError> {
        self.ask_float(cmds::Y_MULTIPLIER)
    }

    pub fn get_waveform_y_offset(&mut self) -> Result<f64, ScopeError> {
        self.ask_float(cmds::Y_OFFSET)
    }

    pub fn fetch_calibration(&mut self) -> Result<Calibration, ScopeError> {
        Ok(Calibration {
            y_offset: self.get_waveform_y_offset()?,
            y_multiplier: self.get_waveform_y_multiplier()?,
            x_zero: self.get_waveform_x_zero()?,
            x_increment: self.get_waveform_x_increment()?,
        })
    }

    /// Read the waveform of one channel in volts, optionally with its time axis.
    ///
    /// With [`ReadRequest::booster`] every read after the first one skips the window,
    /// selection, encoding and calibration queries and only switches the data source.
    pub fn read_data_one_channel(&mut self, request: &ReadRequest) -> Result<Waveform, ScopeError> {
        let _span = tracing::debug_span!("read_data_one_channel", booster = request.booster).entered();
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("read_data_one_channel"), 0));

        request.validate()?;

        let boosted = if request.booster {
            let boosted = self.session.boosted();
            if boosted.is_none() {
                log::debug!("Nothing to reuse yet, ignoring booster for this read");
            }
            boosted
        } else {
            None
        };

        let (channel, window, calibration) = match boosted {
            Some((window, calibration)) => {
                let channel = match &request.channel {
                    Some(reference) => Some(self.set_data_source(reference.clone())?),
                    None => self.session.data_source,
                };
                (channel, window, calibration)
            }
            None => {
                let (channel, window, calibration) = self.prepare_transfer(request)?;
                (Some(channel), window, calibration)
            }
        };

        let block = self.ask_raw(cmds::CURVE)?;
        let raw = block::decode_block(&block)?;
        if raw.len() != window.len() {
            log::warn!(
                "Expected {} points for window {}..={} but the scope sent {}",
                window.len(),
                window.start,
                window.stop,
                raw.len()
            );
        }

        let y = calibration.scale(&raw);
        let x = request
            .x_axis_out
            .then(|| calibration.time_axis(window.start, y.len()));
        self.session.first_read = false;

        Ok(Waveform {
            channel,
            window,
            calibration,
            x,
            y,
        })
    }

    /// Everything a read does before `CURVE?` when nothing is reused.
    fn prepare_transfer(
        &mut self,
        request: &ReadRequest,
    ) -> Result<(Channel, Window, Calibration), ScopeError> {
        self.session.invalidate();
        let window = self.resolve_window(request)?;

        let channel = match &request.channel {
            Some(reference) => self.set_data_source(reference.clone())?,
            None => match self.session.data_source {
                Some(channel) => channel,
                None => self.get_data_source()?,
            },
        };

        if !self.is_channel_selected(channel)? {
            return Err(ScopeError::ChannelNotSelected {
                channel: channel.to_string(),
            });
        }

        self.write(cmds::ENCODING_RIB)?;
        self.write(cmds::BYTE_NR_2)?;

        let calibration = self.fetch_calibration()?;
        log::debug!("Calibration for {}: {:?}", channel, calibration);

        self.session.window = Some(window);
        self.session.calibration = Some(calibration);
        Ok((channel, window, calibration))
    }

    fn resolve_window(&mut self, request: &ReadRequest) -> Result<Window, ScopeError> {
        if let Some(time_window) = request.time_window {
            let x_zero = self.get_waveform_x_zero()?;
            let x_increment = self.get_waveform_x_increment()?;
            let window = time_window.to_window(x_zero, x_increment)?;
            log::debug!("{:?} maps to points {}..={}", time_window, window.start, window.stop);
            self.set_data_start(Some(window.start))?;
            self.set_data_stop(Some(window.stop))?;
        } else if request.has_explicit_window() {
            self.set_data_start(request.data_start)?;
            self.set_data_stop(request.data_stop)?;
        }

        Ok(Window::new(self.get_data_start()?, self.get_data_stop()?))
    }
}
