use std::time::Duration;

/// Settings used when opening a connection to a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// How long a reply may stay silent before the read gives up.
    pub timeout: Duration,
    /// Only used by serial connections.
    pub baud_rate: u32,
    /// Appended to every command and expected at the end of every text reply.
    pub terminator: u8,
    /// Whether the scope sends a terminator after a binary block.
    pub binary_terminator: bool,
    /// Check the `*IDN?` reply on connect.
    pub verify_identity: bool,
}

impl ConnectionConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_BAUD_RATE: u32 = 9600;

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_binary_terminator(mut self, binary_terminator: bool) -> Self {
        self.binary_terminator = binary_terminator;
        self
    }

    pub fn with_identity_check(mut self, verify_identity: bool) -> Self {
        self.verify_identity = verify_identity;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            baud_rate: Self::DEFAULT_BAUD_RATE,
            terminator: b'\n',
            binary_terminator: true,
            verify_identity: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = ConnectionConfig::default()
            .with_timeout(Duration::from_millis(250))
            .with_baud_rate(115_200)
            .with_binary_terminator(false);

        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.terminator, b'\n');
        assert!(!config.binary_terminator);
        assert!(config.verify_identity);
    }
}
