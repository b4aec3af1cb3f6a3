//! Configuration and limits for WebSocket client connections.

use std::time::Duration;

/// Size bounds applied to what the server sends, and to outgoing messages.
///
/// | field | default |
/// |-------|---------|
/// | `max_frame_size` | 16 MiB |
/// | `max_message_size` | 64 MiB |
/// | `max_fragment_count` | 128 |
/// | `max_handshake_size` | 8 KiB |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Largest payload length an incoming frame header may declare. Checked
    /// before any payload byte is buffered.
    pub max_frame_size: usize,

    /// Largest reassembled message, incoming or outgoing.
    pub max_message_size: usize,

    /// Most frames one incoming message may be split into.
    pub max_fragment_count: usize,

    /// Largest HTTP response head accepted during the opening handshake.
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(16 << 20, 64 << 20, 128, 8 << 10)
    }
}

impl Limits {
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Tight bounds for memory-constrained clients: 64 KiB frames, 256 KiB
    /// messages, 16 fragments and a 4 KiB response head.
    #[must_use]
    pub const fn embedded() -> Self {
        Self::new(64 << 10, 256 << 10, 16, 4 << 10)
    }

    /// Loose bounds for servers you control: 1 GiB frames and 4 GiB
    /// messages, both capped at `usize::MAX` on 32-bit targets.
    #[must_use]
    pub const fn unrestricted() -> Self {
        const fn clamp(bytes: u64) -> usize {
            if bytes > usize::MAX as u64 {
                usize::MAX
            } else {
                bytes as usize
            }
        }
        Self::new(clamp(1 << 30), clamp(4 << 30), 1024, 64 << 10)
    }

    /// # Errors
    ///
    /// [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) past
    /// `max_message_size`.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Takes the header's declared length as-is, so a 64-bit length is
    /// rejected without truncation.
    ///
    /// # Errors
    ///
    /// [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) past
    /// `max_frame_size`.
    pub const fn check_frame_size(&self, declared: u64) -> Result<(), crate::Error> {
        if declared > self.max_frame_size as u64 {
            Err(crate::Error::FrameTooLarge {
                size: declared,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// [`Error::TooManyFragments`](crate::Error::TooManyFragments) past
    /// `max_fragment_count`.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) when
    /// the buffered response head passes `max_handshake_size`.
    pub const fn check_handshake_size(&self, buffered: usize) -> Result<(), crate::Error> {
        if buffered > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size: buffered,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration for the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time for transport connect plus the opening handshake.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,

    /// How long the closing handshake waits for the peer's close frame
    /// before the connection is forced `Closed`.
    ///
    /// Default: 5 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            close: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(handshake: Duration, close: Duration) -> Self {
        Self { handshake, close }
    }
}

/// Everything a [`Client`](crate::Client) needs besides its target.
///
/// Built with the `with_*` methods from [`Config::default`]:
///
/// | field | default |
/// |-------|---------|
/// | `max_frame_size` | 16 KiB |
/// | `read_buffer_size` / `write_buffer_size` | 8 KiB |
/// | `receive_queue_capacity` | 64 |
/// | `ping_interval` | off |
/// | `pong_timeout` | 30 s |
#[derive(Debug, Clone)]
pub struct Config {
    pub limits: Limits,

    /// Outgoing messages longer than this go out as a data frame followed
    /// by continuation frames.
    pub max_frame_size: usize,

    /// Initial capacity of the inbound frame buffer.
    pub read_buffer_size: usize,

    /// Initial capacity of the buffer each outgoing frame is encoded into.
    pub write_buffer_size: usize,

    /// Complete messages waiting for `receive()`. While the queue is full the
    /// dispatcher stops reading, which pushes back on the server.
    pub receive_queue_capacity: usize,

    pub timeouts: Timeouts,

    /// Keepalive ping period while open.
    pub ping_interval: Option<Duration>,

    /// Silence allowed after a keepalive ping before the connection counts
    /// as lost.
    pub pong_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            max_frame_size: 16 << 10,
            read_buffer_size: 8 << 10,
            write_buffer_size: 8 << 10,
            receive_queue_capacity: 64,
            timeouts: Timeouts::default(),
            ping_interval: None,
            pong_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Zero is raised to 1.
    #[must_use]
    pub const fn with_receive_queue_capacity(mut self, capacity: usize) -> Self {
        self.receive_queue_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Shorthand for replacing `timeouts.close` only.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Turn on keepalive pings every `interval`.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }
}
