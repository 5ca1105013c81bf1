//! Server tuning knobs
//!
//! Queue capacities, the inbound frame cap and connection timeouts.

use std::time::Duration;

/// Runtime configuration shared by the Hub, Room Manager and connection handlers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Capacity of each client's outbound queue
    pub outbound_capacity: usize,
    /// Capacity of every command channel (Hub, Room Manager, Rooms)
    pub command_capacity: usize,
    /// Maximum size of one inbound message in bytes
    pub max_message_size: usize,
    /// Inactivity allowed on the read side before disconnecting
    pub read_timeout: Duration,
    /// Deadline for one write to the socket
    pub write_timeout: Duration,
    /// Interval between liveness pings; must be below `read_timeout`
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            command_capacity: 256,
            max_message_size: 512,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(54),
        }
    }
}
