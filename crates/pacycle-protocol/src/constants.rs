use crate::chunk::Tic;

/// Tic carried by messages exchanged before a peer has joined a cycle.
pub const PRE_JOIN_TIC: Tic = -1;

/// Symbolic identity of the coordinator on every link.
pub const COORDINATOR_ID: &str = "AGENT";

/// Name prefix for chunks originated by the coordinator.
pub const COORDINATOR_PREFIX: &str = "Agent-";

/// Leading character of every out-of-band control string.
pub const CONTROL_SENTINEL: u8 = b'!';

/// Frame delimiter. Compact JSON never contains a raw newline.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Largest frame accepted by a channel, delimiter excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Payload key of an ACK or NAK naming the chunk it answers.
pub const ACKED_KEY: &str = "acked";

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_CYCLE_TIMEOUT_MS: u64 = 5_000;

/// Dial attempts before a worker gives up on the coordinator.
pub const CONNECT_RETRIES: u32 = 20;
pub const CONNECT_RETRY_DELAY_MS: u64 = 250;
