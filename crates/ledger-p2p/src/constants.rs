use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on one message, whichever framing is used.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;
pub const READ_CHUNK: usize = 8192;
pub const EVENT_CAPACITY: usize = 64;
