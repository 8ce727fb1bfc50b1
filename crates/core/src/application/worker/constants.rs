// Worker constants (No magic values)
use std::time::Duration;

/// How often the worker checks for due rollups (1s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Attempts of a version-conditioned write before reporting a transient error
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Base backoff between conflict retries, multiplied by the attempt number (20ms)
pub const DEFAULT_CONFLICT_BACKOFF: Duration = Duration::from_millis(20);
