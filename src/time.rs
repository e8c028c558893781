//! Wall-clock access used for span and metric timestamps.

use std::time::SystemTime;

/// Returns the current time.
///
/// All timestamps recorded by the runtime go through this function so tests
/// and future platforms have a single seam for time.
pub fn now() -> SystemTime {
    SystemTime::now()
}
