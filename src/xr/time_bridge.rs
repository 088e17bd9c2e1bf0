use tracing::{debug, info, warn};

use super::error::XrError;
use super::runtime::{ClockSource, XrRuntime};
use super::types::RuntimeTime;

/// Converts host monotonic time into runtime time
///
/// The platform conversion is resolved once in [`TimeBridge::resolve`]. A
/// failed read is returned to the caller; no substitute time is produced.
pub struct TimeBridge {
    source: Box<dyn ClockSource>,
    last: Option<RuntimeTime>,
    reads: u64,
}

impl TimeBridge {
    /// Resolves the runtime's clock conversion. Failure here is fatal.
    pub fn resolve(runtime: &dyn XrRuntime) -> Result<Self, XrError> {
        let source = runtime.clock_source()?;
        info!("Time bridge resolved using {}", source.name());
        Ok(Self::from_source(source))
    }

    pub fn from_source(source: Box<dyn ClockSource>) -> Self {
        Self {
            source,
            last: None,
            reads: 0,
        }
    }

    pub fn now(&mut self) -> Result<RuntimeTime, XrError> {
        let time = self.source.read()?;
        self.reads += 1;

        if let Some(last) = self.last {
            if time < last {
                warn!(
                    "Runtime clock went backwards: {} ns after {} ns",
                    time.as_nanos(),
                    last.as_nanos()
                );
            }
        }
        debug!("Runtime time {} ns", time.as_nanos());
        self.last = Some(time);
        Ok(time)
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn last(&self) -> Option<RuntimeTime> {
        self.last
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xr::mock::SteppingClock;

    #[test]
    fn steady_clock_yields_non_decreasing_times() {
        let mut bridge = TimeBridge::from_source(Box::new(SteppingClock::new(1_000, 16_000_000)));

        let times: Vec<RuntimeTime> = (0..5).map(|_| bridge.now().unwrap()).collect();

        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(times[0], RuntimeTime::from_nanos(1_000));
        assert_eq!(bridge.reads(), 5);
        assert_eq!(bridge.last(), Some(times[4]));
    }

    #[test]
    fn conversion_failure_is_surfaced() {
        let mut clock = SteppingClock::new(0, 10);
        clock.fail_after(2);
        let mut bridge = TimeBridge::from_source(Box::new(clock));

        assert!(bridge.now().is_ok());
        assert!(bridge.now().is_ok());
        let err = bridge.now().unwrap_err();

        assert!(matches!(err, XrError::TimeConversion(_)));
        assert_eq!(bridge.reads(), 2);
    }
}
