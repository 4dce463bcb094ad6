use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::series::SeriesKind;
use crate::snapshot::RegistrySnapshot;
use crate::translate::{Translator, TranslatorConfig};
use crate::transport::{Request as _, Transport, TransportError};

/// Clock abstraction supplying the report timestamp.
///
/// Injected rather than read from the wall clock directly so translation stays pure and
/// testable.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall-clock [`Clock`] backed by [`SystemTime`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}

/// Ships registry snapshots to Datadog: translate, then push through the transport.
///
/// The reporter owns no schedule -- the embedding application calls [`report`][Self::report] on
/// its own cadence, typically from one periodic scheduling thread.
pub struct DatadogReporter {
    translator: Translator,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
}

impl DatadogReporter {
    /// Creates a reporter using the wall clock.
    pub fn new(config: TranslatorConfig, transport: Box<dyn Transport>) -> DatadogReporter {
        DatadogReporter::with_clock(config, transport, Box::new(SystemClock))
    }

    /// Creates a reporter with an injected clock.
    pub fn with_clock(
        config: TranslatorConfig,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> DatadogReporter {
        DatadogReporter { translator: Translator::new(config), transport, clock }
    }

    /// Translates one snapshot and ships it: prepare, one `add_*` per series, send.
    ///
    /// A failure on one series is logged and skipped so the remaining series still go out; a
    /// failed `send` is logged by the transport and returned here. A failure in one cycle never
    /// prevents the next cycle from running.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] from `prepare` or `send`.
    pub fn report(&self, snapshot: &RegistrySnapshot) -> Result<(), TransportError> {
        let timestamp = (self.clock.now_millis() / 1000) as i64;

        let mut request = self.transport.prepare()?;
        self.translator.translate(snapshot, timestamp, |series| {
            let result = match series.kind() {
                SeriesKind::Gauge => request.add_gauge(&series),
                SeriesKind::Count => request.add_counter(&series),
                SeriesKind::Rate => request.add_rate(&series),
            };
            if let Err(error) = result {
                warn!(
                    metric = series.metric(),
                    error = %error,
                    "Failed to add series to request."
                );
            }
        });
        request.send()
    }

    /// Closes the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] from the transport's teardown.
    pub fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close()
    }
}
