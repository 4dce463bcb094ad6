use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Error raised by a metric accessor during a snapshot read.
///
/// A read failure is scoped to the one metric it came from: the translator logs it, omits that
/// metric's points, and carries on with the rest of the cycle.
#[derive(Debug, Error)]
#[error("failed to read metric value: {reason}")]
pub struct MetricReadError {
    reason: String,
}

impl MetricReadError {
    /// Creates a read error with the given reason.
    pub fn new<S>(reason: S) -> MetricReadError
    where
        S: Into<String>,
    {
        MetricReadError { reason: reason.into() }
    }
}

/// A gauge reading, preserving whichever numeric type the accessor produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GaugeValue {
    /// A signed integer reading.
    Signed(i64),
    /// An unsigned integer reading.
    Unsigned(u64),
    /// A floating-point reading.
    Float(f64),
}

impl GaugeValue {
    /// Coerces the reading to the wire representation.
    pub fn as_f64(self) -> f64 {
        match self {
            GaugeValue::Signed(value) => value as f64,
            GaugeValue::Unsigned(value) => value as f64,
            GaugeValue::Float(value) => value,
        }
    }
}

macro_rules! impl_gauge_value_from_signed {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for GaugeValue {
                fn from(value: $ty) -> Self {
                    GaugeValue::Signed(i64::from(value))
                }
            }
        )*
    };
}

macro_rules! impl_gauge_value_from_unsigned {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for GaugeValue {
                fn from(value: $ty) -> Self {
                    GaugeValue::Unsigned(u64::from(value))
                }
            }
        )*
    };
}

impl_gauge_value_from_signed!(i8, i16, i32, i64);
impl_gauge_value_from_unsigned!(u8, u16, u32, u64);

impl From<f32> for GaugeValue {
    fn from(value: f32) -> Self {
        GaugeValue::Float(f64::from(value))
    }
}

impl From<f64> for GaugeValue {
    fn from(value: f64) -> Self {
        GaugeValue::Float(value)
    }
}

type GaugeReadFn = Box<dyn Fn() -> Result<GaugeValue, MetricReadError> + Send + Sync>;

/// The read surface of one registered gauge.
///
/// The wrapped accessor is invoked once per report cycle and may fail; see [`MetricReadError`].
pub struct GaugeSource {
    read: GaugeReadFn,
}

impl GaugeSource {
    /// Wraps a gauge accessor.
    pub fn new<F>(read: F) -> GaugeSource
    where
        F: Fn() -> Result<GaugeValue, MetricReadError> + Send + Sync + 'static,
    {
        GaugeSource { read: Box::new(read) }
    }

    /// Wraps a constant reading, mostly useful in tests.
    pub fn value<V>(value: V) -> GaugeSource
    where
        V: Into<GaugeValue>,
    {
        let value = value.into();
        GaugeSource::new(move || Ok(value))
    }

    /// Reads the current gauge value.
    ///
    /// # Errors
    ///
    /// Returns whatever [`MetricReadError`] the underlying accessor produced.
    pub fn read(&self) -> Result<GaugeValue, MetricReadError> {
        (self.read)()
    }
}

impl fmt::Debug for GaugeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeSource").finish_non_exhaustive()
    }
}

/// The read surface of one registered counter: a monotonic absolute count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Absolute count since process start.
    pub count: i64,
}

/// Derived statistics over a histogram or timer's value distribution.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Distribution {
    /// Largest recorded value.
    pub max: f64,
    /// Arithmetic mean of recorded values.
    pub mean: f64,
    /// Smallest recorded value.
    pub min: f64,
    /// Standard deviation of recorded values.
    pub stddev: f64,
    /// 50th percentile.
    pub median: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 98th percentile.
    pub p98: f64,
    /// 99th percentile.
    pub p99: f64,
    /// 99.9th percentile.
    pub p999: f64,
}

/// The read surface of one registered histogram. Values are in the value domain, not time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of recorded values.
    pub count: u64,
    /// Derived statistics over the recorded values.
    pub distribution: Distribution,
}

/// The read surface of one registered meter. Rates are events per second.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Number of recorded events.
    pub count: u64,
    /// One-minute exponentially-weighted rate.
    pub one_minute_rate: f64,
    /// Five-minute exponentially-weighted rate.
    pub five_minute_rate: f64,
    /// Fifteen-minute exponentially-weighted rate.
    pub fifteen_minute_rate: f64,
    /// Mean rate since registration.
    pub mean_rate: f64,
}

/// The read surface of one registered timer.
///
/// Distribution values are in nanoseconds; rates are events per second.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimerSnapshot {
    /// Number of recorded durations.
    pub count: u64,
    /// One-minute exponentially-weighted rate.
    pub one_minute_rate: f64,
    /// Five-minute exponentially-weighted rate.
    pub five_minute_rate: f64,
    /// Fifteen-minute exponentially-weighted rate.
    pub fifteen_minute_rate: f64,
    /// Mean rate since registration.
    pub mean_rate: f64,
    /// Derived statistics over the recorded durations, in nanoseconds.
    pub distribution: Distribution,
}

/// One point-in-time view of a metrics registry: five name-keyed collections.
///
/// `BTreeMap` keeps each collection in name order, which keeps a cycle's output deterministic
/// and diffable.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Registered gauges.
    pub gauges: BTreeMap<String, GaugeSource>,
    /// Registered counters.
    pub counters: BTreeMap<String, CounterSnapshot>,
    /// Registered histograms.
    pub histograms: BTreeMap<String, HistogramSnapshot>,
    /// Registered meters.
    pub meters: BTreeMap<String, MeterSnapshot>,
    /// Registered timers.
    pub timers: BTreeMap<String, TimerSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::{GaugeSource, GaugeValue, MetricReadError};

    #[test]
    fn gauge_value_coercions() {
        // Cases are defined as: reading, expected wire value.
        let cases: [(GaugeValue, f64); 6] = [
            (GaugeValue::from(1i8), 1.0),
            (GaugeValue::from(1i16), 1.0),
            (GaugeValue::from(1i32), 1.0),
            (GaugeValue::from(1u64), 1.0),
            (GaugeValue::from(1.1f32), f64::from(1.1f32)),
            (GaugeValue::from(1.1f64), 1.1),
        ];

        for (value, expected) in cases {
            assert!((value.as_f64() - expected).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn gauge_source_propagates_read_failures() {
        let failing = GaugeSource::new(|| Err(MetricReadError::new("backing store gone")));
        assert!(failing.read().is_err());

        let constant = GaugeSource::value(7u32);
        assert_eq!(constant.read().unwrap(), GaugeValue::Unsigned(7));
    }
}
