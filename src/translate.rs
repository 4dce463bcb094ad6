use serde::Deserialize;
use tracing::warn;

use crate::expansion::{Expansion, ExpansionSet};
use crate::series::DatadogSeries;
use crate::snapshot::{Distribution, HistogramSnapshot, RegistrySnapshot};

/// A unit of time used for linear rate/duration scaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
}

impl TimeUnit {
    const fn nanos_per_unit(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1_000.0,
            TimeUnit::Milliseconds => 1_000_000.0,
            TimeUnit::Seconds => 1_000_000_000.0,
            TimeUnit::Minutes => 60_000_000_000.0,
            TimeUnit::Hours => 3_600_000_000_000.0,
        }
    }

    const fn seconds_per_unit(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1e-9,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3_600.0,
        }
    }
}

/// Rewrites a registry metric name, appending the given path segments.
pub type NameFormatter = Box<dyn Fn(&str, &[&str]) -> String + Send + Sync>;

/// Predicate over formatted metric names; metrics failing it are excluded entirely.
pub type NameFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Supplies the cycle's tag list, replacing the configured base tags when present.
pub type DynamicTagsSource = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// Appends path segments to a metric name, preserving any bracket-encoded tag suffix.
///
/// The name is split before the first `[` and the segments are inserted ahead of the suffix, so a
/// registry name that is itself tag-encoded still expands correctly when suffixed with `.count`,
/// `.p95`, and so on.
pub fn format_name(name: &str, path: &[&str]) -> String {
    let (base, suffix) = match name.find('[') {
        Some(index) => name.split_at(index),
        None => (name, ""),
    };

    let path_len = path.iter().map(|part| part.len() + 1).sum::<usize>();
    let mut formatted = String::with_capacity(name.len() + path_len);
    formatted.push_str(base);
    for part in path {
        formatted.push('.');
        formatted.push_str(part);
    }
    formatted.push_str(suffix);
    formatted
}

/// Configuration for [`Translator`].
///
/// A plain struct constructed once and handed to [`Translator::new`]; every field has a usable
/// default except `host`, which identifies the reporting process in Datadog.
pub struct TranslatorConfig {
    /// Host every emitted series is attributed to.
    pub host: String,
    /// Optional prefix prepended (dot-separated) to every formatted metric name.
    pub prefix: Option<String>,
    /// Base tag list attached to every emitted series.
    pub tags: Vec<String>,
    /// Optional per-cycle tag source. When present, its result **replaces** the base tag list
    /// for that cycle rather than merging with it.
    pub dynamic_tags: Option<DynamicTagsSource>,
    /// Unit rates are scaled to. Registry rates are events per second.
    pub rate_unit: TimeUnit,
    /// Unit timer durations are scaled to. Registry durations are nanoseconds.
    pub duration_unit: TimeUnit,
    /// Which derived statistics histograms and timers expand into.
    pub expansions: ExpansionSet,
    /// Optional metric-name formatter. Defaults to [`format_name`].
    pub formatter: Option<NameFormatter>,
    /// Optional predicate over formatted names; metrics failing it emit nothing.
    pub filter: Option<NameFilter>,
}

impl TranslatorConfig {
    /// Returns a default configuration attributing series to the given host.
    pub fn for_host<S>(host: S) -> TranslatorConfig
    where
        S: Into<String>,
    {
        TranslatorConfig { host: host.into(), ..TranslatorConfig::default() }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig {
            host: String::new(),
            prefix: None,
            tags: Vec::new(),
            dynamic_tags: None,
            rate_unit: TimeUnit::Seconds,
            duration_unit: TimeUnit::Milliseconds,
            expansions: ExpansionSet::all(),
            formatter: None,
            filter: None,
        }
    }
}

// Emission order within a compound metric. Histograms lead with their count, timers emit the
// distribution block first and the count/rate block after it.
const HISTOGRAM_EXPANSIONS: [Expansion; 11] = [
    Expansion::Count,
    Expansion::Max,
    Expansion::Mean,
    Expansion::Min,
    Expansion::StdDev,
    Expansion::Median,
    Expansion::P75,
    Expansion::P95,
    Expansion::P98,
    Expansion::P99,
    Expansion::P999,
];

const TIMER_DISTRIBUTION_EXPANSIONS: [Expansion; 10] = [
    Expansion::Max,
    Expansion::Mean,
    Expansion::Min,
    Expansion::StdDev,
    Expansion::Median,
    Expansion::P75,
    Expansion::P95,
    Expansion::P98,
    Expansion::P99,
    Expansion::P999,
];

const METERED_EXPANSIONS: [Expansion; 5] = [
    Expansion::Count,
    Expansion::OneMinuteRate,
    Expansion::FiveMinuteRate,
    Expansion::FifteenMinuteRate,
    Expansion::MeanRate,
];

/// Walks a registry snapshot and expands it into an ordered sequence of [`DatadogSeries`].
///
/// Translation is synchronous and pure given the snapshot, the report timestamp, and the injected
/// callables: the same inputs always yield the same series in the same order -- gauges, then
/// counters, histograms, meters, and timers, names in `BTreeMap` order within each kind.
pub struct Translator {
    config: TranslatorConfig,
    rate_factor: f64,
    duration_factor: f64,
}

impl Translator {
    /// Creates a translator from the given configuration.
    pub fn new(config: TranslatorConfig) -> Translator {
        let rate_factor = config.rate_unit.seconds_per_unit();
        let duration_factor = 1.0 / config.duration_unit.nanos_per_unit();
        Translator { config, rate_factor, duration_factor }
    }

    /// Expands one snapshot into series, invoking `emit` once per emitted data point.
    ///
    /// `timestamp` is the report time in seconds since the Unix epoch, attached to every point. A
    /// gauge whose accessor fails is logged and skipped without aborting the cycle; everything the
    /// translator emits is gauge-kind (counters are surfaced as gauges carrying the absolute
    /// count -- only the UDP transport derives deltas from them).
    pub fn translate<F>(&self, snapshot: &RegistrySnapshot, timestamp: i64, mut emit: F)
    where
        F: FnMut(DatadogSeries),
    {
        let cycle_tags = match &self.config.dynamic_tags {
            Some(source) => source(),
            None => self.config.tags.clone(),
        };

        for (name, gauge) in &snapshot.gauges {
            if !self.accept(name) {
                continue;
            }
            match gauge.read() {
                Ok(value) => {
                    self.emit_value(name, &[], value.as_f64(), timestamp, &cycle_tags, &mut emit);
                }
                Err(error) => {
                    warn!(
                        metric = name.as_str(),
                        error = %error,
                        "Skipping gauge whose value accessor failed."
                    );
                }
            }
        }

        for (name, counter) in &snapshot.counters {
            if !self.accept(name) {
                continue;
            }
            self.emit_value(name, &[], counter.count as f64, timestamp, &cycle_tags, &mut emit);
        }

        for (name, histogram) in &snapshot.histograms {
            if !self.accept(name) {
                continue;
            }
            self.emit_histogram(name, histogram, timestamp, &cycle_tags, &mut emit);
        }

        for (name, meter) in &snapshot.meters {
            if !self.accept(name) {
                continue;
            }
            self.emit_metered(
                name,
                meter.count,
                [
                    meter.one_minute_rate,
                    meter.five_minute_rate,
                    meter.fifteen_minute_rate,
                    meter.mean_rate,
                ],
                timestamp,
                &cycle_tags,
                &mut emit,
            );
        }

        for (name, timer) in &snapshot.timers {
            if !self.accept(name) {
                continue;
            }
            for expansion in TIMER_DISTRIBUTION_EXPANSIONS {
                if !self.config.expansions.contains(expansion) {
                    continue;
                }
                let value = distribution_value(&timer.distribution, expansion) * self.duration_factor;
                self.emit_value(name, &[expansion.suffix()], value, timestamp, &cycle_tags, &mut emit);
            }
            self.emit_metered(
                name,
                timer.count,
                [
                    timer.one_minute_rate,
                    timer.five_minute_rate,
                    timer.fifteen_minute_rate,
                    timer.mean_rate,
                ],
                timestamp,
                &cycle_tags,
                &mut emit,
            );
        }
    }

    fn emit_histogram<F>(
        &self,
        name: &str,
        histogram: &HistogramSnapshot,
        timestamp: i64,
        tags: &[String],
        emit: &mut F,
    ) where
        F: FnMut(DatadogSeries),
    {
        for expansion in HISTOGRAM_EXPANSIONS {
            if !self.config.expansions.contains(expansion) {
                continue;
            }
            // Histograms are value-domain, not time-domain, so no unit conversion applies.
            let value = match expansion {
                Expansion::Count => histogram.count as f64,
                other => distribution_value(&histogram.distribution, other),
            };
            self.emit_value(name, &[expansion.suffix()], value, timestamp, tags, emit);
        }
    }

    fn emit_metered<F>(
        &self,
        name: &str,
        count: u64,
        rates: [f64; 4],
        timestamp: i64,
        tags: &[String],
        emit: &mut F,
    ) where
        F: FnMut(DatadogSeries),
    {
        let [one_minute, five_minute, fifteen_minute, mean] = rates;
        for expansion in METERED_EXPANSIONS {
            if !self.config.expansions.contains(expansion) {
                continue;
            }
            let value = match expansion {
                Expansion::Count => count as f64,
                Expansion::OneMinuteRate => one_minute * self.rate_factor,
                Expansion::FiveMinuteRate => five_minute * self.rate_factor,
                Expansion::FifteenMinuteRate => fifteen_minute * self.rate_factor,
                Expansion::MeanRate => mean * self.rate_factor,
                _ => unreachable!("not a metered statistic"),
            };
            self.emit_value(name, &[expansion.suffix()], value, timestamp, tags, emit);
        }
    }

    fn emit_value<F>(
        &self,
        registry_name: &str,
        path: &[&str],
        value: f64,
        timestamp: i64,
        tags: &[String],
        emit: &mut F,
    ) where
        F: FnMut(DatadogSeries),
    {
        let name = self.series_name(registry_name, path);
        match DatadogSeries::gauge(&name, value, timestamp, &self.config.host, tags) {
            Ok(series) => emit(series),
            Err(error) => {
                warn!(
                    metric = registry_name,
                    error = %error,
                    "Skipping series whose formatted name is invalid."
                );
            }
        }
    }

    fn series_name(&self, registry_name: &str, path: &[&str]) -> String {
        let formatted = self.format(registry_name, path);
        match &self.config.prefix {
            Some(prefix) => format!("{prefix}.{formatted}"),
            None => formatted,
        }
    }

    fn format(&self, registry_name: &str, path: &[&str]) -> String {
        match &self.config.formatter {
            Some(formatter) => formatter(registry_name, path),
            None => format_name(registry_name, path),
        }
    }

    fn accept(&self, registry_name: &str) -> bool {
        match &self.config.filter {
            Some(filter) => filter(&self.format(registry_name, &[])),
            None => true,
        }
    }
}

fn distribution_value(distribution: &Distribution, expansion: Expansion) -> f64 {
    match expansion {
        Expansion::Max => distribution.max,
        Expansion::Mean => distribution.mean,
        Expansion::Min => distribution.min,
        Expansion::StdDev => distribution.stddev,
        Expansion::Median => distribution.median,
        Expansion::P75 => distribution.p75,
        Expansion::P95 => distribution.p95,
        Expansion::P98 => distribution.p98,
        Expansion::P99 => distribution.p99,
        Expansion::P999 => distribution.p999,
        _ => unreachable!("not a distribution statistic"),
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // asserting on exact copies of input values
mod tests {
    use super::{format_name, TimeUnit, Translator, TranslatorConfig};
    use crate::expansion::{Expansion, ExpansionSet};
    use crate::series::{DatadogSeries, SeriesKind};
    use crate::snapshot::{
        CounterSnapshot, Distribution, GaugeSource, HistogramSnapshot, MeterSnapshot,
        MetricReadError, RegistrySnapshot, TimerSnapshot,
    };

    const HOST: &str = "hostname";
    const TIMESTAMP: i64 = 1_000_198;

    const MILLIS_TO_NANOS: f64 = 1_000_000.0;

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|tag| (*tag).to_string()).collect()
    }

    fn base_config() -> TranslatorConfig {
        TranslatorConfig {
            tags: tags(&["env:prod", "version:1.0.0"]),
            ..TranslatorConfig::for_host(HOST)
        }
    }

    fn translate_all(translator: &Translator, snapshot: &RegistrySnapshot) -> Vec<DatadogSeries> {
        let mut series = Vec::new();
        translator.translate(snapshot, TIMESTAMP, |s| series.push(s));
        series
    }

    fn names(series: &[DatadogSeries]) -> Vec<&str> {
        series.iter().map(DatadogSeries::metric).collect()
    }

    fn values(series: &[DatadogSeries]) -> Vec<f64> {
        series.iter().map(|s| s.points()[0].1).collect()
    }

    #[test]
    fn formats_names_around_bracket_suffixes() {
        // Cases are defined as: registry name, path segments, expected output.
        let cases = [
            ("requests", &[][..], "requests"),
            ("requests", &["count"][..], "requests.count"),
            ("requests[env:prod]", &["count"], "requests.count[env:prod]"),
            ("requests[a,b]", &["p95", "max"], "requests.p95.max[a,b]"),
        ];

        for (name, path, expected) in cases {
            assert_eq!(format_name(name, path), expected);
        }
    }

    #[test]
    fn reports_gauges_of_every_numeric_type() {
        let readings: [(GaugeSource, f64); 6] = [
            (GaugeSource::value(1i8), 1.0),
            (GaugeSource::value(1i16), 1.0),
            (GaugeSource::value(1i64), 1.0),
            (GaugeSource::value(1u32), 1.0),
            (GaugeSource::value(1.1f32), f64::from(1.1f32)),
            (GaugeSource::value(1.1f64), 1.1),
        ];

        for (source, expected) in readings {
            let mut snapshot = RegistrySnapshot::default();
            snapshot.gauges.insert("gauge".to_string(), source);

            let series = translate_all(&Translator::new(base_config()), &snapshot);
            assert_eq!(series.len(), 1);
            assert_eq!(series[0].metric(), "gauge");
            assert_eq!(series[0].points(), &[(TIMESTAMP, expected)]);
            assert_eq!(series[0].host(), HOST);
            assert_eq!(series[0].tags(), tags(&["env:prod", "version:1.0.0"]));
            assert_eq!(series[0].kind(), SeriesKind::Gauge);
        }
    }

    #[test]
    fn surfaces_counters_as_gauges() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.counters.insert("counter".to_string(), CounterSnapshot { count: 100 });

        let series = translate_all(&Translator::new(base_config()), &snapshot);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].metric(), "counter");
        assert_eq!(series[0].points(), &[(TIMESTAMP, 100.0)]);
        assert_eq!(series[0].kind(), SeriesKind::Gauge);
        assert_eq!(series[0].tags(), tags(&["env:prod", "version:1.0.0"]));
    }

    #[test]
    fn skips_failing_gauges_without_aborting_the_cycle() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.gauges.insert(
            "gauge".to_string(),
            GaugeSource::new(|| Err(MetricReadError::new("error occurred during retrieving value"))),
        );
        snapshot.counters.insert("counter".to_string(), CounterSnapshot { count: 100 });

        let series = translate_all(&Translator::new(base_config()), &snapshot);
        assert_eq!(names(&series), ["counter"]);
        assert_eq!(series[0].points(), &[(TIMESTAMP, 100.0)]);
    }

    #[test]
    fn expands_histograms_in_fixed_order() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.histograms.insert(
            "histogram".to_string(),
            HistogramSnapshot {
                count: 1,
                distribution: Distribution {
                    max: 2.0,
                    mean: 3.0,
                    min: 4.0,
                    stddev: 5.0,
                    median: 6.0,
                    p75: 7.0,
                    p95: 8.0,
                    p98: 9.0,
                    p99: 10.0,
                    p999: 11.0,
                },
            },
        );

        let series = translate_all(&Translator::new(base_config()), &snapshot);
        assert_eq!(
            names(&series),
            [
                "histogram.count",
                "histogram.max",
                "histogram.mean",
                "histogram.min",
                "histogram.stddev",
                "histogram.median",
                "histogram.p75",
                "histogram.p95",
                "histogram.p98",
                "histogram.p99",
                "histogram.p999",
            ]
        );
        assert_eq!(values(&series), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn converts_meter_rates_but_not_counts() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.meters.insert(
            "meter".to_string(),
            MeterSnapshot {
                count: 1,
                one_minute_rate: 2.0,
                five_minute_rate: 3.0,
                fifteen_minute_rate: 4.0,
                mean_rate: 5.0,
            },
        );

        let series = translate_all(&Translator::new(base_config()), &snapshot);
        assert_eq!(
            names(&series),
            ["meter.count", "meter.1MinuteRate", "meter.5MinuteRate", "meter.15MinuteRate", "meter.meanRate"]
        );
        // Per-second registry rates are unchanged at the default per-second rate unit.
        assert_eq!(values(&series), [1.0, 2.0, 3.0, 4.0, 5.0]);

        let per_minute = Translator::new(TranslatorConfig {
            rate_unit: TimeUnit::Minutes,
            ..base_config()
        });
        let series = translate_all(&per_minute, &snapshot);
        assert_eq!(values(&series), [1.0, 120.0, 180.0, 240.0, 300.0]);
    }

    #[test]
    fn converts_timer_durations_and_orders_percentiles_first() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.timers.insert(
            "timer".to_string(),
            TimerSnapshot {
                count: 1,
                one_minute_rate: 3.0,
                five_minute_rate: 4.0,
                fifteen_minute_rate: 5.0,
                mean_rate: 2.0,
                distribution: Distribution {
                    max: 100.0 * MILLIS_TO_NANOS,
                    mean: 200.0 * MILLIS_TO_NANOS,
                    min: 300.0 * MILLIS_TO_NANOS,
                    stddev: 400.0 * MILLIS_TO_NANOS,
                    median: 500.0 * MILLIS_TO_NANOS,
                    p75: 600.0 * MILLIS_TO_NANOS,
                    p95: 700.0 * MILLIS_TO_NANOS,
                    p98: 800.0 * MILLIS_TO_NANOS,
                    p99: 900.0 * MILLIS_TO_NANOS,
                    p999: 1000.0 * MILLIS_TO_NANOS,
                },
            },
        );

        let series = translate_all(&Translator::new(base_config()), &snapshot);
        assert_eq!(
            names(&series),
            [
                "timer.max",
                "timer.mean",
                "timer.min",
                "timer.stddev",
                "timer.median",
                "timer.p75",
                "timer.p95",
                "timer.p98",
                "timer.p99",
                "timer.p999",
                "timer.count",
                "timer.1MinuteRate",
                "timer.5MinuteRate",
                "timer.15MinuteRate",
                "timer.meanRate",
            ]
        );
        assert_eq!(
            values(&series),
            [
                100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0, 1000.0, 1.0, 3.0,
                4.0, 5.0, 2.0,
            ]
        );
    }

    #[test]
    fn honors_the_expansion_selection() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.timers.insert(
            "timer".to_string(),
            TimerSnapshot {
                count: 1,
                one_minute_rate: 3.0,
                distribution: Distribution {
                    median: 500.0 * MILLIS_TO_NANOS,
                    p95: 700.0 * MILLIS_TO_NANOS,
                    ..Distribution::default()
                },
                ..TimerSnapshot::default()
            },
        );

        let translator = Translator::new(TranslatorConfig {
            expansions: ExpansionSet::of(&[
                Expansion::Count,
                Expansion::P95,
                Expansion::Median,
                Expansion::OneMinuteRate,
            ]),
            ..base_config()
        });

        let series = translate_all(&translator, &snapshot);
        assert_eq!(names(&series), ["timer.median", "timer.p95", "timer.count", "timer.1MinuteRate"]);
        assert_eq!(values(&series), [500.0, 700.0, 1.0, 3.0]);
    }

    #[test]
    fn prepends_the_prefix() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.counters.insert("counter".to_string(), CounterSnapshot { count: 100 });

        let translator = Translator::new(TranslatorConfig {
            prefix: Some("testprefix".to_string()),
            ..base_config()
        });

        let series = translate_all(&translator, &snapshot);
        assert_eq!(names(&series), ["testprefix.counter"]);
    }

    #[test]
    fn dynamic_tags_replace_the_base_tags() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.counters.insert("counter".to_string(), CounterSnapshot { count: 100 });

        let translator = Translator::new(TranslatorConfig {
            dynamic_tags: Some(Box::new(|| {
                vec!["status:active".to_string(), "speed:29".to_string()]
            })),
            ..base_config()
        });

        let series = translate_all(&translator, &snapshot);
        assert_eq!(series[0].tags(), tags(&["status:active", "speed:29"]));
    }

    #[test]
    fn applies_a_custom_formatter() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.gauges.insert("gauge".to_string(), GaugeSource::value(100i64));
        snapshot.counters.insert("counter".to_string(), CounterSnapshot { count: 100 });

        let translator = Translator::new(TranslatorConfig {
            formatter: Some(Box::new(|name, path| {
                format!("metric_name_formatter.{}", format_name(name, path))
            })),
            ..TranslatorConfig::for_host(HOST)
        });

        let series = translate_all(&translator, &snapshot);
        assert_eq!(names(&series), ["metric_name_formatter.gauge", "metric_name_formatter.counter"]);
    }

    #[test]
    fn excludes_metrics_failing_the_name_filter() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.counters.insert("my.metric.counter".to_string(), CounterSnapshot { count: 123 });
        snapshot.counters.insert("counter".to_string(), CounterSnapshot { count: 456 });

        let translator = Translator::new(TranslatorConfig {
            filter: Some(Box::new(|name| name.contains("my.metric"))),
            ..base_config()
        });

        let series = translate_all(&translator, &snapshot);
        assert_eq!(names(&series), ["my.metric.counter"]);
        assert_eq!(values(&series), [123.0]);
    }

    #[test]
    fn expands_tag_encoded_registry_names() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.meters.insert(
            "java.lang.String.meter[with,tags]".to_string(),
            MeterSnapshot::default(),
        );

        let series = translate_all(&Translator::new(base_config()), &snapshot);
        assert_eq!(
            names(&series),
            [
                "java.lang.String.meter.count",
                "java.lang.String.meter.1MinuteRate",
                "java.lang.String.meter.5MinuteRate",
                "java.lang.String.meter.15MinuteRate",
                "java.lang.String.meter.meanRate",
            ]
        );
        for s in &series {
            assert_eq!(s.tags(), tags(&["with", "tags", "env:prod", "version:1.0.0"]));
        }
    }
}
