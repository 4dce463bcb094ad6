//! A reporter for shipping metrics-registry snapshots to [Datadog][datadog].
//!
//! [datadog]: https://www.datadoghq.com/
//!
//! # Usage
//!
//! Build a transport, wrap it in a [`DatadogReporter`], and hand the reporter one
//! [`RegistrySnapshot`] per report cycle:
//!
//! ```no_run
//! # use metrics_exporter_datadog::transport::{HttpTransport, HttpTransportConfig};
//! # use metrics_exporter_datadog::{DatadogReporter, RegistrySnapshot, TranslatorConfig};
//! let transport = HttpTransport::new(HttpTransportConfig {
//!     api_key: "<api key>".to_string(),
//!     compression: true,
//!     ..HttpTransportConfig::default()
//! })
//! .expect("failed to build transport");
//!
//! let config = TranslatorConfig {
//!     prefix: Some("myapp".to_string()),
//!     tags: vec!["env:prod".to_string()],
//!     ..TranslatorConfig::for_host("myhost")
//! };
//! let reporter = DatadogReporter::new(config, Box::new(transport));
//!
//! // Once per report cycle, from whatever schedules reporting in your application. Delivery is
//! // fire-and-forget: log a failure and let the next cycle proceed.
//! let snapshot = RegistrySnapshot::default();
//! if let Err(error) = reporter.report(&snapshot) {
//!     eprintln!("failed to report metrics: {error}");
//! }
//! ```
//!
//! # Transports
//!
//! Two delivery models are available behind the same [`Transport`](transport::Transport)
//! interface:
//!
//! - [`HttpTransport`](transport::HttpTransport) batches a whole report cycle into one Datadog v2
//!   `series` JSON payload, optionally deflates it, and performs a single `POST` with bounded
//!   connect/response timeouts and optional proxying. Failures are logged and surfaced, never
//!   retried.
//! - [`UdpTransport`](transport::UdpTransport) speaks DogStatsD: every gauge/counter goes out
//!   immediately as its own datagram via a background sender thread. Because that wire protocol
//!   has no notion of absolute counts, the transport keeps a counter-delta table mapping each
//!   `(metric, tags)` pair to the last absolute value seen and emits relative deltas.
//!
//! # Translation
//!
//! [`Translator`] flattens the five snapshot collections -- gauges, counters, histograms, meters,
//! timers -- into a deterministic series stream: names formatted (with bracket-encoded tag
//! suffixes preserved), tags merged with last-writer-wins, rates and durations linearly scaled to
//! the configured units, and compound metrics expanded into a configurable set of derived
//! statistics. Counters are surfaced as gauges carrying the absolute count; only the UDP path
//! turns them into deltas.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]

mod tagging;
pub use self::tagging::{merge_tags, TagError, TaggedName, TaggedNameBuilder};

mod series;
pub use self::series::{DatadogSeries, SeriesKind};

mod snapshot;
pub use self::snapshot::{
    CounterSnapshot, Distribution, GaugeSource, GaugeValue, HistogramSnapshot, MeterSnapshot,
    MetricReadError, RegistrySnapshot, TimerSnapshot,
};

mod expansion;
pub use self::expansion::{Expansion, ExpansionSet};

mod translate;
pub use self::translate::{
    format_name, DynamicTagsSource, NameFilter, NameFormatter, TimeUnit, Translator,
    TranslatorConfig,
};

mod serializer;
pub use self::serializer::{EncodeError, SeriesSerializer};

pub mod transport;

mod reporter;
pub use self::reporter::{Clock, DatadogReporter, SystemClock};

pub mod aws;
