//! The transport layer for pushing series to Datadog.
//!
//! Two delivery models hide behind one [`Transport`] interface: a batched, compressible HTTP push
//! ([`HttpTransport`]) that buffers a whole report cycle into one payload, and a streaming
//! DogStatsD UDP push ([`UdpTransport`]) that flushes every series immediately and converts
//! absolute counts into the relative deltas the wire protocol expects.

use std::io;
use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

use crate::serializer::EncodeError;
use crate::series::DatadogSeries;

mod http;
pub use self::http::{HttpProxy, HttpTransport, HttpTransportConfig};
pub(crate) use self::http::drive_http1;

mod udp;
pub use self::udp::{UdpTransport, UdpTransportConfig};

/// Errors that could occur while building a transport or pushing series through it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was constructed with contradictory or missing options.
    #[error("invalid transport configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the rejected configuration.
        reason: String,
    },

    /// The collector address could not be resolved.
    #[error("failed to resolve collector address {addr}: {source}")]
    Resolution {
        /// The `host:port` that failed to resolve.
        addr: String,
        /// The underlying resolution failure.
        #[source]
        source: io::Error,
    },

    /// An I/O failure while connecting or sending.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The payload could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The HTTP request could not be built.
    #[error("failed to build series request: {0}")]
    RequestBuild(#[from] hyper::http::Error),

    /// The HTTP exchange failed at the protocol level.
    #[error("http exchange failed: {0}")]
    Request(#[from] hyper::Error),

    /// A connect or response deadline elapsed.
    #[error("{phase} timed out after {after:?}")]
    Timeout {
        /// Which phase of the exchange timed out.
        phase: &'static str,
        /// The configured deadline that elapsed.
        after: Duration,
    },

    /// The endpoint answered with an error-range status.
    #[error("series endpoint returned {status} after {elapsed_ms} ms: {body}")]
    ResponseStatus {
        /// The response status code.
        status: StatusCode,
        /// Milliseconds between issuing the request and receiving the response.
        elapsed_ms: u64,
        /// The response body, for the logs.
        body: String,
    },

    /// The transport was closed and can no longer accept series.
    #[error("transport is closed")]
    Closed,
}

/// A transport capable of pushing series to Datadog.
pub trait Transport: Send {
    /// Builds a request context for one report cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the transport cannot accept a new request, such as after
    /// [`close`][Self::close].
    fn prepare(&self) -> Result<Box<dyn Request + '_>, TransportError>;

    /// Releases any resources held by the transport.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if teardown fails; the transport is unusable either way.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// A single-use batch of series being pushed to Datadog.
///
/// Call contract: zero or more `add_*` calls followed by exactly one [`send`][Self::send], which
/// consumes the request. Whether `add_*` buffers or flushes immediately is the transport's
/// business: the HTTP transport buffers everything for one POST, the UDP transport has already
/// pushed each series by the time `add_*` returns.
pub trait Request {
    /// Adds a gauge series to the request.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the series cannot be encoded or enqueued.
    fn add_gauge(&mut self, series: &DatadogSeries) -> Result<(), TransportError>;

    /// Adds a counter series to the request.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the series cannot be encoded or enqueued.
    fn add_counter(&mut self, series: &DatadogSeries) -> Result<(), TransportError>;

    /// Adds a rate series to the request.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the series cannot be encoded or enqueued.
    fn add_rate(&mut self, series: &DatadogSeries) -> Result<(), TransportError>;

    /// Sends the request to Datadog.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on I/O failure or an error-range response; failures are also
    /// logged with context, and neither aborts subsequent report cycles.
    fn send(self: Box<Self>) -> Result<(), TransportError>;
}
