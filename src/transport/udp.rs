use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs as _, UdpSocket};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{Request, Transport, TransportError};
use crate::series::DatadogSeries;

const DEFAULT_STATSD_HOST: &str = "localhost";
const DEFAULT_STATSD_PORT: u16 = 8125;

/// Configuration for [`UdpTransport`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UdpTransportConfig {
    /// Collector host name or address.
    pub host: String,
    /// Collector port.
    pub port: u16,
    /// Re-resolve the collector address on every send instead of once at construction.
    ///
    /// Meant for environments where the collector's address can change after process start, such
    /// as sidecar containers. Resolution failures are then deferred to send time and logged,
    /// rather than failing construction.
    pub retrying_lookup: bool,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        UdpTransportConfig {
            host: DEFAULT_STATSD_HOST.to_string(),
            port: DEFAULT_STATSD_PORT,
            retrying_lookup: false,
        }
    }
}

enum AddressResolver {
    Static(SocketAddr),
    Volatile { host: String, port: u16 },
}

impl AddressResolver {
    fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            AddressResolver::Static(addr) => Ok(*addr),
            AddressResolver::Volatile { host, port } => lookup(host, *port),
        }
    }
}

fn lookup(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))
}

/// Streaming DogStatsD push over UDP.
///
/// There is no batching on this wire: every gauge/counter lands as its own datagram the moment
/// `add_*` is called, and [`send`][Request::send] has nothing left to do. Datagrams are handed to
/// a background sender thread through an unbounded channel, so `add_*` never blocks the caller on
/// network conditions.
///
/// The wire protocol speaks relative counters while the series model carries absolute counts, so
/// the transport keeps a per-`(metric, tags)` table of the last absolute value seen and emits the
/// difference. That table is the only state in this crate that outlives a report cycle; it lives
/// as long as the transport and is never evicted.
pub struct UdpTransport {
    queue: Option<Sender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
    last_seen_counters: Mutex<HashMap<String, i64>>,
}

impl UdpTransport {
    /// Creates a transport from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] on an empty host and, unless
    /// `retrying_lookup` is set, [`TransportError::Resolution`] when the collector address does
    /// not resolve.
    pub fn new(config: UdpTransportConfig) -> Result<UdpTransport, TransportError> {
        if config.host.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration {
                reason: "collector host must be non-empty".to_string(),
            });
        }

        let resolver = if config.retrying_lookup {
            AddressResolver::Volatile { host: config.host.clone(), port: config.port }
        } else {
            let addr = lookup(&config.host, config.port).map_err(|source| {
                TransportError::Resolution {
                    addr: format!("{}:{}", config.host, config.port),
                    source,
                }
            })?;
            AddressResolver::Static(addr)
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let (queue, datagrams) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("metrics-exporter-datadog-udp".to_string())
            .spawn(move || run_sender(&socket, &resolver, &datagrams))?;

        info!(
            host = config.host.as_str(),
            port = config.port,
            retrying_lookup = config.retrying_lookup,
            "Created UDP transport."
        );

        Ok(UdpTransport {
            queue: Some(queue),
            worker: Some(worker),
            last_seen_counters: Mutex::new(HashMap::new()),
        })
    }

    fn enqueue(&self, datagram: Vec<u8>) -> Result<(), TransportError> {
        match &self.queue {
            Some(queue) => queue.send(datagram).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn counter_delta(&self, series: &DatadogSeries, value: i64) -> i64 {
        let key = counter_key(series.metric(), series.tags());
        let mut table = self.last_seen_counters.lock().unwrap_or_else(PoisonError::into_inner);
        apply_counter_delta(&mut table, &key, value)
    }
}

impl Transport for UdpTransport {
    fn prepare(&self) -> Result<Box<dyn Request + '_>, TransportError> {
        if self.queue.is_none() {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(DogstatsdRequest { transport: self }))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the channel sender ends the worker's receive loop.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("UDP sender thread panicked.");
            }
        }
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn run_sender(socket: &UdpSocket, resolver: &AddressResolver, datagrams: &Receiver<Vec<u8>>) {
    for datagram in datagrams {
        let addr = match resolver.resolve() {
            Ok(addr) => addr,
            Err(error) => {
                error!(error = %error, "Failed to resolve collector address, dropping datagram.");
                continue;
            }
        };
        if let Err(error) = socket.send_to(&datagram, addr) {
            error!(error = %error, "Failed to send datagram.");
        }
    }
}

struct DogstatsdRequest<'a> {
    transport: &'a UdpTransport,
}

impl Request for DogstatsdRequest<'_> {
    fn add_gauge(&mut self, series: &DatadogSeries) -> Result<(), TransportError> {
        let (_, value) = first_point(series);
        self.transport.enqueue(format_gauge(series.metric(), value, series.tags()))
    }

    fn add_counter(&mut self, series: &DatadogSeries) -> Result<(), TransportError> {
        let (_, value) = first_point(series);
        let delta = self.transport.counter_delta(series, value as i64);
        self.transport.enqueue(format_count(series.metric(), delta, series.tags()))
    }

    fn add_rate(&mut self, _series: &DatadogSeries) -> Result<(), TransportError> {
        // The DogStatsD wire protocol has no rate primitive.
        Ok(())
    }

    fn send(self: Box<Self>) -> Result<(), TransportError> {
        // Every add_* already flushed.
        Ok(())
    }
}

fn first_point(series: &DatadogSeries) -> (i64, f64) {
    if series.points().len() > 1 {
        debug!(
            metric = series.metric(),
            "Series has more than one data point, using the first point only."
        );
    }
    // points() is non-empty by construction.
    series.points()[0]
}

// Table keys join the tags in reverse iteration order.
fn counter_key(metric: &str, tags: &[String]) -> String {
    let mut key = String::with_capacity(metric.len() + 1);
    key.push_str(metric);
    key.push(':');
    for (position, tag) in tags.iter().rev().enumerate() {
        if position > 0 {
            key.push(',');
        }
        key.push_str(tag);
    }
    key
}

fn apply_counter_delta(table: &mut HashMap<String, i64>, key: &str, value: i64) -> i64 {
    // The wire protocol wants a relative counter, not an absolute one: emit the change since the
    // last observation, flooring at zero, and treat a first observation as a delta from zero.
    let delta = match table.get(key) {
        Some(last) => (value - last).max(0),
        None => value,
    };
    table.insert(key.to_string(), value);
    delta
}

fn format_gauge(metric: &str, value: f64, tags: &[String]) -> Vec<u8> {
    let mut float_writer = ryu::Buffer::new();
    format_datagram(metric, float_writer.format(value), b"|g", tags)
}

fn format_count(metric: &str, value: i64, tags: &[String]) -> Vec<u8> {
    let mut int_writer = itoa::Buffer::new();
    format_datagram(metric, int_writer.format(value), b"|c", tags)
}

fn format_datagram(metric: &str, value: &str, type_suffix: &[u8], tags: &[String]) -> Vec<u8> {
    let tags_len = tags.iter().map(|tag| tag.len() + 1).sum::<usize>() + 1;
    let mut datagram =
        Vec::with_capacity(metric.len() + value.len() + type_suffix.len() + tags_len + 1);
    datagram.extend_from_slice(metric.as_bytes());
    datagram.push(b':');
    datagram.extend_from_slice(value.as_bytes());
    datagram.extend_from_slice(type_suffix);

    let mut wrote_tag = false;
    for tag in tags {
        if wrote_tag {
            datagram.push(b',');
        } else {
            datagram.extend_from_slice(b"|#");
            wrote_tag = true;
        }
        datagram.extend_from_slice(tag.as_bytes());
    }

    datagram
}
