use std::io::{self, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use http_body_util::{BodyExt as _, Full};
use hyper::{header, Method, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use md5::{Digest as _, Md5};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::{Request, Transport, TransportError};
use crate::serializer::SeriesSerializer;
use crate::series::DatadogSeries;

const DEFAULT_SERIES_ENDPOINT: &str = "https://api.datadoghq.com/api/v2/series";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// An HTTP proxy to tunnel series posts through.
#[derive(Clone, Debug, Deserialize)]
pub struct HttpProxy {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

/// Configuration for [`HttpTransport`].
///
/// A plain struct handed to [`HttpTransport::new`] once and validated there. Requiring both proxy
/// fields inside [`HttpProxy`] makes "proxy host without proxy port" unrepresentable.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Datadog API key, sent in the `DD-API-KEY` header. Required.
    pub api_key: String,
    /// Series endpoint URL. Defaults to the Datadog v2 series endpoint.
    pub endpoint: String,
    /// Deadline for establishing the connection, including proxy tunneling and TLS.
    pub connect_timeout: Duration,
    /// Deadline for the response once the request is on the wire.
    pub response_timeout: Duration,
    /// Optional HTTP proxy to tunnel through.
    pub proxy: Option<HttpProxy>,
    /// Whether to deflate the payload body.
    pub compression: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        HttpTransportConfig {
            api_key: String::new(),
            endpoint: DEFAULT_SERIES_ENDPOINT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            proxy: None,
            compression: false,
        }
    }
}

// Object-safe bundle of the stream traits the exchange needs, so plain and TLS connections can
// share one code path.
pub(crate) trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Batched HTTP push of one report cycle per request.
///
/// Each `add_*` call streams the series straight into the in-progress JSON payload, so the
/// request never holds the cycle's series as objects -- only as already-serialized bytes.
/// [`send`][Request::send] optionally deflates the payload and performs one blocking `POST`
/// against the series endpoint; the transport owns a current-thread tokio runtime and drives a
/// fresh HTTP/1 connection per send inside it.
pub struct HttpTransport {
    config: HttpTransportConfig,
    host: String,
    port: u16,
    path: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    runtime: Runtime,
}

impl HttpTransport {
    /// Creates a transport from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] on a missing API key, an endpoint that is
    /// not an absolute `http`/`https` URL, or an empty proxy host, and
    /// [`TransportError::Io`] if the runtime cannot be created.
    pub fn new(config: HttpTransportConfig) -> Result<HttpTransport, TransportError> {
        if config.api_key.trim().is_empty() {
            return Err(invalid_configuration("api key must be set"));
        }
        if let Some(proxy) = &config.proxy {
            if proxy.host.trim().is_empty() {
                return Err(invalid_configuration("proxy host must be non-empty"));
            }
        }

        let endpoint: Uri = config
            .endpoint
            .parse()
            .map_err(|error| invalid_configuration(format!("invalid endpoint URL: {error}")))?;
        let use_tls = match endpoint.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(invalid_configuration("endpoint URL must be http or https")),
        };
        let host = endpoint
            .host()
            .ok_or_else(|| invalid_configuration("endpoint URL must carry a host"))?
            .to_string();
        let port = endpoint.port_u16().unwrap_or(if use_tls { 443 } else { 80 });
        // Origin-form request target; keep the query so an endpoint that embeds its credentials
        // in the URL still works.
        let path = endpoint
            .path_and_query()
            .map_or_else(|| "/".to_string(), |target| target.as_str().to_string());

        let tls = if use_tls {
            let server_name = ServerName::try_from(host.clone())
                .map_err(|error| invalid_configuration(format!("invalid endpoint host: {error}")))?;
            Some((tls_connector(), server_name))
        } else {
            None
        };

        let runtime = RuntimeBuilder::new_current_thread().enable_io().enable_time().build()?;

        Ok(HttpTransport { config, host, port, path, tls, runtime })
    }

    fn post(&self, payload: String) -> Result<(), TransportError> {
        debug!(uncompressed_len = payload.len(), "Posting series payload.");

        let mut request = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.path.as_str())
            .header(header::HOST, self.host.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .header("DD-API-KEY", self.config.api_key.as_str());

        let body = if self.config.compression {
            let digest = md5_hex(payload.as_bytes());
            let compressed = deflate(payload.as_bytes())?;
            debug!(
                compressed_len = compressed.len(),
                uncompressed_len = payload.len(),
                "Compressed series payload."
            );
            request = request
                .header(header::CONTENT_ENCODING, "deflate")
                .header("Content-MD5", digest);
            Bytes::from(compressed)
        } else {
            Bytes::from(payload)
        };

        let request = request.body(Full::new(body))?;

        let start = Instant::now();
        let result = self.runtime.block_on(self.exchange(request));
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((status, _)) if status.is_success() => {
                debug!(status = %status, elapsed_ms, "Sent series to Datadog.");
                Ok(())
            }
            Ok((status, body)) => {
                let body = String::from_utf8_lossy(&body).into_owned();
                warn!(
                    status = %status,
                    elapsed_ms,
                    body = body.as_str(),
                    "Series endpoint returned failure status."
                );
                Err(TransportError::ResponseStatus { status, elapsed_ms, body })
            }
            Err(error) => {
                warn!(error = %error, elapsed_ms, "Failed to send series to Datadog.");
                Err(error)
            }
        }
    }

    async fn exchange(
        &self,
        request: hyper::Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Bytes), TransportError> {
        let io = tokio::time::timeout(self.config.connect_timeout, self.connect())
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "connect",
                after: self.config.connect_timeout,
            })??;

        drive_http1(io, request, self.config.response_timeout).await
    }

    async fn connect(&self) -> Result<Box<dyn Io>, TransportError> {
        let stream = match &self.config.proxy {
            Some(proxy) => {
                let stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
                self.tunnel(stream, proxy).await?
            }
            None => TcpStream::connect((self.host.as_str(), self.port)).await?,
        };

        match &self.tls {
            Some((connector, server_name)) => {
                let stream = connector.connect(server_name.clone(), stream).await?;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(stream)),
        }
    }

    // Establishes a CONNECT tunnel to the endpoint through the proxy.
    async fn tunnel(
        &self,
        mut stream: TcpStream,
        proxy: &HttpProxy,
    ) -> Result<TcpStream, TransportError> {
        let connect = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
            host = self.host,
            port = self.port,
        );
        stream.write_all(connect.as_bytes()).await?;

        let mut response = [0u8; 1024];
        let mut read = 0;
        loop {
            if read == response.len() {
                return Err(TransportError::Io(io::Error::other(
                    "proxy CONNECT response exceeded 1024 bytes",
                )));
            }
            let n = stream.read(&mut response[read..]).await?;
            if n == 0 {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed the connection during CONNECT",
                )));
            }
            read += n;
            if response[..read].windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }

        let head = String::from_utf8_lossy(&response[..read]);
        let accepted = head.split_whitespace().nth(1).is_some_and(|code| code.starts_with('2'));
        if !accepted {
            return Err(TransportError::Io(io::Error::other(format!(
                "proxy {}:{} refused CONNECT: {}",
                proxy.host,
                proxy.port,
                head.lines().next().unwrap_or_default(),
            ))));
        }

        Ok(stream)
    }
}

impl Transport for HttpTransport {
    fn prepare(&self) -> Result<Box<dyn Request + '_>, TransportError> {
        let mut serializer = SeriesSerializer::new();
        serializer.start()?;
        Ok(Box::new(BatchRequest { transport: self, serializer }))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct BatchRequest<'a> {
    transport: &'a HttpTransport,
    serializer: SeriesSerializer,
}

impl Request for BatchRequest<'_> {
    fn add_gauge(&mut self, series: &DatadogSeries) -> Result<(), TransportError> {
        Ok(self.serializer.append(series)?)
    }

    fn add_counter(&mut self, series: &DatadogSeries) -> Result<(), TransportError> {
        Ok(self.serializer.append(series)?)
    }

    fn add_rate(&mut self, series: &DatadogSeries) -> Result<(), TransportError> {
        Ok(self.serializer.append(series)?)
    }

    fn send(mut self: Box<Self>) -> Result<(), TransportError> {
        let payload = self.serializer.finish()?;
        self.transport.post(payload)
    }
}

// Drives one HTTP/1 request/response exchange over an established connection, collecting the
// response body under the response deadline.
pub(crate) async fn drive_http1(
    io: Box<dyn Io>,
    request: hyper::Request<Full<Bytes>>,
    response_timeout: Duration,
) -> Result<(StatusCode, Bytes), TransportError> {
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    tokio::task::spawn(async move {
        if let Err(error) = connection.await {
            debug!(error = %error, "Connection terminated with error.");
        }
    });

    let exchange = async move {
        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok::<_, TransportError>((status, body))
    };

    tokio::time::timeout(response_timeout, exchange)
        .await
        .map_err(|_| TransportError::Timeout { phase: "response", after: response_timeout })?
}

fn tls_connector() -> TlsConnector {
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        warn!(error = %error, "Failed to load a native root certificate.");
    }

    let mut roots = RootCertStore::empty();
    for cert in loaded.certs {
        if let Err(error) = roots.add(cert) {
            warn!(error = %error, "Rejected a native root certificate.");
        }
    }

    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

fn deflate(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

fn md5_hex(payload: &[u8]) -> String {
    use std::fmt::Write as _;

    let digest = Md5::digest(payload);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn invalid_configuration<S>(reason: S) -> TransportError
where
    S: Into<String>,
{
    TransportError::InvalidConfiguration { reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use flate2::read::ZlibDecoder;

    use super::{deflate, md5_hex, HttpProxy, HttpTransport, HttpTransportConfig};
    use crate::transport::TransportError;

    fn config_with_key() -> HttpTransportConfig {
        HttpTransportConfig {
            api_key: "0123456789abcdef".to_string(),
            ..HttpTransportConfig::default()
        }
    }

    #[test]
    fn rejects_invalid_configurations() {
        // Cases are defined as: broken configuration, expected reason fragment.
        let cases = [
            (HttpTransportConfig::default(), "api key"),
            (
                HttpTransportConfig { endpoint: "not a url".to_string(), ..config_with_key() },
                "endpoint URL",
            ),
            (
                HttpTransportConfig {
                    endpoint: "ftp://api.datadoghq.com/api/v2/series".to_string(),
                    ..config_with_key()
                },
                "http or https",
            ),
            (
                HttpTransportConfig {
                    proxy: Some(HttpProxy { host: "  ".to_string(), port: 3128 }),
                    ..config_with_key()
                },
                "proxy host",
            ),
        ];

        for (config, fragment) in cases {
            let Err(error) = HttpTransport::new(config) else {
                panic!("expected configuration rejection for {fragment:?}");
            };
            match error {
                TransportError::InvalidConfiguration { reason } => {
                    assert!(reason.contains(fragment), "reason {reason:?} missing {fragment:?}");
                }
                other => panic!("expected InvalidConfiguration, got {other:?}"),
            }
        }
    }

    #[test]
    fn accepts_a_complete_configuration() {
        let transport = HttpTransport::new(HttpTransportConfig {
            proxy: Some(HttpProxy { host: "proxy.internal".to_string(), port: 3128 }),
            compression: true,
            ..config_with_key()
        });
        assert!(transport.is_ok());
    }

    #[test]
    fn deflated_payloads_inflate_back() {
        let payload = br#"{"series":[{"metric":"test"}]}"#;
        let compressed = deflate(payload).unwrap();

        let mut inflated = Vec::new();
        ZlibDecoder::new(&compressed[..]).read_to_end(&mut inflated).unwrap();
        assert_eq!(inflated, payload);
    }

    #[test]
    fn md5_hex_matches_known_digests() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
