//! EC2 helpers for populating the reporter's host field.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Method};
use tokio::net::TcpStream;
use tokio::runtime::Builder as RuntimeBuilder;

use crate::transport::{drive_http1, TransportError};

const METADATA_HOST: &str = "169.254.169.254";
const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches the EC2 instance id of the host this process runs on.
///
/// Blocks for at most a few seconds against the instance metadata endpoint. The result is
/// typically passed as the `host` field of the translator configuration so series are attributed
/// to the instance rather than to a generic hostname.
///
/// # Errors
///
/// Returns a [`TransportError`] when the metadata endpoint is unreachable (as it is anywhere but
/// EC2), times out, or answers with an error-range status.
pub fn ec2_instance_id() -> Result<String, TransportError> {
    let runtime = RuntimeBuilder::new_current_thread().enable_io().enable_time().build()?;
    runtime.block_on(async {
        let connect = TcpStream::connect((METADATA_HOST, 80));
        let stream = tokio::time::timeout(METADATA_TIMEOUT, connect)
            .await
            .map_err(|_| TransportError::Timeout { phase: "connect", after: METADATA_TIMEOUT })??;

        let request = hyper::Request::builder()
            .method(Method::GET)
            .uri(INSTANCE_ID_PATH)
            .header(header::HOST, METADATA_HOST)
            .body(Full::new(Bytes::new()))?;

        let start = Instant::now();
        let (status, body) = drive_http1(Box::new(stream), request, METADATA_TIMEOUT).await?;
        if !status.is_success() {
            return Err(TransportError::ResponseStatus {
                status,
                elapsed_ms: start.elapsed().as_millis() as u64,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&body).trim().to_string())
    })
}
