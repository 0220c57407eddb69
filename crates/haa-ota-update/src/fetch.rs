//! Remote fetch client.
//!
//! Retrieves small files into memory and streams images into a
//! [`StagingWriter`] through a fixed receive buffer. Redirects are followed
//! up to [`FetchPolicy::max_redirects`] hops; every connect, send and receive
//! is bounded by a timeout so a stalled peer fails like a reset one.
//!
//! Retrying is left to the caller: a failed [`FetchClient::download`] can be
//! repeated with the same writer and resumes from the last written byte.

use std::sync::Arc;
use std::time::Duration;

use haa_ota_errors::{FlashError, NetworkError, OtaError, ProtocolError};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::abort::AbortSignal;
use crate::config::FetchPolicy;
use crate::flash::StagingWriter;
use crate::http::{Location, ResponseHead, build_request, parse_head};
use crate::transport::{Connection, Transport};

const PROGRESS_STEP: u64 = 64 * 1024;

/// Where an interrupted image transfer picks up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    /// Next location to request; becomes the redirect target once one is followed
    pub location: Location,
    /// Image size announced by the first response
    pub total: Option<u64>,
}

impl ResumePoint {
    /// Fresh transfer from `location`.
    pub fn new(location: Location) -> Self {
        Self {
            location,
            total: None,
        }
    }
}

struct OpenResponse {
    location: Location,
    head: ResponseHead,
    conn: Box<dyn Connection>,
    leftover: Vec<u8>,
}

/// HTTP GET client over a [`Transport`].
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    policy: FetchPolicy,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Create a client.
    pub fn new(transport: Arc<dyn Transport>, policy: FetchPolicy) -> Self {
        Self { transport, policy }
    }

    /// Limits in force.
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// GET a small resource into memory.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::BodyTooLarge`] when the body exceeds `max_len`;
    /// network and protocol failures otherwise.
    pub async fn fetch_small(
        &self,
        location: &Location,
        max_len: usize,
    ) -> Result<Vec<u8>, OtaError> {
        let mut response = self.open(location, None).await?;
        let limit = u64::try_from(max_len).unwrap_or(u64::MAX);
        let declared = response.head.content_length;
        if let Some(len) = declared.filter(|len| *len > limit) {
            close_quietly(response.conn.as_mut()).await;
            return Err(ProtocolError::BodyTooLarge { size: len, limit: max_len }.into());
        }

        let mut body = std::mem::take(&mut response.leftover);
        let mut buf = vec![0u8; self.policy.recv_buffer_len];
        loop {
            let have = body.len() as u64;
            if let Some(len) = declared.filter(|len| have >= *len) {
                body.truncate(usize::try_from(len).unwrap_or(usize::MAX));
                break;
            }
            if have > limit {
                close_quietly(response.conn.as_mut()).await;
                return Err(ProtocolError::BodyTooLarge { size: have, limit: max_len }.into());
            }
            let n = self.recv(response.conn.as_mut(), &mut buf).await?;
            if n == 0 {
                if declared.is_some() {
                    return Err(NetworkError::ConnectionClosed { received: have }.into());
                }
                break;
            }
            body.extend_from_slice(buf.get(..n).unwrap_or_default());
        }
        close_quietly(response.conn.as_mut()).await;
        debug!(%location, bytes = body.len(), "small file fetched");
        Ok(body)
    }

    /// Stream an image into `writer`, resuming after what it already holds.
    ///
    /// A resume asks for `Range: bytes=<written>-`. A `206` must start at
    /// that offset; a `200` restarts the body and the first `written` bytes
    /// are discarded. `resume` is updated as soon as a response is accepted,
    /// so a later attempt goes straight to the resolved location and must
    /// announce the same size. `on_progress` receives `(written, total)`
    /// every 64 KiB and at completion. Returns the image size.
    ///
    /// # Errors
    ///
    /// [`OtaError::Aborted`] when `abort` fires while connecting, following
    /// redirects or streaming,
    /// [`ProtocolError::EmptyImage`] for a zero-length image,
    /// [`ProtocolError::ImageTooLarge`] when the image cannot fit the slot,
    /// [`NetworkError::ConnectionClosed`] on an early close, and flash
    /// failures from the writer.
    pub async fn download(
        &self,
        resume: &mut ResumePoint,
        writer: &mut StagingWriter,
        abort: &mut AbortSignal,
        on_progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<u64, OtaError> {
        let offset = writer.written();
        let mut response = tokio::select! {
            biased;
            err = abort.aborted() => return Err(err),
            response = self.open(&resume.location, (offset > 0).then_some(offset)) => response?,
        };

        let (total, mut skip) = match (response.head.status, response.head.content_range) {
            (206, Some(range)) => {
                if range.start != offset {
                    close_quietly(response.conn.as_mut()).await;
                    return Err(ProtocolError::malformed(format!(
                        "range starts at {}, requested {offset}",
                        range.start
                    ))
                    .into());
                }
                let total = range.total.ok_or(ProtocolError::MissingHeader("Content-Range"))?;
                (total, 0)
            }
            (206, None) => return Err(ProtocolError::MissingHeader("Content-Range").into()),
            (200, _) => {
                let total = response
                    .head
                    .content_length
                    .ok_or(ProtocolError::MissingHeader("Content-Length"))?;
                if offset > 0 {
                    debug!(offset, "server ignored range, discarding resent prefix");
                }
                (total, offset)
            }
            (status, _) => return Err(ProtocolError::UnexpectedStatus(status).into()),
        };

        if let Some(expected) = resume.total.filter(|expected| *expected != total) {
            return Err(ProtocolError::UnexpectedSize { expected, actual: total }.into());
        }
        if total == 0 {
            close_quietly(response.conn.as_mut()).await;
            return Err(ProtocolError::EmptyImage.into());
        }
        if total > writer.capacity() {
            return Err(ProtocolError::ImageTooLarge {
                size: total,
                max: writer.capacity(),
            }
            .into());
        }
        if total < offset {
            return Err(ProtocolError::UnexpectedSize {
                expected: offset,
                actual: total,
            }
            .into());
        }
        debug!(location = %response.location, offset, total, "image transfer started");
        resume.location = response.location.clone();
        resume.total = Some(total);

        let leftover = std::mem::take(&mut response.leftover);
        let mut received = leftover.len() as u64;
        store(writer, &leftover, &mut skip, total).await?;
        let mut reported = writer.written() / PROGRESS_STEP;

        let mut buf = vec![0u8; self.policy.recv_buffer_len];
        while writer.written() < total {
            let n = tokio::select! {
                biased;
                err = abort.aborted() => return Err(err),
                n = self.recv(response.conn.as_mut(), &mut buf) => n?,
            };
            if n == 0 {
                warn!(
                    received,
                    written = writer.written(),
                    total,
                    "connection closed mid-transfer"
                );
                return Err(NetworkError::ConnectionClosed { received }.into());
            }
            received = received.saturating_add(n as u64);
            store(writer, buf.get(..n).unwrap_or_default(), &mut skip, total).await?;

            let step = writer.written() / PROGRESS_STEP;
            if step != reported {
                reported = step;
                on_progress(writer.written(), total);
            }
        }
        on_progress(writer.written(), total);
        close_quietly(response.conn.as_mut()).await;
        Ok(total)
    }

    /// Connect and send, following redirects until a 2xx head arrives.
    async fn open(
        &self,
        start: &Location,
        range_from: Option<u64>,
    ) -> Result<OpenResponse, OtaError> {
        let mut location = start.clone();
        let mut hops: u8 = 0;
        loop {
            let mut conn = self.connect(&location).await?;
            self.send(conn.as_mut(), &build_request(&location, range_from))
                .await?;
            let (head, leftover) = self.read_head(conn.as_mut()).await?;

            if head.is_redirect() {
                close_quietly(conn.as_mut()).await;
                if hops >= self.policy.max_redirects {
                    warn!(%start, max_hops = self.policy.max_redirects, "too many redirects");
                    return Err(NetworkError::RedirectLimit {
                        max_hops: self.policy.max_redirects,
                    }
                    .into());
                }
                hops = hops.saturating_add(1);
                let target = head.location.as_deref().ok_or(ProtocolError::MissingLocation)?;
                location = location.resolve_redirect(target)?;
                debug!(hop = hops, status = head.status, to = %location, "following redirect");
                continue;
            }

            if !head.is_success() {
                close_quietly(conn.as_mut()).await;
                debug!(%location, status = head.status, "unexpected status");
                return Err(ProtocolError::UnexpectedStatus(head.status).into());
            }

            return Ok(OpenResponse {
                location,
                head,
                conn,
                leftover,
            });
        }
    }

    async fn read_head(
        &self,
        conn: &mut dyn Connection,
    ) -> Result<(ResponseHead, Vec<u8>), OtaError> {
        let limit = self.policy.header_buffer_len;
        let mut head_buf = Vec::with_capacity(self.policy.recv_buffer_len);
        let mut buf = vec![0u8; self.policy.recv_buffer_len];
        loop {
            let n = self.recv(conn, &mut buf).await?;
            if n == 0 {
                return Err(NetworkError::ConnectionClosed { received: 0 }.into());
            }
            head_buf.extend_from_slice(buf.get(..n).unwrap_or_default());

            if let Some(head) = parse_head(&head_buf)? {
                if head.header_len > limit {
                    return Err(ProtocolError::HeaderTooLarge { limit }.into());
                }
                let leftover = head_buf.split_off(head.header_len);
                trace!(status = head.status, header_len = head.header_len, "response head");
                return Ok((head, leftover));
            }
            if head_buf.len() >= limit {
                return Err(ProtocolError::HeaderTooLarge { limit }.into());
            }
        }
    }

    async fn connect(&self, location: &Location) -> Result<Box<dyn Connection>, NetworkError> {
        let limit = self.policy.connect_timeout;
        match timeout(limit, self.transport.connect(&location.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::timeout(
                format!("connect to {}", location.endpoint),
                millis(limit),
            )),
        }
    }

    async fn send(&self, conn: &mut dyn Connection, data: &[u8]) -> Result<(), NetworkError> {
        let limit = self.policy.read_timeout;
        match timeout(limit, conn.send(data)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::timeout("send", millis(limit))),
        }
    }

    async fn recv(&self, conn: &mut dyn Connection, buf: &mut [u8]) -> Result<usize, NetworkError> {
        let limit = self.policy.read_timeout;
        match timeout(limit, conn.recv(buf)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::timeout("receive", millis(limit))),
        }
    }
}

/// Append `data` after dropping `skip` leading bytes, never past `total`.
async fn store(
    writer: &mut StagingWriter,
    data: &[u8],
    skip: &mut u64,
    total: u64,
) -> Result<(), FlashError> {
    let discard = usize::try_from(*skip).unwrap_or(usize::MAX).min(data.len());
    *skip = skip.saturating_sub(discard as u64);
    let data = data.get(discard..).unwrap_or_default();
    let room = usize::try_from(total.saturating_sub(writer.written())).unwrap_or(usize::MAX);
    writer.append(data.get(..room.min(data.len())).unwrap_or_default()).await
}

async fn close_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        trace!(error = %e, "close failed");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
