//! Scripted HTTP repository.
//!
//! [`ScriptedRepository`] implements [`Transport`] without sockets: each
//! connection reads one request, looks up the `(host, path)` route and plays
//! back a canned HTTP/1.1 response. Routes can serve files with or without
//! range support, redirect, fail with a status, stall, or cut the body short.
//! Every request is recorded for later assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use haa_ota_errors::NetworkError;
use haa_ota_update::{Connection, Endpoint, OtaConfig, Transport};
use parking_lot::Mutex;
use tracing::trace;

/// How a route answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Serve `body`, answering range requests with `206` when `ranges` is set
    File {
        /// Resource contents
        body: Vec<u8>,
        /// Whether `Range` is honoured
        ranges: bool,
    },
    /// Redirect to `location`
    Redirect {
        /// 301, 302, 303, 307 or 308
        status: u16,
        /// `Location` header value
        location: String,
    },
    /// Empty response with this status
    Status(u16),
    /// Accept the request and never answer
    Stall,
    /// Send these bytes verbatim, then close
    Raw(Vec<u8>),
}

/// A request seen by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Host connected to
    pub host: String,
    /// Whether TLS was requested
    pub tls: bool,
    /// Request target
    pub path: String,
    /// Offset of a `Range: bytes=<offset>-` header
    pub range_from: Option<u64>,
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<(String, String), Reply>,
    once: HashMap<(String, String), VecDeque<Reply>>,
    cuts: HashMap<(String, String), VecDeque<usize>>,
    unreachable: HashSet<String>,
    requests: Vec<RecordedRequest>,
    connects: usize,
}

/// In-memory [`Transport`] playing back scripted responses.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRepository {
    script: Arc<Mutex<Script>>,
}

fn key(host: &str, path: &str) -> (String, String) {
    (host.to_string(), path.to_string())
}

impl ScriptedRepository {
    /// Repository with no routes; every request gets a 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `reply` for every request to `host` + `path`.
    pub fn route(&self, host: &str, path: &str, reply: Reply) -> &Self {
        self.script.lock().routes.insert(key(host, path), reply);
        self
    }

    /// Serve a file with range support.
    pub fn serve(&self, host: &str, path: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.route(
            host,
            path,
            Reply::File {
                body: body.into(),
                ranges: true,
            },
        )
    }

    /// Serve a file, ignoring `Range` headers.
    pub fn serve_without_ranges(&self, host: &str, path: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.route(
            host,
            path,
            Reply::File {
                body: body.into(),
                ranges: false,
            },
        )
    }

    /// Redirect with a 302.
    pub fn redirect(&self, host: &str, path: &str, location: &str) -> &Self {
        self.route(
            host,
            path,
            Reply::Redirect {
                status: 302,
                location: location.to_string(),
            },
        )
    }

    /// Answer the next request to the route with `reply`, then fall back to
    /// the installed route. Queued replies are used in order.
    pub fn once(&self, host: &str, path: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .once
            .entry(key(host, path))
            .or_default()
            .push_back(reply);
        self
    }

    /// Close the next response of the route after `body_bytes` body bytes.
    pub fn cut_next(&self, host: &str, path: &str, body_bytes: usize) -> &Self {
        self.script
            .lock()
            .cuts
            .entry(key(host, path))
            .or_default()
            .push_back(body_bytes);
        self
    }

    /// Refuse connections to `host`.
    pub fn unreachable(&self, host: &str) -> &Self {
        self.script.lock().unreachable.insert(host.to_string());
        self
    }

    /// Publish a release at the locations `config` points to.
    pub fn publish_release(
        &self,
        config: &OtaConfig,
        version: &str,
        image: &[u8],
        signature: &[u8],
    ) -> &Self {
        let files = [
            (config.artifacts.version_file.clone(), version.as_bytes().to_vec()),
            (config.artifacts.image_file.clone(), image.to_vec()),
            (config.artifacts.signature_file(), signature.to_vec()),
        ];
        for (name, body) in files {
            if let Ok(location) = config.repository.location_of(&name) {
                self.serve(&location.endpoint.host, &location.path, body);
            }
        }
        self
    }

    /// All requests so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().requests.clone()
    }

    /// Requests whose path ends with `suffix`.
    pub fn requests_for(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path.ends_with(suffix))
            .collect()
    }

    /// Connections opened so far.
    pub fn connects(&self) -> usize {
        self.script.lock().connects
    }

    fn respond(&self, endpoint: &Endpoint, request: &[u8]) -> Response {
        let text = String::from_utf8_lossy(request);
        let mut lines = text.split("\r\n");
        let path = lines
            .next()
            .and_then(|line| line.split(' ').nth(1))
            .unwrap_or("/")
            .to_string();
        let range_from = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("range"))
            .and_then(|(_, value)| value.trim().strip_prefix("bytes="))
            .and_then(|spec| spec.trim_end_matches('-').parse::<u64>().ok());

        let mut script = self.script.lock();
        script.requests.push(RecordedRequest {
            host: endpoint.host.clone(),
            tls: endpoint.tls,
            path: path.clone(),
            range_from,
        });
        trace!(host = %endpoint.host, %path, ?range_from, "scripted request");

        let route = key(&endpoint.host, &path);
        let reply = script
            .once
            .get_mut(&route)
            .and_then(VecDeque::pop_front)
            .or_else(|| script.routes.get(&route).cloned())
            .unwrap_or(Reply::Status(404));
        let cut = script.cuts.get_mut(&route).and_then(VecDeque::pop_front);
        drop(script);

        match reply {
            Reply::Stall => Response::Stall,
            Reply::Raw(bytes) => Response::Bytes(bytes),
            Reply::Status(status) => {
                Response::Bytes(head(status, &[("Content-Length", "0".into())]))
            }
            Reply::Redirect { status, location } => Response::Bytes(head(
                status,
                &[("Location", location), ("Content-Length", "0".into())],
            )),
            Reply::File { body, ranges } => {
                let len = body.len();
                let (mut bytes, payload) = match range_from.filter(|_| ranges) {
                    Some(offset) => {
                        let start = usize::try_from(offset).unwrap_or(usize::MAX);
                        if start >= len {
                            let bytes = head(
                                416,
                                &[
                                    ("Content-Range", format!("bytes */{len}")),
                                    ("Content-Length", "0".into()),
                                ],
                            );
                            return Response::Bytes(bytes);
                        }
                        let last = len.saturating_sub(1);
                        let bytes = head(
                            206,
                            &[
                                ("Content-Range", format!("bytes {start}-{last}/{len}")),
                                ("Content-Length", (len - start).to_string()),
                            ],
                        );
                        (bytes, body.get(start..).unwrap_or_default().to_vec())
                    }
                    None => (head(200, &[("Content-Length", len.to_string())]), body),
                };
                let keep = cut.unwrap_or(payload.len()).min(payload.len());
                bytes.extend_from_slice(payload.get(..keep).unwrap_or_default());
                Response::Bytes(bytes)
            }
        }
    }
}

fn head(status: u16, headers: &[(&str, String)]) -> Vec<u8> {
    let mut text = format!("HTTP/1.1 {status} Scripted\r\n");
    for (name, value) in headers {
        text.push_str(name);
        text.push_str(": ");
        text.push_str(value);
        text.push_str("\r\n");
    }
    text.push_str("\r\n");
    text.into_bytes()
}

enum Response {
    Bytes(Vec<u8>),
    Stall,
}

#[async_trait]
impl Transport for ScriptedRepository {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, NetworkError> {
        {
            let mut script = self.script.lock();
            if script.unreachable.contains(&endpoint.host) {
                return Err(NetworkError::connect(
                    &endpoint.host,
                    endpoint.port,
                    "connection refused",
                ));
            }
            script.connects += 1;
        }
        Ok(Box::new(ScriptedConnection {
            repository: self.clone(),
            endpoint: endpoint.clone(),
            request: Vec::new(),
            response: None,
            pos: 0,
        }))
    }
}

struct ScriptedConnection {
    repository: ScriptedRepository,
    endpoint: Endpoint,
    request: Vec<u8>,
    response: Option<Response>,
    pos: usize,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, data: &[u8]) -> Result<(), NetworkError> {
        self.request.extend_from_slice(data);
        if self.response.is_none() && self.request.windows(4).any(|w| w == b"\r\n\r\n") {
            self.response = Some(self.repository.respond(&self.endpoint, &self.request));
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        match &self.response {
            None => Err(NetworkError::Receive("no request sent".into())),
            Some(Response::Stall) => std::future::pending().await,
            Some(Response::Bytes(bytes)) => {
                let rest = bytes.get(self.pos..).unwrap_or_default();
                let n = rest.len().min(buf.len());
                if let (Some(dst), Some(src)) = (buf.get_mut(..n), rest.get(..n)) {
                    dst.copy_from_slice(src);
                }
                self.pos += n;
                Ok(n)
            }
        }
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }
}
