//! Minimal HTTP/1.1 pieces used by the fetch client.
//!
//! Requests are plain `GET`s with an optional open-ended byte range. Response
//! heads are parsed with `httparse`; bodies are never buffered here.

use std::fmt;

use haa_ota_errors::{ConfigError, ProtocolError};

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;
const MAX_HEADERS: usize = 64;

/// A host to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Whether the connection uses TLS
    pub tls: bool,
}

impl Endpoint {
    fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// An absolute resource location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// Where to connect
    pub endpoint: Endpoint,
    /// Request target, always starting with `/`
    pub path: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.endpoint, self.path)
    }
}

impl Location {
    /// Location of `file` in a repository given as `host[/base/path]`.
    ///
    /// A leading `http://` or `https://` is tolerated and ignored; `tls` and
    /// `port` decide how to connect.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidRepository`] when no host is given.
    pub fn in_repository(
        repository: &str,
        port: u16,
        tls: bool,
        file: &str,
    ) -> Result<Self, ConfigError> {
        let bare = repository
            .strip_prefix("https://")
            .or_else(|| repository.strip_prefix("http://"))
            .unwrap_or(repository);
        let (host, base) = bare.split_once('/').unwrap_or((bare, ""));
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidRepository(repository.to_string()));
        }

        let mut path = String::from("/");
        let base = base.trim_matches('/');
        if !base.is_empty() {
            path.push_str(base);
            path.push('/');
        }
        path.push_str(file.trim_start_matches('/'));

        Ok(Self {
            endpoint: Endpoint {
                host: host.to_string(),
                port,
                tls,
            },
            path,
        })
    }

    /// Resolve a `Location` header received while fetching `self`.
    ///
    /// Absolute (`https://host[:port]/path`), scheme-relative (`//host/path`),
    /// origin-relative (`/path`) and path-relative targets are accepted.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingLocation`] for an empty or unusable target.
    pub fn resolve_redirect(&self, target: &str) -> Result<Self, ProtocolError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ProtocolError::MissingLocation);
        }

        let absolute = if let Some(rest) = target.strip_prefix("https://") {
            Some((true, rest))
        } else if let Some(rest) = target.strip_prefix("http://") {
            Some((false, rest))
        } else {
            target.strip_prefix("//").map(|rest| (self.endpoint.tls, rest))
        };

        if let Some((tls, rest)) = absolute {
            let (authority, path) = match rest.find('/') {
                Some(pos) => rest.split_at(pos),
                None => (rest, "/"),
            };
            let endpoint = parse_authority(authority, tls)?;
            return Ok(Self {
                endpoint,
                path: path.to_string(),
            });
        }

        let path = if target.starts_with('/') {
            target.to_string()
        } else {
            let dir = self
                .path
                .rfind('/')
                .and_then(|pos| self.path.get(..=pos))
                .unwrap_or("/");
            format!("{dir}{target}")
        };
        Ok(Self {
            endpoint: self.endpoint.clone(),
            path,
        })
    }
}

fn parse_authority(authority: &str, tls: bool) -> Result<Endpoint, ProtocolError> {
    let default_port = if tls { HTTPS_PORT } else { HTTP_PORT };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|e| ProtocolError::malformed(format!("redirect port '{port}': {e}")))?,
        ),
        None => (authority, default_port),
    };
    if host.is_empty() {
        return Err(ProtocolError::MissingLocation);
    }
    Ok(Endpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Encode a `GET` for `location`, asking for everything from `range_from` on.
pub fn build_request(location: &Location, range_from: Option<u64>) -> Vec<u8> {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\n",
        location.path, location.endpoint.host
    );
    if let Some(offset) = range_from {
        request.push_str(&format!("Range: bytes={offset}-\r\n"));
    }
    request.push_str("\r\n");
    request.into_bytes()
}

/// A `Content-Range: bytes a-b/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte delivered
    pub start: u64,
    /// Last byte delivered, inclusive
    pub end: u64,
    /// Complete resource size when known
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse a header value.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedResponse`] when the value is not a byte range.
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::malformed(format!("bad Content-Range '{value}'"));
        let spec = value.trim().strip_prefix("bytes ").ok_or_else(malformed)?;
        let (range, total) = spec.split_once('/').ok_or_else(malformed)?;
        let (start, end) = range.split_once('-').ok_or_else(malformed)?;
        let start: u64 = start.trim().parse().ok().ok_or_else(malformed)?;
        let end: u64 = end.trim().parse().ok().ok_or_else(malformed)?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().ok().ok_or_else(malformed)?),
        };
        if end < start || total.is_some_and(|t| end >= t) {
            return Err(malformed());
        }
        Ok(Self { start, end, total })
    }
}

/// The parts of a response head the client acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code
    pub status: u16,
    /// `Location` header
    pub location: Option<String>,
    /// `Content-Length` header
    pub content_length: Option<u64>,
    /// `Content-Range` header
    pub content_range: Option<ContentRange>,
    /// Bytes taken by the status line and headers
    pub header_len: usize,
}

impl ResponseHead {
    /// Whether the status asks the client to go elsewhere.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Whether the status is a 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parse a response head from the start of `buf`.
///
/// Returns `Ok(None)` while the head is incomplete.
///
/// # Errors
///
/// [`ProtocolError::MalformedResponse`] for unparseable heads or header
/// values.
pub fn parse_head(buf: &[u8]) -> Result<Option<ResponseHead>, ProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let header_len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProtocolError::malformed(e.to_string())),
    };
    let status = response
        .code
        .ok_or_else(|| ProtocolError::malformed("missing status code"))?;

    let mut head = ResponseHead {
        status,
        location: None,
        content_length: None,
        content_range: None,
        header_len,
    };
    for header in response.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|e| ProtocolError::malformed(format!("{} header: {e}", header.name)))?;
        if header.name.eq_ignore_ascii_case("location") {
            head.location = Some(value.trim().to_string());
        } else if header.name.eq_ignore_ascii_case("content-length") {
            let len = value
                .trim()
                .parse::<u64>()
                .map_err(|e| ProtocolError::malformed(format!("Content-Length '{value}': {e}")))?;
            head.content_length = Some(len);
        } else if header.name.eq_ignore_ascii_case("content-range") {
            head.content_range = Some(ContentRange::parse(value)?);
        }
    }
    Ok(Some(head))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(file: &str) -> Result<Location, ConfigError> {
        Location::in_repository(
            "github.com/RavenSystem/haa/releases/latest/download",
            443,
            true,
            file,
        )
    }

    #[test]
    fn test_repository_location() -> Result<(), ConfigError> {
        let loc = repo("haaversion")?;
        assert_eq!(loc.endpoint.host, "github.com");
        assert_eq!(loc.path, "/RavenSystem/haa/releases/latest/download/haaversion");
        assert_eq!(
            loc.to_string(),
            "https://github.com:443/RavenSystem/haa/releases/latest/download/haaversion"
        );

        let bare = Location::in_repository("updates.local", 8080, false, "haamain.bin")?;
        assert_eq!(bare.path, "/haamain.bin");
        Ok(())
    }

    #[test]
    fn test_repository_without_host() {
        assert!(matches!(
            Location::in_repository("/only/path", 443, true, "f"),
            Err(ConfigError::InvalidRepository(_))
        ));
    }

    #[test]
    fn test_redirect_forms() -> Result<(), Box<dyn std::error::Error>> {
        let loc = repo("haamain.bin")?;

        let abs = loc.resolve_redirect("https://objects.example.com/a/b?sig=1")?;
        assert_eq!(abs.endpoint.host, "objects.example.com");
        assert_eq!(abs.endpoint.port, 443);
        assert_eq!(abs.path, "/a/b?sig=1");

        let plain = loc.resolve_redirect("http://mirror:8080")?;
        assert!(!plain.endpoint.tls);
        assert_eq!(plain.endpoint.port, 8080);
        assert_eq!(plain.path, "/");

        let scheme_relative = loc.resolve_redirect("//cdn.example.com/x")?;
        assert!(scheme_relative.endpoint.tls);
        assert_eq!(scheme_relative.endpoint.host, "cdn.example.com");

        let origin = loc.resolve_redirect("/other")?;
        assert_eq!(origin.endpoint, loc.endpoint);
        assert_eq!(origin.path, "/other");

        let relative = loc.resolve_redirect("v2/haamain.bin")?;
        assert_eq!(
            relative.path,
            "/RavenSystem/haa/releases/latest/download/v2/haamain.bin"
        );

        assert!(matches!(
            loc.resolve_redirect("  "),
            Err(ProtocolError::MissingLocation)
        ));
        Ok(())
    }

    #[test]
    fn test_request_encoding() -> Result<(), ConfigError> {
        let loc = Location::in_repository("example.com/fw", 80, false, "haamain.bin")?;
        assert_eq!(
            build_request(&loc, None),
            b"GET /fw/haamain.bin HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec()
        );
        assert_eq!(
            build_request(&loc, Some(4096)),
            b"GET /fw/haamain.bin HTTP/1.1\r\nHost: example.com\r\nRange: bytes=4096-\r\n\r\n"
                .to_vec()
        );
        Ok(())
    }

    #[test]
    fn test_parse_partial_content() -> Result<(), ProtocolError> {
        let raw = b"HTTP/1.1 206 Partial Content\r\n\
            Content-Range: bytes 100-199/1000\r\n\
            content-length: 100\r\n\r\nBODY";
        let head = parse_head(raw)?.ok_or_else(|| ProtocolError::malformed("incomplete"))?;
        assert_eq!(head.status, 206);
        assert_eq!(head.content_length, Some(100));
        assert_eq!(
            head.content_range,
            Some(ContentRange {
                start: 100,
                end: 199,
                total: Some(1000)
            })
        );
        assert_eq!(raw.get(head.header_len..), Some(&b"BODY"[..]));
        Ok(())
    }

    #[test]
    fn test_parse_incomplete_head() -> Result<(), ProtocolError> {
        assert_eq!(parse_head(b"HTTP/1.1 302 Found\r\nLocation: /x\r\n")?, None);
        Ok(())
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_head(b"NOT HTTP AT ALL\r\n\r\n").is_err());
    }

    #[test]
    fn test_content_range_rejects_nonsense() {
        for bad in ["bytes 5-1/10", "bytes 0-10/10", "items 0-1/2", "bytes 0-1", "bytes a-b/c"] {
            assert!(ContentRange::parse(bad).is_err(), "{bad}");
        }
        assert!(matches!(
            ContentRange::parse("bytes 0-9/*"),
            Ok(ContentRange { total: None, .. })
        ));
    }
}
