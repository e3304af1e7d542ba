use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use http::{
    header::{HeaderName, HeaderValue, LOCATION},
    HeaderMap, Method, StatusCode, Version,
};
use url::Url;

use crate::{HeaderParseError, NetError, ReferrerPolicy};

/// Parsed response status line and headers.
///
/// Can be built from a raw header block (as delivered by the trusted header client, or as
/// produced by a listener) and rendered back into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
}

impl ResponseHeaders {
    /// Number of headers parsed without allocating. Larger blocks are parsed again with storage
    /// sized from their line count.
    const INLINE_HEADERS: usize = 128;

    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::HTTP_11,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: Default::default(),
        }
    }

    /// Parses a raw header block, e.g. `HTTP/1.1 302 Found\r\nLocation: /y\r\n\r\n`.
    ///
    /// Both `\r\n` and bare `\n` line endings are accepted, and the terminating empty line may be
    /// omitted. There is no limit on the number of headers.
    pub fn parse(raw: &str) -> Result<Self, HeaderParseError> {
        let block = raw.trim_end_matches(['\r', '\n']);
        if block.trim().is_empty() {
            return Err(HeaderParseError::Empty);
        }

        let block = format!("{block}\r\n\r\n");
        let mut storage = [httparse::EMPTY_HEADER; Self::INLINE_HEADERS];

        match Self::parse_block(&block, &mut storage) {
            Err(HeaderParseError::Malformed(httparse::Error::TooManyHeaders)) => {
                let mut storage = vec![httparse::EMPTY_HEADER; block.lines().count()];
                Self::parse_block(&block, &mut storage)
            }
            result => result,
        }
    }

    fn parse_block<'b>(
        block: &'b str,
        storage: &mut [httparse::Header<'b>],
    ) -> Result<Self, HeaderParseError> {
        let mut response = httparse::Response::new(storage);

        if response.parse(block.as_bytes())?.is_partial() {
            return Err(HeaderParseError::Incomplete);
        }

        let code = response.code.ok_or(HeaderParseError::Incomplete)?;
        let status =
            StatusCode::from_u16(code).map_err(|_| HeaderParseError::InvalidStatus(code))?;
        let version = match response.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let mut headers = HeaderMap::with_capacity(response.headers.len());
        for header in response.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| HeaderParseError::InvalidHeader(header.name.to_owned()))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| HeaderParseError::InvalidHeader(header.name.to_owned()))?;
            headers.append(name, value);
        }

        Ok(Self {
            version,
            status,
            reason: response.reason.unwrap_or_default().to_owned(),
            headers,
        })
    }

    /// Renders these headers as a raw header block, terminated with an empty line.
    ///
    /// Header values are copied byte for byte, including obs-text.
    pub fn to_raw(&self) -> Bytes {
        let mut raw = BytesMut::new();
        raw.put_slice(
            format!(
                "{:?} {} {}\r\n",
                self.version,
                self.status.as_u16(),
                self.reason
            )
            .as_bytes(),
        );

        for (name, value) in &self.headers {
            raw.put_slice(name.as_str().as_bytes());
            raw.put_slice(b": ");
            raw.put_slice(value.as_bytes());
            raw.put_slice(b"\r\n");
        }

        raw.put_slice(b"\r\n");
        raw.freeze()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the `Location` value if these headers describe a redirect.
    pub fn redirect_location(&self) -> Option<&str> {
        let is_redirect_status = matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308);
        if !is_redirect_status {
            return None;
        }

        self.headers
            .get(LOCATION)
            .and_then(|location| location.to_str().ok())
            .filter(|location| !location.is_empty())
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect_location().is_some()
    }
}

/// Head of a response (or of a redirect) delivered to a loading client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub headers: Option<ResponseHeaders>,
    pub mime_type: Option<String>,
    pub encoded_data_length: i64,
    pub remote_endpoint: Option<SocketAddr>,
}

impl ResponseHead {
    pub fn with_headers(headers: ResponseHeaders) -> Self {
        Self {
            headers: Some(headers),
            ..Default::default()
        }
    }
}

/// Describes where a redirect leads and how the request changes when it is followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInfo {
    pub status_code: StatusCode,
    pub new_method: Method,
    pub new_url: Url,
    pub new_site_for_cookies: Option<Url>,
    pub new_referrer: Option<Url>,
    pub new_referrer_policy: ReferrerPolicy,
}

/// Final status of a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStatus {
    /// [`None`] when the load succeeded.
    pub error: Option<NetError>,
    pub encoded_data_length: i64,
    pub encoded_body_length: i64,
    pub decoded_body_length: i64,
}

impl CompletionStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_error(error: NetError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<NetError> for CompletionStatus {
    fn from(error: NetError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_bare_newlines_without_terminator() {
        let headers = ResponseHeaders::parse(
            "HTTP/1.1 307 Internal Redirect\nLocation: https://b.example/\nNon-Authoritative-Reason: WebRequest API",
        )
        .unwrap();

        assert_eq!(headers.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(headers.reason(), "Internal Redirect");
        assert_eq!(headers.redirect_location(), Some("https://b.example/"));
        assert_eq!(headers.headers()["non-authoritative-reason"], "WebRequest API");
    }

    #[test]
    fn raw_form_parses_back() {
        let mut headers = ResponseHeaders::new(StatusCode::OK);
        headers
            .headers_mut()
            .append("set-cookie", HeaderValue::from_static("a=1"));
        headers
            .headers_mut()
            .append("set-cookie", HeaderValue::from_static("b=2"));

        let raw = headers.to_raw();
        assert!(raw.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(raw.ends_with(b"\r\n\r\n"));
        assert_eq!(
            ResponseHeaders::parse(std::str::from_utf8(&raw).unwrap()).unwrap(),
            headers
        );
    }

    #[test]
    fn raw_form_keeps_obs_text() {
        let mut headers = ResponseHeaders::new(StatusCode::OK);
        headers
            .headers_mut()
            .insert("x-legacy", HeaderValue::from_bytes(b"caf\xe9").unwrap());

        let raw = headers.to_raw();
        assert!(raw
            .windows(b"x-legacy: caf\xe9\r\n".len())
            .any(|line| line == b"x-legacy: caf\xe9\r\n"));
    }

    #[test]
    fn parses_more_headers_than_fit_inline() {
        let mut raw = String::from("HTTP/1.1 200 OK\r\n");
        for i in 0..=ResponseHeaders::INLINE_HEADERS {
            raw.push_str(&format!("Set-Cookie: c{i}=v\r\n"));
        }

        let headers = ResponseHeaders::parse(&raw).unwrap();
        assert_eq!(
            headers.headers().get_all("set-cookie").iter().count(),
            ResponseHeaders::INLINE_HEADERS + 1
        );
        assert_eq!(headers.headers()["set-cookie"], "c0=v");
    }

    #[rstest]
    #[case::found("HTTP/1.1 302 Found\r\nLocation: /y", Some("/y"))]
    #[case::permanent("HTTP/1.1 308 Permanent Redirect\r\nLocation: https://c.example", Some("https://c.example"))]
    #[case::no_location("HTTP/1.1 301 Moved Permanently", None)]
    #[case::not_modified("HTTP/1.1 304 Not Modified\r\nLocation: /y", None)]
    #[case::ok("HTTP/1.1 200 OK\r\nLocation: /y", None)]
    fn redirect_detection(#[case] raw: &str, #[case] expected: Option<&str>) {
        let headers = ResponseHeaders::parse(raw).unwrap();
        assert_eq!(headers.redirect_location(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("\r\n\r\n")]
    #[case::garbage("definitely not http")]
    fn rejects_malformed_blocks(#[case] raw: &str) {
        assert!(ResponseHeaders::parse(raw).is_err());
    }
}
