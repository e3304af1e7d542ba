use std::ops::{BitOr, BitOrAssign};

use bytes::Bytes;
use http::{
    header::{HeaderName, HeaderValue},
    HeaderMap, Method,
};
use url::{Origin, Url};

use crate::RoutingId;

/// A request as issued by a loading client.
///
/// The proxy keeps its own copy for every intercepted load and edits it in place (listener
/// header edits, redirects).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub site_for_cookies: Option<Url>,
    /// Origin of the context that initiated the load.
    ///
    /// An opaque origin stands for a tainted (`null`) initiator.
    pub request_initiator: Option<Origin>,
    pub referrer: Option<Url>,
    pub referrer_policy: ReferrerPolicy,
    pub render_frame_id: RoutingId,
}

impl ResourceRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            site_for_cookies: Some(url.clone()),
            url,
            headers: Default::default(),
            body: None,
            request_initiator: None,
            referrer: None,
            referrer_policy: Default::default(),
            render_frame_id: 0,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_initiator(mut self, initiator: Origin) -> Self {
        self.request_initiator = Some(initiator);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Removes every header in `removed`, then applies `modified` on top, replacing existing
    /// values.
    pub fn apply_header_edits<'a, I>(&mut self, removed: I, modified: &HeaderMap)
    where
        I: IntoIterator<Item = &'a HeaderName>,
    {
        for name in removed {
            self.headers.remove(name);
        }

        merge_headers(&mut self.headers, modified);
    }
}

/// Copies every header from `from` into `into`, replacing all values already present under the
/// same name.
pub fn merge_headers(into: &mut HeaderMap, from: &HeaderMap) {
    for name in from.keys() {
        into.remove(name);
    }

    for (name, value) in from {
        into.append(name.clone(), value.clone());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReferrerPolicy {
    #[default]
    ClearReferrerOnTransitionFromSecureToInsecure,
    ReduceReferrerGranularityOnTransitionCrossOrigin,
    OriginOnlyOnTransitionCrossOrigin,
    NeverClearReferrer,
    Origin,
    ClearReferrerOnTransitionCrossOrigin,
    OriginClearOnTransitionFromSecureToInsecure,
    NoReferrer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestPriority {
    Throttled,
    Idle,
    #[default]
    Lowest,
    Low,
    Medium,
    Highest,
}

/// Bit set of options passed along with a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoadOptions(u32);

impl LoadOptions {
    pub const NONE: Self = Self(0);
    pub const SEND_SSL_INFO_WITH_RESPONSE: Self = Self(1 << 0);
    pub const SYNCHRONOUS: Self = Self(1 << 1);
    /// The network stack should call back through the trusted header client.
    pub const USE_HEADER_CLIENT: Self = Self(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LoadOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LoadOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use http::header::{ACCEPT, COOKIE, USER_AGENT};

    use super::*;

    #[test]
    fn header_edits_remove_then_replace() {
        let mut request = ResourceRequest::get("https://a.example/x".parse().unwrap())
            .with_header(COOKIE, HeaderValue::from_static("a=b"))
            .with_header(ACCEPT, HeaderValue::from_static("*/*"));

        let mut modified = HeaderMap::new();
        modified.insert(ACCEPT, HeaderValue::from_static("text/html"));
        modified.insert(USER_AGENT, HeaderValue::from_static("webreq"));

        request.apply_header_edits(&[COOKIE], &modified);

        assert!(request.headers.get(COOKIE).is_none());
        assert_eq!(request.headers.get_all(ACCEPT).iter().count(), 1);
        assert_eq!(request.headers[ACCEPT], "text/html");
        assert_eq!(request.headers[USER_AGENT], "webreq");
    }

    #[test]
    fn load_options_compose() {
        let options = LoadOptions::SYNCHRONOUS | LoadOptions::USE_HEADER_CLIENT;
        assert!(options.contains(LoadOptions::USE_HEADER_CLIENT));
        assert!(!options.contains(LoadOptions::SEND_SSL_INFO_WITH_RESPONSE));
        assert_eq!(LoadOptions::from_bits(options.bits()), options);
    }
}
