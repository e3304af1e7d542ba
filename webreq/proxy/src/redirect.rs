//! Redirect helpers: buffered client redirects and redirects made up by the proxy.

use http::{
    header::{HeaderName, ORIGIN},
    HeaderMap, StatusCode,
};
use url::{Origin, Url};
use webreq_protocol::{
    loader::LoaderCommand, RedirectInfo, ReferrerPolicy, ResourceRequest, ResponseHead,
    ResponseHeaders,
};

use crate::{
    config::CorsMode,
    error::{ProxyError, Result},
    web_request::HeaderEdits,
};

/// Status of redirects made up by the proxy.
pub const INTERNAL_REDIRECT_STATUS: StatusCode = StatusCode::TEMPORARY_REDIRECT;

/// A client's `FollowRedirect` held back until listeners had a chance to edit the headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FollowRedirectParams {
    pub removed_headers: Vec<HeaderName>,
    pub modified_headers: HeaderMap,
    pub new_url: Option<Url>,
}

impl FollowRedirectParams {
    /// Adds listener edits on top of the client's ones.
    ///
    /// Values of set headers are taken from `headers`, the request headers after the edits were
    /// applied.
    pub fn merge_listener_edits(&mut self, edits: &HeaderEdits, headers: &HeaderMap) {
        self.removed_headers.extend(edits.removed.iter().cloned());

        for name in edits.set.keys() {
            if !headers.contains_key(name) {
                tracing::error!(header = %name, "header set by a listener is missing from the request");
                continue;
            }

            self.modified_headers.remove(name);
            for value in headers.get_all(name) {
                self.modified_headers.append(name.clone(), value.clone());
            }
        }
    }

    pub fn into_command(self) -> LoaderCommand {
        LoaderCommand::FollowRedirect {
            removed_headers: self.removed_headers,
            modified_headers: self.modified_headers,
            new_url: self.new_url,
        }
    }
}

/// Builds the [`RedirectInfo`] of a redirect the network stack never saw.
///
/// The referrer policy is reset to its default.
pub(crate) fn synthetic_redirect_info(
    status_code: StatusCode,
    request: &ResourceRequest,
    new_url: Url,
) -> RedirectInfo {
    RedirectInfo {
        status_code,
        new_method: request.method.clone(),
        new_site_for_cookies: Some(new_url.clone()),
        new_url,
        new_referrer: None,
        new_referrer_policy: ReferrerPolicy::default(),
    }
}

/// Resolves the `Location` of overriding response headers against the current url.
///
/// Returns [`None`] if the headers do not describe a redirect.
pub(crate) fn override_redirect_target(
    headers: &ResponseHeaders,
    current_url: &Url,
) -> Option<Result<Url>> {
    let location = headers.redirect_location()?;

    let target = current_url
        .join(location)
        .map_err(|source| ProxyError::InvalidRedirectLocation {
            location: location.to_owned(),
            source,
        });

    Some(target)
}

/// Builds the response head of an internal redirect to `new_url`.
///
/// In [`CorsMode::OutOfBlink`] this may taint `request`'s initiator, since the network stack
/// derives the `Origin` header of the redirected request from it.
pub(crate) fn internal_redirect_head(
    request: &mut ResourceRequest,
    new_url: &Url,
    cors_mode: CorsMode,
) -> Result<ResponseHead> {
    let mut raw = format!(
        "HTTP/1.1 {} Internal Redirect\r\nLocation: {new_url}\r\nNon-Authoritative-Reason: WebRequest API\r\n",
        INTERNAL_REDIRECT_STATUS.as_u16(),
    );

    match cors_mode {
        CorsMode::OutOfBlink => {
            if taints_initiator(request, new_url) {
                request.request_initiator = Some(Origin::new_opaque());
            }
        }
        CorsMode::Legacy => {
            if let Some(origin) = request.headers.get(ORIGIN) {
                let origin = String::from_utf8_lossy(origin.as_bytes());
                raw.push_str(&format!(
                    "Access-Control-Allow-Origin: {origin}\r\nAccess-Control-Allow-Credentials: true\r\n"
                ));
            }
        }
    }

    let headers = ResponseHeaders::parse(&raw)?;

    Ok(ResponseHead {
        headers: Some(headers),
        encoded_data_length: 0,
        ..Default::default()
    })
}

/// Whether a redirect to `new_url` must set the tainted origin flag.
///
/// That is the case when the redirect leaves the current origin and the initiator is not the
/// current origin either.
fn taints_initiator(request: &ResourceRequest, new_url: &Url) -> bool {
    let Some(initiator) = &request.request_initiator else {
        return false;
    };

    let current_origin = request.url.origin();
    new_url.origin() != current_origin && *initiator != current_origin
}

#[cfg(test)]
mod tests {
    use http::{
        header::{ACCEPT, COOKIE, USER_AGENT},
        HeaderValue,
    };
    use rstest::rstest;

    use super::*;

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    #[test]
    fn merges_listener_edits_into_buffered_redirect() {
        let mut params = FollowRedirectParams {
            removed_headers: vec![COOKIE],
            modified_headers: HeaderMap::from_iter([(ACCEPT, HeaderValue::from_static("*/*"))]),
            new_url: None,
        };

        let edits = HeaderEdits::default()
            .remove(USER_AGENT)
            .set(ACCEPT, HeaderValue::from_static("text/html"));
        let request_headers =
            HeaderMap::from_iter([(ACCEPT, HeaderValue::from_static("text/html"))]);

        params.merge_listener_edits(&edits, &request_headers);

        assert_eq!(params.removed_headers, vec![COOKIE, USER_AGENT]);
        assert_eq!(params.modified_headers[ACCEPT], "text/html");
        assert_eq!(params.modified_headers.len(), 1);
    }

    #[test]
    fn synthetic_redirect_resets_referrer_policy() {
        let mut request = ResourceRequest::get(url("https://a.example/x"));
        request.referrer_policy = ReferrerPolicy::NoReferrer;

        let info = synthetic_redirect_info(
            INTERNAL_REDIRECT_STATUS,
            &request,
            url("https://b.example/y"),
        );

        assert_eq!(info.new_referrer_policy, ReferrerPolicy::default());
        assert_eq!(info.new_method, request.method);
        assert_eq!(info.new_site_for_cookies, Some(url("https://b.example/y")));
        assert_eq!(info.new_referrer, None);
    }

    #[test]
    fn internal_redirect_head_is_307() {
        let mut request = ResourceRequest::get(url("https://a.example/x"));
        let head =
            internal_redirect_head(&mut request, &url("https://b.example/y"), CorsMode::OutOfBlink)
                .unwrap();

        let headers = head.headers.unwrap();
        assert_eq!(headers.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(headers.reason(), "Internal Redirect");
        assert_eq!(headers.redirect_location(), Some("https://b.example/y"));
        assert_eq!(headers.headers()["non-authoritative-reason"], "WebRequest API");
        assert_eq!(head.encoded_data_length, 0);
    }

    #[rstest]
    #[case::with_origin(Some("https://c.example"), true)]
    #[case::without_origin(None, false)]
    fn legacy_cors_headers(#[case] origin: Option<&'static str>, #[case] expect_cors: bool) {
        let mut request = ResourceRequest::get(url("https://a.example/x"));
        if let Some(origin) = origin {
            request = request.with_header(ORIGIN, HeaderValue::from_static(origin));
        }

        let head =
            internal_redirect_head(&mut request, &url("https://b.example/y"), CorsMode::Legacy)
                .unwrap();
        let headers = head.headers.unwrap();

        assert_eq!(
            headers.headers().contains_key("access-control-allow-origin"),
            expect_cors
        );
        if let Some(origin) = origin {
            assert_eq!(headers.headers()["access-control-allow-origin"], origin);
            assert_eq!(headers.headers()["access-control-allow-credentials"], "true");
        }
    }

    #[rstest]
    #[case::cross_origin_both("https://c.example", "https://b.example/y", true)]
    #[case::same_origin_redirect("https://c.example", "https://a.example/y", false)]
    #[case::same_origin_initiator("https://a.example", "https://b.example/y", false)]
    fn out_of_blink_taints_initiator(
        #[case] initiator: &str,
        #[case] new_url: &str,
        #[case] tainted: bool,
    ) {
        let initiator = url(initiator).origin();
        let mut request =
            ResourceRequest::get(url("https://a.example/x")).with_initiator(initiator.clone());

        internal_redirect_head(&mut request, &url(new_url), CorsMode::OutOfBlink).unwrap();

        let current = request.request_initiator.unwrap();
        assert_eq!(!current.is_tuple(), tainted);
        assert_eq!(current == initiator, !tainted);
    }

    #[rstest]
    #[case::relative("/y", Some("https://a.example/y"))]
    #[case::absolute("https://b.example/z", Some("https://b.example/z"))]
    fn resolves_override_location(#[case] location: &str, #[case] expected: Option<&str>) {
        let headers =
            ResponseHeaders::parse(&format!("HTTP/1.1 302 Found\r\nLocation: {location}")).unwrap();
        let target = override_redirect_target(&headers, &url("https://a.example/x"))
            .unwrap()
            .unwrap();

        assert_eq!(Some(target.as_str()), expected);
    }

    #[test]
    fn unresolvable_location_is_an_error() {
        let headers = ResponseHeaders::parse("HTTP/1.1 302 Found\r\nLocation: http://[::1").unwrap();
        let target = override_redirect_target(&headers, &url("https://a.example/x")).unwrap();

        assert!(matches!(
            target,
            Err(ProxyError::InvalidRedirectLocation { .. })
        ));
    }

    #[test]
    fn non_redirect_override_is_ignored() {
        let headers = ResponseHeaders::parse("HTTP/1.1 200 OK").unwrap();
        assert!(override_redirect_target(&headers, &url("https://a.example/x")).is_none());
    }
}
