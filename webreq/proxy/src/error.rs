use std::{io, path::PathBuf};

use thiserror::Error;
use webreq_protocol::{HeaderParseError, NetError, WebRequestId};

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to build redirect response head: {0}")]
    MalformedRedirect(#[from] HeaderParseError),
    #[error("redirect location `{location}` could not be resolved: {source}")]
    InvalidRedirectLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },
    #[error("received malformed response headers: {0}")]
    MalformedResponseHeaders(HeaderParseError),
    #[error("resolution for request {request_id} does not match its pending checkpoint")]
    StaleContinuation { request_id: WebRequestId },
    #[error("failed to read config file `{}`: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("invalid value `{value}` in `{name}`")]
    InvalidEnvOverride { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ProxyError {
    /// Status reported to the client when this error ends a request.
    pub fn net_error(&self) -> NetError {
        match self {
            Self::MalformedRedirect(..) | Self::InvalidRedirectLocation { .. } => {
                NetError::InvalidRedirect
            }
            Self::MalformedResponseHeaders(..) => NetError::InvalidResponse,
            Self::StaleContinuation { .. }
            | Self::ConfigRead { .. }
            | Self::ConfigParse(..)
            | Self::InvalidEnvOverride { .. }
            | Self::InvalidConfig(..) => NetError::Failed,
        }
    }
}

pub type Result<T, E = ProxyError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::redirect(ProxyError::MalformedRedirect(HeaderParseError::Empty), NetError::InvalidRedirect)]
    #[case::location(
        ProxyError::InvalidRedirectLocation {
            location: "http://[::1".into(),
            source: url::ParseError::InvalidIpv6Address,
        },
        NetError::InvalidRedirect
    )]
    #[case::response(ProxyError::MalformedResponseHeaders(HeaderParseError::Incomplete), NetError::InvalidResponse)]
    #[case::stale(ProxyError::StaleContinuation { request_id: 1 }, NetError::Failed)]
    fn maps_to_net_error(#[case] error: ProxyError, #[case] expected: NetError) {
        assert_eq!(error.net_error(), expected);
    }
}
