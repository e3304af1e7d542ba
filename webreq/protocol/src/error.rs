use thiserror::Error;

/// Network-level failure reported to clients and listeners.
///
/// Numeric codes match the ones used by the network stack, see [`NetError::code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetError {
    #[error("request failed")]
    Failed,
    #[error("request was aborted")]
    Aborted,
    #[error("request was blocked by a web request listener")]
    BlockedByClient,
    #[error("connection was reset")]
    ConnectionReset,
    #[error("redirect could not be constructed or followed")]
    InvalidRedirect,
    #[error("received an invalid response")]
    InvalidResponse,
    #[error("network error {0}")]
    Other(i32),
}

impl NetError {
    pub fn code(self) -> i32 {
        match self {
            Self::Failed => -2,
            Self::Aborted => -3,
            Self::BlockedByClient => -20,
            Self::ConnectionReset => -101,
            Self::InvalidRedirect => -303,
            Self::InvalidResponse => -320,
            Self::Other(code) => code,
        }
    }

    /// Maps a network stack code back to a [`NetError`].
    ///
    /// Returns [`None`] for `0` (success).
    pub fn from_code(code: i32) -> Option<Self> {
        let error = match code {
            0 => return None,
            -2 => Self::Failed,
            -3 => Self::Aborted,
            -20 => Self::BlockedByClient,
            -101 => Self::ConnectionReset,
            -303 => Self::InvalidRedirect,
            -320 => Self::InvalidResponse,
            other => Self::Other(other),
        };

        Some(error)
    }
}

/// Errors that can occur when parsing a raw response header block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderParseError {
    #[error("header block is empty")]
    Empty,
    #[error("header block ended before the headers did")]
    Incomplete,
    #[error("malformed header block: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::NetError;

    #[rstest]
    #[case(NetError::Failed)]
    #[case(NetError::Aborted)]
    #[case(NetError::BlockedByClient)]
    #[case(NetError::InvalidRedirect)]
    #[case(NetError::Other(-137))]
    fn codes_map_back(#[case] error: NetError) {
        assert_eq!(NetError::from_code(error.code()), Some(error));
    }

    #[test]
    fn zero_is_success() {
        assert_eq!(NetError::from_code(0), None);
    }
}
