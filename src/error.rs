//! A dedicated error for everything that can go wrong in the tunnel: I/O,
//! frame decoding, session-state violations, etc.
use std::io;

#[derive(Debug)]
pub enum TunnelError {
    Io(io::Error),
    /// Encoded frame (plus separators) would not fit in the subdata space
    /// for the configured parent zone.
    MsgTooLong { subdata_len: usize, subdata_space: usize },
    /// The handshake's first A-answer masked to zero, or didn't match the
    /// previously-acquired DNS-session-ID.
    InvalidSessionId,
    /// No upstreams were configured, or every upstream failed fingerprinting.
    NoResolvers,
    /// Propagated from the stub resolver; the caller may retry.
    Timeout,
    /// An API call was made after `close()`.
    SessionClosed,
    /// A frame failed to decode, or decoded to an unexpected type.
    InvalidResponse(String),
    /// A DATA_TO_IMPLANT fragment claimed an offset/length outside the
    /// manifest's declared size.
    InvalidIndex,
    /// The decryption or deserialization of a received envelope failed.
    Crypto(String),
}

impl std::fmt::Display for TunnelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelError::Io(e) => write!(f, "i/o error: {}", e),
            TunnelError::MsgTooLong { subdata_len, subdata_space } => write!(
                f,
                "encoded frame ({} chars) exceeds subdata space ({} chars)",
                subdata_len, subdata_space
            ),
            TunnelError::InvalidSessionId => write!(f, "invalid dns session id"),
            TunnelError::NoResolvers => write!(f, "no resolvers found"),
            TunnelError::Timeout => write!(f, "dns timeout"),
            TunnelError::SessionClosed => write!(f, "dns session closed"),
            TunnelError::InvalidResponse(s) => write!(f, "invalid response: {}", s),
            TunnelError::InvalidIndex => write!(f, "invalid start/stop index"),
            TunnelError::Crypto(s) => write!(f, "crypto error: {}", s),
        }
    }
}

impl std::error::Error for TunnelError {}

/// A specific custom `Result` for all functions in this crate.
pub type TunnelResult<T> = Result<T, TunnelError>;

// All conversions for internal errors into TunnelError
impl From<io::Error> for TunnelError {
    fn from(err: io::Error) -> Self {
        TunnelError::Io(err)
    }
}
