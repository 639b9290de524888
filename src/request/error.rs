//! Transport failure taxonomy
//!
//! Every low-level failure maps to one of a few stable causes, each with a
//! sentinel status code and a fixed description. Failures are carried inside
//! a failed [`ResponseEnvelope`](super::ResponseEnvelope) and never returned
//! as errors.

use std::error::Error as StdError;
use std::io;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    NotFound,
    ConnectionReset,
    ConnectionRefused,
    TooManyRedirects,
    Tls,
    HostUnreachable,
    Timeout,
    Unknown,
}

impl TransportFailure {
    /// Sentinel status code reported in place of an HTTP status.
    pub fn code(&self) -> u16 {
        match self {
            TransportFailure::NotFound => 0,
            TransportFailure::ConnectionReset => 1,
            TransportFailure::ConnectionRefused => 2,
            TransportFailure::TooManyRedirects => 3,
            TransportFailure::Tls => 4,
            TransportFailure::HostUnreachable => 5,
            TransportFailure::Timeout => 599,
            TransportFailure::Unknown => 99,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransportFailure::NotFound => "ENOTFOUND",
            TransportFailure::ConnectionReset => "ECONNRESET",
            TransportFailure::ConnectionRefused => "ECONNREFUSED",
            TransportFailure::TooManyRedirects => "ERR_FR_TOO_MANY_REDIRECTS",
            TransportFailure::Tls => "EPROTO",
            TransportFailure::HostUnreachable => "EHOSTUNREACH",
            TransportFailure::Timeout => "ECONNABORTED",
            TransportFailure::Unknown => "UNKNOWN",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TransportFailure::NotFound => {
                "ENOTFOUND: the host name could not be resolved, check the DNS or the URL"
            }
            TransportFailure::ConnectionReset => {
                "ECONNRESET: the connection was forcibly closed by the remote host"
            }
            TransportFailure::ConnectionRefused => {
                "ECONNREFUSED: the target refused the connection, nothing is listening on that port"
            }
            TransportFailure::TooManyRedirects => {
                "ERR_FR_TOO_MANY_REDIRECTS: the request exceeded the maximum number of redirects"
            }
            TransportFailure::Tls => {
                "EPROTO: the TLS handshake failed or the certificate was rejected"
            }
            TransportFailure::HostUnreachable => {
                "EHOSTUNREACH: the host is unreachable or did not answer"
            }
            TransportFailure::Timeout => {
                "ECONNABORTED: the request timed out or was aborted before a response arrived"
            }
            TransportFailure::Unknown => "UNKNOWN: an unrecognised transport error occurred",
        }
    }

    /// Description with the underlying error text for unrecognised failures.
    pub fn describe(&self, detail: Option<&str>) -> String {
        match (self, detail) {
            (TransportFailure::Unknown, Some(detail)) => {
                format!("{} ({detail})", self.description())
            }
            _ => self.description().to_string(),
        }
    }

    /// Classify a failed reqwest call.
    pub fn from_reqwest(err: &reqwest::Error) -> TransportFailure {
        if err.is_timeout() {
            return TransportFailure::Timeout;
        }
        if err.is_redirect() {
            return TransportFailure::TooManyRedirects;
        }

        let mut source: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>()
                && let Some(failure) = Self::from_io_kind(io_err.kind())
            {
                return failure;
            }
            if let Some(failure) = Self::from_message(&cause.to_string()) {
                return failure;
            }
            source = cause.source();
        }

        TransportFailure::Unknown
    }

    /// Classify a raw socket error.
    pub fn from_io(err: &io::Error) -> TransportFailure {
        Self::from_io_kind(err.kind())
            .or_else(|| Self::from_message(&err.to_string()))
            .unwrap_or(TransportFailure::Unknown)
    }

    fn from_io_kind(kind: io::ErrorKind) -> Option<TransportFailure> {
        match kind {
            io::ErrorKind::ConnectionRefused => Some(TransportFailure::ConnectionRefused),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Some(TransportFailure::ConnectionReset),
            io::ErrorKind::TimedOut => Some(TransportFailure::Timeout),
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                Some(TransportFailure::HostUnreachable)
            }
            _ => None,
        }
    }

    fn from_message(message: &str) -> Option<TransportFailure> {
        let message = message.to_lowercase();

        if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("name or service not known")
            || message.contains("no such host")
        {
            Some(TransportFailure::NotFound)
        } else if message.contains("certificate")
            || message.contains("tls")
            || message.contains("handshake")
        {
            Some(TransportFailure::Tls)
        } else if message.contains("connection refused") {
            Some(TransportFailure::ConnectionRefused)
        } else if message.contains("connection reset") {
            Some(TransportFailure::ConnectionReset)
        } else if message.contains("unreachable") {
            Some(TransportFailure::HostUnreachable)
        } else {
            None
        }
    }
}
