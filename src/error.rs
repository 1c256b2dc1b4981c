//! Error types for capture, decoding and persistence.
//!
//! Two error types cover the whole crate:
//!
//! - [`DecodeError`] is returned by the pure decode functions. It is small,
//!   `Copy`, and always recoverable: the offending frame is skipped and the
//!   capture loop moves on to the next one.
//! - [`LinkwatchError`] is the crate-wide error. It wraps decode failures and
//!   adds the fatal startup failures (socket, file, configuration) as well as
//!   sink write failures, which are logged and never stop capture.
//!
//! ## Recovery
//!
//! ```rust
//! use linkwatch::{DecodeError, LinkwatchError};
//!
//! let error: LinkwatchError = DecodeError::TruncatedFrame { len: 13 }.into();
//! assert!(error.is_recoverable());
//!
//! let fatal = LinkwatchError::interface_not_found("tun9");
//! assert!(!fatal.is_recoverable());
//! for suggestion in fatal.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for linkwatch operations.
pub type Result<T, E = LinkwatchError> = std::result::Result<T, E>;

/// Protocol header a decode failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Ethernet,
    Arp,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Ethernet => "Ethernet",
            Layer::Arp => "ARP",
            Layer::Ipv4 => "IPv4",
            Layer::Ipv6 => "IPv6",
            Layer::Tcp => "TCP",
            Layer::Udp => "UDP",
        };
        f.write_str(name)
    }
}

/// Per-frame decode failure.
///
/// Truncation (not enough bytes) is kept distinct from a header that reports
/// an impossible length of itself.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {len} bytes is shorter than an Ethernet header")]
    TruncatedFrame { len: usize },

    #[error("{layer} header truncated: need {needed} bytes, {available} available")]
    TruncatedHeader { layer: Layer, needed: usize, available: usize },

    #[error(
        "{layer} header declares {declared} bytes (minimum {minimum}, {available} available)"
    )]
    InvalidHeaderLength { layer: Layer, declared: usize, minimum: usize, available: usize },
}

impl DecodeError {
    /// Layer the failure was detected at.
    pub fn layer(&self) -> Layer {
        match self {
            DecodeError::TruncatedFrame { .. } => Layer::Ethernet,
            DecodeError::TruncatedHeader { layer, .. } => *layer,
            DecodeError::InvalidHeaderLength { layer, .. } => *layer,
        }
    }
}

/// Main error type for linkwatch operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkwatchError {
    #[error("socket {operation} failed on interface {interface}")]
    Socket {
        interface: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("network interface '{interface}' does not exist")]
    InterfaceNotFound { interface: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to write record to {path}")]
    SinkWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture file error in {context}: {details}")]
    Capture { context: String, details: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },
}

impl LinkwatchError {
    /// Returns whether capture can continue after this error.
    ///
    /// Decode failures skip one frame; sink failures lose one record. Everything
    /// else happens at startup and is fatal for the affected interface.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LinkwatchError::Decode(_) => true,
            LinkwatchError::SinkWrite { .. } => true,
            LinkwatchError::Socket { .. } => false,
            LinkwatchError::InterfaceNotFound { .. } => false,
            LinkwatchError::File { .. } => false,
            LinkwatchError::Capture { .. } => false,
            LinkwatchError::Config { .. } => false,
            LinkwatchError::UnsupportedPlatform { .. } => false,
        }
    }

    /// Returns suggested operator actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkwatchError::Socket { .. } => vec![
                "Run as root or grant CAP_NET_RAW and CAP_NET_ADMIN",
                "Check that the interface is up",
                "Verify no other tool holds the interface exclusively",
            ],
            LinkwatchError::InterfaceNotFound { .. } => vec![
                "Check the interface name with `ip link`",
                "Bring the tunnel up before starting capture",
            ],
            LinkwatchError::Decode(_) => vec![
                "Frame was skipped; no action needed",
                "Persistent failures may indicate a non-Ethernet physical interface",
            ],
            LinkwatchError::SinkWrite { .. } => vec![
                "Check free disk space",
                "Check write permissions on the output directory",
            ],
            LinkwatchError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            LinkwatchError::Capture { .. } => vec![
                "Verify the file is a classic pcap capture (not pcapng)",
                "Re-export the capture with `tcpdump -w` or `editcap -F pcap`",
            ],
            LinkwatchError::Config { .. } => vec![
                "Check the YAML configuration against the documented defaults",
                "Remove the offending key to fall back to its default",
            ],
            LinkwatchError::UnsupportedPlatform { .. } => vec![
                "Live capture requires Linux AF_PACKET sockets",
                "Use --replay with pcap files on other platforms",
            ],
        }
    }

    /// Helper constructor for socket syscall failures, capturing `errno`.
    pub fn socket_failed(interface: impl Into<String>, operation: &'static str) -> Self {
        LinkwatchError::Socket {
            interface: interface.into(),
            operation,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Helper constructor for unknown interfaces.
    pub fn interface_not_found(interface: impl Into<String>) -> Self {
        LinkwatchError::InterfaceNotFound { interface: interface.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        LinkwatchError::File { path, source }
    }

    /// Helper constructor for capture file format errors.
    pub fn capture_format(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkwatchError::Capture { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        LinkwatchError::Config { reason: reason.into() }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        LinkwatchError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

impl From<std::io::Error> for LinkwatchError {
    fn from(err: std::io::Error) -> Self {
        LinkwatchError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decode_messages_carry_their_sizes(
            needed in 1usize..128,
            available in 0usize..128,
            declared in 0usize..64,
        ) {
            let truncated = DecodeError::TruncatedHeader { layer: Layer::Ipv4, needed, available };
            let msg = truncated.to_string();
            prop_assert!(msg.contains("IPv4"));
            prop_assert!(msg.contains(&needed.to_string()));
            prop_assert!(msg.contains(&available.to_string()));

            let invalid = DecodeError::InvalidHeaderLength {
                layer: Layer::Ipv4,
                declared,
                minimum: 20,
                available,
            };
            prop_assert!(invalid.to_string().contains(&declared.to_string()));
            prop_assert_ne!(truncated, invalid);
        }

        #[test]
        fn interface_errors_name_the_interface(name in "[a-z][a-z0-9]{0,14}") {
            let error = LinkwatchError::interface_not_found(name.clone());
            prop_assert!(error.to_string().contains(&name));
            prop_assert!(!error.is_recoverable());
        }
    }

    #[test]
    fn decode_errors_are_recoverable() {
        let errors = [
            DecodeError::TruncatedFrame { len: 13 },
            DecodeError::TruncatedHeader { layer: Layer::Arp, needed: 28, available: 20 },
            DecodeError::InvalidHeaderLength {
                layer: Layer::Ipv4,
                declared: 16,
                minimum: 20,
                available: 40,
            },
        ];

        for error in errors {
            let wrapped: LinkwatchError = error.into();
            assert!(wrapped.is_recoverable());
            assert!(matches!(wrapped, LinkwatchError::Decode(inner) if inner == error));
        }
    }

    #[test]
    fn decode_error_reports_layer() {
        assert_eq!(DecodeError::TruncatedFrame { len: 0 }.layer(), Layer::Ethernet);
        assert_eq!(
            DecodeError::TruncatedHeader { layer: Layer::Udp, needed: 4, available: 2 }.layer(),
            Layer::Udp
        );
    }

    #[test]
    fn startup_errors_are_fatal_with_suggestions() {
        let errors = vec![
            LinkwatchError::interface_not_found("eth9"),
            LinkwatchError::Socket {
                interface: "eth0".to_string(),
                operation: "bind",
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            },
            LinkwatchError::config("slot_capacity must be greater than zero"),
            LinkwatchError::capture_format("pcap header", "bad magic"),
        ];

        for error in errors {
            assert!(!error.is_recoverable(), "{error} should be fatal");
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn io_errors_convert_to_file_errors() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "capture.pcap");
        let error: LinkwatchError = io_err.into();

        match error {
            LinkwatchError::File { source, .. } => {
                assert_eq!(source.to_string(), "capture.pcap");
            }
            _ => panic!("Expected File error variant"),
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkwatchError>();
        assert_send_sync_static::<DecodeError>();
    }
}
