//! Request metadata: device signals and credential redaction.

use std::collections::BTreeMap;

use tracing::warn;

use super::request::InboundRequest;
use crate::config::MissingDeviceSignal;
use crate::tam::UNKNOWN_DEVICE_TRUST;

pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const DEVICE_COMPLIANT_HEADER: &str = "x-device-compliant";
pub const DEVICE_TRUST_HEADER: &str = "x-device-trust";

const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Header names never logged (case-insensitive).
pub const SENSITIVE_HEADER_NAMES: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "cookie",
    "cookie2",
    "set-cookie",
    "x-auth-token",
    "x-access-token",
    "x-forwarded-authorization",
];

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADER_NAMES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(name))
}

/// Copy of `headers` without credential-bearing entries, for logging.
pub fn strip_sensitive_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| !is_sensitive(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Device attestation carried in request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSignals {
    pub id: String,
    pub compliant: bool,
    pub trust: String,
}

impl DeviceSignals {
    /// Read device headers.
    ///
    /// `x-device-compliant` counts only when it equals `true`
    /// (case-insensitive); an absent header resolves per `missing`.
    pub fn from_request(request: &InboundRequest, missing: MissingDeviceSignal) -> Self {
        let id = non_empty(request.header(DEVICE_ID_HEADER)).unwrap_or(UNKNOWN_DEVICE_ID);

        let compliant = match non_empty(request.header(DEVICE_COMPLIANT_HEADER)) {
            Some(value) => value.trim().eq_ignore_ascii_case("true"),
            None => match missing {
                MissingDeviceSignal::AssumeNonCompliant => false,
                MissingDeviceSignal::AssumeCompliant => {
                    warn!(
                        device_id = id,
                        missing_device_signal = "assume_compliant",
                        "x-device-compliant absent; assuming compliant"
                    );
                    true
                }
            },
        };

        let trust = non_empty(request.header(DEVICE_TRUST_HEADER)).unwrap_or(UNKNOWN_DEVICE_TRUST);

        Self {
            id: id.to_string(),
            compliant,
            trust: trust.to_string(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_compliance_defaults_to_non_compliant() {
        let request = InboundRequest::new("GET", "/notes");
        let signals = DeviceSignals::from_request(&request, MissingDeviceSignal::default());
        assert!(!signals.compliant);
        assert_eq!(signals.id, "unknown");
        assert_eq!(signals.trust, "unknown");
    }

    #[test]
    fn test_lenient_mode_is_explicit() {
        let request = InboundRequest::new("GET", "/notes");
        let signals = DeviceSignals::from_request(&request, MissingDeviceSignal::AssumeCompliant);
        assert!(signals.compliant);
    }

    #[test]
    fn test_present_header_overrides_missing_policy() {
        let request = InboundRequest::new("GET", "/notes")
            .with_header("x-device-compliant", "false")
            .with_header("x-device-id", "laptop-1")
            .with_header("x-device-trust", "managed");
        let signals = DeviceSignals::from_request(&request, MissingDeviceSignal::AssumeCompliant);
        assert!(!signals.compliant);
        assert_eq!(signals.id, "laptop-1");
        assert_eq!(signals.trust, "managed");

        let request = InboundRequest::new("GET", "/").with_header("X-Device-Compliant", "TRUE");
        assert!(DeviceSignals::from_request(&request, MissingDeviceSignal::default()).compliant);

        let request = InboundRequest::new("GET", "/").with_header("x-device-compliant", "yes");
        assert!(!DeviceSignals::from_request(&request, MissingDeviceSignal::default()).compliant);
    }

    #[test]
    fn test_strip_sensitive_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        headers.insert("cookie".to_string(), "session=1".to_string());
        headers.insert("x-device-id".to_string(), "laptop-1".to_string());

        let stripped = strip_sensitive_headers(&headers);
        assert_eq!(stripped.len(), 1);
        assert!(stripped.contains_key("x-device-id"));
    }
}
