//! Canonical topic names and the subscription wildcard matcher
//!
//! Every topic in the fleet is a slash-separated path under the `bigskies`
//! prefix (the ASCOM device bridge uses its own `ascom` prefix). Topics are
//! case-sensitive and empty segments are invalid. Subscriptions may use `+`
//! (exactly one segment) and `#` (trailing remainder).

use crate::error::{Error, Result};

/// Fixed prefix for all coordinator traffic
pub const PREFIX: &str = "bigskies";

/// Wildcard capturing all coordinator traffic, owned by the message coordinator
pub const COORDINATOR_WILDCARD: &str = "bigskies/coordinator/#";

/// Retained credentials bundle from the bootstrap publisher
pub const BOOTSTRAP_CREDENTIALS: &str = "bigskies/coordinator/bootstrap/credentials";

/// Coordinators announce themselves here to request credentials
pub const BOOTSTRAP_REQUEST: &str = "bigskies/coordinator/bootstrap/request";

/// RBAC validation requests to the security coordinator
pub const RBAC_VALIDATE: &str = "bigskies/coordinator/security/rbac/validate";

/// RBAC verdicts from the security coordinator
pub const RBAC_RESPONSE: &str = "bigskies/coordinator/security/rbac/response";

/// Bearer-token validation requests to the security coordinator
pub const AUTH_VALIDATE: &str = "bigskies/coordinator/security/auth/validate";

/// Bearer-token validation responses
pub const AUTH_VALIDATE_RESPONSE: &str = "bigskies/coordinator/security/auth/validate/response";

/// Service registration events from the application coordinator
pub const SERVICE_REGISTER: &str = "bigskies/coordinator/service/event/register";

/// Service heartbeat events
pub const SERVICE_HEARTBEAT: &str = "bigskies/coordinator/service/event/heartbeat";

/// Health publication topic for a coordinator
pub fn health(coordinator: &str) -> String {
    format!("{}/{}/health", PREFIX, coordinator)
}

/// Per-coordinator configuration update topic
pub fn config_update(coordinator: &str) -> String {
    format!("{}/coordinator/config/update/{}", PREFIX, coordinator)
}

/// RBAC metrics snapshot topic for the message coordinator
pub fn rbac_metrics() -> String {
    format!("{}/message/status/rbac", PREFIX)
}

/// ASCOM bus-proxy request topic for one device method
pub fn ascom_request(prefix: &str, device_type: &str, device_number: u32, method: &str) -> String {
    format!(
        "{}/request/{}/{}/{}",
        prefix, device_type, device_number, method
    )
}

/// ASCOM bus-proxy response topic for one request id
pub fn ascom_response(prefix: &str, request_id: &str) -> String {
    format!("{}/response/{}", prefix, request_id)
}

/// Whether a topic contains the given path segment
///
/// Used by the RBAC interceptor to bypass health and status traffic.
pub fn has_segment(topic: &str, segment: &str) -> bool {
    topic.split('/').any(|s| s == segment)
}

/// One parsed segment of a subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+` — exactly one non-empty segment
    Single,
    /// `#` — the trailing remainder, including zero segments
    Tail,
}

/// A compiled subscription pattern
///
/// Matching is segment-wise; a wildcard never crosses a `/` boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pattern: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    /// Compile a pattern, validating the wildcard grammar
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::Validation("empty topic pattern".to_string()));
        }

        let raw: Vec<&str> = pattern.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());

        for (i, seg) in raw.iter().enumerate() {
            match *seg {
                "" => {
                    return Err(Error::Validation(format!(
                        "empty segment in topic pattern '{}'",
                        pattern
                    )))
                }
                "+" => segments.push(Segment::Single),
                "#" => {
                    if i != raw.len() - 1 {
                        return Err(Error::Validation(format!(
                            "'#' must be the last segment in '{}'",
                            pattern
                        )));
                    }
                    segments.push(Segment::Tail);
                }
                literal => {
                    if literal.contains('+') || literal.contains('#') {
                        return Err(Error::Validation(format!(
                            "wildcard inside segment '{}' of '{}'",
                            literal, pattern
                        )));
                    }
                    segments.push(Segment::Literal(literal.to_string()));
                }
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// The original pattern string
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a concrete topic matches this pattern
    ///
    /// Topics containing empty segments never match.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return false;
        }

        let mut i = 0;
        for segment in &self.segments {
            match segment {
                Segment::Tail => return true,
                Segment::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                Segment::Literal(lit) => {
                    if i >= parts.len() || parts[i] != lit {
                        return false;
                    }
                    i += 1;
                }
            }
        }

        i == parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let f = TopicFilter::parse("bigskies/message/health").unwrap();
        assert!(f.matches("bigskies/message/health"));
        assert!(!f.matches("bigskies/message/status"));
        assert!(!f.matches("bigskies/message"));
        assert!(!f.matches("bigskies/message/health/extra"));
    }

    #[test]
    fn test_single_wildcard() {
        let f = TopicFilter::parse("bigskies/coordinator/telescope/control/+").unwrap();
        assert!(f.matches("bigskies/coordinator/telescope/control/slew"));
        assert!(!f.matches("bigskies/coordinator/telescope/control"));
        assert!(!f.matches("bigskies/coordinator/telescope/control/slew/extra"));
    }

    #[test]
    fn test_single_wildcard_does_not_cross_segments() {
        let f = TopicFilter::parse("bigskies/+/health").unwrap();
        assert!(f.matches("bigskies/message/health"));
        assert!(!f.matches("bigskies/message/extra/health"));
    }

    #[test]
    fn test_tail_wildcard() {
        let f = TopicFilter::parse("bigskies/coordinator/#").unwrap();
        assert!(f.matches("bigskies/coordinator/security/rbac/validate"));
        assert!(f.matches("bigskies/coordinator"));
        assert!(!f.matches("bigskies/message/health"));
    }

    #[test]
    fn test_tail_matches_empty_remainder() {
        let f = TopicFilter::parse("ascom/response/#").unwrap();
        assert!(f.matches("ascom/response"));
        assert!(f.matches("ascom/response/abc123"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(TopicFilter::parse("").is_err());
        assert!(TopicFilter::parse("bigskies//health").is_err());
        assert!(TopicFilter::parse("bigskies/#/health").is_err());
        assert!(TopicFilter::parse("bigskies/tele+scope").is_err());
    }

    #[test]
    fn test_empty_topic_segment_never_matches() {
        let f = TopicFilter::parse("bigskies/#").unwrap();
        assert!(!f.matches("bigskies//health"));
    }

    #[test]
    fn test_case_sensitive() {
        let f = TopicFilter::parse("bigskies/message/health").unwrap();
        assert!(!f.matches("bigskies/Message/health"));
    }

    #[test]
    fn test_match_is_deterministic() {
        let f = TopicFilter::parse("bigskies/coordinator/+/control/#").unwrap();
        for _ in 0..3 {
            assert!(f.matches("bigskies/coordinator/telescope/control/slew"));
        }
    }

    #[test]
    fn test_topic_builders() {
        assert_eq!(health("message"), "bigskies/message/health");
        assert_eq!(
            config_update("message"),
            "bigskies/coordinator/config/update/message"
        );
        assert_eq!(
            ascom_request("ascom", "telescope", 0, "slewtocoordinates"),
            "ascom/request/telescope/0/slewtocoordinates"
        );
        assert_eq!(ascom_response("ascom", "req-1"), "ascom/response/req-1");
    }

    #[test]
    fn test_has_segment() {
        assert!(has_segment("bigskies/message/health", "health"));
        assert!(has_segment("bigskies/coordinator/x/status/y", "status"));
        assert!(!has_segment("bigskies/message/healthy", "health"));
    }
}
