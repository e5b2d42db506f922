use std::fmt;

/// Error categories recognized by the request pipeline and the ensemble/debate
/// engines. Each variant carries the HTTP status it maps to at the edge.
#[derive(Debug)]
pub enum GatewayError {
    /// Malformed body, missing required fields. Maps to 400.
    InvalidRequest(String),
    /// Maps to 401.
    Authentication(String),
    /// Maps to 403.
    Permission(String),
    /// Unknown task/model. Maps to 404.
    NotFound(String),
    /// Illegal state transition. Maps to 400.
    Conflict(String),
    /// Maps to 429. `retry_after` is in seconds when the upstream provided one.
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },
    /// Upstream provider did not respond in time. Maps to 504.
    UpstreamTimeout(String),
    /// Upstream provider unreachable or returned a 5xx. Maps to 502/503.
    UpstreamUnavailable(String),
    /// Registry or ensemble not ready (no live providers, no debate team). Maps to 503.
    ConfigurationError(String),
    /// Catch-all. Maps to 500.
    Internal(String),
}

impl GatewayError {
    /// The HTTP status code this error maps to at the API edge.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::Authentication(_) => 401,
            GatewayError::Permission(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 400,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::UpstreamTimeout(_) => 504,
            GatewayError::UpstreamUnavailable(_) => 502,
            GatewayError::ConfigurationError(_) => 503,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Conceptual error-kind name used in the OpenAI-compatible error envelope's
    /// `type`/`code` fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Authentication(_) => "authentication_error",
            GatewayError::Permission(_) => "permission_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::ConfigurationError(_) => "configuration_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Relative severity used to pick the error surfaced when every provider in
    /// an ensemble fan-out fails. Higher wins.
    fn severity(&self) -> u8 {
        match self {
            GatewayError::Internal(_) => 5,
            GatewayError::ConfigurationError(_) => 4,
            GatewayError::UpstreamUnavailable(_) => 3,
            GatewayError::UpstreamTimeout(_) => 3,
            GatewayError::RateLimited { .. } => 2,
            GatewayError::Authentication(_) | GatewayError::Permission(_) => 1,
            GatewayError::InvalidRequest(_) | GatewayError::Conflict(_) | GatewayError::NotFound(_) => 0,
        }
    }

    /// Picks the highest-severity error among categorized provider failures.
    /// Ties favor the earliest entry, matching the ensemble's first-ranked-fails-first
    /// tie-break.
    pub fn most_severe(errors: Vec<GatewayError>) -> Option<GatewayError> {
        errors
            .into_iter()
            .enumerate()
            .max_by_key(|(i, e)| (e.severity(), std::cmp::Reverse(*i)))
            .map(|(_, e)| e)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::InvalidRequest(e) => write!(f, "Invalid Request: {}", e),
            GatewayError::Authentication(e) => write!(f, "Authentication Error: {}", e),
            GatewayError::Permission(e) => write!(f, "Permission Error: {}", e),
            GatewayError::NotFound(e) => write!(f, "Not Found: {}", e),
            GatewayError::Conflict(e) => write!(f, "Conflict: {}", e),
            GatewayError::RateLimited { message, .. } => write!(f, "Rate Limited: {}", message),
            GatewayError::UpstreamTimeout(e) => write!(f, "Upstream Timeout: {}", e),
            GatewayError::UpstreamUnavailable(e) => write!(f, "Upstream Unavailable: {}", e),
            GatewayError::ConfigurationError(e) => write!(f, "Configuration Error: {}", e),
            GatewayError::Internal(e) => write!(f, "Internal Error: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InvalidRequest(format!(
            "{} at line {} column {}",
            err,
            err.line(),
            err.column()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_severe_prefers_internal_over_rate_limited() {
        let errors = vec![
            GatewayError::RateLimited {
                message: "slow down".into(),
                retry_after: Some(5),
            },
            GatewayError::Internal("boom".into()),
        ];
        let picked = GatewayError::most_severe(errors).unwrap();
        assert_eq!(picked.status_code(), 500);
    }

    #[test]
    fn most_severe_ties_favor_earliest() {
        let errors = vec![
            GatewayError::UpstreamUnavailable("a".into()),
            GatewayError::UpstreamTimeout("b".into()),
        ];
        let picked = GatewayError::most_severe(errors).unwrap();
        assert_eq!(picked.to_string(), "Upstream Unavailable: a");
    }

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(GatewayError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(GatewayError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            GatewayError::RateLimited {
                message: "x".into(),
                retry_after: Some(1)
            }
            .status_code(),
            429
        );
        assert_eq!(GatewayError::UpstreamTimeout("x".into()).status_code(), 504);
        assert_eq!(GatewayError::ConfigurationError("x".into()).status_code(), 503);
    }
}
