//! API endpoint URL builders
//!
//! Helper functions to construct API endpoint URLs. Scope values are
//! source names and get percent-encoded before landing in a query string.

use uuid::Uuid;

/// Build ingestion start endpoint URL
pub fn start_url(base_url: &str) -> String {
    format!("{}/api/v1/ingestion/start", base_url)
}

/// Build ingestion status URL
pub fn status_url(base_url: &str, scope: Option<&str>) -> String {
    let mut url = format!("{}/api/v1/ingestion/status", base_url);

    if let Some(s) = scope {
        url.push_str(&format!("?scope={}", urlencoding::encode(s)));
    }

    url
}

/// Build run history URL
pub fn runs_url(base_url: &str, scope: Option<&str>, limit: Option<i64>) -> String {
    let mut url = format!("{}/api/v1/ingestion/runs", base_url);
    let mut sep = '?';

    if let Some(s) = scope {
        url.push_str(&format!("{}scope={}", sep, urlencoding::encode(s)));
        sep = '&';
    }

    if let Some(n) = limit {
        url.push_str(&format!("{}limit={}", sep, n));
    }

    url
}

/// Build run cancellation URL
pub fn cancel_url(base_url: &str, run_id: Uuid) -> String {
    format!("{}/api/v1/ingestion/runs/{}/cancel", base_url, run_id)
}

/// Build source catalogue URL
pub fn sources_url(base_url: &str, active: Option<bool>) -> String {
    let mut url = format!("{}/api/v1/sources", base_url);

    if let Some(a) = active {
        url.push_str(&format!("?active={}", a));
    }

    url
}

/// Build source details URL
pub fn source_details_url(base_url: &str, id: Uuid) -> String {
    format!("{}/api/v1/sources/{}", base_url, id)
}

/// Build health check URL
pub fn health_url(base_url: &str) -> String {
    format!("{}/health", base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_url() {
        let url = start_url("http://localhost:8200");
        assert_eq!(url, "http://localhost:8200/api/v1/ingestion/start");
    }

    #[test]
    fn test_status_url() {
        let url = status_url("http://localhost:8200", None);
        assert_eq!(url, "http://localhost:8200/api/v1/ingestion/status");

        let scoped = status_url("http://localhost:8200", Some("crm"));
        assert_eq!(
            scoped,
            "http://localhost:8200/api/v1/ingestion/status?scope=crm"
        );
    }

    #[test]
    fn test_status_url_encodes_scope() {
        let url = status_url("http://localhost:8200", Some("partner feed"));
        assert_eq!(
            url,
            "http://localhost:8200/api/v1/ingestion/status?scope=partner%20feed"
        );
    }

    #[test]
    fn test_runs_url() {
        let url = runs_url("http://localhost:8200", None, None);
        assert_eq!(url, "http://localhost:8200/api/v1/ingestion/runs");

        let url_with_limit = runs_url("http://localhost:8200", None, Some(10));
        assert_eq!(
            url_with_limit,
            "http://localhost:8200/api/v1/ingestion/runs?limit=10"
        );

        let url_with_both = runs_url("http://localhost:8200", Some("crm"), Some(10));
        assert_eq!(
            url_with_both,
            "http://localhost:8200/api/v1/ingestion/runs?scope=crm&limit=10"
        );
    }

    #[test]
    fn test_cancel_url() {
        let id = Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap();
        let url = cancel_url("http://localhost:8200", id);
        assert_eq!(
            url,
            "http://localhost:8200/api/v1/ingestion/runs/123e4567-e89b-12d3-a456-426614174000/cancel"
        );
    }

    #[test]
    fn test_sources_url() {
        let url = sources_url("http://localhost:8200", None);
        assert_eq!(url, "http://localhost:8200/api/v1/sources");

        let active_only = sources_url("http://localhost:8200", Some(true));
        assert_eq!(active_only, "http://localhost:8200/api/v1/sources?active=true");
    }

    #[test]
    fn test_source_details_url() {
        let id = Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap();
        let url = source_details_url("http://localhost:8200", id);
        assert_eq!(
            url,
            "http://localhost:8200/api/v1/sources/123e4567-e89b-12d3-a456-426614174000"
        );
    }

    #[test]
    fn test_health_url() {
        let url = health_url("http://localhost:8200");
        assert_eq!(url, "http://localhost:8200/health");
    }
}
