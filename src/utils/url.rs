//! URL utilities for consistent URL handling
//!
//! This module provides utilities for normalizing URLs to prevent issues
//! with trailing slashes when constructing API endpoints.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use turnstream::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://console.example.com/api"), "https://console.example.com/api");
/// assert_eq!(normalize_base_url("https://console.example.com/api/"), "https://console.example.com/api");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a complete API endpoint URL from a base URL and endpoint path,
/// ensuring there are no double slashes in the result.
///
/// # Examples
///
/// ```
/// use turnstream::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://console.example.com/api", "assistant/turns"),
///     "https://console.example.com/api/assistant/turns"
/// );
/// assert_eq!(
///     construct_api_url("https://console.example.com/api/", "/assistant/turns"),
///     "https://console.example.com/api/assistant/turns"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_any_number_of_trailing_slashes() {
        assert_eq!(
            normalize_base_url("https://console.example.com/api"),
            "https://console.example.com/api"
        );
        assert_eq!(
            normalize_base_url("https://console.example.com/api///"),
            "https://console.example.com/api"
        );
        assert_eq!(normalize_base_url(""), "");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn construct_handles_slash_combinations() {
        assert_eq!(
            construct_api_url("https://console.example.com/api", "assistant/turns"),
            "https://console.example.com/api/assistant/turns"
        );
        assert_eq!(
            construct_api_url("https://console.example.com/api/", "assistant/turns"),
            "https://console.example.com/api/assistant/turns"
        );
        assert_eq!(
            construct_api_url("https://console.example.com/api", "///assistant/stream/r1"),
            "https://console.example.com/api/assistant/stream/r1"
        );
    }
}
