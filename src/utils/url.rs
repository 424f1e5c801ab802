//! Endpoint URL helpers shared by the HTTP backends.

/// Strip trailing slashes so endpoints can be appended without doubling them.
///
/// # Examples
///
/// ```
/// use llamaman::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.anthropic.com/v1/"), "https://api.anthropic.com/v1");
/// assert_eq!(normalize_base_url("http://localhost:11434///"), "http://localhost:11434");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash.
///
/// # Examples
///
/// ```
/// use llamaman::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.anthropic.com/v1/", "/messages"),
///     "https://api.anthropic.com/v1/messages"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// The `Host` header value for `url`: the host, plus the port when it is not
/// the scheme's default.
pub fn host_header(url: &reqwest::Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
