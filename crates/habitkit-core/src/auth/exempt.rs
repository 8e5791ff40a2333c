/// Endpoints that must never carry an access token and never trigger a refresh.
///
/// Matching is by substring against the request URL, so both relative paths
/// and absolute URLs are handled. The list is fixed at construction.
#[derive(Debug, Clone)]
pub struct ExemptionRegistry {
    patterns: Vec<String>,
}

impl ExemptionRegistry {
    /// Build a registry. The refresh endpoint is always exempt, whether or
    /// not it appears in `patterns`, since refresh calls cannot present the
    /// access token they are trying to replace.
    pub fn new<I, S>(refresh_path: &str, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        if !refresh_path.is_empty() && !list.iter().any(|p| p == refresh_path) {
            list.push(refresh_path.to_string());
        }
        Self { patterns: list }
    }

    pub fn is_exempt(&self, url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.patterns.iter().any(|p| path.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
