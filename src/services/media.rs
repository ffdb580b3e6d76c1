/// Turns stored media keys into URLs clients can fetch
#[derive(Debug, Clone)]
pub struct MediaUrlResolver {
    base_url: String,
}

impl MediaUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn resolve(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    /// Empty keys resolve to nothing
    pub fn resolve_opt(&self, key: Option<&str>) -> Option<String> {
        key.filter(|k| !k.trim().is_empty()).map(|k| self.resolve(k))
    }
}
