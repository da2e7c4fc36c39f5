use std::collections::HashMap;

/// A frozen view of the process environment.
///
/// Everything that depends on launcher variables reads them from a snapshot passed in
/// explicitly, so the same resolution can be replayed in tests without touching the real
/// environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
    hostname: Option<String>,
}

impl EnvSnapshot {
    /// Captures the current process environment and the machine's hostname.
    pub fn capture() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty());

        Self {
            vars: std::env::vars().collect(),
            hostname,
        }
    }

    /// Builds a snapshot from explicit key/value pairs, without a hostname.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            hostname: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}
