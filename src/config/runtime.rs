use std::path::PathBuf;

/// Secrets and overrides read from the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    /// Bearer token for the Usage API
    pub usage_api_token: Option<String>,
    pub usage_api_url: Option<String>,
    pub script_path: Option<PathBuf>,
    pub bind_addr: Option<String>,
}

impl EnvConfig {
    /// Build from env vars. Unset or blank variables are `None`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            usage_api_token: var("USAGE_API_TOKEN"),
            usage_api_url: var("USAGE_API_URL"),
            script_path: var("BACKFILL_SCRIPT_PATH").map(PathBuf::from),
            bind_addr: var("COMPOSER_BIND_ADDR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("USAGE_API_TOKEN", "tok"),
            ("USAGE_API_URL", "  "),
            ("BACKFILL_SCRIPT_PATH", "/opt/backfill.py"),
        ]
        .into_iter()
        .collect();

        let env = EnvConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(env.usage_api_token.as_deref(), Some("tok"));
        assert!(env.usage_api_url.is_none());
        assert_eq!(env.script_path, Some(PathBuf::from("/opt/backfill.py")));
        assert!(env.bind_addr.is_none());
    }

    #[test]
    fn test_empty_environment() {
        assert_eq!(EnvConfig::from_lookup(|_| None), EnvConfig::default());
    }
}
