use serde::Deserialize;

/// Cross-origin settings for browser clients
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins
    #[serde(default)]
    pub origins: Wildcard,
    /// Allowed request methods
    #[serde(default)]
    pub methods: Wildcard,
    /// Allowed request headers
    #[serde(default)]
    pub headers: Wildcard,
    /// Preflight cache lifetime (e.g. "10m")
    #[serde(default)]
    pub max_age: Option<String>,
}

impl CorsConfig {
    /// Parsed `max_age`, `None` when unset or unparseable
    pub fn max_age_duration(&self) -> Option<std::time::Duration> {
        self.max_age.as_deref().and_then(|value| crate::parse_duration(value).ok())
    }
}

/// `"*"` or an explicit list of values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Wildcard {
    #[default]
    Any,
    List(Vec<String>),
}

impl<'de> Deserialize<'de> for Wildcard {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        let values = match Raw::deserialize(deserializer)? {
            Raw::One(value) => vec![value],
            Raw::Many(values) => values,
        };

        if values.iter().any(|v| v == "*") {
            Ok(Self::Any)
        } else {
            Ok(Self::List(values))
        }
    }
}
