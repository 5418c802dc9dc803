//! Model name and reasoning option normalization
//!
//! Pure functions; no state is kept between calls.

use std::{str::FromStr, sync::LazyLock};

use chatmux_config::{ReasoningConfig, ReasoningEffort, ReasoningSummary};
use regex::Regex;
use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::types::ReasoningOverride;

/// Fallback when neither the request nor the configuration names a model
pub const FALLBACK_MODEL: &str = "gpt-5";

/// Client spellings mapped to upstream model ids
const ALIASES: &[(&str, &str)] = &[
    ("gpt5", "gpt-5"),
    ("gpt-5-latest", "gpt-5"),
    ("codex", "codex-mini-latest"),
    ("codex-mini", "codex-mini-latest"),
];

static EFFORT_SUFFIX: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)^(.*?)[-_](minimal|low|medium|high)$"));

/// Split a trailing reasoning-effort suffix off a model name
fn split_effort_suffix(name: &str) -> Option<(&str, &str)> {
    let re = match EFFORT_SUFFIX.as_ref() {
        Ok(re) => re,
        Err(e) => {
            tracing::error!(error = %e, "effort suffix pattern failed to compile");
            return None;
        }
    };

    let captures = re.captures(name)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Drop a `provider/` routing prefix such as `openai/gpt-5`
fn strip_provider_prefix(name: &str) -> &str {
    name.rsplit_once('/').map_or(name, |(_, model)| model)
}

fn strip_effort_suffixes(name: &str) -> &str {
    let mut base = name;
    while let Some((stripped, _)) = split_effort_suffix(base) {
        base = stripped;
    }
    base
}

fn canonical_name(name: &str) -> Option<String> {
    let base = strip_effort_suffixes(strip_provider_prefix(name.trim()).trim())
        .trim()
        .to_ascii_lowercase();

    if base.is_empty() {
        return None;
    }

    let aliased = ALIASES
        .iter()
        .find(|(alias, _)| *alias == base)
        .map_or(base, |(_, target)| (*target).to_owned());

    Some(aliased)
}

/// Resolve the upstream model id for a requested name
///
/// A non-blank `debug_model` wins. Otherwise the `provider/` prefix and
/// effort suffixes are stripped, aliases applied, and a blank result falls
/// back to `default_model`.
/// Applying it to its own output returns the same value.
pub fn normalize_model_name(requested: Option<&str>, debug_model: Option<&str>, default_model: &str) -> String {
    if let Some(debug) = debug_model.map(str::trim).filter(|d| !d.is_empty()) {
        return debug.to_owned();
    }

    requested
        .and_then(canonical_name)
        .or_else(|| canonical_name(default_model))
        .unwrap_or_else(|| FALLBACK_MODEL.to_owned())
}

/// Reasoning effort implied by a model suffix such as `gpt-5-high`
pub fn extract_reasoning_from_model_name(requested: &str) -> Option<ReasoningOverride> {
    let (_, suffix) = split_effort_suffix(requested.trim())?;

    Some(ReasoningOverride {
        effort: Some(suffix.to_ascii_lowercase()),
        summary: None,
    })
}

/// Reasoning object sent upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningParam {
    pub effort: ReasoningEffort,
    /// `None` omits the key
    pub summary: Option<ReasoningSummary>,
}

impl Serialize for ReasoningParam {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(if self.summary.is_some() { 2 } else { 1 }))?;
        map.serialize_entry("effort", self.effort.as_ref())?;
        if let Some(summary) = &self.summary {
            map.serialize_entry("summary", summary.as_ref())?;
        }
        map.end()
    }
}

/// Merge configured reasoning defaults with a request override
///
/// Override values outside the known choices are ignored. A resulting
/// summary of `none` drops the summary key entirely.
pub fn build_reasoning_param(defaults: &ReasoningConfig, overrides: Option<&ReasoningOverride>) -> ReasoningParam {
    let pick = |value: Option<&String>| value.map(|v| v.trim().to_ascii_lowercase());

    let effort = overrides
        .and_then(|o| pick(o.effort.as_ref()))
        .and_then(|v| ReasoningEffort::from_str(&v).ok())
        .unwrap_or(defaults.effort);

    let summary = overrides
        .and_then(|o| pick(o.summary.as_ref()))
        .and_then(|v| ReasoningSummary::from_str(&v).ok())
        .unwrap_or(defaults.summary);

    ReasoningParam {
        effort,
        summary: (summary != ReasoningSummary::None).then_some(summary),
    }
}
