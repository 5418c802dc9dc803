use std::sync::LazyLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in a raw TOML string
///
/// `{{ env.VAR | default("x") }}` falls back to `x` when `VAR` is unset.
/// Comment lines are left alone so commented-out secrets need not exist.
pub fn expand_env(input: &str) -> Result<String, String> {
    static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
        // key in group 1, optional default("...") value in group 2
        Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
    });

    let re = PLACEHOLDER
        .as_ref()
        .map_err(|e| format!("placeholder pattern failed to compile: {e}"))?;

    let mut output = String::with_capacity(input.len());

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut last_end = 0;

        for captures in re.captures_iter(line) {
            let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
                continue;
            };

            output.push_str(&line[last_end..whole.start()]);
            output.push_str(&resolve(key.as_str(), captures.get(2).map(|m| m.as_str()))?);
            last_end = whole.end();
        }

        output.push_str(&line[last_end..]);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

fn resolve(key: &str, default_value: Option<&str>) -> Result<String, String> {
    let Some(var_name) = key.strip_prefix("env.").filter(|name| !name.contains('.')) else {
        return Err(format!("only variables scoped with 'env.' are supported: `{key}`"));
    };

    match (std::env::var(var_name), default_value) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_owned()),
        (Err(_), None) => Err(format!("environment variable not found: `{var_name}`")),
    }
}
