//! `chatmux info`: report on the stored session

use std::fmt::Write as _;
use std::path::PathBuf;

use chatmux_llm::credentials::{AuthFileCredentials, SessionInfo};

const UNKNOWN: &str = "<unknown>";

pub fn run(json: bool, auth_file: Option<PathBuf>) -> anyhow::Result<()> {
    let credentials = auth_file.map_or_else(AuthFileCredentials::new, AuthFileCredentials::with_path);

    if json {
        let raw = credentials
            .raw()
            .map_or_else(|| serde_json::json!({}), |(_, value)| value);
        println!("{}", serde_json::to_string_pretty(&raw)?);
        return Ok(());
    }

    print!("{}", render(credentials.session_info().as_ref()));
    Ok(())
}

fn plan_label(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "plus" => "Plus".to_owned(),
        "pro" => "Pro".to_owned(),
        "free" => "Free".to_owned(),
        "team" => "Team".to_owned(),
        "enterprise" => "Enterprise".to_owned(),
        _ => {
            let mut chars = raw.chars();
            chars
                .next()
                .map_or_else(String::new, |first| first.to_uppercase().chain(chars).collect())
        }
    }
}

fn render(info: Option<&SessionInfo>) -> String {
    let mut out = String::from("Account\n");

    let Some(info) = info else {
        out.push_str("  Not signed in\n");
        return out;
    };

    let plan = info.plan.as_deref().map_or_else(|| "Unknown".to_owned(), plan_label);
    let _ = writeln!(out, "  Email:      {}", info.email.as_deref().unwrap_or(UNKNOWN));
    let _ = writeln!(out, "  Plan:       {plan}");
    let _ = writeln!(out, "  Account id: {}", info.account_id.as_deref().unwrap_or(UNKNOWN));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_signed_in_session() {
        let info = SessionInfo {
            account_id: Some("acct-1".to_owned()),
            email: Some("dev@example.com".to_owned()),
            plan: Some("plus".to_owned()),
        };

        assert_eq!(
            render(Some(&info)),
            "Account\n  Email:      dev@example.com\n  Plan:       Plus\n  Account id: acct-1\n"
        );
    }

    #[test]
    fn renders_missing_session() {
        assert_eq!(render(None), "Account\n  Not signed in\n");
    }

    #[test]
    fn unknown_plans_are_capitalized() {
        assert_eq!(plan_label("edu"), "Edu");
        assert_eq!(plan_label("PRO"), "Pro");
        assert_eq!(plan_label(""), "");
    }

    #[test]
    fn missing_claims_render_as_unknown() {
        let rendered = render(Some(&SessionInfo::default()));
        assert!(rendered.contains("Email:      <unknown>"));
        assert!(rendered.contains("Plan:       Unknown"));
        assert!(rendered.contains("Account id: <unknown>"));
    }
}
