//! Upstream credential lookup
//!
//! Acquiring a session (the browser login flow) happens outside the
//! gateway; this module only reads what that flow left behind.

use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::LlmError;

/// Environment variables naming the session home, in lookup order
const HOME_VARIABLES: &[&str] = &["CHATGPT_LOCAL_HOME", "CODEX_HOME"];

/// Home-relative fallbacks, in lookup order
const HOME_FALLBACKS: &[&str] = &[".chatgpt-local", ".codex"];

const AUTH_FILE: &str = "auth.json";

/// JWT claim holding the account metadata
const AUTH_CLAIM: &str = "https://api.openai.com/auth";

/// A bearer token and the account it belongs to
#[derive(Debug, Clone)]
pub struct BearerCredential {
    pub token: SecretString,
    /// Sent as `chatgpt-account-id` by the session backend
    pub account_id: Option<String>,
}

/// Source of currently valid upstream credentials
pub trait CredentialProvider: Send + Sync {
    /// Bearer credential for the named backend
    ///
    /// Fails with `Unauthenticated` when no valid credential exists; the
    /// gateway never retries this.
    fn get_bearer(&self, backend_id: &str) -> Result<BearerCredential, LlmError>;
}

/// A fixed token from configuration
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: Option<SecretString>,
}

impl StaticCredentials {
    /// Blank tokens count as missing
    pub fn new(token: Option<SecretString>) -> Self {
        Self {
            token: token.filter(|t| !t.expose_secret().trim().is_empty()),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_bearer(&self, backend_id: &str) -> Result<BearerCredential, LlmError> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| LlmError::Unauthenticated(format!("missing API key for provider '{backend_id}'")))?;

        Ok(BearerCredential {
            token,
            account_id: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthFile {
    #[serde(default)]
    tokens: Option<AuthTokens>,
}

#[derive(Debug, Deserialize)]
struct AuthTokens {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Tokens stored by the login flow in `auth.json`
///
/// The file is re-read on every lookup so a refreshed login is picked up
/// without restarting.
#[derive(Debug, Clone, Default)]
pub struct AuthFileCredentials {
    explicit: Option<PathBuf>,
}

impl AuthFileCredentials {
    /// Search the standard locations
    pub const fn new() -> Self {
        Self { explicit: None }
    }

    /// Read only the given file
    pub const fn with_path(path: PathBuf) -> Self {
        Self { explicit: Some(path) }
    }

    fn candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.explicit {
            return vec![path.clone()];
        }

        let from_env = HOME_VARIABLES
            .iter()
            .filter_map(|name| std::env::var_os(name))
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let from_home = std::env::var_os("HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .into_iter()
            .flat_map(|home| HOME_FALLBACKS.iter().map(move |dir| home.join(dir)));

        from_env.chain(from_home).map(|dir| dir.join(AUTH_FILE)).collect()
    }

    fn read(path: &Path) -> Option<AuthFile> {
        let raw = std::fs::read_to_string(path).ok()?;

        match serde_json::from_str(&raw) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable auth file");
                None
            }
        }
    }

    fn tokens(&self) -> Option<AuthTokens> {
        self.candidates()
            .iter()
            .find_map(|path| Self::read(path))
            .and_then(|file| file.tokens)
    }

    /// First auth file found and its raw contents
    pub fn raw(&self) -> Option<(PathBuf, serde_json::Value)> {
        self.candidates().into_iter().find_map(|path| {
            let raw = std::fs::read_to_string(&path).ok()?;
            let value = serde_json::from_str(&raw).ok()?;
            Some((path, value))
        })
    }

    /// Describe the stored session without exposing its tokens
    ///
    /// `None` when no session with an access token exists.
    pub fn session_info(&self) -> Option<SessionInfo> {
        let tokens = self.tokens()?;
        let access_token = tokens.access_token.filter(|t| !t.is_empty())?;
        let id_claims = tokens.id_token.as_deref().and_then(jwt_claims);

        let email = id_claims.as_ref().and_then(|claims| {
            ["email", "preferred_username"]
                .iter()
                .find_map(|key| claims.get(*key)?.as_str().map(str::to_owned))
        });

        let account_id = tokens
            .account_id
            .filter(|id| !id.is_empty())
            .or_else(|| tokens.id_token.as_deref().and_then(account_id_from_jwt));

        Some(SessionInfo {
            account_id,
            email,
            plan: auth_claim(&access_token, "chatgpt_plan_type"),
        })
    }
}

/// What `chatmux info` reports about the stored session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub account_id: Option<String>,
    pub email: Option<String>,
    /// Raw `chatgpt_plan_type` claim, e.g. `plus`
    pub plan: Option<String>,
}

impl CredentialProvider for AuthFileCredentials {
    fn get_bearer(&self, backend_id: &str) -> Result<BearerCredential, LlmError> {
        let Some(tokens) = self.tokens() else {
            return Err(LlmError::Unauthenticated(format!(
                "no session found for provider '{backend_id}'; sign in first"
            )));
        };

        let Some(access_token) = tokens.access_token.filter(|t| !t.is_empty()) else {
            return Err(LlmError::Unauthenticated(format!(
                "session for provider '{backend_id}' has no access token; sign in again"
            )));
        };

        let account_id = tokens
            .account_id
            .filter(|id| !id.is_empty())
            .or_else(|| tokens.id_token.as_deref().and_then(account_id_from_jwt));

        Ok(BearerCredential {
            token: SecretString::from(access_token),
            account_id,
        })
    }
}

/// Claims of an unverified JWT
fn jwt_claims(token: &str) -> Option<serde_json::Value> {
    let mut segments = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return None;
    };

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn auth_claim(token: &str, field: &str) -> Option<String> {
    jwt_claims(token)?
        .get(AUTH_CLAIM)?
        .get(field)?
        .as_str()
        .map(str::to_owned)
}

/// `chatgpt_account_id` from the auth claim of an unverified JWT
fn account_id_from_jwt(token: &str) -> Option<String> {
    auth_claim(token, "chatgpt_account_id")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    fn write_auth(dir: &Path, tokens: &serde_json::Value) {
        fs::write(dir.join(AUTH_FILE), json!({ "tokens": tokens }).to_string()).unwrap();
    }

    #[test]
    fn static_credentials_reject_blank_tokens() {
        let error = StaticCredentials::new(Some(SecretString::from("  ")))
            .get_bearer("grok")
            .unwrap_err();
        assert!(matches!(error, LlmError::Unauthenticated(message) if message.contains("grok")));

        let bearer = StaticCredentials::new(Some(SecretString::from("xai-123")))
            .get_bearer("grok")
            .unwrap();
        assert_eq!(bearer.token.expose_secret(), "xai-123");
    }

    #[test]
    fn reads_tokens_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), &json!({"access_token": "at", "account_id": "acct"}));

        let bearer = AuthFileCredentials::with_path(dir.path().join(AUTH_FILE))
            .get_bearer("chatgpt")
            .unwrap();

        assert_eq!(bearer.token.expose_secret(), "at");
        assert_eq!(bearer.account_id.as_deref(), Some("acct"));
    }

    #[test]
    fn account_id_falls_back_to_id_token_claim() {
        let dir = tempfile::tempdir().unwrap();
        let id_token = jwt(&json!({ AUTH_CLAIM: { "chatgpt_account_id": "from-jwt" } }));
        write_auth(dir.path(), &json!({"access_token": "at", "id_token": id_token}));

        let bearer = AuthFileCredentials::with_path(dir.path().join(AUTH_FILE))
            .get_bearer("chatgpt")
            .unwrap();

        assert_eq!(bearer.account_id.as_deref(), Some("from-jwt"));
    }

    #[test]
    fn searches_env_homes_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_auth(second.path(), &json!({"access_token": "codex-home"}));

        temp_env::with_vars(
            [
                ("CHATGPT_LOCAL_HOME", Some(first.path().as_os_str())),
                ("CODEX_HOME", Some(second.path().as_os_str())),
            ],
            || {
                let bearer = AuthFileCredentials::new().get_bearer("chatgpt").unwrap();
                assert_eq!(bearer.token.expose_secret(), "codex-home");
            },
        );

        write_auth(first.path(), &json!({"access_token": "local-home"}));

        temp_env::with_vars(
            [
                ("CHATGPT_LOCAL_HOME", Some(first.path().as_os_str())),
                ("CODEX_HOME", Some(second.path().as_os_str())),
            ],
            || {
                let bearer = AuthFileCredentials::new().get_bearer("chatgpt").unwrap();
                assert_eq!(bearer.token.expose_secret(), "local-home");
            },
        );
    }

    #[test]
    fn missing_session_is_unauthenticated() {
        let empty = tempfile::tempdir().unwrap();

        temp_env::with_vars(
            [
                ("CHATGPT_LOCAL_HOME", None),
                ("CODEX_HOME", None),
                ("HOME", Some(empty.path().as_os_str())),
            ],
            || {
                let error = AuthFileCredentials::new().get_bearer("chatgpt").unwrap_err();
                assert!(matches!(error, LlmError::Unauthenticated(_)));
            },
        );
    }

    #[test]
    fn session_info_reads_claims() {
        let dir = tempfile::tempdir().unwrap();
        let id_token = jwt(&json!({
            "email": "dev@example.com",
            AUTH_CLAIM: { "chatgpt_account_id": "from-jwt" }
        }));
        let access_token = jwt(&json!({ AUTH_CLAIM: { "chatgpt_plan_type": "plus" } }));
        write_auth(dir.path(), &json!({"access_token": access_token, "id_token": id_token}));

        let credentials = AuthFileCredentials::with_path(dir.path().join(AUTH_FILE));

        assert_eq!(
            credentials.session_info(),
            Some(SessionInfo {
                account_id: Some("from-jwt".to_owned()),
                email: Some("dev@example.com".to_owned()),
                plan: Some("plus".to_owned()),
            })
        );

        let (path, raw) = credentials.raw().unwrap();
        assert_eq!(path, dir.path().join(AUTH_FILE));
        assert_eq!(raw["tokens"]["access_token"], access_token);
    }

    #[test]
    fn session_info_needs_an_access_token() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), &json!({"account_id": "acct"}));

        let credentials = AuthFileCredentials::with_path(dir.path().join(AUTH_FILE));
        assert_eq!(credentials.session_info(), None);

        let missing = AuthFileCredentials::with_path(dir.path().join("absent.json"));
        assert_eq!(missing.session_info(), None);
        assert!(missing.raw().is_none());
    }

    #[test]
    fn malformed_jwt_yields_no_account() {
        assert_eq!(account_id_from_jwt("not-a-jwt"), None);
        assert_eq!(account_id_from_jwt("a.b.c.d"), None);
        assert_eq!(account_id_from_jwt("a.!!!.c"), None);
    }
}
