use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, Result};

/// The identity handed to session creation, whatever the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Known profile payload shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileShape {
    /// OIDC standard claims: `sub`, `email`, `name`, `picture`.
    #[default]
    #[serde(rename = "oidc")]
    Oidc,
    /// GitHub's `/user`: numeric `id`, `login`, `avatar_url`.
    #[serde(rename = "github")]
    GitHub,
}

impl ProfileShape {
    pub fn normalize(&self, profile: &Value) -> Result<UserIdentity> {
        let (id, name, image) = match self {
            ProfileShape::Oidc => (scalar(profile, "sub"), text(profile, "name"), text(profile, "picture")),
            ProfileShape::GitHub => (
                scalar(profile, "id"),
                text(profile, "name").or_else(|| text(profile, "login")),
                text(profile, "avatar_url"),
            ),
        };
        let id = id.ok_or_else(|| AuthError::ClaimsVerification("profile has no subject".into()))?;
        let email = text(profile, "email").ok_or_else(|| AuthError::ClaimsVerification("profile has no email".into()))?;
        Ok(UserIdentity { id, email, name, image })
    }
}

fn text(profile: &Value, field: &str) -> Option<String> {
    profile.get(field).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

// Strings or integers; GitHub ids are numbers.
fn scalar(profile: &Value, field: &str) -> Option<String> {
    match profile.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
