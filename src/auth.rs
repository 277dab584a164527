use std::collections::HashMap;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::EmployeeRole;

/// Identity behind a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: String,
    pub email: String,
}

/// A caller that passed the tenancy guard for one company. Every core
/// operation receives this explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub caller: Caller,
    pub company_id: Ulid,
    pub employee_id: Ulid,
    pub role: EmployeeRole,
}

impl CallerContext {
    pub fn is_owner(&self) -> bool {
        self.role == EmployeeRole::Owner
    }

    pub fn email(&self) -> &str {
        &self.caller.email
    }
}

/// Emails are compared case-insensitively everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Resolves a bearer token to a caller. Token issuance and signature
/// checking belong to the identity provider behind this trait.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Option<Caller>;
}

/// Fixed token → email table, loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Caller>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, email: &str) -> Self {
        let email = normalize_email(email);
        self.tokens.insert(
            token.to_string(),
            Caller {
                uid: format!("static:{email}"),
                email,
            },
        );
        self
    }

    /// Parse `token=email[,token=email...]`. Blank input gives an empty table.
    pub fn parse(table: &str) -> Result<Self, String> {
        let mut verifier = Self::new();
        for pair in table.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (token, email) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected token=email, got {pair:?}"))?;
            let (token, email) = (token.trim(), email.trim());
            if token.is_empty() || !email.contains('@') {
                return Err(format!("invalid token entry {pair:?}"));
            }
            verifier = verifier.with_token(token, email);
        }
        Ok(verifier)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Caller> {
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parse_and_verify() {
        let v = StaticTokenVerifier::parse("t1=Owner@Clinic.test, t2=staff@clinic.test").unwrap();
        assert_eq!(v.len(), 2);
        let caller = v.verify("t1").await.unwrap();
        assert_eq!(caller.email, "owner@clinic.test");
        assert!(v.verify("nope").await.is_none());
    }

    #[test]
    fn parse_rejects_malformed_entries() {
        assert!(StaticTokenVerifier::parse("t1").is_err());
        assert!(StaticTokenVerifier::parse("=a@b").is_err());
        assert!(StaticTokenVerifier::parse("t1=not-an-email").is_err());
        assert!(StaticTokenVerifier::parse("  ").unwrap().is_empty());
    }
}
