//! Bearer-token authentication.
//!
//! Tokens are tried in order: personal access token, the configured
//! development token, then an OIDC id token. PAT lookups go by prefix and
//! compare the peppered HMAC in constant time; a revoked or expired match is
//! a hard failure, not a fall-through.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use sqlx::{PgPool, Row};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::oidc::OidcVerifier;

#[derive(Clone, Debug, Serialize)]
pub struct OrgMembership {
    pub organization_id: String,
    pub role: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TeamMembership {
    pub team_id: String,
    pub role: String,
}

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct Principal {
    pub subject: String,
    pub user_id: String,
    pub email: String,
    pub scopes: Vec<String>,
    pub orgs: Vec<OrgMembership>,
    pub teams: Vec<TeamMembership>,
    /// Dev-token and OIDC principals bypass scope checks entirely.
    pub all: bool,
}

impl Principal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.all || self.scopes.iter().any(|s| s == "*" || s == scope)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingBearer,
    #[error("token is revoked")]
    Revoked,
    #[error("token is expired")]
    Expired,
    #[error("token verification is not configured")]
    NotConfigured,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("verify token: {0}")]
    Database(String),
}

pub struct AuthVerifier {
    pub pool: Option<PgPool>,
    pub pat_pepper: String,
    pub dev_token: String,
    pub oidc: Option<OidcVerifier>,
    pub now: fn() -> DateTime<Utc>,
}

impl AuthVerifier {
    /// Hex HMAC-SHA256 of the raw token under the server pepper.
    pub fn hash_token(&self, token: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.pat_pepper.as_bytes())
            .expect("hmac accepts any key len");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub async fn authenticate(&self, auth_header: Option<&str>) -> Result<Principal, AuthError> {
        let token = bearer_token(auth_header).ok_or(AuthError::MissingBearer)?;

        if let Some(principal) = self.authenticate_pat(&token).await? {
            return Ok(principal);
        }

        if !self.dev_token.is_empty() && constant_eq(&token, &self.dev_token) {
            return Ok(Principal {
                subject: "dev-user".into(),
                user_id: "dev-user".into(),
                email: "dev@example.com".into(),
                scopes: Vec::new(),
                orgs: Vec::new(),
                teams: Vec::new(),
                all: true,
            });
        }

        let Some(oidc) = &self.oidc else {
            return Err(AuthError::NotConfigured);
        };
        let claims = oidc
            .verify(&token)
            .await
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("token missing sub claim".into()));
        }
        Ok(Principal {
            subject: claims.sub.clone(),
            user_id: claims.sub,
            email: claims.email.unwrap_or_default(),
            scopes: Vec::new(),
            orgs: Vec::new(),
            teams: Vec::new(),
            all: true,
        })
    }

    /// `Ok(None)` when PATs are unavailable or no row matches; errors are
    /// terminal (revoked / expired / database failures).
    async fn authenticate_pat(&self, token: &str) -> Result<Option<Principal>, AuthError> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        if self.pat_pepper.is_empty() {
            return Ok(None);
        }
        let Some(prefix) = extract_token_prefix(token) else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT pat.id::text AS id, pat.user_id::text AS user_id, pat.token_hash, \
                    pat.expires_at, pat.revoked_at, pat.scopes, COALESCE(u.email, '') AS email \
             FROM personal_access_tokens pat \
             JOIN users u ON u.id = pat.user_id \
             WHERE pat.token_prefix = $1 \
             ORDER BY pat.created_at DESC",
        )
        .bind(&prefix)
        .fetch_all(pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

        let hash = self.hash_token(token);
        for row in rows {
            let stored_hash: String = row
                .try_get("token_hash")
                .map_err(|e| AuthError::Database(e.to_string()))?;
            if !constant_eq(&stored_hash, &hash) {
                continue;
            }
            let revoked_at: Option<DateTime<Utc>> = row
                .try_get("revoked_at")
                .map_err(|e| AuthError::Database(e.to_string()))?;
            if revoked_at.is_some() {
                return Err(AuthError::Revoked);
            }
            let expires_at: Option<DateTime<Utc>> = row
                .try_get("expires_at")
                .map_err(|e| AuthError::Database(e.to_string()))?;
            if let Some(expiry) = expires_at {
                if (self.now)() > expiry {
                    return Err(AuthError::Expired);
                }
            }

            let token_id: String = row
                .try_get("id")
                .map_err(|e| AuthError::Database(e.to_string()))?;
            let user_id: String = row
                .try_get("user_id")
                .map_err(|e| AuthError::Database(e.to_string()))?;
            let scopes: Vec<String> = row
                .try_get("scopes")
                .map_err(|e| AuthError::Database(e.to_string()))?;
            let email: String = row
                .try_get("email")
                .map_err(|e| AuthError::Database(e.to_string()))?;

            if let Err(err) = sqlx::query(
                "UPDATE personal_access_tokens SET last_used_at = NOW() WHERE id = $1::uuid",
            )
            .bind(&token_id)
            .execute(pool)
            .await
            {
                tracing::warn!("failed to update token last_used_at token_id={token_id}: {err}");
            }

            let orgs = self.load_org_memberships(pool, &user_id).await?;
            let teams = self.load_team_memberships(pool, &user_id).await?;
            return Ok(Some(Principal {
                subject: user_id.clone(),
                user_id,
                email,
                scopes,
                orgs,
                teams,
                all: false,
            }));
        }
        Ok(None)
    }

    async fn load_org_memberships(
        &self,
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Vec<OrgMembership>, AuthError> {
        let rows = sqlx::query(
            "SELECT organization_id::text AS organization_id, role \
             FROM organization_members WHERE user_id = $1::uuid ORDER BY organization_id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(OrgMembership {
                    organization_id: row
                        .try_get("organization_id")
                        .map_err(|e| AuthError::Database(e.to_string()))?,
                    role: row
                        .try_get("role")
                        .map_err(|e| AuthError::Database(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn load_team_memberships(
        &self,
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Vec<TeamMembership>, AuthError> {
        let rows = sqlx::query(
            "SELECT team_id::text AS team_id, role \
             FROM team_members WHERE user_id = $1::uuid ORDER BY team_id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(TeamMembership {
                    team_id: row
                        .try_get("team_id")
                        .map_err(|e| AuthError::Database(e.to_string()))?,
                    role: row
                        .try_get("role")
                        .map_err(|e| AuthError::Database(e.to_string()))?,
                })
            })
            .collect()
    }
}

fn constant_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// The part before `.` when present, else the first 12 characters (or the
/// whole token when shorter).
pub fn extract_token_prefix(token: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Some(idx) = token.find('.') {
        if idx > 0 {
            return Some(token[..idx].to_string());
        }
    }
    if token.len() < 12 {
        return Some(token.to_string());
    }
    Some(token[..12].to_string())
}

pub fn bearer_token(auth_header: Option<&str>) -> Option<String> {
    let raw = auth_header?.trim();
    let lower = raw.to_lowercase();
    if !lower.starts_with("bearer ") {
        return None;
    }
    let token = raw["bearer ".len()..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        assert_eq!(
            bearer_token(Some("Bearer abc.def")).as_deref(),
            Some("abc.def")
        );
        assert_eq!(bearer_token(Some("bearer tok")).as_deref(), Some("tok"));
        assert!(bearer_token(Some("Basic abc")).is_none());
        assert!(bearer_token(Some("Bearer   ")).is_none());
        assert!(bearer_token(None).is_none());
    }

    #[test]
    fn token_prefix_rules() {
        assert_eq!(
            extract_token_prefix("espat_abc123.secretpart").as_deref(),
            Some("espat_abc123")
        );
        assert_eq!(
            extract_token_prefix("0123456789abcdef").as_deref(),
            Some("0123456789ab")
        );
        assert_eq!(extract_token_prefix("short").as_deref(), Some("short"));
        assert!(extract_token_prefix("").is_none());
    }

    #[test]
    fn scope_checks() {
        let mut p = Principal {
            subject: "u".into(),
            user_id: "u".into(),
            email: String::new(),
            scopes: vec!["store:read".into()],
            orgs: Vec::new(),
            teams: Vec::new(),
            all: false,
        };
        assert!(p.has_scope("store:read"));
        assert!(!p.has_scope("store:write"));

        p.scopes = vec!["*".into()];
        assert!(p.has_scope("tokens:write"));

        p.scopes = Vec::new();
        p.all = true;
        assert!(p.has_scope("anything"));
    }

    #[test]
    fn pat_hash_is_stable_hmac() {
        let verifier = AuthVerifier {
            pool: None,
            pat_pepper: "pepper".into(),
            dev_token: String::new(),
            oidc: None,
            now: Utc::now,
        };
        let a = verifier.hash_token("espat_aa.bb");
        let b = verifier.hash_token("espat_aa.bb");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, verifier.hash_token("espat_aa.bc"));
    }

    #[tokio::test]
    async fn dev_token_authenticates_with_all_scopes() {
        let verifier = AuthVerifier {
            pool: None,
            pat_pepper: String::new(),
            dev_token: "letmein".into(),
            oidc: None,
            now: Utc::now,
        };
        let principal = verifier
            .authenticate(Some("Bearer letmein"))
            .await
            .unwrap();
        assert_eq!(principal.user_id, "dev-user");
        assert!(principal.all);
        assert!(principal.has_scope("store:write"));
    }

    #[tokio::test]
    async fn unknown_token_without_oidc_is_rejected() {
        let verifier = AuthVerifier {
            pool: None,
            pat_pepper: String::new(),
            dev_token: "letmein".into(),
            oidc: None,
            now: Utc::now,
        };
        let err = verifier
            .authenticate(Some("Bearer other"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let verifier = AuthVerifier {
            pool: None,
            pat_pepper: String::new(),
            dev_token: String::new(),
            oidc: None,
            now: Utc::now,
        };
        assert!(matches!(
            verifier.authenticate(None).await.unwrap_err(),
            AuthError::MissingBearer
        ));
    }
}
