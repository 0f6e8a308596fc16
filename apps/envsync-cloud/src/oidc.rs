//! OIDC id-token verification (RS256 via issuer JWKS discovery).

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("init oidc provider: {0}")]
    Discovery(String),
    #[error("unknown signing key {0:?}")]
    UnknownKey(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

#[derive(Deserialize)]
struct JwksDoc {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct DiscoveryDoc {
    jwks_uri: String,
}

pub struct OidcVerifier {
    issuer: String,
    audience: String,
    skip_aud_check: bool,
    keys: Vec<Jwk>,
}

impl OidcVerifier {
    /// Fetch the issuer's discovery document and JWKS once at startup.
    pub async fn discover(
        issuer: &str,
        audience: &str,
        skip_aud_check: bool,
    ) -> Result<Self, OidcError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(8))
            .build()
            .map_err(|e| OidcError::Discovery(e.to_string()))?;
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let discovery: DiscoveryDoc = client
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;
        let jwks: JwksDoc = client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        Ok(Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            audience: audience.to_string(),
            skip_aud_check,
            keys: jwks
                .keys
                .into_iter()
                .filter(|k| k.kty == "RSA" || k.kty.is_empty())
                .collect(),
        })
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, OidcError> {
        let header = decode_header(token).map_err(|e| OidcError::Invalid(e.to_string()))?;
        let kid = header.kid.unwrap_or_default();
        let key = self
            .keys
            .iter()
            .find(|k| k.kid == kid || self.keys.len() == 1)
            .ok_or_else(|| OidcError::UnknownKey(kid.clone()))?;
        let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)
            .map_err(|e| OidcError::Invalid(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        if self.audience.is_empty() || self.skip_aud_check {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[&self.audience]);
        }

        let data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| OidcError::Invalid(e.to_string()))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwks_doc_parses() {
        let raw = r#"{"keys":[{"kid":"k1","kty":"RSA","n":"abc","e":"AQAB"},{"kid":"k2","kty":"EC"}]}"#;
        let doc: JwksDoc = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.keys.len(), 2);
        assert_eq!(doc.keys[0].kid, "k1");
    }

    #[test]
    fn discovery_doc_parses() {
        let raw = r#"{"issuer":"https://idp.example","jwks_uri":"https://idp.example/jwks"}"#;
        let doc: DiscoveryDoc = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.jwks_uri, "https://idp.example/jwks");
    }

    #[tokio::test]
    async fn malformed_token_is_invalid() {
        let verifier = OidcVerifier {
            issuer: "https://idp.example".into(),
            audience: String::new(),
            skip_aud_check: false,
            keys: vec![Jwk {
                kid: "k1".into(),
                kty: "RSA".into(),
                n: "abc".into(),
                e: "AQAB".into(),
            }],
        };
        assert!(matches!(
            verifier.verify("not-a-jwt").await.unwrap_err(),
            OidcError::Invalid(_)
        ));
    }
}
