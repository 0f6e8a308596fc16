//! Personal access token minting and scope validation.

pub const ALLOWED_SCOPES: &[&str] = &[
    "profile:read",
    "store:read",
    "store:write",
    "tokens:write",
    "*",
];

pub const DEFAULT_SCOPES: &[&str] = &["profile:read", "store:read", "store:write"];

/// `(raw, prefix)`: prefix is `espat_<6 random bytes hex>`, raw is
/// `<prefix>.<18 random bytes hex>`. The raw token is shown exactly once.
pub fn generate_pat() -> (String, String) {
    let prefix = format!("espat_{}", random_hex(6));
    let raw = format!("{}.{}", prefix, random_hex(18));
    (raw, prefix)
}

fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

pub fn validate_scopes(scopes: &[String]) -> Result<(), String> {
    for scope in scopes {
        let scope = scope.trim();
        if scope.is_empty() {
            return Err("scope entries cannot be empty".to_string());
        }
        if !ALLOWED_SCOPES.contains(&scope) {
            return Err(format!("unsupported scope {scope:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pat_shape() {
        let (raw, prefix) = generate_pat();
        assert!(prefix.starts_with("espat_"));
        assert_eq!(prefix.len(), "espat_".len() + 12);
        assert!(raw.starts_with(&format!("{prefix}.")));
        let secret = raw.split('.').nth(1).unwrap();
        assert_eq!(secret.len(), 36);
    }

    #[test]
    fn pats_are_unique() {
        let (a, _) = generate_pat();
        let (b, _) = generate_pat();
        assert_ne!(a, b);
    }

    #[test]
    fn scope_validation() {
        assert!(validate_scopes(&["store:read".into(), "*".into()]).is_ok());
        assert!(validate_scopes(&[]).is_ok());
        assert!(validate_scopes(&["".into()]).is_err());
        assert!(validate_scopes(&["admin:everything".into()]).is_err());
    }
}
