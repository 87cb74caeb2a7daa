//! Per-schema authentication-mode descriptor
//!
//! Declared once in the schema as a comment line:
//!
//! ```text
//! # Authorization {"Header":"X-App-Auth","Namespace":"https://app.io/claims","Algo":"HS256","VerificationKey":"secret"}
//! ```
//!
//! The descriptor tells the token-verification layer how to produce claims.
//! The engine itself reads only `namespace` and `closed_by_default`.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Marker that introduces the descriptor line
pub const AUTH_MODE_MARKER: &str = "# Authorization";

const SUPPORTED_ALGORITHMS: [&str; 2] = ["HS256", "RS256"];

/// Authentication-mode descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthMode {
    /// Request header carrying the token
    pub header: String,

    /// Key under which claims live in the token payload
    pub namespace: String,

    /// Signature algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algo: Option<String>,

    /// Shared secret or public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_key: Option<String>,

    /// Key set URL, alternative to `verification_key`
    #[serde(rename = "JWKURL", default, skip_serializing_if = "Option::is_none")]
    pub jwk_url: Option<String>,

    /// Accepted audiences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,

    /// Deny anonymous requests on every type
    #[serde(default)]
    pub closed_by_default: bool,
}

impl AuthMode {
    /// Find and parse the descriptor line in schema text
    pub fn from_schema_text(text: &str) -> Result<Option<Self>, SchemaError> {
        let Some(json) = text.lines().find_map(descriptor_json) else {
            return Ok(None);
        };

        let mode: AuthMode = serde_json::from_str(json)
            .map_err(|e| SchemaError::InvalidAuthMode(e.to_string()))?;
        mode.validate()?;
        Ok(Some(mode))
    }

    /// Validate the descriptor
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.header.is_empty() {
            return Err(SchemaError::InvalidAuthMode("Header is required".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(SchemaError::InvalidAuthMode("Namespace is required".to_string()));
        }

        match (&self.verification_key, &self.jwk_url) {
            (Some(_), Some(_)) => {
                return Err(SchemaError::InvalidAuthMode(
                    "VerificationKey and JWKURL are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(SchemaError::InvalidAuthMode(
                    "one of VerificationKey or JWKURL is required".to_string(),
                ))
            }
            (Some(_), None) => {
                let algo = self.algo.as_deref().unwrap_or_default();
                if !SUPPORTED_ALGORITHMS.contains(&algo) {
                    return Err(SchemaError::InvalidAuthMode(format!(
                        "unsupported Algo '{}', expected one of {:?}",
                        algo, SUPPORTED_ALGORITHMS
                    )));
                }
            }
            (None, Some(_)) => {
                if self.audience.is_empty() {
                    return Err(SchemaError::InvalidAuthMode(
                        "Audience is required with JWKURL".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// JSON body of a descriptor line: the marker, whitespace, then an object
fn descriptor_json(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix(AUTH_MODE_MARKER)?;
    let json = rest.trim_start();
    (rest.starts_with(char::is_whitespace) && json.starts_with('{')).then(|| json.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor_line() {
        let sdl = r#"
type Todo { id: ID! }
# Authorization {"Header":"X-App-Auth","Namespace":"https://app.io/claims","Algo":"HS256","VerificationKey":"secret","ClosedByDefault":true}
"#;
        let mode = AuthMode::from_schema_text(sdl).unwrap().unwrap();
        assert_eq!(mode.header, "X-App-Auth");
        assert_eq!(mode.namespace, "https://app.io/claims");
        assert!(mode.closed_by_default);
    }

    #[test]
    fn test_missing_descriptor() {
        assert_eq!(AuthMode::from_schema_text("type Todo { id: ID! }").unwrap(), None);
    }

    #[test]
    fn test_plain_comment_is_not_a_descriptor() {
        let sdl = r#"
# Authorization rules below
# Authorization: see docs
type Todo { id: ID! }
"#;
        assert_eq!(AuthMode::from_schema_text(sdl).unwrap(), None);

        let sdl = r#"
# Authorization rules below
# Authorization {"Header":"X-Auth","Namespace":"ns","Algo":"HS256","VerificationKey":"secret"}
"#;
        let mode = AuthMode::from_schema_text(sdl).unwrap().unwrap();
        assert_eq!(mode.header, "X-Auth");
    }

    #[test]
    fn test_validation_errors() {
        let base = AuthMode {
            header: "X-Auth".to_string(),
            namespace: "ns".to_string(),
            algo: Some("HS256".to_string()),
            verification_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(base.validate().is_ok());

        let bad_algo = AuthMode {
            algo: Some("none".to_string()),
            ..base.clone()
        };
        assert!(bad_algo.validate().is_err());

        let both_keys = AuthMode {
            jwk_url: Some("https://keys".to_string()),
            ..base.clone()
        };
        assert!(both_keys.validate().is_err());

        let jwk_without_audience = AuthMode {
            verification_key: None,
            algo: None,
            jwk_url: Some("https://keys".to_string()),
            ..base
        };
        assert!(jwk_without_audience.validate().is_err());
    }

    #[test]
    fn test_invalid_json() {
        let err = AuthMode::from_schema_text("# Authorization {not json}").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAuthMode(_)));
    }
}
