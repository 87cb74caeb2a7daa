//! Request-scoped claim store
//!
//! A [`ClaimSet`] is built once per request from an already-verified token
//! payload and never mutated afterwards. Lookups distinguish an absent claim
//! from a claim holding an empty or false value; only the evaluator consumes
//! that distinction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthzError, Result};
use crate::value::Value;

/// Opaque comparable claim value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ClaimValue>),
}

impl ClaimValue {
    /// Convert into the value language used by rule literals and filters
    pub fn to_value(&self) -> Value {
        match self {
            ClaimValue::Null => Value::Null,
            ClaimValue::Bool(b) => Value::Boolean(*b),
            ClaimValue::Int(i) => Value::Int(*i),
            ClaimValue::Float(f) => Value::Float(*f),
            ClaimValue::String(s) => Value::String(s.clone()),
            ClaimValue::List(items) => Value::List(items.iter().map(ClaimValue::to_value).collect()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(ClaimValue::Null),
            serde_json::Value::Bool(b) => Some(ClaimValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ClaimValue::Int(i)),
                None => n.as_f64().map(ClaimValue::Float),
            },
            serde_json::Value::String(s) => Some(ClaimValue::String(s.clone())),
            serde_json::Value::Array(items) => Some(ClaimValue::List(
                items
                    .iter()
                    .filter(|item| !item.is_array() && !item.is_object())
                    .filter_map(ClaimValue::from_json)
                    .collect(),
            )),
            serde_json::Value::Object(_) => None,
        }
    }
}

impl From<&str> for ClaimValue {
    fn from(value: &str) -> Self {
        ClaimValue::String(value.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(value: String) -> Self {
        ClaimValue::String(value)
    }
}

impl From<bool> for ClaimValue {
    fn from(value: bool) -> Self {
        ClaimValue::Bool(value)
    }
}

impl From<i64> for ClaimValue {
    fn from(value: i64) -> Self {
        ClaimValue::Int(value)
    }
}

/// Result of looking up a claim by name
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ClaimLookup<'a> {
    Present(&'a ClaimValue),
    Absent,
}

/// Validated mapping from claim name to claim value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    claims: BTreeMap<String, ClaimValue>,
}

impl ClaimSet {
    /// Create an empty (anonymous) claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a claim; names may be given with or without the leading `$`
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<ClaimValue>) -> Self {
        let name = name.into();
        let name = name.strip_prefix('$').map(str::to_string).unwrap_or(name);
        self.claims.insert(name, value.into());
        self
    }

    /// Build a claim set from a verified, decoded token payload.
    ///
    /// With a namespace, claims are read from the object stored under that
    /// key; otherwise the top level is used. Nested objects are flattened
    /// into dotted names (`org.id`).
    pub fn from_token_payload(payload: &serde_json::Value, namespace: Option<&str>) -> Result<Self> {
        let root = payload
            .as_object()
            .ok_or_else(|| AuthzError::InvalidInput("token payload must be a JSON object".to_string()))?;

        let source = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => match root.get(ns) {
                Some(serde_json::Value::Object(map)) => map,
                Some(_) => {
                    return Err(AuthzError::InvalidInput(format!(
                        "claims namespace '{}' is not an object",
                        ns
                    )))
                }
                None => {
                    debug!("Token payload has no '{}' namespace, no claims", ns);
                    return Ok(Self::new());
                }
            },
            None => root,
        };

        let mut claims = BTreeMap::new();
        Self::flatten_into(&mut claims, None, source);
        Ok(Self { claims })
    }

    fn flatten_into(
        claims: &mut BTreeMap<String, ClaimValue>,
        prefix: Option<&str>,
        map: &serde_json::Map<String, serde_json::Value>,
    ) {
        for (key, value) in map {
            let name = match prefix {
                Some(prefix) => format!("{}.{}", prefix, key),
                None => key.clone(),
            };
            match value {
                serde_json::Value::Object(nested) => Self::flatten_into(claims, Some(&name), nested),
                other => {
                    if let Some(claim) = ClaimValue::from_json(other) {
                        claims.insert(name, claim);
                    }
                }
            }
        }
    }

    /// Look up a claim; absence is reported explicitly
    pub(crate) fn lookup(&self, name: &str) -> ClaimLookup<'_> {
        match self.claims.get(name) {
            Some(value) => ClaimLookup::Present(value),
            None => ClaimLookup::Absent,
        }
    }

    /// Number of claims
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the request carried no claims at all
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Claims in name order
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &ClaimValue)> {
        self.claims.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_is_distinct_from_false() {
        let claims = ClaimSet::new().with_claim("$IS_ADMIN", false);

        assert_eq!(claims.lookup("IS_ADMIN"), ClaimLookup::Present(&ClaimValue::Bool(false)));
        assert_eq!(claims.lookup("USER"), ClaimLookup::Absent);
    }

    #[test]
    fn test_from_token_payload_with_namespace() {
        let payload = json!({
            "sub": "1234",
            "https://my.app.io/jwt/claims": {
                "USER": "amit",
                "ROLE": ["ADMIN", "USER"],
                "org": {"id": 7}
            }
        });

        let claims = ClaimSet::from_token_payload(&payload, Some("https://my.app.io/jwt/claims")).unwrap();

        assert_eq!(claims.len(), 3);
        assert_eq!(claims.lookup("USER"), ClaimLookup::Present(&ClaimValue::from("amit")));
        assert_eq!(claims.lookup("org.id"), ClaimLookup::Present(&ClaimValue::Int(7)));
        assert_eq!(claims.lookup("sub"), ClaimLookup::Absent);
    }

    #[test]
    fn test_missing_namespace_yields_no_claims() {
        let payload = json!({"sub": "1234"});
        let claims = ClaimSet::from_token_payload(&payload, Some("ns")).unwrap();
        assert!(claims.is_empty());
    }

    #[test]
    fn test_rejects_non_object_payload() {
        assert!(ClaimSet::from_token_payload(&json!("token"), None).is_err());
        assert!(ClaimSet::from_token_payload(&json!({"ns": 1}), Some("ns")).is_err());
    }

    #[test]
    fn test_deserialize_untagged_values() {
        let claims: BTreeMap<String, ClaimValue> =
            serde_json::from_value(json!({"a": null, "b": true, "c": 2, "d": "x"})).unwrap();
        assert_eq!(claims["a"], ClaimValue::Null);
        assert_eq!(claims["b"], ClaimValue::Bool(true));
        assert_eq!(claims["c"], ClaimValue::Int(2));
        assert_eq!(claims["d"], ClaimValue::from("x"));
    }
}
