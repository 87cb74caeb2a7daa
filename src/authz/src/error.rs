//! Error types for the authorization engine
//!
//! Denial is not represented here: a denied read is an empty result and a
//! denied write is an excluded node. Only schema-compile failures and
//! infrastructure failures are errors.

use thiserror::Error;

/// Schema compilation errors, surfaced to the schema author
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Union types may never carry auth rules
    #[error("Union type '{0}' cannot declare auth rules")]
    AuthOnUnion(String),

    /// A type name was declared twice
    #[error("Duplicate type definition: {0}")]
    DuplicateType(String),

    /// Reference to a type the schema does not define
    #[error("Unknown type '{name}' referenced from {context}")]
    UnknownType { name: String, context: String },

    /// `implements` names something that is not defined
    #[error("Type '{type_name}' implements unknown interface '{interface}'")]
    UnknownInterface { type_name: String, interface: String },

    /// `implements` names a type that is not an interface
    #[error("Type '{type_name}' implements '{interface}', which is not an interface")]
    NotAnInterface { type_name: String, interface: String },

    /// Interfaces implement each other in a loop
    #[error("Interface inheritance cycle: {0}")]
    InheritanceCycle(String),

    /// Rule text or structure could not be parsed
    #[error("Malformed rule on {location}: {message}")]
    MalformedRule { location: String, message: String },

    /// Variable used in a graph rule without being declared
    #[error("Rule on {location} uses undeclared variable ${variable}")]
    UndeclaredVariable { location: String, variable: String },

    /// The `# Authorization` descriptor is invalid
    #[error("Invalid authorization descriptor: {0}")]
    InvalidAuthMode(String),

    /// The schema document itself could not be parsed
    #[error("Schema parse error: {0}")]
    Parse(String),
}

impl SchemaError {
    pub(crate) fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::MalformedRule {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Errors reported by a query executor backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// Backend could not be reached
    #[error("Executor unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected or failed the query
    #[error("Executor query failed: {0}")]
    Query(String),
}

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Schema failed to compile; the previous schema stays active
    #[error("Schema compilation failed: {0}")]
    SchemaCompile(#[from] SchemaError),

    /// No schema has been loaded yet
    #[error("No schema loaded")]
    NoSchema,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Executor failed while evaluating a graph rule probe
    #[error("Authorization probe failed after {attempts} attempt(s): {source}")]
    ProbeFailed {
        attempts: u32,
        #[source]
        source: ExecutorError,
    },

    /// Probe exceeded its timeout or the request deadline
    #[error("Authorization probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    /// Parent request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Executor cannot express what the rule requires
    #[error("Unsupported executor capability: {0}")]
    UnsupportedCapability(String),

    /// Executor failed while running an authorized query
    #[error("Query execution failed: {0}")]
    Execution(#[source] ExecutorError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Whether the error means access could not be determined, as opposed to
    /// a caller mistake
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthzError::ProbeFailed { .. }
                | AuthzError::ProbeTimeout(_)
                | AuthzError::Execution(_)
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
