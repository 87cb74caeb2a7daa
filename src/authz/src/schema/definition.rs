//! Schema input handed over by the schema compiler

use serde::{Deserialize, Serialize};

use crate::config::AuthMode;
use crate::rules::{Operation, RuleDeclaration};

/// Kind of a schema type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Object,
    Interface,
    Union,
}

/// Raw `@auth` declarations of one type, one optional slot per operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<RuleDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<RuleDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<RuleDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<RuleDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<RuleDeclaration>,
}

impl AuthDeclaration {
    pub fn get(&self, op: Operation) -> Option<&RuleDeclaration> {
        match op {
            Operation::Query => self.query.as_ref(),
            Operation::Add => self.add.as_ref(),
            Operation::Update => self.update.as_ref(),
            Operation::Delete => self.delete.as_ref(),
            Operation::Password => self.password.as_ref(),
        }
    }

    pub fn set(&mut self, op: Operation, declaration: RuleDeclaration) {
        let slot = match op {
            Operation::Query => &mut self.query,
            Operation::Add => &mut self.add,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
            Operation::Password => &mut self.password,
        };
        *slot = Some(declaration);
    }

    /// Whether no slot is declared
    pub fn is_empty(&self) -> bool {
        Operation::ALL.iter().all(|op| self.get(*op).is_none())
    }
}

/// One type, interface, or union of the schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    /// Interfaces this type implements directly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implements: Vec<String>,
    /// Union members
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDeclaration>,
}

impl TypeDefinition {
    fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            implements: Vec::new(),
            members: Vec::new(),
            auth: None,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Object)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    pub fn union(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            members,
            ..Self::new(name, TypeKind::Union)
        }
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }

    /// Declare a rule for one operation slot
    pub fn with_rule(mut self, op: Operation, declaration: RuleDeclaration) -> Self {
        self.auth.get_or_insert_with(AuthDeclaration::default).set(op, declaration);
        self
    }
}

/// Parsed schema as the engine receives it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub types: Vec<TypeDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_mode: Option<AuthMode>,
}

impl SchemaDefinition {
    pub fn new(types: Vec<TypeDefinition>) -> Self {
        Self {
            types,
            auth_mode: None,
        }
    }

    pub fn with_auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = Some(mode);
        self
    }
}
