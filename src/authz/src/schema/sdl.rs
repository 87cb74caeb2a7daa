//! GraphQL SDL adapter
//!
//! Reads `type`, `interface` and `union` definitions together with their
//! `implements` clauses and `@auth` directives:
//!
//! ```graphql
//! type Todo @auth(
//!     query: { or: [
//!         { rule: "query($USER: String!) { queryTodo(filter: { owner: { eq: $USER } }) { id } }" },
//!         { rule: "query { queryTodo(filter: { isPublic: { eq: true } }) { id } }" }
//!     ] }
//! ) {
//!     id: ID!
//!     owner: String!
//!     isPublic: Boolean!
//! }
//! ```

use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, Directive, TypeDefinition as SdlTypeDefinition};

use super::definition::{AuthDeclaration, SchemaDefinition, TypeDefinition};
use crate::config::AuthMode;
use crate::error::SchemaError;
use crate::rules::{Operation, RuleDeclaration};
use crate::value::Value;

const AUTH_DIRECTIVE: &str = "auth";

/// Parse SDL text into a [`SchemaDefinition`]
pub fn parse_sdl(text: &str) -> Result<SchemaDefinition, SchemaError> {
    let document = parse_schema::<String>(text).map_err(|e| SchemaError::Parse(e.to_string()))?;

    let mut types = Vec::new();
    for definition in &document.definitions {
        let Definition::TypeDefinition(type_definition) = definition else {
            continue;
        };

        let parsed = match type_definition {
            SdlTypeDefinition::Object(object) => TypeDefinition {
                implements: object.implements_interfaces.clone(),
                auth: read_auth(&object.name, &object.directives)?,
                ..TypeDefinition::object(object.name.clone())
            },
            SdlTypeDefinition::Interface(interface) => TypeDefinition {
                implements: interface.implements_interfaces.clone(),
                auth: read_auth(&interface.name, &interface.directives)?,
                ..TypeDefinition::interface(interface.name.clone())
            },
            SdlTypeDefinition::Union(union) => TypeDefinition {
                auth: read_auth(&union.name, &union.directives)?,
                ..TypeDefinition::union(union.name.clone(), union.types.clone())
            },
            _ => continue,
        };
        types.push(parsed);
    }

    Ok(SchemaDefinition {
        types,
        auth_mode: AuthMode::from_schema_text(text)?,
    })
}

fn read_auth(
    type_name: &str,
    directives: &[Directive<'_, String>],
) -> Result<Option<AuthDeclaration>, SchemaError> {
    let Some(directive) = directives.iter().find(|d| d.name == AUTH_DIRECTIVE) else {
        return Ok(None);
    };

    let mut auth = AuthDeclaration::default();
    for (name, argument) in &directive.arguments {
        let location = format!("{}.{}", type_name, name);
        let op = Operation::parse(name).ok_or_else(|| {
            SchemaError::malformed(&location, format!("unknown @auth argument '{}'", name))
        })?;
        auth.set(op, read_declaration(&Value::from(argument), &location)?);
    }
    Ok(Some(auth))
}

/// Convert a directive argument object into a rule declaration
fn read_declaration(value: &Value, location: &str) -> Result<RuleDeclaration, SchemaError> {
    let Value::Object(map) = value else {
        return Err(SchemaError::malformed(location, format!("expected a rule object, found {}", value)));
    };
    let mut entries = map.iter();
    let (Some((key, inner)), None) = (entries.next(), entries.next()) else {
        return Err(SchemaError::malformed(
            location,
            "rule object must have exactly one of rule, and, or, not",
        ));
    };

    match key.as_str() {
        "rule" => inner
            .as_text()
            .map(RuleDeclaration::rule)
            .ok_or_else(|| SchemaError::malformed(location, "'rule' expects a string")),
        "and" | "or" => {
            let Value::List(items) = inner else {
                return Err(SchemaError::malformed(location, format!("'{}' expects a list", key)));
            };
            let children = items
                .iter()
                .map(|item| read_declaration(item, location))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match key.as_str() {
                "and" => RuleDeclaration::And(children),
                _ => RuleDeclaration::Or(children),
            })
        }
        "not" => Ok(RuleDeclaration::Not(Box::new(read_declaration(inner, location)?))),
        other => Err(SchemaError::malformed(location, format!("unknown rule key '{}'", other))),
    }
}
