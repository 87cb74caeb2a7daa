//! Print the effective rule of a type and what it resolves to for a set of
//! claims.
//!
//! ```text
//! authz-explain <schema.graphql> <claims.json> <Type> [operation]
//! ```
//!
//! `claims.json` is a decoded token payload; claims are read from the
//! schema's `# Authorization` namespace when one is declared.

use anyhow::{bail, Context};
use rulegraph_authz::engine::evaluator::effective_outcome;
use rulegraph_authz::{ClaimSet, EffectiveRule, Operation, SchemaRegistry};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (schema_path, claims_path, type_name) = match args.as_slice() {
        [schema, claims, type_name] | [schema, claims, type_name, _] => (schema, claims, type_name),
        _ => bail!("usage: authz-explain <schema.graphql> <claims.json> <Type> [operation]"),
    };
    let op = match args.get(3) {
        Some(name) => Operation::parse(name).with_context(|| format!("unknown operation '{}'", name))?,
        None => Operation::Query,
    };

    info!("authz-explain v{}", rulegraph_authz::VERSION);

    let sdl = std::fs::read_to_string(schema_path).with_context(|| format!("reading {}", schema_path))?;
    let registry = SchemaRegistry::new();
    let schema = registry.load_sdl(&sdl).context("compiling schema")?;

    if schema.type_info(type_name).is_none() {
        bail!("type '{}' is not defined in {}", type_name, schema_path);
    }

    let payload: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(claims_path).with_context(|| format!("reading {}", claims_path))?,
    )
    .with_context(|| format!("parsing {}", claims_path))?;
    let namespace = schema.auth_mode().map(|mode| mode.namespace.as_str());
    let claims = ClaimSet::from_token_payload(&payload, namespace)?;
    debug!("{} claims loaded", claims.len());

    let rule = match op {
        Operation::Password => schema.password_rule(type_name),
        op => schema.effective(type_name, op),
    };
    let outcome = if schema.closed_by_default() && claims.is_empty() {
        serde_json::to_value(rulegraph_authz::FilterOutcome::Denied)?
    } else {
        serde_json::to_value(effective_outcome(rule, &claims, true)?)?
    };
    let effective = match rule {
        EffectiveRule::NoRule => serde_json::Value::Null,
        EffectiveRule::Rule(node) => serde_json::to_value(node.as_ref())?,
    };

    let report = json!({
        "type": type_name,
        "operation": op,
        "generation": schema.generation(),
        "effective_rule": effective,
        "outcome": outcome,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
