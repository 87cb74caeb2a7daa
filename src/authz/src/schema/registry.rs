//! Process-wide holder of the active compiled schema
//!
//! Readers take an `Arc` snapshot at request start and keep it for the whole
//! request; a reload swaps in the new schema without blocking them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::binder::{bind, CompiledSchema};
use super::definition::SchemaDefinition;
use super::sdl::parse_sdl;
use crate::error::SchemaError;

/// Holds the active [`CompiledSchema`]
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    current: ArcSwapOption<CompiledSchema>,
    generation: AtomicU64,
    // Held across bind, bump and store so generations activate in order
    loading: Mutex<()>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and activate a schema.
    ///
    /// On error the previously active schema, if any, stays active.
    pub fn load(&self, definition: &SchemaDefinition) -> Result<Arc<CompiledSchema>, SchemaError> {
        let _loading = self.loading.lock();
        let compiled = match bind(definition) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(
                    "Schema rejected, keeping generation {}: {}",
                    self.generation.load(Ordering::Acquire),
                    e
                );
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let compiled = Arc::new(compiled.with_generation(generation));
        self.current.store(Some(Arc::clone(&compiled)));

        info!(
            "Schema generation {} activated ({} types)",
            generation,
            compiled.types().count()
        );
        Ok(compiled)
    }

    /// Parse SDL and activate it
    pub fn load_sdl(&self, sdl: &str) -> Result<Arc<CompiledSchema>, SchemaError> {
        let definition = parse_sdl(sdl).inspect_err(|e| warn!("Schema SDL rejected: {}", e))?;
        self.load(&definition)
    }

    /// Snapshot of the active schema
    pub fn snapshot(&self) -> Option<Arc<CompiledSchema>> {
        self.current.load_full()
    }

    /// Generation of the active schema, 0 before the first load
    pub fn generation(&self) -> u64 {
        self.current.load().as_ref().map_or(0, |s| s.generation())
    }
}
