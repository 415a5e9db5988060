//! Style registry (spec §1/§3): names bound at startup to a compiled map
//! definition and its projection. Styles are immutable after startup.
//!
//! Grounded on the teacher's `SlidePool` (`slide_pool.rs`) — an `Arc`-cached
//! registry keyed by name, loaded once and shared across workers/threads.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::{EngineFactory, Projector};
use crate::error::{RenderdError, RenderdResult};
use crate::protocol::MAX_STYLE_LEN;

/// A style bound at startup: its projector plus a factory for building
/// one `RenderEngine` per worker thread.
#[derive(Clone)]
pub struct StyleDef {
    pub name: String,
    pub projector: Arc<dyn Projector>,
    pub engine_factory: EngineFactory,
}

/// Immutable map of style name -> `StyleDef`, built once at startup
/// (spec §3 "Styles are immutable after startup").
pub struct StyleRegistry {
    styles: HashMap<String, StyleDef>,
}

impl StyleRegistry {
    pub fn new(styles: Vec<StyleDef>) -> RenderdResult<Self> {
        let mut map = HashMap::with_capacity(styles.len());
        for s in styles {
            if s.name.is_empty() || s.name.len() > MAX_STYLE_LEN || !s.name.is_ascii() {
                return Err(RenderdError::Config(format!(
                    "style name must be <= {MAX_STYLE_LEN} printable ASCII bytes: {:?}",
                    s.name
                )));
            }
            map.insert(s.name.clone(), s);
        }
        Ok(Self { styles: map })
    }

    pub fn get(&self, name: &str) -> Option<&StyleDef> {
        self.styles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.styles.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}
