// ABOUTME: Process-global factory table mapping adapter names to constructors.
// ABOUTME: Adapter modules register themselves at startup, before the orchestrator is built.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::Result;

use crate::adapter::ChannelAdapter;
use crate::bus::MessageBus;

/// Constructor turning a raw config blob and the shared bus into an adapter.
pub type AdapterFactory =
    fn(serde_json::Value, Arc<MessageBus>) -> Result<Arc<dyn ChannelAdapter>>;

fn table() -> &'static RwLock<HashMap<String, AdapterFactory>> {
    static TABLE: OnceLock<RwLock<HashMap<String, AdapterFactory>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a factory under an adapter name. A later registration under the
/// same name replaces the earlier one.
pub fn register_factory(name: impl Into<String>, factory: AdapterFactory) {
    let name = name.into();
    table()
        .write()
        .expect("adapter registry lock poisoned")
        .insert(name, factory);
}

/// Construct an adapter by name. Returns `None` when no factory is
/// registered; the caller logs and skips the adapter.
pub fn create_adapter(
    name: &str,
    config: serde_json::Value,
    bus: Arc<MessageBus>,
) -> Option<Result<Arc<dyn ChannelAdapter>>> {
    let factory = *table()
        .read()
        .expect("adapter registry lock poisoned")
        .get(name)?;
    Some(factory(config, bus))
}

/// Names with a registered factory, for diagnostics.
pub fn registered_factories() -> Vec<String> {
    table()
        .read()
        .expect("adapter registry lock poisoned")
        .keys()
        .cloned()
        .collect()
}
