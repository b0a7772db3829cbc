//! Resource fixtures and engine setup helpers.

use crate::mock::MockTransport;
use crate::scheduler::ManualScheduler;
use crate::server::MemoryServer;
use meshsync_codec::{Field, Structure};
use meshsync_engine::{EngineConfig, EntityManager, ResourceSpec};
use std::sync::Arc;
use std::time::Duration;

/// Name of the example resource.
pub const EXAMPLE_RESOURCE: &str = "example";

/// Schema of the example resource: a required name, an integer value,
/// a pair of boolean flags, and a list of tags.
pub fn example_schema() -> Structure {
    Structure::new()
        .field("name", Field::text().required())
        .field("value", Field::integer())
        .field(
            "flags",
            Field::structure(
                Structure::new()
                    .field("a", Field::boolean())
                    .field("b", Field::boolean()),
            ),
        )
        .field("tags", Field::sequence(Field::text()))
}

/// The example resource with the standard channel set.
pub fn example_resource() -> ResourceSpec {
    ResourceSpec::standard(EXAMPLE_RESOURCE, example_schema())
}

/// A manager for the example resource over a fresh mock transport.
pub fn mock_manager() -> (Arc<MockTransport>, EntityManager) {
    let transport = MockTransport::new();
    let manager = EntityManager::new(example_resource(), transport.clone(), EngineConfig::new());
    (transport, manager)
}

/// A manager for the example resource whose polls run on a manual clock.
pub fn mock_manager_with_clock(
    interval: Duration,
) -> (Arc<MockTransport>, Arc<ManualScheduler>, EntityManager) {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let config = EngineConfig::new()
        .with_poll_interval(interval)
        .with_scheduler(scheduler.clone());
    let manager = EntityManager::new(example_resource(), transport.clone(), config);
    (transport, scheduler, manager)
}

/// A manager for the example resource backed by an in-memory server
/// holding `count` resources named `item-0`, `item-1`, ...
pub fn memory_manager(count: usize) -> (MemoryServer, EntityManager) {
    let server = MemoryServer::new(EXAMPLE_RESOURCE);
    for i in 0..count {
        server.insert(serde_json::json!({"name": format!("item-{i}"), "value": i}));
    }
    let manager = EntityManager::new(example_resource(), server.transport(), EngineConfig::new());
    (server, manager)
}
