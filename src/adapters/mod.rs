pub mod admin;
pub mod fallback;
pub mod fallback_routes;
pub mod gateway_handler;
pub mod health;
pub mod http_client;
pub mod memory;
pub mod redis_bus;
pub mod redis_store;
pub mod reload;

pub use fallback_routes::FallbackRouteProvider;
pub use gateway_handler::GatewayHandler;
pub use http_client::HttpClientAdapter;
pub use memory::{MemoryBus, MemoryRouteStore};
pub use redis_bus::RedisStreamBus;
pub use redis_store::RedisRouteStore;
pub use reload::SnapshotRebuilder;
