pub mod http_client;
pub mod route_store;
pub mod telemetry_bus;
