pub mod breaker;
pub mod compiler;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod rate_limit;
pub mod resolver;
pub mod retry;
pub mod route;

pub use breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
pub use compiler::RouteCompiler;
pub use error::GatewayError;
pub use rate_limit::RateLimiterRegistry;
pub use resolver::RouteResolver;
pub use route::{CompiledRoute, RouteSnapshot};
