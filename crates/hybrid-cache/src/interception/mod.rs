//! Cache-aside interception for request pipelines.
//!
//! Handlers are wrapped in decorators at startup:
//!
//! ```text
//! LoggingBehavior
//!   └─ CachingBehavior            serve / populate cacheable requests
//!        └─ InvalidateCachingBehavior   evict after a successful mutation
//!             └─ handler
//! ```
//!
//! Decorators never alter a request or its response; they either
//! short-circuit with a cached response or add a trailing eviction.

mod behavior;
mod capability;

pub use behavior::{
    CachingBehavior, InvalidateCachingBehavior, LoggingBehavior, RequestHandler,
    StandardPipeline, standard_pipeline,
};
pub use capability::{CacheableRequest, InvalidatingRequest, LockProtectedRequest, Request};
