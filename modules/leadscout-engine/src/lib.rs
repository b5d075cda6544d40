pub mod analyzer;
pub mod dispatcher;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
