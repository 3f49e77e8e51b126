//! Hotswap Core
//!
//! The hot-swap pipeline: validates a candidate change, redefines the unit in
//! the host runtime, migrates live instances, and protects the runtime with a
//! circuit breaker.
//!
//! # Architecture
//!
//! ```text
//! CandidateChange
//!       │
//!       ▼
//! ┌──────────────┐  incompatible / degraded / cancelled
//! │  VALIDATING  │──────────────────────────────────────▶ REJECTED (Err)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐  runtime rejection (after retries)
//! │  REDEFINING  │──────────────────────────────────────▶ FAILED (rollback guidance)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │  MIGRATING   │──────────────────────────────────────▶ COMPLETED (possibly partial)
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use hotswap_core::prelude::*;
//! use hotswap_unit::{CodeUnit, MethodSig, StructuralSignature, UnitIdentity};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let id = UnitIdentity::new("com.acme.Greeter").unwrap();
//! let unit = |body: &str| {
//!     let sig = StructuralSignature::builder()
//!         .method(MethodSig::new("greet", Vec::<String>::new(), "void").with_body(body))
//!         .build();
//!     Arc::new(CodeUnit::new(id.clone(), sig, body.as_bytes().to_vec()))
//! };
//!
//! let runtime = Arc::new(InMemoryRuntime::new());
//! runtime.load(id.clone(), b"hello".to_vec());
//!
//! let pipeline = HotSwapPipeline::builder().runtime(runtime).build().unwrap();
//! let report = pipeline
//!     .submit(CandidateChange::new(unit("hello"), unit("hi")))
//!     .await
//!     .unwrap();
//! assert_eq!(report.final_state, PipelineState::Completed);
//! # });
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod recovery;
pub mod runtime;
pub mod state;

// Re-exports
pub use breaker::{
    BreakerPermit, BreakerSnapshot, BreakerState, BreakerTransition, CircuitBreaker, Degraded,
};
pub use config::{BreakerConfig, PipelineConfig, RetryConfig};
pub use coordinator::RedefinitionCoordinator;
pub use error::{ConfigError, HotSwapError};
pub use events::{ChannelSink, EventSink, MultiSink, NoopSink, SwapEvent, TracingSink};
pub use pipeline::{CancelToken, CandidateChange, HotSwapPipeline, PipelineBuilder, SwapReport};
pub use recovery::{
    classify_rejection, FailureRecovery, RecoveryDecision, RecoveryStatistics, RetryPolicy,
    RollbackGuidance,
};
pub use runtime::{HostRuntime, InMemoryRuntime, RejectionKind, RuntimeRejection};
pub use state::{allowed_transitions, validate_transition, PipelineState, StateChange};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, HotSwapError>;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the pipeline
    pub use crate::{
        BreakerState, CancelToken, CandidateChange, CircuitBreaker, EventSink, HostRuntime,
        HotSwapError, HotSwapPipeline, InMemoryRuntime, PipelineConfig, PipelineState, SwapEvent,
        SwapReport,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
