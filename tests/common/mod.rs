//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEnv, VIEWER_ID};
//!
//! #[tokio::test]
//! async fn test_refresh() {
//!     let env = TestEnv::with_scenario();
//!     let handle = env.spawn_coordinator().await;
//!     handle.manual_refresh().await;
//!     handle.settled().await;
//! }
//! ```

mod constants;
mod fixtures;
mod server;
mod sources;

pub use constants::*;
pub use fixtures::{at, TestEnv};
pub use server::{RecordedRequest, StubBackend};
pub use sources::{ControlledSource, FailingStore};
