/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Error taxonomy for the decode bridge.

use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the decode bridge.
///
/// `Init`, `Parse`, and `Release` are status results returned to the caller
/// of the corresponding session operation. `ListenerNotRegistered` is its own
/// kind so that callers can tell a bookkeeping mistake apart from an engine
/// failure. `ListenerFault` is produced at the dispatch site when a consumer
/// fails; under the isolation policy it is logged and counted, never
/// returned from `parse`.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("engine initialization failed: {0}")]
    Init(String),

    #[error("parse rejected: {0}")]
    Parse(String),

    #[error("engine release failed: {0}")]
    Release(String),

    #[error("listener is not registered")]
    ListenerNotRegistered,

    #[error("listener {index} faulted: {source}")]
    ListenerFault {
        /// Position of the listener in the dispatch snapshot.
        index: usize,
        source: anyhow::Error,
    },
}
