// Copyright 2025 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

/// The errors surfaced by `Pool::acquire` and by operations routed through an
/// invalidated handle.
///
/// `E` is the error type of the pool's `ManageResource` implementation.
#[derive(Debug, Error)]
pub enum PoolError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Too many consecutive bad resources were encountered while servicing a
    /// single acquire call.
    ///
    /// This is a hard failure: the caller exceeded
    /// `max_idle + bad_resource_tolerance` retries and the pool stopped trying.
    #[error("could not obtain a good resource from the pool: {message}")]
    Exhausted {
        /// A human-readable diagnostic.
        message: String,
    },

    /// The manager failed while opening or preparing a resource.
    #[error(transparent)]
    Resource(E),

    /// The handle was invalidated by the pool (reclaimed, recycled, or flushed)
    /// and no longer owns a physical resource.
    #[error("resource handle is no longer valid")]
    StaleHandle,

    /// The pool reached a state its invariants rule out.
    #[error("severe internal pool fault: {message}")]
    Internal {
        /// A human-readable diagnostic.
        message: String,
    },
}
