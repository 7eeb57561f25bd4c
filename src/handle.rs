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

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use crate::error::PoolError;
use crate::manage::ManageResource;
use crate::mutex::Mutex;
use crate::pool::Pool;

/// The slot that holds one physical resource, shared between the caller-facing
/// [`PooledResource`] and the pool's active list.
///
/// Invalidating a handle means taking the resource out of the slot. The pool
/// does this when it recycles, reclaims, or flushes the resource; afterwards
/// every operation routed through the old handle fails with
/// [`PoolError::StaleHandle`].
pub(crate) struct HandleCore<R> {
    resource: Mutex<Option<R>>,
}

impl<R> HandleCore<R> {
    pub(crate) fn new(resource: R) -> Self {
        Self {
            resource: Mutex::new(Some(resource)),
        }
    }

    /// Takes the resource out of the slot, invalidating the handle.
    pub(crate) fn take(&self) -> Option<R> {
        self.resource.lock().take()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.resource.lock().is_some()
    }
}

impl<R> fmt::Debug for HandleCore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCore")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A resource checked out from a `Pool`.
///
/// The wrapper owns exclusive use of one physical resource for the duration of
/// the checkout. Dropping it (or calling [`PooledResource::close`]) returns the
/// resource to the pool; the pool decides whether to recycle or discard it.
///
/// The pool may repossess the resource while the wrapper is still alive, e.g.
/// when the checkout exceeded the configured budget or the configuration
/// changed. The wrapper then turns stale: [`PooledResource::with_resource`]
/// fails and [`PooledResource::is_valid`] returns `false`.
pub struct PooledResource<M: ManageResource> {
    core: Arc<HandleCore<M::Resource>>,
    pool: Weak<Pool<M>>,
}

impl<M: ManageResource> PooledResource<M> {
    pub(crate) fn new(core: Arc<HandleCore<M::Resource>>, pool: Weak<Pool<M>>) -> Self {
        Self { core, pool }
    }

    /// Runs `f` against the physical resource.
    ///
    /// Fails with [`PoolError::StaleHandle`] if the pool has invalidated this
    /// handle in the meantime.
    pub fn with_resource<T>(
        &self,
        f: impl FnOnce(&mut M::Resource) -> T,
    ) -> Result<T, PoolError<M::Error>> {
        let mut slot = self.core.resource.lock();
        match slot.as_mut() {
            Some(resource) => Ok(f(resource)),
            None => Err(PoolError::StaleHandle),
        }
    }

    /// Whether this handle still owns its physical resource.
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Returns the resource to the pool.
    ///
    /// This is the explicit spelling of dropping the wrapper; a caller's
    /// ordinary "close" lands here instead of physically closing the resource.
    pub fn close(self) {}
}

impl<M: ManageResource> Drop for PooledResource<M> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(&self.core);
        }
        // With the pool gone, the slot's resource is dropped here and closes
        // through its own Drop.
    }
}

impl<M: ManageResource> fmt::Debug for PooledResource<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("valid", &self.is_valid())
            .finish()
    }
}
