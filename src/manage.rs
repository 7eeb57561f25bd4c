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

use std::collections::BTreeMap;

/// The endpoint and credentials used to open physical resources.
///
/// The options are owned by the pool and handed to [`ManageResource::open`] on
/// every creation. Replacing them via `Pool::set_connection_options` flushes the
/// pool, so no resource ever outlives the options it was opened with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// The endpoint the manager connects to.
    pub url: String,

    /// The default username for checkouts that do not pass explicit credentials.
    pub username: String,

    /// The default password for checkouts that do not pass explicit credentials.
    pub password: String,

    /// Arbitrary extra properties the manager may consult when opening.
    pub properties: BTreeMap<String, String>,
}

impl ConnectionOptions {
    /// Creates options for the given endpoint with empty credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: String::new(),
            password: String::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Returns new options with the specified default credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Returns new options with the specified extra property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A trait whose instance opens physical resources and operates on them on
/// behalf of the pool.
///
/// The pool never touches a resource directly; every lifecycle action it needs
/// (open, closed-check, rollback, liveness probe, close) goes through the
/// manager. A manager for a resource without transactions can implement
/// [`ManageResource::rollback`] as a no-op.
pub trait ManageResource: Send + Sync {
    /// The type of physical resources that this instance opens.
    type Resource: Send;

    /// The type of errors that this instance can return.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new physical resource.
    fn open(&self, options: &ConnectionOptions) -> Result<Self::Resource, Self::Error>;

    /// Whether the resource reports itself as closed.
    fn is_closed(&self, resource: &mut Self::Resource) -> bool;

    /// Rolls back any uncommitted work on the resource.
    fn rollback(&self, resource: &mut Self::Resource) -> Result<(), Self::Error>;

    /// Executes the configured liveness query against the resource.
    ///
    /// Returns `Ok(())` if the resource answered; otherwise, returns an error.
    fn probe(&self, resource: &mut Self::Resource, query: &str) -> Result<(), Self::Error>;

    /// Physically closes the resource.
    fn close(&self, resource: &mut Self::Resource) -> Result<(), Self::Error>;
}
