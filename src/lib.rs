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

//! A bounded, synchronous, thread-safe connection pool.
//!
//! The pool sits in front of a [`ManageResource`] implementation that opens
//! physical resources one at a time, and hands out reusable [`PooledResource`]
//! handles to concurrent callers. It bounds the number of live resources,
//! validates them before reuse with an optional liveness probe, forcibly
//! reclaims overdue checkouts under saturation, and accumulates usage
//! statistics.
//!
//! This is a classic shared-state design: one mutex guards the idle and active
//! collections plus all counters, and a condition variable parks saturated
//! callers until capacity frees up. There is no internal event loop.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//!
//! use steadypool::ConnectionOptions;
//! use steadypool::ManageResource;
//! use steadypool::Pool;
//! use steadypool::PoolConfig;
//!
//! struct Conn;
//! impl Conn {
//!     fn query(&self) -> i32 {
//!         42
//!     }
//! }
//!
//! struct Manager;
//! impl ManageResource for Manager {
//!     type Resource = Conn;
//!     type Error = Infallible;
//!
//!     fn open(&self, _options: &ConnectionOptions) -> Result<Conn, Self::Error> {
//!         Ok(Conn)
//!     }
//!
//!     fn is_closed(&self, _resource: &mut Conn) -> bool {
//!         false
//!     }
//!
//!     fn rollback(&self, _resource: &mut Conn) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//!
//!     fn probe(&self, _resource: &mut Conn, _query: &str) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//!
//!     fn close(&self, _resource: &mut Conn) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! let pool = Pool::new(
//!     PoolConfig::default(),
//!     ConnectionOptions::new("demo://localhost").with_credentials("sa", ""),
//!     Manager,
//! );
//!
//! let conn = pool.acquire().unwrap();
//! assert_eq!(conn.with_resource(|c| c.query()).unwrap(), 42);
//! drop(conn); // recycled into the idle set
//! assert_eq!(pool.status().idle_count, 1);
//! ```

mod error;
mod handle;
mod manage;
mod mutex;
mod pool;

pub use error::PoolError;
pub use handle::PooledResource;
pub use manage::ConnectionOptions;
pub use manage::ManageResource;
pub use pool::Pool;
pub use pool::PoolConfig;
pub use pool::PoolStatus;
