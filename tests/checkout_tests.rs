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

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use steadypool::ConnectionOptions;
use steadypool::ManageResource;
use steadypool::Pool;
use steadypool::PoolConfig;

#[derive(Debug)]
struct FakeConn {
    id: usize,
    closed: bool,
}

#[derive(Debug)]
struct FakeError(&'static str);

impl std::fmt::Display for FakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for FakeError {}

#[derive(Default)]
struct TrackingManager {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

impl ManageResource for TrackingManager {
    type Resource = FakeConn;
    type Error = FakeError;

    fn open(&self, _options: &ConnectionOptions) -> Result<FakeConn, FakeError> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConn { id, closed: false })
    }

    fn is_closed(&self, resource: &mut FakeConn) -> bool {
        resource.closed
    }

    fn rollback(&self, _resource: &mut FakeConn) -> Result<(), FakeError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn probe(&self, _resource: &mut FakeConn, _query: &str) -> Result<(), FakeError> {
        Ok(())
    }

    fn close(&self, resource: &mut FakeConn) -> Result<(), FakeError> {
        resource.closed = true;
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn options() -> ConnectionOptions {
    ConnectionOptions::new("demo://localhost/pool").with_credentials("sa", "secret")
}

#[test]
fn test_recycles_warm_resource_instead_of_opening() {
    let manager = TrackingManager::default();
    let opened = manager.opened.clone();
    let pool = Pool::new(PoolConfig::new(2).with_max_idle(1), options(), manager);

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 2);

    let status = pool.status();
    assert_eq!(status.active_count, 2);
    assert_eq!(status.idle_count, 0);

    let a_id = a.with_resource(|c| c.id).unwrap();
    drop(a);
    assert_eq!(pool.status().idle_count, 1);

    // The third checkout must reuse the recycled resource, not open a third.
    let c = pool.acquire().unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(c.with_resource(|c| c.id).unwrap(), a_id);

    drop((b, c));
}

#[test]
fn test_idle_set_is_a_stack() {
    let manager = TrackingManager::default();
    let pool = Pool::new(PoolConfig::new(2).with_max_idle(2), options(), manager);

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let b_id = b.with_resource(|c| c.id).unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.status().idle_count, 2);

    // The most recently returned resource is the warmest one.
    let next = pool.acquire().unwrap();
    assert_eq!(next.with_resource(|c| c.id).unwrap(), b_id);
}

#[test]
fn test_blocks_until_release_when_saturated() {
    let manager = TrackingManager::default();
    let opened = manager.opened.clone();
    let pool = Pool::new(
        PoolConfig::new(1).with_time_to_wait(Duration::from_millis(10)),
        options(),
        manager,
    );

    let held = pool.acquire().unwrap();

    let contender = {
        let pool = pool.clone();
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            conn.with_resource(|c| c.id).unwrap()
        })
    };

    // Let the contender cycle through a few wait timeouts, then free the slot.
    thread::sleep(Duration::from_millis(100));
    drop(held);

    assert_eq!(contender.join().unwrap(), 0);
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    let status = pool.status();
    assert_eq!(status.had_to_wait_count, 1);
    assert!(status.accumulated_wait_time > Duration::ZERO);
}

#[test]
fn test_surplus_idle_resource_is_closed() {
    let manager = TrackingManager::default();
    let closed = manager.closed.clone();
    let pool = Pool::new(PoolConfig::new(2).with_max_idle(0), options(), manager);

    let a = pool.acquire().unwrap();
    drop(a);

    assert_eq!(pool.status().idle_count, 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_mismatched_credentials_are_not_recycled() {
    let manager = TrackingManager::default();
    let closed = manager.closed.clone();
    let pool = Pool::new(PoolConfig::new(2), options(), manager);

    // A checkout under foreign credentials carries a foreign identity code.
    let foreign = pool.acquire_as("reporting", "other-secret").unwrap();
    drop(foreign);
    assert_eq!(pool.status().idle_count, 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    // The default credentials still recycle as usual.
    let own = pool.acquire().unwrap();
    drop(own);
    assert_eq!(pool.status().idle_count, 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_release_after_flush_is_a_noop() {
    let manager = TrackingManager::default();
    let closed = manager.closed.clone();
    let pool = Pool::new(PoolConfig::new(2), options(), manager);

    let held = pool.acquire().unwrap();
    pool.force_close_all();
    assert!(!held.is_valid());
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    // Returning the repossessed handle must not disturb the pool.
    drop(held);
    let status = pool.status();
    assert_eq!(status.active_count, 0);
    assert_eq!(status.idle_count, 0);
    assert_eq!(status.bad_resource_count, 1);

    // And the pool keeps working afterwards.
    let conn = pool.acquire().unwrap();
    assert!(conn.is_valid());
}

#[test]
fn test_statistics_accumulate() {
    let manager = TrackingManager::default();
    let rollbacks = manager.rollbacks.clone();
    let pool = Pool::new(PoolConfig::new(2), options(), manager);

    let conn = pool.acquire().unwrap();
    thread::sleep(Duration::from_millis(5));
    conn.close();

    let status = pool.status();
    assert_eq!(status.request_count, 1);
    assert_eq!(status.acquiring_count, 0);
    assert!(status.accumulated_checkout_time >= Duration::from_millis(5));
    assert!(status.average_checkout_time() >= Duration::from_millis(5));
    assert_eq!(status.claimed_overdue_count, 0);
    assert_eq!(status.average_overdue_checkout_time(), Duration::ZERO);

    // One defensive rollback at checkout, one before recycling.
    assert_eq!(rollbacks.load(Ordering::SeqCst), 2);
}
