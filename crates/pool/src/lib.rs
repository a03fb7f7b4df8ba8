//! Candidate block pool.
//!
//! A single-height buffer of blocks awaiting proposal or verification,
//! keyed by block hash. Proposers drop freshly built blocks here; verifiers
//! drop gossiped and fetched blocks here. Advancing the height discards
//! leftovers from the previous one.
//!
//! The pool is mutex-protected and every operation is O(1) and non-blocking,
//! so it can be shared freely between the state machine task and the network
//! dispatch path. The registered observer is notified outside the lock.

use alioth_types::{Block, Hash};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};

/// Default maximum number of buffered candidate blocks.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// Errors from pool insertion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Block height does not match the pool height.
    #[error("block height {got} does not match pool height {expected}")]
    WrongHeight {
        /// Height carried by the block.
        got: u64,
        /// Height the pool is buffering for.
        expected: u64,
    },
    /// Block already buffered.
    #[error("block {0} already in pool")]
    Duplicate(Hash),
    /// Header timestamp is too far from the local clock.
    #[error("block timestamp {timestamp} outside the accepted skew")]
    TimestampSkew {
        /// Header timestamp, unix nanoseconds.
        timestamp: u64,
    },
    /// The pool is stopped.
    #[error("pool is not running")]
    NotRunning,
}

/// Receives pool insertion notifications.
///
/// The state machine registers itself here so a block arrival can unblock a
/// pending proposal.
pub trait PoolObserver: Send + Sync {
    /// Called after a block is accepted into the pool.
    fn block_added(&self, block: Arc<Block>);
}

struct PoolInner {
    /// Height currently buffered for.
    height: u64,
    /// Buffered blocks by hash.
    blocks: HashMap<Hash, Arc<Block>>,
    /// Insertion order, oldest first, for capacity eviction.
    order: VecDeque<Hash>,
}

/// Single-height buffer of candidate blocks.
pub struct BlockPool {
    inner: Mutex<PoolInner>,
    observer: Mutex<Option<Arc<dyn PoolObserver>>>,
    running: AtomicBool,
    capacity: usize,
    max_clock_skew: Mutex<Option<Duration>>,
}

impl BlockPool {
    /// Create a pool buffering for the given height.
    pub fn new(height: u64) -> Self {
        Self::with_capacity(height, DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool with an explicit capacity bound.
    pub fn with_capacity(height: u64, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                height,
                blocks: HashMap::new(),
                order: VecDeque::new(),
            }),
            observer: Mutex::new(None),
            running: AtomicBool::new(false),
            capacity: capacity.max(1),
            max_clock_skew: Mutex::new(None),
        }
    }

    /// Register the observer notified on each accepted insert.
    pub fn set_observer(&self, observer: Arc<dyn PoolObserver>) {
        *self.observer.lock() = Some(observer);
    }

    /// Reject candidates whose header timestamp strays further than `skew`
    /// from the local clock. Headers with a zero timestamp are exempt.
    pub fn restrict_timestamps(&self, skew: Duration) {
        *self.max_clock_skew.lock() = Some(skew);
    }

    /// Start accepting blocks.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stop accepting blocks.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the pool accepts blocks.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The height the pool buffers for.
    pub fn height(&self) -> u64 {
        self.inner.lock().height
    }

    /// Point the pool at a height without discarding buffered blocks.
    pub fn set_height(&self, height: u64) {
        self.inner.lock().height = height;
    }

    /// Enter a new height, discarding leftovers from the previous one.
    ///
    /// Re-entering the height the pool is already at keeps its candidates;
    /// only blocks buffered for another height are leftovers.
    pub fn new_height(&self, height: u64) {
        let mut inner = self.inner.lock();
        if inner.height == height {
            return;
        }
        let dropped = inner.blocks.len();
        inner.height = height;
        inner.blocks.clear();
        inner.order.clear();
        if dropped > 0 {
            debug!(height, dropped, "pool entered new height");
        }
    }

    /// Insert a candidate block.
    ///
    /// Rejects blocks for other heights and duplicates. When full, the
    /// oldest-inserted block is evicted first. The observer sees every
    /// accepted insert.
    pub fn add_block(&self, block: Arc<Block>) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }

        let skew = *self.max_clock_skew.lock();
        if let Some(skew) = skew {
            let timestamp = block.header.timestamp;
            if timestamp != 0 && !within_skew(timestamp, skew) {
                return Err(PoolError::TimestampSkew { timestamp });
            }
        }

        let hash = block.hash();
        {
            let mut inner = self.inner.lock();
            if block.height() != inner.height {
                return Err(PoolError::WrongHeight {
                    got: block.height(),
                    expected: inner.height,
                });
            }
            if inner.blocks.contains_key(&hash) {
                return Err(PoolError::Duplicate(hash));
            }

            while inner.blocks.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.blocks.remove(&oldest);
                    trace!(evicted = ?oldest, "pool evicted oldest candidate");
                } else {
                    break;
                }
            }

            inner.blocks.insert(hash, Arc::clone(&block));
            inner.order.push_back(hash);
        }

        trace!(block = ?hash, height = block.height(), "pool accepted block");

        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.block_added(block);
        }
        Ok(())
    }

    /// Look up a buffered block.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.inner.lock().blocks.get(hash).cloned()
    }

    /// Whether the pool holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().blocks.is_empty()
    }

    /// Number of buffered blocks.
    pub fn len(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// The most recently inserted block, if any.
    ///
    /// A proposer that holds several candidates proposes the freshest.
    pub fn latest(&self) -> Option<Arc<Block>> {
        let inner = self.inner.lock();
        inner.order.back().and_then(|h| inner.blocks.get(h).cloned())
    }
}

fn within_skew(timestamp: u64, skew: Duration) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64;
    let skew = skew.as_nanos() as u64;
    timestamp >= now.saturating_sub(skew) && timestamp <= now.saturating_add(skew)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alioth_types::test_utils::test_block;
    use parking_lot::Mutex as PlMutex;

    fn running_pool(height: u64) -> BlockPool {
        let pool = BlockPool::new(height);
        pool.start();
        pool
    }

    #[derive(Default)]
    struct Recorder {
        seen: PlMutex<Vec<Hash>>,
    }

    impl PoolObserver for Recorder {
        fn block_added(&self, block: Arc<Block>) {
            self.seen.lock().push(block.hash());
        }
    }

    #[test]
    fn accepts_matching_height_and_notifies() {
        let pool = running_pool(5);
        let recorder = Arc::new(Recorder::default());
        pool.set_observer(recorder.clone());

        let block = Arc::new(test_block(5, Hash::from_bytes(b"parent")));
        pool.add_block(Arc::clone(&block)).unwrap();

        assert_eq!(pool.get_block_by_hash(&block.hash()), Some(block.clone()));
        assert_eq!(recorder.seen.lock().as_slice(), &[block.hash()]);
    }

    #[test]
    fn rejects_wrong_height() {
        let pool = running_pool(5);
        let block = Arc::new(test_block(6, Hash::ZERO));
        assert_eq!(
            pool.add_block(block),
            Err(PoolError::WrongHeight { got: 6, expected: 5 })
        );
    }

    #[test]
    fn rejects_duplicates() {
        let pool = running_pool(5);
        let block = Arc::new(test_block(5, Hash::ZERO));
        pool.add_block(Arc::clone(&block)).unwrap();
        assert_eq!(
            pool.add_block(Arc::clone(&block)),
            Err(PoolError::Duplicate(block.hash()))
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rejects_when_stopped() {
        let pool = BlockPool::new(5);
        let block = Arc::new(test_block(5, Hash::ZERO));
        assert_eq!(pool.add_block(block), Err(PoolError::NotRunning));
    }

    #[test]
    fn new_height_discards_leftovers() {
        let pool = running_pool(5);
        pool.add_block(Arc::new(test_block(5, Hash::ZERO))).unwrap();
        assert!(!pool.is_empty());

        pool.new_height(6);
        assert!(pool.is_empty());
        assert_eq!(pool.height(), 6);
    }

    #[test]
    fn timestamp_restriction_rejects_stale_headers() {
        let pool = running_pool(5);
        pool.restrict_timestamps(Duration::from_secs(15));

        // test_block headers carry a zero timestamp and stay exempt.
        pool.add_block(Arc::new(test_block(5, Hash::from_bytes(b"a"))))
            .unwrap();

        let mut old = test_block(5, Hash::from_bytes(b"b"));
        old.header.timestamp = 1; // 1970: far outside any skew
        assert!(matches!(
            pool.add_block(Arc::new(old)),
            Err(PoolError::TimestampSkew { timestamp: 1 })
        ));

        // A freshly stamped header passes.
        let mut fresh = test_block(5, Hash::from_bytes(b"c"));
        fresh.header.timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        pool.add_block(Arc::new(fresh)).unwrap();
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let pool = BlockPool::with_capacity(5, 2);
        pool.start();

        let a = Arc::new(test_block(5, Hash::from_bytes(b"a")));
        let b = Arc::new(test_block(5, Hash::from_bytes(b"b")));
        let c = Arc::new(test_block(5, Hash::from_bytes(b"c")));

        pool.add_block(Arc::clone(&a)).unwrap();
        pool.add_block(Arc::clone(&b)).unwrap();
        pool.add_block(Arc::clone(&c)).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(pool.get_block_by_hash(&a.hash()).is_none());
        assert!(pool.get_block_by_hash(&b.hash()).is_some());
        assert_eq!(pool.latest(), Some(c));
    }
}
