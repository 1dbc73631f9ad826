//! Reusable buffer and object pools (§4.1).
//!
//! Grounded on two patterns already present in the teacher crate: the
//! `ArrayQueue<HttpConnection<H, S>>` worker-recycling pool in the retired
//! `server::server` design, and the `crossbeam::queue::SegQueue`-backed
//! accept-to-worker hand-off in `server::server_impl`. Both show the same
//! idiom — a fixed-capacity lock-free queue of pre-built objects, rented out
//! on demand and returned (or dropped) on completion. This module lifts that
//! idiom out of the connection-specific code so it can back arbitrary
//! reusable state (scratch buffers, per-plugin scratch objects, ...).
//!
//! Neither pool ever blocks a caller: `BufferPool::rent` and `ObjectPool::rent`
//! both fall back to a fresh allocation when the queue is empty, matching the
//! "pool never blocks" invariant from spec.md §4.1.

use crossbeam::queue::ArrayQueue;

/// A sharded-by-size-class pool of reusable `Vec<u8>` buffers.
///
/// Buffers are grouped into power-of-two size classes so a connection asking
/// for a 4 KiB request buffer never gets handed back a stretched-thin 64 KiB
/// one. Each size class is backed by its own `ArrayQueue`; `rent` pops the
/// smallest class that satisfies the request, `return_buffer` pushes the
/// (cleared) buffer back into the class matching its *capacity*.
pub struct BufferPool {
    classes: Vec<(usize, ArrayQueue<Vec<u8>>)>,
}

impl BufferPool {
    /// Builds a pool with one `ArrayQueue` of the given depth per size class.
    /// `size_classes` should be sorted ascending; callers typically pass
    /// powers of two (e.g. `[1024, 4096, 16384, 65536]`).
    pub fn new(size_classes: &[usize], depth_per_class: usize) -> Self {
        let classes = size_classes
            .iter()
            .map(|&size| (size, ArrayQueue::new(depth_per_class)))
            .collect();

        Self { classes }
    }

    /// Rents a buffer with at least `min_capacity` bytes of capacity.
    ///
    /// Pops from the smallest size class that satisfies `min_capacity`; on a
    /// miss (empty queue, or no class is large enough), allocates fresh.
    /// Never blocks.
    pub fn rent(&self, min_capacity: usize) -> Vec<u8> {
        for (size, queue) in &self.classes {
            if *size < min_capacity {
                continue;
            }
            if let Some(mut buf) = queue.pop() {
                buf.clear();
                return buf;
            }
            return Vec::with_capacity(*size);
        }

        Vec::with_capacity(min_capacity)
    }

    /// Returns a buffer to the pool. Dropped silently (not an error) if its
    /// capacity doesn't match a configured size class, or if that class's
    /// queue is already full.
    pub fn return_buffer(&self, buffer: Vec<u8>) {
        if let Some((_, queue)) = self
            .classes
            .iter()
            .find(|(size, _)| *size == buffer.capacity())
        {
            let _ = queue.push(buffer);
        }
    }
}

/// Lifecycle hook for objects held in an [`ObjectPool`].
///
/// Grounded on [`ConnectionData::new`](crate::ConnectionData::new)/
/// [`reset`](crate::ConnectionData::reset), generalized from
/// connection-scoped state to arbitrary pooled state: `prepare` builds a
/// fresh instance for when the pool is empty, `release` runs just before an
/// instance goes back in the queue and can refuse rental (e.g. an object
/// that's accumulated too much internal fragmentation to be worth reusing)
/// by returning `false`, in which case the instance is dropped instead of
/// recycled.
pub trait Reusable: Sized {
    /// Builds a fresh instance, used when the pool has nothing to rent.
    fn prepare() -> Self;

    /// Called before returning the instance to the pool. Returning `false`
    /// drops the instance instead of recycling it.
    fn release(&mut self) -> bool {
        true
    }
}

/// A fixed-capacity pool of `Reusable` objects.
pub struct ObjectPool<T: Reusable> {
    queue: ArrayQueue<T>,
}

impl<T: Reusable> ObjectPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Rents an object, reusing a pooled one if available, else building a
    /// fresh one via [`Reusable::prepare`]. Never blocks.
    pub fn rent(&self) -> T {
        self.queue.pop().unwrap_or_else(T::prepare)
    }

    /// Returns an object to the pool. If [`Reusable::release`] refuses it, or
    /// the queue is full, the object is dropped instead.
    pub fn return_object(&self, mut object: T) {
        if object.release() {
            let _ = self.queue.push(object);
        }
    }
}

/// Hook for an external (native) allocator backing request/response buffers.
///
/// Out of scope per §1/§6: no implementation ships with this crate. A host
/// that wants buffers sourced from a custom allocator (arena, jemalloc
/// bindings, a shared-memory region) implements this trait and installs it
/// via [`HttpConfig::allocator`](crate::limits::HttpConfig::allocator).
pub trait NativeAllocator: Send + Sync {
    /// Allocates a zeroed buffer of at least `size` bytes.
    fn allocate(&self, size: usize) -> Vec<u8>;
    /// Returns a buffer previously obtained from [`Self::allocate`].
    fn free(&self, buffer: Vec<u8>);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    impl Reusable for Counter {
        fn prepare() -> Self {
            Counter(0)
        }

        fn release(&mut self) -> bool {
            self.0 += 1;
            self.0 < 3
        }
    }

    #[test]
    fn buffer_pool_round_trip() {
        let pool = BufferPool::new(&[1024, 4096], 4);

        let buf = pool.rent(512);
        assert!(buf.capacity() >= 1024);
        pool.return_buffer(buf);

        let buf2 = pool.rent(512);
        assert_eq!(buf2.capacity(), 1024);
    }

    #[test]
    fn buffer_pool_falls_back_when_too_large() {
        let pool = BufferPool::new(&[1024], 4);
        let buf = pool.rent(2048);
        assert!(buf.capacity() >= 2048);
    }

    #[test]
    fn buffer_pool_falls_back_when_empty() {
        let pool = BufferPool::new(&[1024], 1);
        let first = pool.rent(100);
        let second = pool.rent(100);
        assert!(first.capacity() >= 1024);
        assert!(second.capacity() >= 1024);
    }

    #[test]
    fn object_pool_reuses_released_objects() {
        let pool: ObjectPool<Counter> = ObjectPool::new(2);

        let obj = pool.rent();
        assert_eq!(obj.0, 0);
        pool.return_object(obj);

        let obj = pool.rent();
        assert_eq!(obj.0, 1);
    }

    #[test]
    fn object_pool_drops_objects_release_refuses() {
        let pool: ObjectPool<Counter> = ObjectPool::new(2);

        let mut obj = pool.rent();
        obj.0 = 2;
        pool.return_object(obj);

        // release() bumped it to 3 and refused; the pool should be empty,
        // so the next rent builds a fresh one.
        let obj = pool.rent();
        assert_eq!(obj.0, 0);
    }
}
