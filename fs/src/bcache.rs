//! Block buffer cache.
//!
//! A fixed pool of buffers holding cached copies of disk blocks. Caching
//! amortises device I/O and gives every block a single synchronisation
//! point: at most one buffer per `(dev, num)`, and while that buffer is
//! locked nobody else touches its data.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call `read_block`.
//! * After changing buffer data, call `mark_dirty`, and `write_block` to
//!   push it to disk.
//! * When done with the buffer, call `release_block`.
//! * `sync_cache` flushes every valid buffer.
//!
//! Buffers live in an arena and are threaded onto two index-linked lists:
//! a free list of unreferenced buffers ordered so the head is the
//! preferred eviction victim, and one hash bucket per assigned identity.
//! Unlinking is O(1) given a buffer index, and nothing here allocates.
//!
//! Short critical sections run under `irq::off`; waiting for a buffer or
//! for the pool happens on a wait channel through the scheduler, and every
//! sleep is followed by revalidation from scratch.

use bitflags::bitflags;

use lottos_abi::{BLOCK_SIZE, BUFFERS_HASHTAB_SIZE, NR_BUFFERS, PRIO_BUFFER, WaitChannel};
use lottos_core::SleepWake;
use lottos_lib::{irq, klog_warn};

use crate::blockdev::BlockDevice;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BufFlags: u8 {
        /// `data` mirrors the on-disk content as of the last transfer.
        const VALID = 1 << 0;
        /// `data` has been modified since the last write-back.
        const DIRTY = 1 << 1;
        /// Sleep lock; held across device I/O on this buffer.
        const LOCKED = 1 << 2;
        /// A device transfer is in flight on this buffer.
        const BUSY = 1 << 3;
    }
}

/// Null link in the index-linked lists.
const NIL: usize = usize::MAX;

/// Handle to a buffer in the pool.
///
/// Returned locked with a raised reference count; stays meaningful until
/// the matching `release_block`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufId(usize);

impl BufId {
    /// Index of the buffer in the pool arena.
    pub fn index(self) -> usize {
        self.0
    }
}

struct Buf {
    dev: u32,
    num: u32,
    flags: BufFlags,
    count: u32,
    free_prev: usize,
    free_next: usize,
    hash_prev: usize,
    hash_next: usize,
    data: [u8; BLOCK_SIZE],
}

impl Buf {
    const fn empty() -> Self {
        Self {
            dev: 0,
            num: 0,
            flags: BufFlags::empty(),
            count: 0,
            free_prev: NIL,
            free_next: NIL,
            hash_prev: NIL,
            hash_next: NIL,
            data: [0; BLOCK_SIZE],
        }
    }

    /// `(0, 0)` is the reserved "never assigned" identity.
    fn assigned(&self) -> bool {
        !(self.dev == 0 && self.num == 0)
    }
}

#[derive(Clone, Copy)]
struct ListHead {
    head: usize,
    tail: usize,
}

impl ListHead {
    const EMPTY: Self = Self {
        head: NIL,
        tail: NIL,
    };
}

/// Running counters, mostly for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub device_reads: u64,
    pub device_writes: u64,
    pub lock_waits: u64,
    pub free_waits: u64,
}

/// One step of an acquisition protocol: either we got the buffer, or we
/// went to sleep on `chan` and the caller must start over after waking.
pub(crate) enum Attempt {
    Acquired(BufId),
    MustWait(WaitChannel),
}

pub(crate) fn bucket_of(dev: u32, num: u32) -> usize {
    ((dev ^ num) as usize) % BUFFERS_HASHTAB_SIZE
}

/// The pool itself: `NB` buffers, their free list and hash index, and the
/// device they mirror. Constructed once at boot; buffers never move, only
/// their identities do.
pub struct BufCache<D, const NB: usize = NR_BUFFERS> {
    bufs: [Buf; NB],
    free: ListHead,
    hash: [ListHead; BUFFERS_HASHTAB_SIZE],
    device: D,
    stats: CacheStats,
}

/// The cache at its production size.
pub type SystemBufCache<D> = BufCache<D, NR_BUFFERS>;

impl<D: BlockDevice, const NB: usize> BufCache<D, NB> {
    /// Build the pool: every buffer unassigned, clean, and on the free
    /// list in index order.
    pub fn new(device: D) -> Self {
        let mut cache = Self {
            bufs: [const { Buf::empty() }; NB],
            free: ListHead::EMPTY,
            hash: [ListHead::EMPTY; BUFFERS_HASHTAB_SIZE],
            device,
            stats: CacheStats::default(),
        };
        for i in 0..NB {
            cache.free_push_tail(i);
        }
        cache
    }

    // --- Public operations ---

    /// Return a locked buffer with the contents of block `(dev, num)`,
    /// reading it from the device if the cache copy is not valid.
    pub fn read_block<S: SleepWake>(&mut self, sched: &mut S, dev: u32, num: u32) -> BufId {
        let b = self.get_block(sched, dev, num);
        if !self.bufs[b.0].flags.contains(BufFlags::VALID) {
            self.device_read(b.0);
        }
        b
    }

    /// Push a buffer's contents to the device. The caller must hold the
    /// lock. The buffer stays locked and referenced.
    pub fn write_block(&mut self, b: BufId) {
        {
            let _irq = irq::off();
            if !self.bufs[b.0].flags.contains(BufFlags::LOCKED) {
                panic!("write_block: buffer not locked");
            }
        }
        self.device_write(b.0);
    }

    /// Drop one reference to a locked buffer and unlock it.
    ///
    /// On the last reference the buffer returns to the free list — at the
    /// tail if it holds valid dirty data (postponing eviction until a
    /// flush), at the head otherwise — and anyone starved of free buffers
    /// is woken.
    pub fn release_block<S: SleepWake>(&mut self, sched: &mut S, b: BufId) {
        let i = b.0;
        {
            let _irq = irq::off();
            if !self.bufs[i].flags.contains(BufFlags::LOCKED) {
                panic!("release_block: buffer not locked");
            }
            if self.bufs[i].count == 0 {
                panic!("release_block: buffer already free");
            }
            self.bufs[i].count -= 1;
            if self.bufs[i].count == 0 {
                sched.wakeup_all(WaitChannel::AnyFreeBuffer);
                if self.bufs[i].flags.contains(BufFlags::VALID | BufFlags::DIRTY) {
                    self.free_push_tail(i);
                } else {
                    self.free_push_head(i);
                }
            }
        }
        self.unlock_block(sched, b);
    }

    /// Acquire the sleep lock on a buffer, waiting while someone else
    /// holds it.
    pub fn lock_block<S: SleepWake>(&mut self, sched: &mut S, b: BufId) {
        loop {
            if self.lock_block_attempt(sched, b) {
                return;
            }
        }
    }

    /// Release the sleep lock and wake everyone queued on this buffer.
    pub fn unlock_block<S: SleepWake>(&mut self, sched: &mut S, b: BufId) {
        let _irq = irq::off();
        self.bufs[b.0].flags.remove(BufFlags::LOCKED);
        sched.wakeup_all(WaitChannel::Buffer(b.0));
    }

    /// Write every valid buffer back to the device.
    ///
    /// Each buffer is locked and pinned for the duration of its write, and
    /// released again afterwards; on return from a quiescent period no
    /// buffer is dirty. Locking may sleep, so each buffer is revalidated
    /// after the lock is ours.
    pub fn sync_cache<S: SleepWake>(&mut self, sched: &mut S) {
        for i in 0..NB {
            {
                let _irq = irq::off();
                if !self.bufs[i].flags.contains(BufFlags::VALID) {
                    continue;
                }
            }
            self.lock_block(sched, BufId(i));
            {
                let _irq = irq::off();
                // The buffer may have been recycled while we slept on its
                // lock; skip it if its contents are no longer worth writing.
                if !self.bufs[i].flags.contains(BufFlags::VALID) {
                    self.unlock_block(sched, BufId(i));
                    continue;
                }
                self.bufs[i].count += 1;
                if self.bufs[i].count == 1 {
                    self.free_unlink(i);
                }
            }
            self.device_write(i);
            self.release_block(sched, BufId(i));
        }
    }

    /// Return a locked buffer for `(dev, num)` without touching the
    /// device; the caller checks `VALID` itself.
    ///
    /// Blocks while the matching buffer is locked or while the pool has no
    /// free buffer. A dirty buffer at the free-list head is a panic:
    /// asynchronous write-back is not implemented, and the free-list
    /// ordering plus `sync_cache` keep dirty buffers away from the head in
    /// normal operation.
    pub fn get_block<S: SleepWake>(&mut self, sched: &mut S, dev: u32, num: u32) -> BufId {
        loop {
            if let Attempt::Acquired(b) = self.get_block_attempt(sched, dev, num) {
                return b;
            }
            // Slept; every assumption is stale, probe again.
        }
    }

    /// One pass of `get_block`. Sleeps (and reports on what) instead of
    /// looping, which is also what the protocol tests drive directly.
    pub(crate) fn get_block_attempt<S: SleepWake>(
        &mut self,
        sched: &mut S,
        dev: u32,
        num: u32,
    ) -> Attempt {
        if dev == 0 && num == 0 {
            panic!("get_block: reserved identity (0, 0)");
        }
        let _irq = irq::off();

        let bucket = bucket_of(dev, num);
        if let Some(i) = self.hash_lookup(bucket, dev, num) {
            if self.bufs[i].flags.contains(BufFlags::LOCKED) {
                self.stats.lock_waits += 1;
                let chan = WaitChannel::Buffer(i);
                sched.sleep_on(chan, PRIO_BUFFER);
                return Attempt::MustWait(chan);
            }
            self.stats.hits += 1;
            self.bufs[i].count += 1;
            if self.bufs[i].count == 1 {
                self.free_unlink(i);
            }
            self.bufs[i].flags.insert(BufFlags::LOCKED);
            return Attempt::Acquired(BufId(i));
        }

        let victim = self.free.head;
        if victim == NIL {
            klog_warn!("bcache: no free buffers for ({}, {})", dev, num);
            self.stats.free_waits += 1;
            sched.sleep_on(WaitChannel::AnyFreeBuffer, PRIO_BUFFER);
            return Attempt::MustWait(WaitChannel::AnyFreeBuffer);
        }
        if self.bufs[victim].flags.contains(BufFlags::DIRTY) {
            panic!("get_block: dirty victim at free-list head");
        }

        self.stats.misses += 1;
        self.free_unlink(victim);
        if self.bufs[victim].assigned() {
            let old_bucket = bucket_of(self.bufs[victim].dev, self.bufs[victim].num);
            self.hash_unlink(old_bucket, victim);
        }
        self.bufs[victim].dev = dev;
        self.bufs[victim].num = num;
        self.bufs[victim].flags.remove(BufFlags::VALID);
        self.bufs[victim].count = 1;
        self.bufs[victim].flags.insert(BufFlags::LOCKED);
        self.hash_push_head(bucket, victim);
        Attempt::Acquired(BufId(victim))
    }

    fn lock_block_attempt<S: SleepWake>(&mut self, sched: &mut S, b: BufId) -> bool {
        let _irq = irq::off();
        if self.bufs[b.0].flags.contains(BufFlags::LOCKED) {
            self.stats.lock_waits += 1;
            sched.sleep_on(WaitChannel::Buffer(b.0), PRIO_BUFFER);
            return false;
        }
        self.bufs[b.0].flags.insert(BufFlags::LOCKED);
        true
    }

    // --- Buffer access ---

    /// The `(dev, num)` identity this buffer currently mirrors.
    pub fn identity(&self, b: BufId) -> (u32, u32) {
        let buf = &self.bufs[b.0];
        (buf.dev, buf.num)
    }

    pub fn flags(&self, b: BufId) -> BufFlags {
        self.bufs[b.0].flags
    }

    pub fn count(&self, b: BufId) -> u32 {
        self.bufs[b.0].count
    }

    pub fn data(&self, b: BufId) -> &[u8; BLOCK_SIZE] {
        debug_assert!(self.bufs[b.0].flags.contains(BufFlags::LOCKED));
        &self.bufs[b.0].data
    }

    /// Mutable view of the block contents. Lock holders only; remember
    /// `mark_dirty`.
    pub fn data_mut(&mut self, b: BufId) -> &mut [u8; BLOCK_SIZE] {
        debug_assert!(self.bufs[b.0].flags.contains(BufFlags::LOCKED));
        &mut self.bufs[b.0].data
    }

    /// Note that the in-memory copy now differs from the device.
    pub fn mark_dirty(&mut self, b: BufId) {
        let _irq = irq::off();
        debug_assert!(self.bufs[b.0].flags.contains(BufFlags::LOCKED));
        self.bufs[b.0].flags.insert(BufFlags::DIRTY);
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // --- Device transfers ---

    fn device_read(&mut self, i: usize) {
        {
            let _irq = irq::off();
            self.bufs[i].flags.insert(BufFlags::BUSY);
            self.stats.device_reads += 1;
        }
        let (dev, num) = (self.bufs[i].dev, self.bufs[i].num);
        let Self { bufs, device, .. } = self;
        if let Err(err) = device.read_block(dev, num, &mut bufs[i].data) {
            panic!("bcache: read of ({}, {}) failed: {:?}", dev, num, err);
        }
        let _irq = irq::off();
        self.bufs[i].flags.remove(BufFlags::BUSY);
        self.bufs[i].flags.insert(BufFlags::VALID);
    }

    fn device_write(&mut self, i: usize) {
        {
            let _irq = irq::off();
            self.bufs[i].flags.insert(BufFlags::BUSY);
            self.stats.device_writes += 1;
        }
        let (dev, num) = (self.bufs[i].dev, self.bufs[i].num);
        let Self { bufs, device, .. } = self;
        if let Err(err) = device.write_block(dev, num, &bufs[i].data) {
            panic!("bcache: write of ({}, {}) failed: {:?}", dev, num, err);
        }
        let _irq = irq::off();
        self.bufs[i].flags.remove(BufFlags::BUSY | BufFlags::DIRTY);
    }

    // --- Free list ---

    fn free_push_head(&mut self, i: usize) {
        let old = self.free.head;
        self.bufs[i].free_prev = NIL;
        self.bufs[i].free_next = old;
        if old != NIL {
            self.bufs[old].free_prev = i;
        } else {
            self.free.tail = i;
        }
        self.free.head = i;
    }

    fn free_push_tail(&mut self, i: usize) {
        let old = self.free.tail;
        self.bufs[i].free_next = NIL;
        self.bufs[i].free_prev = old;
        if old != NIL {
            self.bufs[old].free_next = i;
        } else {
            self.free.head = i;
        }
        self.free.tail = i;
    }

    fn free_unlink(&mut self, i: usize) {
        let (p, n) = (self.bufs[i].free_prev, self.bufs[i].free_next);
        if p != NIL {
            self.bufs[p].free_next = n;
        } else {
            self.free.head = n;
        }
        if n != NIL {
            self.bufs[n].free_prev = p;
        } else {
            self.free.tail = p;
        }
        self.bufs[i].free_prev = NIL;
        self.bufs[i].free_next = NIL;
    }

    // --- Hash index ---

    fn hash_lookup(&self, bucket: usize, dev: u32, num: u32) -> Option<usize> {
        let mut i = self.hash[bucket].head;
        while i != NIL {
            if self.bufs[i].dev == dev && self.bufs[i].num == num {
                return Some(i);
            }
            i = self.bufs[i].hash_next;
        }
        None
    }

    fn hash_push_head(&mut self, bucket: usize, i: usize) {
        let old = self.hash[bucket].head;
        self.bufs[i].hash_prev = NIL;
        self.bufs[i].hash_next = old;
        if old != NIL {
            self.bufs[old].hash_prev = i;
        } else {
            self.hash[bucket].tail = i;
        }
        self.hash[bucket].head = i;
    }

    fn hash_unlink(&mut self, bucket: usize, i: usize) {
        let (p, n) = (self.bufs[i].hash_prev, self.bufs[i].hash_next);
        if p != NIL {
            self.bufs[p].hash_next = n;
        } else {
            self.hash[bucket].head = n;
        }
        if n != NIL {
            self.bufs[n].hash_prev = p;
        } else {
            self.hash[bucket].tail = p;
        }
        self.bufs[i].hash_prev = NIL;
        self.bufs[i].hash_next = NIL;
    }

    // --- Structural invariants, exercised between test steps ---

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        // Free list: well-linked both ways, and membership is exactly
        // "reference count zero".
        let mut on_free = [false; NB];
        let mut prev = NIL;
        let mut i = self.free.head;
        while i != NIL {
            assert!(!on_free[i], "free list cycles through {}", i);
            on_free[i] = true;
            assert_eq!(self.bufs[i].free_prev, prev);
            prev = i;
            i = self.bufs[i].free_next;
        }
        assert_eq!(self.free.tail, prev);
        for (i, buf) in self.bufs.iter().enumerate() {
            assert_eq!(
                buf.count == 0,
                on_free[i],
                "buffer {}: count {} vs free-list membership {}",
                i,
                buf.count,
                on_free[i]
            );
        }

        // Hash index: every assigned buffer in exactly the bucket its
        // identity hashes to, unassigned buffers in none.
        let mut in_bucket = [false; NB];
        for (bucket, head) in self.hash.iter().enumerate() {
            let mut prev = NIL;
            let mut i = head.head;
            while i != NIL {
                assert!(!in_bucket[i], "buffer {} in two buckets", i);
                in_bucket[i] = true;
                assert!(self.bufs[i].assigned());
                assert_eq!(bucket_of(self.bufs[i].dev, self.bufs[i].num), bucket);
                assert_eq!(self.bufs[i].hash_prev, prev);
                prev = i;
                i = self.bufs[i].hash_next;
            }
            assert_eq!(head.tail, prev);
        }
        for (i, buf) in self.bufs.iter().enumerate() {
            assert_eq!(buf.assigned(), in_bucket[i]);
        }

        // At most one buffer per identity.
        for i in 0..NB {
            for j in i + 1..NB {
                if self.bufs[i].assigned() {
                    assert!(
                        (self.bufs[i].dev, self.bufs[i].num)
                            != (self.bufs[j].dev, self.bufs[j].num),
                        "buffers {} and {} share ({}, {})",
                        i,
                        j,
                        self.bufs[i].dev,
                        self.bufs[i].num
                    );
                }
            }
        }
    }
}
