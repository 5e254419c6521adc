//! Buffer cache scenarios, driven against the real scheduler.
//!
//! Blocking protocols are exercised through `get_block_attempt`, the
//! single-step form of the public retry loops: a step either acquires the
//! buffer or puts the calling process to sleep, and the test then plays
//! the other processes until the sleeper is runnable again.

use lottos_abi::{BLOCK_SIZE, IDLE, PRIO_BUFFER, Pid, ProcState, WaitChannel};
use lottos_core::{Scheduler, SleepWake};

use crate::bcache::{Attempt, BufCache, BufFlags, bucket_of};
use crate::blockdev::MemoryBlockDevice;

const DEV: u32 = 1;

fn cache<const NB: usize>() -> BufCache<MemoryBlockDevice<64>, NB> {
    BufCache::new(MemoryBlockDevice::new(DEV))
}

/// Boot a scheduler with a single running process.
fn sched_with_proc() -> (Scheduler, Pid) {
    let mut sched = Scheduler::new();
    let pid = sched.spawn(0).unwrap();
    sched.yield_now();
    assert_eq!(sched.current(), pid);
    (sched, pid)
}

#[test]
fn hit_path_reads_the_device_once() {
    let (mut sched, _) = sched_with_proc();
    let mut device: MemoryBlockDevice<64> = MemoryBlockDevice::new(DEV);
    let pattern = [7_u8; BLOCK_SIZE];
    device.set_block(10, &pattern);
    let mut cache: BufCache<_, 4> = BufCache::new(device);

    let b1 = cache.read_block(&mut sched, DEV, 10);
    assert_eq!(cache.identity(b1), (DEV, 10));
    assert_eq!(cache.count(b1), 1);
    assert!(cache.flags(b1).contains(BufFlags::VALID | BufFlags::LOCKED));
    assert!(!cache.flags(b1).contains(BufFlags::BUSY));
    assert_eq!(cache.data(b1), &pattern);
    assert_eq!(cache.device().reads(), 1);

    cache.release_block(&mut sched, b1);
    assert_eq!(cache.count(b1), 0);
    cache.check_invariants();

    let b2 = cache.read_block(&mut sched, DEV, 10);
    assert_eq!(b2, b1);
    assert_eq!(cache.device().reads(), 1);
    assert_eq!(cache.stats().hits, 1);
    cache.release_block(&mut sched, b2);
    cache.check_invariants();
}

#[test]
fn eviction_recycles_the_free_head() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();

    let first = cache.read_block(&mut sched, DEV, 1);
    cache.release_block(&mut sched, first);
    for num in 2..=4 {
        let b = cache.read_block(&mut sched, DEV, num);
        cache.release_block(&mut sched, b);
        cache.check_invariants();
    }

    // A clean buffer released to the head is the next victim, so the slot
    // that held (1, 1) is the one recycled for (1, 5).
    let b5 = cache.read_block(&mut sched, DEV, 5);
    assert_eq!(b5, first);
    assert_eq!(cache.identity(b5), (DEV, 5));
    cache.release_block(&mut sched, b5);
    cache.check_invariants();

    // (1, 1) is gone from the index: reading it again is a device read.
    let reads_before = cache.device().reads();
    let b1 = cache.read_block(&mut sched, DEV, 1);
    assert_eq!(cache.device().reads(), reads_before + 1);
    cache.release_block(&mut sched, b1);
}

#[test]
fn dirty_buffers_are_evicted_last() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();

    let b7 = cache.read_block(&mut sched, DEV, 7);
    cache.mark_dirty(b7);
    cache.release_block(&mut sched, b7); // tail of the free list
    let b8 = cache.read_block(&mut sched, DEV, 8);
    cache.release_block(&mut sched, b8); // head of the free list
    assert_ne!(b7, b8);
    cache.check_invariants();

    let b9 = cache.read_block(&mut sched, DEV, 9);
    assert_eq!(b9, b8);
    assert_ne!(b9, b7);
    // The dirty block survived the eviction round.
    assert_eq!(cache.identity(b7), (DEV, 7));
    assert!(cache.flags(b7).contains(BufFlags::DIRTY));
    cache.release_block(&mut sched, b9);
    cache.check_invariants();
}

#[test]
fn contenders_sleep_until_release_then_hit() {
    let mut sched = Scheduler::new();
    let a = sched.spawn(0).unwrap();
    let b = sched.spawn(0).unwrap();
    let mut cache = cache::<4>();

    sched.yield_now();
    assert_eq!(sched.current(), a);
    let ba = cache.read_block(&mut sched, DEV, 3);
    assert_eq!(cache.device().reads(), 1);

    // a pauses mid-operation; b gets the CPU.
    sched.sleep_on(WaitChannel::Event(0), PRIO_BUFFER);
    assert_eq!(sched.current(), b);

    // b wants the same block and must queue on the buffer's lock.
    match cache.get_block_attempt(&mut sched, DEV, 3) {
        Attempt::MustWait(chan) => assert_eq!(chan, WaitChannel::Buffer(ba.index())),
        Attempt::Acquired(_) => panic!("buffer lock was not honoured"),
    }
    assert_eq!(sched.proc(b).state, ProcState::Waiting);
    assert_eq!(sched.current(), IDLE);

    // a comes back and releases, which wakes b.
    sched.wakeup_all(WaitChannel::Event(0));
    sched.yield_now();
    assert_eq!(sched.current(), a);
    cache.release_block(&mut sched, ba);
    assert_eq!(sched.proc(b).state, ProcState::Ready);

    // b retries: same slot, still valid, no second device read.
    sched.stop();
    assert_eq!(sched.current(), b);
    match cache.get_block_attempt(&mut sched, DEV, 3) {
        Attempt::Acquired(bb) => {
            assert_eq!(bb, ba);
            assert!(cache.flags(bb).contains(BufFlags::VALID));
            cache.release_block(&mut sched, bb);
        }
        Attempt::MustWait(_) => panic!("released buffer still blocked"),
    }
    assert_eq!(cache.device().reads(), 1);
    cache.check_invariants();
}

#[test]
fn exhausted_pool_sleeps_on_the_global_chain() {
    let mut sched = Scheduler::new();
    let b = sched.spawn(0).unwrap(); // slot 1: the contender
    let a = sched.spawn(0).unwrap(); // slot 2: the hoarder
    let mut cache = cache::<2>();

    sched.yield_now();
    assert_eq!(sched.current(), b);
    sched.sleep_on(WaitChannel::Event(1), PRIO_BUFFER); // park b for now
    assert_eq!(sched.current(), a);

    let b1 = cache.read_block(&mut sched, DEV, 1);
    let _b2 = cache.read_block(&mut sched, DEV, 2);
    cache.check_invariants();

    // Hand the CPU to b with every buffer pinned.
    sched.wakeup_all(WaitChannel::Event(1));
    sched.yield_now();
    assert_eq!(sched.current(), b);

    match cache.get_block_attempt(&mut sched, DEV, 3) {
        Attempt::MustWait(chan) => assert_eq!(chan, WaitChannel::AnyFreeBuffer),
        Attempt::Acquired(_) => panic!("pool was supposed to be pinned"),
    }
    assert_eq!(cache.stats().free_waits, 1);
    assert_eq!(sched.proc(b).state, ProcState::Waiting);
    assert_eq!(sched.current(), a);

    // a releases one buffer; the global chain wakes b.
    cache.release_block(&mut sched, b1);
    assert_eq!(sched.proc(b).state, ProcState::Ready);
    sched.stop();
    assert_eq!(sched.current(), b);

    match cache.get_block_attempt(&mut sched, DEV, 3) {
        Attempt::Acquired(b3) => {
            assert_eq!(b3, b1); // the freed slot is the one recycled
            assert_eq!(cache.identity(b3), (DEV, 3));
            assert!(!cache.flags(b3).contains(BufFlags::VALID));
            cache.release_block(&mut sched, b3);
        }
        Attempt::MustWait(_) => panic!("free buffer not found after release"),
    }
    cache.check_invariants();
}

#[test]
fn colliding_identities_coexist_in_one_bucket() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();
    assert_eq!(bucket_of(DEV, 4), bucket_of(DEV, 59));

    let x = cache.get_block(&mut sched, DEV, 4);
    let y = cache.get_block(&mut sched, DEV, 59);
    assert_ne!(x, y);
    cache.check_invariants();
    cache.release_block(&mut sched, x);
    cache.release_block(&mut sched, y);

    // Both stay findable through the shared bucket.
    let x2 = cache.get_block(&mut sched, DEV, 4);
    assert_eq!(x2, x);
    let y2 = cache.get_block(&mut sched, DEV, 59);
    assert_eq!(y2, y);
    cache.release_block(&mut sched, x2);
    cache.release_block(&mut sched, y2);
    cache.check_invariants();
}

#[test]
fn sync_cache_flushes_every_dirty_buffer() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();

    let pattern_a = [0xab_u8; BLOCK_SIZE];
    let b1 = cache.read_block(&mut sched, DEV, 1);
    cache.data_mut(b1).copy_from_slice(&pattern_a);
    cache.mark_dirty(b1);
    cache.release_block(&mut sched, b1);

    let pattern_b = [0x5a_u8; BLOCK_SIZE];
    let b2 = cache.read_block(&mut sched, DEV, 2);
    cache.data_mut(b2).copy_from_slice(&pattern_b);
    cache.mark_dirty(b2);
    cache.release_block(&mut sched, b2);

    let b3 = cache.read_block(&mut sched, DEV, 3); // stays clean
    cache.release_block(&mut sched, b3);
    cache.check_invariants();

    cache.sync_cache(&mut sched);

    // Every valid buffer went out; nothing is dirty, locked, or pinned.
    assert_eq!(cache.device().writes(), 3);
    for b in [b1, b2, b3] {
        assert!(!cache.flags(b).contains(BufFlags::DIRTY));
        assert!(!cache.flags(b).contains(BufFlags::LOCKED));
        assert_eq!(cache.count(b), 0);
    }
    assert_eq!(cache.device().block(1), &pattern_a);
    assert_eq!(cache.device().block(2), &pattern_b);
    cache.check_invariants();
}

#[test]
fn write_block_pushes_through_and_keeps_the_lock() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();

    let b = cache.read_block(&mut sched, DEV, 5);
    cache.data_mut(b)[0] = 0xee;
    cache.mark_dirty(b);
    cache.write_block(b);

    assert_eq!(cache.device().writes(), 1);
    assert_eq!(cache.device().block(5)[0], 0xee);
    assert!(!cache.flags(b).contains(BufFlags::DIRTY));
    assert!(cache.flags(b).contains(BufFlags::LOCKED));
    assert_eq!(cache.count(b), 1);
    cache.release_block(&mut sched, b);
    cache.check_invariants();
}

#[test]
fn unlock_wakes_lock_waiters() {
    let mut sched = Scheduler::new();
    let b = sched.spawn(0).unwrap(); // slot 1: the waiter
    let a = sched.spawn(0).unwrap(); // slot 2: the holder
    let mut cache = cache::<4>();

    sched.yield_now();
    assert_eq!(sched.current(), b);
    sched.sleep_on(WaitChannel::Event(2), PRIO_BUFFER);
    assert_eq!(sched.current(), a);

    let held = cache.get_block(&mut sched, DEV, 6);
    sched.wakeup_all(WaitChannel::Event(2));
    sched.yield_now();
    assert_eq!(sched.current(), b);

    match cache.get_block_attempt(&mut sched, DEV, 6) {
        Attempt::MustWait(chan) => assert_eq!(chan, WaitChannel::Buffer(held.index())),
        Attempt::Acquired(_) => panic!("lock not honoured"),
    }
    assert_eq!(sched.current(), a);

    cache.unlock_block(&mut sched, held);
    assert_eq!(sched.proc(b).state, ProcState::Ready);
    sched.stop();
    assert_eq!(sched.current(), b);

    match cache.get_block_attempt(&mut sched, DEV, 6) {
        Attempt::Acquired(bb) => {
            assert_eq!(bb, held);
            assert_eq!(cache.count(bb), 2);
        }
        Attempt::MustWait(_) => panic!("unlocked buffer still blocked"),
    }
    cache.check_invariants();
}

#[test]
fn lock_block_on_a_free_buffer_keeps_it_free() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();

    let b = cache.read_block(&mut sched, DEV, 1);
    cache.release_block(&mut sched, b);
    cache.lock_block(&mut sched, b);
    assert!(cache.flags(b).contains(BufFlags::LOCKED));
    assert_eq!(cache.count(b), 0);
    cache.unlock_block(&mut sched, b);
    cache.check_invariants();
}

#[test]
#[should_panic(expected = "reserved identity")]
fn zero_identity_is_fatal() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();
    let _ = cache.get_block(&mut sched, 0, 0);
}

#[test]
#[should_panic(expected = "already free")]
fn releasing_a_free_buffer_is_fatal() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();
    let b = cache.read_block(&mut sched, DEV, 1);
    cache.release_block(&mut sched, b);
    cache.lock_block(&mut sched, b);
    cache.release_block(&mut sched, b);
}

#[test]
#[should_panic(expected = "not locked")]
fn releasing_without_the_lock_is_fatal() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<4>();
    let b = cache.read_block(&mut sched, DEV, 2);
    cache.release_block(&mut sched, b);
    cache.release_block(&mut sched, b);
}

#[test]
#[should_panic(expected = "dirty victim")]
fn dirty_free_head_is_fatal() {
    let (mut sched, _) = sched_with_proc();
    let mut cache = cache::<1>();
    let b = cache.read_block(&mut sched, DEV, 1);
    cache.mark_dirty(b);
    cache.release_block(&mut sched, b);
    let _ = cache.read_block(&mut sched, DEV, 2);
}
