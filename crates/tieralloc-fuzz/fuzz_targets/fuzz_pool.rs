#![no_main]
use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use tieralloc_core::size_class::{ALIGN, is_small, round_up};
use tieralloc_core::{LimitedHeap, OomPolicy, PoolAllocator, PoolConfig};

fn footprint(size: usize) -> usize {
    if is_small(size) { round_up(size).max(ALIGN) } else { size.max(1) }
}

fn assert_disjoint(live: &BTreeMap<usize, (usize, u8)>, addr: usize, size: usize) {
    assert_eq!(addr % ALIGN, 0);
    if let Some((&prev, &(prev_size, _))) = live.range(..=addr).next_back() {
        assert!(prev + footprint(prev_size) <= addr, "overlap with previous block");
    }
    if let Some((&next, _)) = live.range(addr..).next() {
        assert!(addr + footprint(size) <= next, "overlap with next block");
    }
}

// Each 4-byte chunk is one op: [opcode, size_lo, size_hi, aux].
fuzz_target!(|data: &[u8]| {
    let Some((&head, ops)) = data.split_first() else {
        return;
    };
    // First byte picks the refill batch and the heap budget (in KiB).
    let config = PoolConfig::default()
        .with_oom_policy(OomPolicy::Report)
        .with_refill_batch(usize::from(head % 32) + 1);
    let budget = (usize::from(head) + 1) * 1024;
    let mut pool = PoolAllocator::with_heap(LimitedHeap::with_budget(budget), config);
    let mut live: BTreeMap<usize, (usize, u8)> = BTreeMap::new();

    for chunk in ops.chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]) % 512);
        let aux = chunk[3];
        match chunk[0] % 4 {
            0 => {
                let Ok(ptr) = pool.allocate(size) else {
                    continue;
                };
                let addr = ptr.as_ptr() as usize;
                assert_disjoint(&live, addr, size);
                unsafe { std::ptr::write_bytes(ptr.as_ptr(), aux, size) };
                live.insert(addr, (size, aux));
            }
            1 => {
                let Some((&addr, &(sz, tag))) = live.iter().nth(usize::from(aux) % live.len().max(1)) else {
                    continue;
                };
                live.remove(&addr);
                let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), sz) };
                assert!(bytes.iter().all(|&b| b == tag), "block corrupted before free");
                unsafe { pool.deallocate(ptr, sz) };
            }
            2 => {
                let Some((&addr, &(sz, tag))) = live.iter().nth(usize::from(aux) % live.len().max(1)) else {
                    continue;
                };
                let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                let Ok(moved) = (unsafe { pool.reallocate(ptr, sz, size) }) else {
                    continue;
                };
                live.remove(&addr);
                assert_disjoint(&live, moved.as_ptr() as usize, size);
                let kept = sz.min(size);
                let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), kept) };
                assert!(bytes.iter().all(|&b| b == tag), "realloc lost data");
                unsafe { std::ptr::write_bytes(moved.as_ptr(), tag, size) };
                live.insert(moved.as_ptr() as usize, (size, tag));
            }
            _ => {
                // Toggle heap exhaustion to drive the cannibalize and fatal paths.
                if aux % 2 == 0 {
                    pool.heap_mut().exhaust();
                } else {
                    pool.heap_mut().restore();
                }
            }
        }
    }

    for (addr, (sz, _)) in live {
        let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
        unsafe { pool.deallocate(ptr, sz) };
    }
});
