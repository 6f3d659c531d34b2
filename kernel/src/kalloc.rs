//! Physical memory allocator. The teaching original hands out whole
//! 4096-byte pages from a freelist; `Box`/`Arc`/`Vec` need arbitrary-size
//! allocation instead, so here the same range between the end of the
//! kernel image and `PHYSTOP` is handed once to a general-purpose heap
//! that backs the global allocator, and every kernel allocation -
//! page-table pages, kernel stacks, trapframes, buffer cache nodes -
//! comes out of that single arena.
use crate::memlayout::PHYSTOP;
use crate::riscv::pgroundup;
use linked_list_allocator::LockedHeap;

extern "C" {
    // first address after the kernel's text+data, set by kernel.ld.
    static end: u8;
}

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("kalloc: out of memory allocating {:?}", layout);
}

/// Hand the whole `[end, PHYSTOP)` range to the allocator. Must run
/// exactly once, on hart 0, before any other hart or interrupt handler
/// can reach an allocation.
pub fn init() {
    let start = pgroundup(unsafe { &end as *const u8 as usize });
    let size = PHYSTOP - start;
    unsafe { ALLOCATOR.lock().init(start as *mut u8, size) }
}
