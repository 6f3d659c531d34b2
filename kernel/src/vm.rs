//! Sv39 page tables: one per process (`Uvm`) plus the single shared kernel
//! one (`Kvm`, behind `KVM`). Mapping/unmapping walks three 512-entry
//! levels exactly like the hardware does; physical pages back each leaf
//! are ordinary heap allocations (`Page`/`Stack`), freed through `Box`
//! when a mapping is torn down.
use crate::defs::{as_bytes, as_bytes_mut};
use crate::memlayout::{KERNBASE, PHYSTOP, PLIC, TRAMPOLINE, TRAPFRAME, UART0, VIRTIO0};
use crate::proc::procs;
use crate::riscv::{pgroundup, sfence_vma, w_satp, make_satp, PGSHIFT, PGSIZE, PTE_R, PTE_U, PTE_V, PTE_W, PTE_X};
use crate::sync::OnceLock;
use crate::trampoline::trampoline;
use alloc::boxed::Box;
use bitflags::bitflags;
use core::cmp::{Ord, PartialEq, PartialOrd};
use core::convert::From;
use core::marker::PhantomData;
use core::ops::{Add, AddAssign, Deref, DerefMut, Index, IndexMut, Sub, SubAssign};
use core::ptr;

extern "C" {
    // set by kernel.ld to the end of the kernel's text segment.
    fn etext();
}

pub static KVM: OnceLock<Kvm> = OnceLock::new();

/// One past the highest virtual address a page table can hold; one bit
/// short of Sv39's true limit so addresses never need sign extension.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

bitflags! {
    pub struct PteFlags: usize {
        const V = PTE_V;
        const R = PTE_R;
        const W = PTE_W;
        const X = PTE_X;
        const U = PTE_U;
        const RW = Self::R.bits | Self::W.bits;
        const RX = Self::R.bits | Self::X.bits;
        const RWX = Self::R.bits | Self::W.bits | Self::X.bits;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PAddr(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct KVAddr(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct UVAddr(usize);

#[derive(Debug, Copy, Clone)]
pub enum VirtAddr {
    User(usize),
    Kernel(usize),
    Physical(usize),
}

impl From<UVAddr> for VirtAddr {
    fn from(uv: UVAddr) -> Self {
        VirtAddr::User(*uv.get())
    }
}
impl From<KVAddr> for VirtAddr {
    fn from(kv: KVAddr) -> Self {
        VirtAddr::Kernel(*kv.get())
    }
}
impl From<PAddr> for VirtAddr {
    fn from(pv: PAddr) -> Self {
        VirtAddr::Physical(*pv.get())
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        match self {
            VirtAddr::Kernel(a) => VirtAddr::Kernel(a + rhs),
            VirtAddr::User(a) => VirtAddr::User(a + rhs),
            VirtAddr::Physical(a) => VirtAddr::Physical(a + rhs),
        }
    }
}
impl AddAssign<usize> for VirtAddr {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

pub trait Addr
where
    Self: Copy
        + From<usize>
        + Add<usize, Output = Self>
        + Sub<usize, Output = Self>
        + AddAssign<usize>
        + SubAssign<usize>
        + PartialEq
        + Eq
        + Ord
        + PartialOrd,
{
    fn get(&self) -> &usize;
    fn get_mut(&mut self) -> &mut usize;
    fn into_usize(self) -> usize;

    fn is_aligned(&self) -> bool {
        self.get() % PGSIZE == 0
    }
    fn roundup(&mut self) {
        *self.get_mut() = (*self.get() + PGSIZE - 1) & !(PGSIZE - 1);
    }
    fn rounddown(&mut self) {
        *self.get_mut() &= !(PGSIZE - 1);
    }
}

pub trait VAddr: Addr {
    const PXMASK: usize = 0x1FF;
    fn px(&self, level: usize) -> usize;
    const MAXVA: usize = MAXVA;
}

macro_rules! impl_addr {
    ($typ:ident) => {
        impl From<usize> for $typ {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }
        impl Add<usize> for $typ {
            type Output = Self;
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }
        impl AddAssign<usize> for $typ {
            fn add_assign(&mut self, rhs: usize) {
                self.0 += rhs;
            }
        }
        impl Sub<usize> for $typ {
            type Output = Self;
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }
        impl SubAssign<usize> for $typ {
            fn sub_assign(&mut self, other: usize) {
                self.0 -= other;
            }
        }
        impl Sub for $typ {
            type Output = usize;
            fn sub(self, rhs: Self) -> Self::Output {
                self.0 - rhs.0
            }
        }
        impl Addr for $typ {
            fn get(&self) -> &usize {
                &self.0
            }
            fn get_mut(&mut self) -> &mut usize {
                &mut self.0
            }
            fn into_usize(self) -> usize {
                self.0
            }
        }
    };
}

macro_rules! impl_vaddr {
    ($typ:ident) => {
        impl VAddr for $typ {
            fn px(&self, level: usize) -> usize {
                (self.0 >> (PGSHIFT + 9 * level)) & Self::PXMASK
            }
        }
    };
}

impl_addr!(PAddr);
impl_addr!(KVAddr);
impl_addr!(UVAddr);
impl_vaddr!(KVAddr);
impl_vaddr!(UVAddr);

/// A type whose instances can be handed out as a zeroed, page-sized heap
/// allocation without going through a stack temporary first.
pub trait PageAllocator: Sized {
    fn try_new_zeroed() -> Option<usize> {
        match Box::<Self>::try_new_zeroed() {
            Ok(mem) => Some(unsafe { Box::into_raw(mem.assume_init()) } as usize),
            Err(_) => None,
        }
    }
}

#[repr(C, align(4096))]
pub struct Page([u8; 4096]);
impl PageAllocator for Page {}

#[repr(C, align(4096))]
pub struct Stack([u8; 4096 * 4]);
impl PageAllocator for Stack {}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(4096))]
struct RawPageTable {
    entries: [PageTableEntry; 512],
}
impl PageAllocator for RawPageTable {}

impl RawPageTable {
    fn new() -> Option<*mut Self> {
        Some(RawPageTable::try_new_zeroed()? as *mut Self)
    }
}

impl Index<usize> for RawPageTable {
    type Output = PageTableEntry;
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}
impl IndexMut<usize> for RawPageTable {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}
impl Deref for RawPageTable {
    type Target = [PageTableEntry; 512];
    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}
impl DerefMut for RawPageTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(usize);

impl PageTableEntry {
    pub fn is_v(&self) -> bool {
        self.0 & PTE_V != 0
    }
    pub fn is_u(&self) -> bool {
        self.0 & PTE_U != 0
    }
    pub fn rm_u(&mut self) {
        self.0 &= !PTE_U;
    }
    pub fn is_leaf(&self) -> bool {
        self.0 & 0x3FF != PTE_V
    }
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0x3FF)
    }
    pub fn to_pa(&self) -> PAddr {
        ((self.0 >> 10) << 12).into()
    }
    pub fn set(&mut self, pa: usize, attr: PteFlags) {
        self.0 = ((pa >> 12) << 10) | attr.bits();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageTable<V: VAddr> {
    ptr: *mut RawPageTable,
    _marker: PhantomData<V>,
}

impl<V: VAddr> PageTable<V> {
    pub fn new() -> Option<Self> {
        Some(Self {
            ptr: RawPageTable::new()?,
            _marker: PhantomData,
        })
    }

    pub fn as_satp(&self) -> usize {
        make_satp(self.ptr as usize)
    }

    /// Find the PTE for `va`, allocating intermediate page-table pages
    /// along the way when `alloc` is set.
    pub fn walk(&self, va: V, alloc: bool) -> Option<&mut PageTableEntry> {
        let mut pagetable = self.ptr;
        if va.into_usize() >= V::MAXVA {
            panic!("walk");
        }
        for level in (1..3).rev() {
            let pte = unsafe { (*pagetable).get_mut(va.px(level))? };
            if pte.is_v() {
                pagetable = pte.to_pa().into_usize() as *mut RawPageTable;
            } else {
                if !alloc {
                    return None;
                }
                pagetable = RawPageTable::new()?;
                pte.set(pagetable as usize, PteFlags::V);
            }
        }
        unsafe { (*pagetable).get_mut(va.px(0)) }
    }

    /// Look up a user virtual address and return its physical address.
    pub fn walkaddr(&self, va: V) -> Option<PAddr> {
        if va.into_usize() >= V::MAXVA {
            return None;
        }
        match self.walk(va, false) {
            None => None,
            Some(pte) if !pte.is_v() => None,
            Some(pte) if !pte.is_u() => None,
            Some(pte) => Some(pte.to_pa()),
        }
    }

    /// Map `[va, va+size)` to `[pa, pa+size)`. Neither need be page-aligned.
    pub fn mappages(&self, mut va: V, mut pa: PAddr, size: usize, perm: PteFlags) -> Result<(), ()> {
        if size == 0 {
            panic!("mappages: size");
        }
        let mut last = va + size - 1;
        va.rounddown();
        last.rounddown();
        loop {
            let pte = self.walk(va, true).ok_or(())?;
            if pte.is_v() {
                panic!("mappages: remap");
            }
            pte.set(pa.into_usize(), perm | PteFlags::V);
            if va == last {
                break Ok(());
            }
            va += PGSIZE;
            pa += PGSIZE;
        }
    }

    /// Recursively free page-table pages. Every leaf mapping must already
    /// be gone.
    pub fn freewalk(&self) {
        let pagetable = unsafe { &mut *self.ptr };
        for pte in pagetable.iter_mut() {
            if pte.is_v() && !pte.is_leaf() {
                let child: PageTable<V> = PageTable {
                    ptr: pte.to_pa().into_usize() as *mut RawPageTable,
                    _marker: PhantomData,
                };
                child.freewalk();
                *pte = PageTableEntry(0);
            } else if pte.is_v() {
                panic!("freewalk: leaf");
            }
        }
        unsafe { drop(Box::from_raw(self.ptr)) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Uvm {
    page_table: PageTable<UVAddr>,
}

impl Deref for Uvm {
    type Target = PageTable<UVAddr>;
    fn deref(&self) -> &Self::Target {
        &self.page_table
    }
}
impl DerefMut for Uvm {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page_table
    }
}

impl Uvm {
    /// Remove `npages` mappings starting at the page-aligned `va`.
    pub fn unmap(&mut self, va: UVAddr, npages: usize, do_free: bool) {
        if !va.is_aligned() {
            panic!("uvmunmap: not aligned");
        }
        let mut a = va;
        while a < va + npages * PGSIZE {
            match self.page_table.walk(a, false) {
                None => panic!("uvmunmap: walk"),
                Some(pte) if !pte.is_v() => panic!("uvmunmap: not mapped"),
                Some(pte) if !pte.is_leaf() => panic!("uvmunmap: not a leaf"),
                Some(pte) => {
                    if do_free {
                        let pa = pte.to_pa();
                        unsafe {
                            let _pg = Box::from_raw(pa.into_usize() as *mut Page);
                        }
                    }
                    *pte = PageTableEntry(0);
                }
            }
            a += PGSIZE;
        }
    }

    /// Create an empty user page table.
    pub fn create() -> Option<Box<Uvm>> {
        match Box::try_new_zeroed() {
            Ok(mem) => Some(unsafe { mem.assume_init() }),
            Err(_) => None,
        }
    }

    /// Load the first process's initcode at user address 0. `src` must
    /// fit within one page.
    pub fn init(&mut self, src: &[u8]) {
        if src.len() > PGSIZE {
            panic!("inituvm: more than a page");
        }
        unsafe {
            let mem = Box::into_raw(Box::<Page>::new_zeroed().assume_init());
            self.mappages(0.into(), (mem as usize).into(), PGSIZE, PteFlags::RWX | PteFlags::U)
                .unwrap();
            ptr::copy_nonoverlapping(src.as_ptr(), mem as *mut u8, src.len());
        }
    }

    /// Grow a process from `oldsz` to `newsz`, mapping freshly-allocated
    /// pages. Returns the resulting size.
    pub fn alloc(&mut self, mut oldsz: usize, newsz: usize, xperm: PteFlags) -> Option<usize> {
        if newsz < oldsz {
            return Some(oldsz);
        }
        oldsz = pgroundup(oldsz);
        for a in (oldsz..newsz).step_by(PGSIZE) {
            let mem = match Box::<Page>::try_new_zeroed() {
                Ok(mem) => Box::into_raw(unsafe { mem.assume_init() }),
                Err(_) => {
                    self.dealloc(a, oldsz);
                    return None;
                }
            };
            if self
                .mappages(a.into(), (mem as usize).into(), PGSIZE, PteFlags::R | PteFlags::U | xperm)
                .is_err()
            {
                unsafe {
                    let _pg = Box::from_raw(mem);
                }
                self.dealloc(a, oldsz);
                return None;
            }
        }
        Some(newsz)
    }

    /// Shrink a process from `oldsz` to `newsz`, unmapping and freeing
    /// whole pages that fall out of range.
    pub fn dealloc(&mut self, oldsz: usize, newsz: usize) -> usize {
        if newsz >= oldsz {
            return oldsz;
        }
        if pgroundup(newsz) < pgroundup(oldsz) {
            let npages = (pgroundup(oldsz) - pgroundup(newsz)) / PGSIZE;
            self.unmap(pgroundup(newsz).into(), npages, true);
        }
        newsz
    }

    /// Free every user mapping and then the page-table pages themselves.
    pub fn free(&mut self, size: usize) {
        if size > 0 {
            self.unmap(0.into(), pgroundup(size) / PGSIZE, true);
        }
        self.page_table.freewalk();
    }

    /// Copy a parent's user memory and page table into a freshly-created
    /// child, for `fork`.
    pub fn copy(&self, new: &mut Self, size: usize) -> Result<(), &'static str> {
        let mut va = UVAddr::from(0);
        while va.into_usize() < size {
            match self.walk(va, false) {
                Some(pte) => {
                    if !pte.is_v() {
                        panic!("uvmcopy: page not present");
                    }
                    let pa = pte.to_pa();
                    let flags = pte.flags();
                    let mem = match Box::<Page>::try_new_zeroed() {
                        Ok(mem) => Box::into_raw(unsafe { mem.assume_init() }),
                        Err(_) => {
                            new.unmap(0.into(), va.into_usize() / PGSIZE, true);
                            return Err("uvmcopy: alloc fail");
                        }
                    };
                    unsafe {
                        ptr::copy_nonoverlapping(pa.into_usize() as *const u8, mem as *mut u8, PGSIZE);
                    }
                    if new.mappages(va, (mem as usize).into(), PGSIZE, flags).is_err() {
                        unsafe {
                            let _pg = Box::from_raw(mem);
                        }
                        new.unmap(0.into(), va.into_usize() / PGSIZE, true);
                        return Err("uvmcopy: fail");
                    }
                }
                None => panic!("uvmcopy: pte should exist"),
            }
            va += PGSIZE;
        }
        Ok(())
    }

    /// Mark a PTE non-user-accessible; used by exec for the stack guard
    /// page.
    pub fn clear(&self, va: UVAddr) {
        match self.walk(va, false) {
            Some(pte) => pte.rm_u(),
            None => panic!("uvmclear"),
        }
    }

    /// # Safety
    /// `T`'s layout must be fixed (no padding-sensitive reads).
    pub unsafe fn copyout<T: ?Sized>(&self, mut dstva: UVAddr, src: &T) -> Result<(), ()> {
        let src = as_bytes(src);
        let mut len = src.len();
        let mut offset = 0;
        while len > 0 {
            let mut va0 = dstva;
            va0.rounddown();
            let pa0 = self.page_table.walkaddr(va0).ok_or(())?;
            let n = core::cmp::min(PGSIZE - (dstva - va0), len);
            let dst = core::slice::from_raw_parts_mut((pa0.into_usize() + (dstva - va0)) as *mut u8, n);
            dst.copy_from_slice(&src[offset..(offset + n)]);
            len -= n;
            offset += n;
            dstva = va0 + PGSIZE;
        }
        Ok(())
    }

    /// # Safety
    /// `T`'s layout must be fixed.
    pub unsafe fn copyin<T: ?Sized>(&self, dst: &mut T, mut srcva: UVAddr) -> Result<(), ()> {
        let dst = as_bytes_mut(dst);
        let mut len = dst.len();
        let mut offset = 0;
        while len > 0 {
            let mut va0 = srcva;
            va0.rounddown();
            let pa0 = self.page_table.walkaddr(va0).ok_or(())?;
            let n = core::cmp::min(PGSIZE - (srcva - va0), len);
            let src = core::slice::from_raw_parts((pa0.into_usize() + (srcva - va0)) as *const u8, n);
            dst[offset..(offset + n)].copy_from_slice(src);
            len -= n;
            offset += n;
            srcva = va0 + PGSIZE;
        }
        Ok(())
    }

    /// Copy a NUL-terminated string from user space into `dst`.
    pub fn copyinstr(&self, dst: &mut [u8], mut srcva: UVAddr) -> Result<(), &'static str> {
        let mut max = dst.len();
        let mut offset = 0;
        while max > 0 {
            let mut va0 = srcva;
            va0.rounddown();
            let pa0 = self.walkaddr(va0).ok_or("virtual address not found")?;
            let n = core::cmp::min(PGSIZE - (srcva - va0), max);
            let src = unsafe { core::slice::from_raw_parts((pa0.into_usize() + (srcva - va0)) as *const u8, n) };
            match src.iter().position(|c| *c == 0) {
                Some(i) => {
                    dst[offset..(offset + i + 1)].copy_from_slice(&src[..i + 1]);
                    return Ok(());
                }
                None => {
                    dst[offset..(offset + n)].copy_from_slice(src);
                    max -= n;
                    offset += n;
                    srcva = va0 + PGSIZE;
                }
            }
        }
        Err("not enough space")
    }

    /// Tear down a process's page table: the trampoline/trapframe
    /// mappings (unmapped but not freed, since they're shared or owned
    /// elsewhere) and then everything else.
    pub fn proc_uvmfree(&mut self, size: usize) {
        self.unmap(TRAMPOLINE.into(), 1, false);
        self.unmap(TRAPFRAME.into(), 1, false);
        self.free(size);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Kvm {
    page_table: PageTable<KVAddr>,
}

impl Deref for Kvm {
    type Target = PageTable<KVAddr>;
    fn deref(&self) -> &Self::Target {
        &self.page_table
    }
}
impl DerefMut for Kvm {
    fn deref_mut(&mut self) -> &mut PageTable<KVAddr> {
        &mut self.page_table
    }
}

impl Kvm {
    pub fn new() -> Option<Self> {
        Some(Self {
            page_table: PageTable::new()?,
        })
    }

    /// Add a boot-time mapping to the kernel page table. Does not flush
    /// the TLB or enable paging.
    pub fn map(&self, va: KVAddr, pa: PAddr, size: usize, perm: PteFlags) {
        if self.page_table.mappages(va, pa, size, perm).is_err() {
            panic!("kvmmap");
        }
    }

    unsafe fn make(&self) {
        self.map(UART0.into(), UART0.into(), PGSIZE, PteFlags::RW);
        self.map(VIRTIO0.into(), VIRTIO0.into(), PGSIZE, PteFlags::RW);
        self.map(PLIC.into(), PLIC.into(), 0x400_000, PteFlags::RW);

        self.map(KERNBASE.into(), KERNBASE.into(), (etext as usize) - KERNBASE, PteFlags::RX);

        self.map(
            (etext as usize).into(),
            (etext as usize).into(),
            PHYSTOP - (etext as usize),
            PteFlags::RW,
        );

        self.map(TRAMPOLINE.into(), (trampoline as usize).into(), PGSIZE, PteFlags::RX);

        procs().proc_mapstacks();
    }
}

/// Build the single kernel page table. Called once at boot, before
/// paging is enabled.
pub fn kinit() {
    KVM.set(Kvm::new().expect("kvmmake: out of memory")).unwrap_or_else(|_| unreachable!());
    unsafe { KVM.get().unwrap().make() };
}

/// Switch this hart onto the kernel page table and turn paging on.
pub fn kinithart() {
    w_satp(KVM.get().unwrap().as_satp());
    sfence_vma();
}
