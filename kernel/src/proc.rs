//! Process table, per-CPU state, and the sleep/wakeup scheduler that the
//! storage stack suspends into. A task may only block by calling
//! [`Process::sleep`], which is always reached from a small, known set of
//! wait points (see SPEC_FULL.md §5); interrupt handlers must never reach
//! it and instead only call [`Procs::wakeup`].
use crate::file::File;
use crate::fs::{self, Inode};
use crate::memlayout::{kstack, TRAMPOLINE, TRAPFRAME};
use crate::riscv::{intr_get, intr_off, intr_on, PGSIZE};
use crate::spinlock::{Mutex, MutexGuard};
use crate::swtch::swtch;
use crate::sync::OnceLock;
use crate::trap::usertrap_ret;
use crate::vm::{Page, PageAllocator, PteFlags, UVAddr, Uvm, VirtAddr, KVM};
use crate::{param::*, print, println, trampoline::trampoline};
use alloc::string::String;
use alloc::vec::Vec;
use alloc::{boxed::Box, sync::Arc};
use array_macro::array;
use core::arch::asm;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::{cell::UnsafeCell, ptr::NonNull};
use zerocopy::{AsBytes, FromBytes};

pub static CPUS: Cpus = Cpus::new();
pub static PROCS: OnceLock<Procs> = OnceLock::new();
pub static INITPROC: OnceLock<Arc<Proc>> = OnceLock::new();

pub fn procs() -> &'static Procs {
    PROCS.get_or_init(Procs::new)
}

/// Saved callee-saved registers for a kernel context switch (see swtch.rs).
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

pub struct Cpus([UnsafeCell<Cpu>; NCPU]);
unsafe impl Sync for Cpus {}

/// Per-hart scheduler state.
pub struct Cpu {
    pub proc: Option<Arc<Proc>>,
    pub context: Context,
    noff: UnsafeCell<isize>, // depth of nested intr_lock()
    intena: bool,            // were interrupts enabled before the outermost intr_lock()?
}

/// RAII interrupt-disable, nestable per hart. When the last `IntrLock` on a
/// given hart drops, interrupts are restored to whatever they were before
/// the first one was taken — never unconditionally re-enabled.
pub struct IntrLock<'a> {
    cpu: &'a Cpu,
}

impl Drop for IntrLock<'_> {
    fn drop(&mut self) {
        unsafe { self.cpu.unlock() }
    }
}

/// Saved user register file plus the handful of fields `uservec`/`userret`
/// (trampoline.rs) need to cross the user/kernel boundary. Lives in its own
/// page just below TRAMPOLINE in every user page table.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Trapframe {
    pub kernel_satp: usize,
    pub kernel_sp: usize,
    pub kernel_trap: usize,
    pub epc: usize,
    pub kernel_hartid: usize,
    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
}

pub struct Procs {
    pub pool: [Arc<Proc>; NPROC],
    pub wait_lock: Mutex<()>,
}
unsafe impl Sync for Procs {}

pub struct Proc {
    // lock must be held when touching inner.
    pub inner: Mutex<ProcInner>,
    // lock must be held when touching this.
    pub parent: UnsafeCell<Option<Arc<Proc>>>,
    // private to the owning process; no lock needed.
    pub data: UnsafeCell<ProcData>,
}
unsafe impl Sync for Proc {}

pub trait Process {
    fn free_proc(&self, guard: MutexGuard<'_, ProcInner>);
    fn proc_uvmcreate(&self) -> Option<Box<Uvm>>;
    fn sleep<'a, T>(&self, chan: usize, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T>;
    fn grow_proc(&self, n: isize) -> Result<(), ()>;
    fn fork(&self) -> Result<usize, ()>;
    fn exit(&self, status: i32) -> !;
    fn wait(&self, addr: UVAddr) -> Option<usize>;
    fn yielding(&self);
}

/// Move bytes to/from a location that may be a user virtual address or a
/// plain kernel pointer, so file-system code does not need two versions of
/// every read/write path.
pub trait CopyInOut {
    fn either_copyout<T: AsBytes + ?Sized>(&self, dst: VirtAddr, src: &T) -> Result<(), ()>;
    fn either_copyin<T: AsBytes + FromBytes + ?Sized>(
        &self,
        dst: &mut T,
        src: VirtAddr,
    ) -> Result<(), ()>;
}

#[derive(Clone, Copy, Debug)]
pub struct ProcInner {
    pub state: ProcState,
    pub chan: usize,
    pub killed: bool,
    pub xstate: i32,
    pub pid: PId,
}

pub struct ProcData {
    pub kstack: usize,
    pub sz: usize,
    pub uvm: Option<Box<Uvm>>,
    pub trapframe: Option<NonNull<Trapframe>>,
    pub context: Context,
    pub name: String,
    pub ofile: [Option<Arc<File>>; NOFILE],
    pub cwd: Option<Inode>,
}
unsafe impl Sync for ProcData {}
unsafe impl Send for ProcData {}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PId(usize);

impl PId {
    fn alloc() -> Self {
        static NEXTID: AtomicUsize = AtomicUsize::new(1);
        PId(NEXTID.fetch_add(1, Ordering::Relaxed))
    }
}

// First user program, hand-assembled: exec("/init", argv) then loop.
static INITCODE: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00, 0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

impl Cpus {
    const fn new() -> Self {
        Self(array![_ => UnsafeCell::new(Cpu::new()); NCPU])
    }

    /// Must be called with interrupts disabled so a timer interrupt can't
    /// migrate this task to another hart mid-read.
    #[inline]
    pub unsafe fn cpu_id() -> usize {
        let id;
        asm!("mv {0}, tp", out(reg) id);
        id
    }

    pub unsafe fn my_cpu(&self) -> &mut Cpu {
        let id = Self::cpu_id();
        &mut *self.0[id].get()
    }

    /// Disable interrupts on this hart; restored once every `IntrLock`
    /// taken on this hart has dropped.
    pub fn intr_lock(&self) -> IntrLock<'_> {
        let old = intr_get();
        intr_off();
        unsafe { self.my_cpu().lock(old) }
    }

    pub fn my_proc(&self) -> Option<&Arc<Proc>> {
        let _intr_lock = self.intr_lock();
        unsafe { (*self.my_cpu()).proc.as_ref() }
    }

    /// Only safe to call from `Mutex::force_unlock`.
    pub unsafe fn intr_unlock(&self) {
        self.my_cpu().unlock();
    }
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::new(),
            noff: UnsafeCell::new(0),
            intena: false,
        }
    }

    /// Interrupts must already be disabled.
    unsafe fn lock(&mut self, old: bool) -> IntrLock<'_> {
        if *self.noff.get() == 0 {
            self.intena = old;
        }
        *self.noff.get() += 1;
        IntrLock { cpu: self }
    }

    /// Interrupts must already be disabled.
    unsafe fn unlock(&self) {
        assert!(!intr_get(), "cpu unlock - interruptible");
        let noff = self.noff.get();
        assert!(*noff >= 1, "cpu unlock: not locked");
        *noff -= 1;
        if *noff == 0 && self.intena {
            intr_on()
        }
    }

    /// Switch into the scheduler. Caller must hold exactly the proc's own
    /// lock and must have already updated `state`.
    unsafe fn sched<'a>(
        &mut self,
        guard: MutexGuard<'a, ProcInner>,
        ctx: &mut Context,
    ) -> MutexGuard<'a, ProcInner> {
        assert!(guard.holding(), "sched: proc lock not held");
        assert!(*self.noff.get() == 1, "sched: holding multiple locks");
        assert!(guard.state != ProcState::Running, "sched: proc running");
        assert!(!intr_get(), "sched: interruptible");

        let intena = self.intena;
        swtch(ctx, &self.context);
        self.intena = intena;

        guard
    }
}

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        Self {
            pool: core::iter::repeat_with(|| Arc::new(Proc::new()))
                .take(NPROC)
                .collect::<Vec<_>>()
                .try_into()
                .unwrap_or_else(|_| unreachable!()),
            wait_lock: Mutex::new((), "wait_lock"),
        }
    }

    /// Allocate a kernel stack page for every process, mapped high in
    /// memory with an unmapped guard page below it.
    pub unsafe fn proc_mapstacks(&self) {
        use crate::vm::Stack;
        for (i, _) in self.pool.iter().enumerate() {
            let pa = Stack::try_new_zeroed().expect("proc_mapstacks: out of memory");
            let va = kstack(i).into();
            KVM.get()
                .expect("kvm not initialized")
                .map(va, pa.into(), PGSIZE, PteFlags::RW);
        }
    }

    /// Scan for an `Unused` slot, initialize it enough to run in the
    /// kernel, and return it with its lock held.
    pub fn alloc_proc(&self) -> Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> {
        for p in self.pool.iter() {
            let mut lock = p.inner.lock();
            if lock.state != ProcState::Unused {
                continue;
            }
            lock.pid = PId::alloc();
            lock.state = ProcState::Used;

            let data = unsafe { &mut *p.data.get() };
            match Page::try_new_zeroed().and_then(|t| NonNull::new(t as *mut Trapframe)) {
                Some(tf) => data.trapframe.replace(tf),
                None => {
                    p.free_proc(lock);
                    return None;
                }
            };

            match p.proc_uvmcreate() {
                Some(uvm) => data.uvm.replace(uvm),
                None => {
                    p.free_proc(lock);
                    return None;
                }
            };

            data.context = Context::new();
            data.context.ra = fork_ret as usize;
            data.context.sp = data.kstack + PGSIZE;
            return Some((p, lock));
        }
        None
    }

    /// Reassign `p`'s children to init. Caller must hold `wait_lock`.
    unsafe fn reparent(&self, p: &Arc<Proc>) {
        for pp in self.pool.iter() {
            if let Some(parent) = (*pp.parent.get()).as_ref() {
                if Arc::ptr_eq(parent, p) {
                    let initproc = INITPROC.get().expect("init not set");
                    (*pp.parent.get()).replace(Arc::clone(initproc));
                    self.wakeup(Arc::as_ptr(initproc) as usize);
                }
            }
        }
    }

    /// Wake every sleeper on `chan`. Must not be called while holding any
    /// process's own lock.
    pub fn wakeup(&self, chan: usize) {
        for p in self.pool.iter() {
            if CPUS.my_proc().map_or(true, |me| !Arc::ptr_eq(p, me)) {
                let mut guard = p.inner.lock();
                if guard.state == ProcState::Sleeping && guard.chan == chan {
                    guard.state = ProcState::Runnable;
                }
            }
        }
    }

    /// Mark `pid` killed; it will notice and exit the next time it returns
    /// to user space, or immediately if currently sleeping.
    pub fn kill(&self, pid: usize) -> Result<(), ()> {
        for p in self.pool.iter() {
            let mut guard = p.inner.lock();
            if guard.pid.0 == pid {
                guard.killed = true;
                if guard.state == ProcState::Sleeping {
                    guard.state = ProcState::Runnable;
                }
                return Ok(());
            }
        }
        Err(())
    }
}

pub fn init() {
    for (i, proc) in procs().pool.iter().enumerate() {
        unsafe {
            (*proc.data.get()).kstack = kstack(i);
        }
    }
}

impl Default for Proc {
    fn default() -> Self {
        Self::new()
    }
}

impl Proc {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProcInner::new(), "proc"),
            parent: UnsafeCell::new(None),
            data: UnsafeCell::new(ProcData::new()),
        }
    }

    pub fn pid(&self) -> usize {
        self.inner.lock().pid.0
    }

    /// Borrow this process's private data. Safe as long as the caller
    /// is the process itself (true of every syscall body, since they
    /// only ever run on `CPUS.my_proc()`).
    #[allow(clippy::mut_from_ref)]
    pub fn data(&self) -> &ProcData {
        unsafe { &*self.data.get() }
    }

    pub fn data_mut(&self) -> &mut ProcData {
        unsafe { &mut *self.data.get() }
    }
}

impl Process for Arc<Proc> {
    fn free_proc(&self, mut guard: MutexGuard<'_, ProcInner>) {
        let data = unsafe { &mut *self.data.get() };
        if let Some(tf) = data.trapframe.take() {
            unsafe { drop(Box::from_raw(tf.as_ptr())) }
        }
        if let Some(mut uvm) = data.uvm.take() {
            uvm.proc_uvmfree(data.sz);
        }
        data.sz = 0;
        guard.pid = PId(0);
        unsafe {
            (*self.parent.get()).take();
        }
        data.name.clear();
        guard.chan = 0;
        guard.killed = false;
        guard.xstate = 0;
        guard.state = ProcState::Unused;
    }

    fn proc_uvmcreate(&self) -> Option<Box<Uvm>> {
        let mut uvm = Uvm::create()?;

        // Trampoline: supervisor-only, so no PTE_U.
        if uvm
            .mappages(
                TRAMPOLINE.into(),
                (trampoline as usize).into(),
                PGSIZE,
                PteFlags::RX,
            )
            .is_err()
        {
            uvm.free(0);
            return None;
        }

        let tf_pa = unsafe { (*self.data.get()).trapframe.unwrap().as_ptr() as usize };
        if uvm
            .mappages(TRAPFRAME.into(), tf_pa.into(), PGSIZE, PteFlags::RW)
            .is_err()
        {
            uvm.unmap(TRAMPOLINE.into(), 1, false);
            uvm.free(0);
            return None;
        }

        Some(uvm)
    }

    fn sleep<'a, T>(&self, chan: usize, mutex_guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        // Take our own lock first so no wakeup can be missed between
        // releasing `mutex_guard` and marking ourselves asleep.
        let mutex;
        let mut lock = self.inner.lock();
        mutex = Mutex::unlock(mutex_guard);

        lock.chan = chan;
        lock.state = ProcState::Sleeping;

        unsafe {
            lock = CPUS.my_cpu().sched(lock, &mut (*self.data.get()).context);
        }

        lock.chan = 0;
        drop(lock);
        mutex.lock()
    }

    fn grow_proc(&self, n: isize) -> Result<(), ()> {
        let data = unsafe { &mut *self.data.get() };
        let mut sz = data.sz;
        let uvm = data.uvm.as_mut().unwrap();
        if n > 0 {
            sz = uvm.alloc(sz, sz + n as usize).ok_or(())?;
        } else if n < 0 {
            sz = uvm.dealloc(sz, (sz as isize + n) as usize);
        }
        data.sz = sz;
        Ok(())
    }

    fn fork(&self) -> Result<usize, ()> {
        let data = unsafe { &mut *self.data.get() };
        let (np, np_guard) = procs().alloc_proc().ok_or(())?;
        let ndata = unsafe { &mut *np.data.get() };

        let uvm = data.uvm.as_mut().unwrap();
        let nuvm = ndata.uvm.as_mut().unwrap();
        if uvm.copy(nuvm, data.sz).is_err() {
            np.free_proc(np_guard);
            return Err(());
        }
        ndata.sz = data.sz;

        let tf = unsafe { data.trapframe.unwrap().as_mut() };
        let ntf = unsafe { ndata.trapframe.unwrap().as_mut() };
        *ntf = *tf;
        ntf.a0 = 0; // fork returns 0 in the child

        ndata.ofile.clone_from_slice(&data.ofile);
        ndata.cwd = data.cwd.as_ref().map(Inode::dup);
        ndata.name.push_str(&data.name);

        let pid = np_guard.pid;
        Mutex::unlock(np_guard);

        {
            let _wait_lock = procs().wait_lock.lock();
            unsafe {
                (*np.parent.get()).replace(self.clone());
            }
        }

        np.inner.lock().state = ProcState::Runnable;
        Ok(pid.0)
    }

    fn exit(&self, status: i32) -> ! {
        assert!(
            !Arc::ptr_eq(self, INITPROC.get().expect("init not set")),
            "init exiting"
        );

        let data = unsafe { &mut *self.data.get() };
        for fd in data.ofile.iter_mut() {
            fd.take(); // dropping File runs fileclose, possibly inside a transaction
        }
        if let Some(cwd) = data.cwd.take() {
            crate::log::log().begin_op();
            drop(cwd);
            crate::log::log().end_op();
        }

        let mut proc_guard;
        {
            let _wait_guard = procs().wait_lock.lock();
            unsafe { procs().reparent(self) };

            let pp = unsafe { (*self.parent.get()).as_ref().unwrap().clone() };
            procs().wakeup(Arc::as_ptr(&pp) as usize);

            proc_guard = self.inner.lock();
            proc_guard.xstate = status;
            proc_guard.state = ProcState::Zombie;
        }

        unsafe {
            CPUS.my_cpu().sched(proc_guard, &mut data.context);
        }
        unreachable!("zombie exit resumed");
    }

    fn wait(&self, addr: UVAddr) -> Option<usize> {
        loop {
            let wait_guard = procs().wait_lock.lock();
            let mut havekids = false;
            for np in procs().pool.iter() {
                let is_child =
                    unsafe { (*np.parent.get()).as_ref().map_or(false, |pp| Arc::ptr_eq(pp, self)) };
                if !is_child {
                    continue;
                }
                let np_guard = np.inner.lock();
                havekids = true;
                if np_guard.state == ProcState::Zombie {
                    let pid = np_guard.pid.0;
                    let np_data = unsafe { &mut *np.data.get() };
                    if np_data
                        .uvm
                        .as_mut()
                        .unwrap()
                        .copyout(addr, &np_guard.xstate)
                        .is_err()
                    {
                        np.free_proc(np_guard);
                        return None;
                    }
                    np.free_proc(np_guard);
                    return Some(pid);
                }
            }

            if !havekids || self.inner.lock().killed {
                return None;
            }

            self.sleep(Arc::as_ptr(self) as usize, wait_guard);
        }
    }

    fn yielding(&self) {
        let mut guard = self.inner.lock();
        guard.state = ProcState::Runnable;
        unsafe {
            CPUS.my_cpu().sched(guard, &mut (*self.data.get()).context);
        }
    }
}

impl CopyInOut for Arc<Proc> {
    fn either_copyout<T: AsBytes + ?Sized>(&self, dst: VirtAddr, src: &T) -> Result<(), ()> {
        match dst {
            VirtAddr::User(addr) => {
                let uvm = unsafe { (*self.data.get()).uvm.as_mut().unwrap() };
                uvm.copyout(addr.into(), src)
            }
            VirtAddr::Kernel(addr) | VirtAddr::Physical(addr) => {
                let src = src.as_bytes();
                let dst = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, src.len()) };
                dst.copy_from_slice(src);
                Ok(())
            }
        }
    }

    fn either_copyin<T: AsBytes + FromBytes + ?Sized>(
        &self,
        dst: &mut T,
        src: VirtAddr,
    ) -> Result<(), ()> {
        match src {
            VirtAddr::User(addr) => {
                let uvm = unsafe { (*self.data.get()).uvm.as_mut().unwrap() };
                uvm.copyin(dst, addr.into())
            }
            VirtAddr::Kernel(addr) | VirtAddr::Physical(addr) => {
                let dst = dst.as_bytes_mut();
                let src = unsafe { core::slice::from_raw_parts(addr as *const u8, dst.len()) };
                dst.copy_from_slice(src);
                Ok(())
            }
        }
    }
}

/// Set up the very first user process.
pub fn user_init() {
    let (p, mut guard) = procs().alloc_proc().expect("user_init: out of procs");
    INITPROC.set(p.clone()).unwrap_or_else(|_| panic!("user_init called twice"));
    unsafe {
        let data = &mut *p.data.get();
        data.uvm.as_mut().unwrap().init(&INITCODE);
        data.sz = PGSIZE;

        let tf = data.trapframe.unwrap().as_mut();
        tf.epc = 0;
        tf.sp = PGSIZE;

        data.name.push_str("initcode");
        guard.state = ProcState::Runnable;
    }
}

impl ProcInner {
    pub const fn new() -> Self {
        Self {
            state: ProcState::Unused,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: PId(0),
        }
    }
}

impl Default for ProcInner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcData {
    pub fn new() -> Self {
        Self {
            kstack: 0,
            sz: 0,
            uvm: None,
            trapframe: None,
            context: Context::new(),
            name: String::new(),
            ofile: array![_ => None; NOFILE],
            cwd: None,
        }
    }
}

impl Default for ProcData {
    fn default() -> Self {
        Self::new()
    }
}

/// Round-robin scheduler: each hart loops forever looking for a runnable
/// process, switches into it, and reclaims control when that process
/// itself calls back into the scheduler (yield, sleep, or exit).
pub fn scheduler() -> ! {
    let c = unsafe { CPUS.my_cpu() };
    loop {
        intr_on(); // avoid a deadlock if every process is sleeping

        for p in procs().pool.iter() {
            let mut guard = p.inner.lock();
            if guard.state == ProcState::Runnable {
                guard.state = ProcState::Running;
                c.proc = Some(p.clone());
                unsafe {
                    guard = CPUS.my_cpu().sched(guard, &mut (*p.data.get()).context);
                }
                c.proc = None;
            }
            drop(guard);
        }
    }
}

/// A fork child's first scheduling lands here.
pub unsafe extern "C" fn fork_ret() -> ! {
    static mut FIRST: bool = true;

    CPUS.my_proc().unwrap().inner.force_unlock();

    if FIRST {
        // File-system init must run in process context (it calls sleep),
        // so it cannot run from main().
        FIRST = false;
        fs::init(ROOTDEV);
    }
    usertrap_ret()
}

/// `^P` on the console dumps a process listing; no lock, since a stuck
/// machine that can't take the lock shouldn't be stuck further by this.
pub fn procdump() {
    println!();
    for proc in procs().pool.iter() {
        let inner = unsafe { proc.inner.get_mut() };
        let data = unsafe { &*proc.data.get() };
        if inner.state != ProcState::Unused {
            println!("{:?} {:?} {}", inner.pid, inner.state, data.name);
        }
    }
}
