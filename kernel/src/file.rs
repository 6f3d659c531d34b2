//! The kernel-wide open file table and the `File` handle each process's
//! descriptor table points into. A `VFile` is a tagged union over the
//! three things a descriptor can actually mean: a device, a regular
//! inode/directory, or a pipe end.
use crate::fcntl::OMode;
use crate::fs::{create, IData, Inode, Path, BSIZE};
use crate::log::log;
use crate::param::{MAXOPBLOCKS, NDEV, NFILE};
use crate::pipe::Pipe;
use crate::proc::{CopyInOut, CPUS};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::stat::{IType, Stat};
use crate::sync::OnceLock;
use crate::vm::VirtAddr;
use alloc::sync::Arc;
use array_macro::array;
use core::cell::UnsafeCell;
use core::ops::Deref;

pub static DEVSW: DevSW = DevSW::new();
pub static FTABLE: Mutex<[Option<Arc<VFile>>; NFILE]> =
    Mutex::new(array![_ => None; NFILE], "ftable");

#[derive(Default, Clone)]
pub struct File {
    f: Option<Arc<VFile>>,
    readable: bool,
    writable: bool,
}

#[derive(Debug)]
pub enum VFile {
    Device(DNod),
    Inode(FNod),
    Pipe(Pipe),
    None,
}

/// A file descriptor bound to a character device.
#[derive(Debug)]
pub struct DNod {
    driver: &'static dyn Device,
    ip: Inode,
}

pub trait Device: Send + Sync {
    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize, ()>;
    fn write(&self, src: VirtAddr, n: usize) -> Result<usize, ()>;
    fn major(&self) -> Major;
}

impl core::fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Device fn {:?}", self.major())
    }
}

impl Deref for DNod {
    type Target = dyn Device;
    fn deref(&self) -> &Self::Target {
        self.driver
    }
}

/// A file descriptor bound to a regular file or directory inode, with its
/// own read/write cursor.
#[derive(Debug)]
pub struct FNod {
    off: UnsafeCell<u32>,
    ip: Inode,
}

impl FNod {
    pub fn new(ip: Inode) -> Self {
        Self {
            off: UnsafeCell::new(0),
            ip,
        }
    }

    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize, ()> {
        let mut ip = self.ip.lock();
        let off = unsafe { &mut *self.off.get() };
        match ip.read(dst, *off, n) {
            Ok(r) => {
                *off += r as u32;
                Ok(r)
            }
            Err(_) => Err(()),
        }
    }

    fn write(&self, src: VirtAddr, n: usize) -> Result<usize, ()> {
        // Write a few blocks at a time so one call never exceeds a log
        // transaction's reserved size (inode block, indirect block,
        // allocation blocks, plus slop for unaligned writes).
        let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;
        let mut i: usize = 0;
        let off = unsafe { &mut *self.off.get() };
        while i < n {
            let mut r: usize = 0;
            let n1 = core::cmp::min(n - i, max);

            {
                log().begin_op();
                let mut guard = self.ip.lock();
                if let Ok(wbytes) = guard.write(src + i, *off, n1) {
                    *off += wbytes as u32;
                    r = wbytes;
                }
                log().end_op();
            }

            if r != n1 {
                break;
            }
            i += r;
        }

        if i == n {
            Ok(n)
        } else {
            Err(())
        }
    }
}

impl VFile {
    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize, ()> {
        match self {
            VFile::Device(d) => d.read(dst, n),
            VFile::Inode(f) => f.read(dst, n),
            VFile::Pipe(p) => p.read(dst, n),
            VFile::None => panic!("file read"),
        }
    }

    fn write(&self, src: VirtAddr, n: usize) -> Result<usize, ()> {
        match self {
            VFile::Device(d) => d.write(src, n),
            VFile::Inode(f) => f.write(src, n),
            VFile::Pipe(p) => p.write(src, n),
            VFile::None => panic!("file write"),
        }
    }

    /// Copy this file's metadata out to the user `stat` struct at `addr`.
    pub fn stat(&self, addr: VirtAddr) -> Result<(), ()> {
        let p = CPUS.my_proc().unwrap();
        let mut stat: Stat = Stat {
            dev: 0,
            ino: 0,
            itype: IType::None as u32,
            nlink: 0,
            size: 0,
        };
        match self {
            VFile::Device(DNod { driver: _, ref ip }) | VFile::Inode(FNod { off: _, ref ip }) => {
                ip.lock().stat(&mut stat);
                unsafe { p.either_copyout(addr, &stat) }
            }
            _ => Err(()),
        }
    }
}

impl File {
    pub fn read(&self, dst: VirtAddr, n: usize) -> Result<usize, ()> {
        if !self.readable {
            return Err(());
        }
        self.f.as_ref().unwrap().read(dst, n)
    }

    pub fn write(&self, src: VirtAddr, n: usize) -> Result<usize, ()> {
        if !self.writable {
            return Err(());
        }
        self.f.as_ref().unwrap().write(src, n)
    }
}

impl Deref for File {
    type Target = Arc<VFile>;
    fn deref(&self) -> &Self::Target {
        self.f.as_ref().unwrap()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let f = self.f.take().unwrap();
        if Arc::strong_count(&f) < 2 {
            panic!("file drop");
        }

        if Arc::strong_count(&f) == 2 {
            let mut guard = FTABLE.lock();
            for slot in guard.iter_mut() {
                if matches!(slot, Some(vf) if Arc::ptr_eq(&f, vf)) {
                    slot.take();
                }
            }
        }

        if let Ok(inner) = Arc::try_unwrap(f) {
            if let VFile::Inode(FNod { off: _, ip }) | VFile::Device(DNod { driver: _, ip }) = inner {
                log().begin_op();
                drop(ip);
                log().end_op();
            }
        }
    }
}

/// Source a freshly-allocated `File` is backed by.
pub enum FType<'a> {
    Node(&'a Path),
    Pipe(Pipe),
}

impl Mutex<[Option<Arc<VFile>>; NFILE]> {
    /// Allocate a file structure. Must already be inside a transaction
    /// when `ftype` is `FType::Node`.
    pub fn alloc(&self, opts: OMode, ftype: FType<'_>) -> Option<File> {
        let inner: Arc<VFile> = Arc::new(match ftype {
            FType::Node(path) => {
                let ip: Inode;
                let ip_guard: SleepLockGuard<'_, IData>;

                if opts.is_create() {
                    ip = create(path, IType::File, 0, 0)?;
                    ip_guard = ip.lock();
                } else {
                    (_, ip) = path.namei()?;
                    ip_guard = ip.lock();
                    if ip_guard.itype() == IType::Dir && !opts.is_rdonly() {
                        return None;
                    }
                }

                match ip_guard.itype() {
                    IType::Device
                        if ip_guard.major() != Major::Invalid && ip_guard.major() != Major::Null =>
                    {
                        let driver = DEVSW.get(ip_guard.major())?;
                        SleepLock::unlock(ip_guard);
                        VFile::Device(DNod { driver, ip })
                    }
                    IType::Dir | IType::File => {
                        if opts.is_trunc() && ip_guard.itype() == IType::File {
                            ip_guard.trunc();
                        }
                        SleepLock::unlock(ip_guard);
                        VFile::Inode(FNod::new(ip))
                    }
                    _ => return None,
                }
            }
            FType::Pipe(pi) => VFile::Pipe(pi),
        });

        let mut guard = self.lock();
        let slot = guard.iter_mut().find(|f| f.is_none())?;
        slot.replace(inner);
        Some(File {
            f: slot.clone(),
            readable: opts.is_read(),
            writable: opts.is_write(),
        })
    }
}

pub struct DevSW {
    table: [OnceLock<&'static dyn Device>; NDEV],
}

impl core::fmt::Debug for DevSW {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.table.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            match v.get() {
                Some(v) => write!(f, "{:?}", v)?,
                None => write!(f, "None")?,
            }
        }
        write!(f, "]")
    }
}

impl DevSW {
    pub const fn new() -> Self {
        Self {
            table: array![_ => OnceLock::new(); NDEV],
        }
    }

    pub fn set(&self, devnum: Major, dev: &'static dyn Device) -> Result<(), &'static dyn Device> {
        self.table[devnum as usize].set(dev)
    }

    pub fn get(&self, devnum: Major) -> Option<&'static dyn Device> {
        self.table[devnum as usize].get().copied()
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Major {
    Null = 0,
    Console = 1,
    Invalid,
}

impl Default for Major {
    fn default() -> Self {
        Self::Null
    }
}

impl Major {
    pub fn from_u16(bits: u16) -> Major {
        match bits {
            0 => Major::Null,
            1 => Major::Console,
            _ => Major::Invalid,
        }
    }
}
