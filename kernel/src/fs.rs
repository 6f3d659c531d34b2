//! On-disk file system: five layers stacked in one module, in the order
//! data actually flows.
//!   - Blocks: the free-block bitmap allocator (`balloc`/`bfree`).
//!   - Log: crash recovery for multi-block updates — see `log.rs`.
//!   - Files: inode allocation, `read`/`write`, metadata (`IData`/`MInode`).
//!   - Directories: a directory is just a file of `DirEnt`s.
//!   - Names: path lookup (`Path::namei`/`nameiparent`).
//!
//! Syscall-level operations (`open`, `unlink`, ...) live in `sysfile.rs`;
//! this module only provides the primitives they're built from.
use crate::bio::BCACHE;
use crate::file::Major;
use crate::log::log;
use crate::param::{NINODE, ROOTDEV};
use crate::proc::{CopyInOut, CPUS};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::stat::{IType, Stat};
use crate::sync::OnceLock;
use crate::vm::VirtAddr;
use crate::println;
use alloc::sync::Arc;
use array_macro::array;
use core::mem::size_of;
use core::ops::Deref;

pub const ROOTINO: u32 = 1;
pub const BSIZE: usize = 1024;

// One superblock per device; this kernel only ever mounts one disk.
pub static SB: OnceLock<SuperBlock> = OnceLock::new();

/// Disk layout: `[ boot | super | log | inodes | free bitmap | data ]`.
/// `mkfs` lays this out and writes the values below into block 1.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SuperBlock {
    pub magic: u32,
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

pub const FSMAGIC: u32 = 0x10203040;

pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>();
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// On-disk inode layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct DInode {
    itype: IType,
    major: Major,
    minor: u16,
    nlink: u16,
    size: u32,
    addrs: [u32; NDIRECT + 1],
}

pub const IPB: usize = BSIZE / core::mem::size_of::<DInode>();
pub const BPB: u32 = (BSIZE * 8) as u32;
pub const DIRSIZ: usize = 14;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DirEnt {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

impl SuperBlock {
    fn read(dev: u32) -> Self {
        let bp = BCACHE.read(dev, 1);
        *bp.align_to::<SuperBlock>().get(0).unwrap()
    }

    /// Block holding inode `i`.
    pub fn iblock(&self, i: u32) -> u32 {
        i / IPB as u32 + self.inodestart
    }

    /// Block of the free bitmap holding the bit for block `b`.
    pub fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}

pub fn init(dev: u32) {
    SB.set(SuperBlock::read(dev)).unwrap_or_else(|_| unreachable!());
    let sb = SB.get().unwrap();
    assert!(sb.magic == FSMAGIC, "invalid file system");
    log().init();
}

fn bzero(dev: u32, bno: u32) {
    let mut bp = BCACHE.read(dev, bno);
    bp.copy_from_slice(&[0; BSIZE]);
    log().write(bp);
}

// Blocks.

/// Allocate and zero a disk block.
fn balloc(dev: u32) -> u32 {
    let sb = SB.get().unwrap();
    for b in (0..sb.size).step_by(BPB as usize) {
        let mut bp = BCACHE.read(dev, sb.bblock(b));
        let mut bi = 0;
        while bi < BPB && b + bi < sb.size {
            let m = 1 << (bi % 8);
            if bp.get((bi / 8) as usize).unwrap() & m == 0 {
                *bp.get_mut((bi / 8) as usize).unwrap() |= m;
                log().write(bp);
                bzero(dev, b + bi);
                return b + bi;
            }
            bi += 1;
        }
    }
    unreachable!("balloc: out of blocks");
}

fn bfree(dev: u32, b: u32) {
    let sb = SB.get().unwrap();
    let mut bp = BCACHE.read(dev, sb.bblock(b));
    let bi = b % BPB;
    let m = 1 << (bi % 8);
    if bp.get((bi / 8) as usize).unwrap() & m == 0 {
        panic!("freeing free block");
    }
    *bp.get_mut((bi / 8) as usize).unwrap() &= !m;
    log().write(bp);
}

// Inodes.
//
// The in-memory inode table (`ITABLE`) hands out `Inode` handles whose
// `Arc` strong count tracks open references (open files, current
// directories). `MInode::lock` reads the on-disk inode the first time
// any handle locks it; `ITable::put` frees it once both the link count
// and the reference count have dropped to zero. All calls that can
// reach `ITable::put` must run inside a log transaction, since freeing
// an inode writes to disk.
pub static ITABLE: Mutex<[Option<Arc<MInode>>; NINODE]> = Mutex::new(array![_ => None; NINODE], "itable");

/// Handle into `ITABLE`; reference-counted, so cheap to `dup()` and pass
/// around. Dropping the last one recycles the table slot.
#[derive(Default, Clone, Debug)]
pub struct Inode {
    ip: Option<Arc<MInode>>,
}

#[derive(Debug)]
pub struct MInode {
    dev: u32,
    inum: u32,
    data: SleepLock<IData>,
}

#[derive(Debug, Default)]
pub struct IData {
    dev: u32,
    inum: u32,
    valid: bool,
    itype: IType,
    major: Major,
    minor: u16,
    nlink: u16,
    size: u32,
    addrs: [u32; NDIRECT + 1],
}

impl IData {
    fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            ..Default::default()
        }
    }

    pub fn itype(&self) -> IType {
        self.itype
    }

    pub fn major(&self) -> Major {
        self.major
    }

    /// Write this in-memory inode back to its on-disk slot. Call after
    /// every change to a field the disk copy carries. Caller holds the
    /// inode's sleep lock.
    fn update(&self) {
        let sb = SB.get().unwrap();
        let mut bp = BCACHE.read(self.dev, sb.iblock(self.inum));
        let dip = bp.align_to_mut::<DInode>().get_mut(self.inum as usize % IPB).unwrap();
        dip.itype = self.itype;
        dip.major = self.major;
        dip.minor = self.minor;
        dip.nlink = self.nlink;
        dip.size = self.size;
        dip.addrs.copy_from_slice(&self.addrs);
        log().write(bp);
    }

    /// Discard an inode's contents. Caller holds the sleep lock.
    pub fn trunc(&mut self) {
        for addr in self.addrs.iter_mut().take(NDIRECT) {
            if *addr > 0 {
                bfree(self.dev, *addr);
                *addr = 0;
            }
        }

        let naddr = self.addrs.get_mut(NDIRECT).unwrap();
        if *naddr > 0 {
            let bp = BCACHE.read(self.dev, *naddr);
            for &addr in bp.align_to::<u32>().iter() {
                if addr > 0 {
                    bfree(self.dev, addr);
                }
            }
            drop(bp);
            bfree(self.dev, *naddr);
            *naddr = 0;
        }
        self.size = 0;
        self.update();
    }

    /// Return the disk block address of the `bn`th block of this inode,
    /// allocating one if it doesn't exist yet.
    pub fn bmap(&mut self, bn: u32) -> Result<u32, &'static str> {
        let mut bn = bn as usize;

        if bn < NDIRECT {
            let mut addr = self.addrs[bn];
            if addr == 0 {
                addr = balloc(self.dev);
                self.addrs[bn] = addr;
            }
            return Ok(addr);
        }
        bn -= NDIRECT;

        if bn < NINDIRECT {
            let mut addr = self.addrs[NDIRECT];
            if addr == 0 {
                addr = balloc(self.dev);
                self.addrs[NDIRECT] = addr;
            }
            let mut bp = BCACHE.read(self.dev, addr);
            let a = bp.align_to_mut::<u32>();
            addr = a[bn];
            if addr == 0 {
                addr = balloc(self.dev);
                a[bn] = addr;
                log().write(bp);
            }
            return Ok(addr);
        }

        Err("bmap: out of range")
    }

    /// Copy this inode's metadata out to `st`. Caller holds the sleep lock.
    pub fn stat(&self, st: &mut Stat) {
        st.dev = self.dev;
        st.ino = self.inum;
        st.itype = self.itype as u32;
        st.nlink = self.nlink as u32;
        st.size = self.size as usize;
    }

    /// Caller holds the sleep lock. `dst` names a user or kernel address.
    pub fn read(&mut self, mut dst: VirtAddr, off: u32, mut n: usize) -> Result<usize, &'static str> {
        let mut tot = 0;
        let mut off = off as usize;

        if off > self.size as usize {
            return Err("start point beyond the end of the file");
        }
        if off + n > self.size as usize {
            n = self.size as usize - off;
        }

        while tot < n {
            let bp = BCACHE.read(self.dev, self.bmap((off / BSIZE) as u32)?);
            let m = core::cmp::min(n - tot, BSIZE - off % BSIZE);
            if unsafe {
                CPUS.my_proc()
                    .unwrap()
                    .either_copyout(dst, &bp[(off % BSIZE)..(off % BSIZE + m)])
                    .is_err()
            } {
                return Err("inode read: failed to copyout");
            }
            tot += m;
            off += m;
            dst += m;
        }
        Ok(tot)
    }

    /// Caller holds the sleep lock. Returns the number of bytes actually
    /// written; fewer than `n` means some error occurred partway.
    pub fn write(&mut self, mut src: VirtAddr, off: u32, n: usize) -> Result<usize, &'static str> {
        let mut tot = 0;
        let mut off = off as usize;

        if off > self.size as usize {
            return Err("inode write: off is more than inode size");
        }
        if off + n > MAXFILE * BSIZE {
            return Err("inode write: too large");
        }

        while tot < n {
            let mut bp = BCACHE.read(self.dev, self.bmap((off / BSIZE) as u32)?);
            let m = core::cmp::min(n - tot, BSIZE - off % BSIZE);
            if unsafe {
                CPUS.my_proc()
                    .unwrap()
                    .either_copyin(&mut bp[(off % BSIZE)..(off % BSIZE + m)], src)
                    .is_err()
            } {
                return Err("inode write: failed to copyin");
            }
            tot += m;
            off += m;
            src += m;
            log().write(bp);
        }

        if off > self.size as usize {
            self.size = off as u32;
        }

        // Write the inode back even if size didn't change: bmap() may
        // have allocated a new block and extended self.addrs[].
        self.update();

        Ok(tot)
    }

    // Directories.

    /// Look up `name` in this directory. On a hit, `poff` (if given) is
    /// set to the entry's byte offset.
    pub fn dirlookup(&mut self, name: &str, poff: Option<&mut u32>) -> Option<Inode> {
        let mut de: DirEnt = Default::default();
        if self.itype != IType::Dir {
            panic!("dirlookup not DIR");
        }

        for off in (0..self.size).step_by(size_of::<DirEnt>()) {
            self.read(VirtAddr::Kernel(&mut de as *mut _ as usize), off, size_of::<DirEnt>())
                .expect("dirlookup read");
            if de.inum == 0 {
                continue;
            }
            if name == core::str::from_utf8(&de.name).unwrap().trim_matches(char::from(0)) {
                if let Some(poff) = poff {
                    *poff = off;
                }
                return Some(ITABLE.get(self.dev, de.inum as u32));
            }
        }
        None
    }

    /// Append a new `(name, inum)` entry, reusing the first free slot.
    pub fn dirlink(&mut self, name: &str, inum: u32) -> Result<(), &'static str> {
        let mut de: DirEnt = Default::default();

        if self.dirlookup(name, None).is_some() {
            return Err("dirlink: the name already exists");
        }

        let mut write_off = self.size;
        for off in (0..self.size).step_by(size_of::<DirEnt>()) {
            self.read(VirtAddr::Kernel(&mut de as *mut _ as usize), off, size_of::<DirEnt>())
                .unwrap();
            if de.inum == 0 {
                write_off = off;
                break;
            }
        }

        let len = core::cmp::min(name.len(), DIRSIZ);
        de.name = [0; DIRSIZ];
        de.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        de.inum = inum as u16;
        self.write(VirtAddr::Kernel(&de as *const _ as usize), write_off, size_of::<DirEnt>())
            .unwrap();

        Ok(())
    }

    /// Is this directory empty apart from `.` and `..`?
    pub fn is_dir_empty(&mut self) -> bool {
        let mut de: DirEnt = Default::default();
        for off in ((2 * size_of::<DirEnt>() as u32)..self.size).step_by(size_of::<DirEnt>()) {
            if self
                .read(VirtAddr::Kernel(&mut de as *mut _ as usize), off, size_of::<DirEnt>())
                .is_err()
            {
                panic!("isdirempty: inode read");
            }
            if de.inum != 0 {
                return false;
            }
        }
        true
    }
}

impl MInode {
    fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            data: SleepLock::new(IData::new(dev, inum), "inode"),
        }
    }

    /// Lock the inode, reading it from disk the first time.
    pub fn lock(&self) -> SleepLockGuard<IData> {
        let sb = SB.get().unwrap();
        let mut guard = self.data.lock();
        if !guard.valid {
            let bp = BCACHE.read(self.dev, sb.iblock(self.inum));
            let dip = bp.align_to::<DInode>().get(self.inum as usize % IPB).unwrap();
            guard.itype = dip.itype;
            guard.major = dip.major;
            guard.minor = dip.minor;
            guard.nlink = dip.nlink;
            guard.size = dip.size;
            guard.addrs.copy_from_slice(&dip.addrs);
            drop(bp);
            guard.valid = true;
            guard.dev = self.dev;
            guard.inum = self.inum;
            if guard.itype == IType::None {
                panic!("ilock: no type");
            }
        }
        guard
    }
}

impl Inode {
    fn new(ip: Arc<MInode>) -> Self {
        Self { ip: Some(ip) }
    }

    /// Bump the reference count; returns a second handle to the same
    /// inode (`ip2 = ip1.dup()`).
    pub fn dup(&self) -> Self {
        Self { ip: self.ip.clone() }
    }

    pub fn is_some(&self) -> bool {
        self.ip.is_some()
    }
    pub fn is_none(&self) -> bool {
        self.ip.is_none()
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        if let Some(ip) = self.ip.take() {
            ITABLE.put(ip);
        }
    }
}

impl Deref for Inode {
    type Target = MInode;
    fn deref(&self) -> &Self::Target {
        self.ip.as_ref().unwrap()
    }
}

type ITable = Mutex<[Option<Arc<MInode>>; NINODE]>;

impl ITable {
    /// Allocate an inode of the given type on `dev`. Returns it unlocked.
    fn alloc(&self, dev: u32, itype: IType) -> Option<Inode> {
        let sb = SB.get().unwrap();
        for inum in 1..sb.ninodes {
            let mut bp = BCACHE.read(dev, sb.iblock(inum));
            let dip = bp.align_to_mut::<DInode>().get_mut(inum as usize % IPB).unwrap();
            if dip.itype == IType::None {
                *dip = Default::default();
                dip.itype = itype;
                log().write(bp);
                return Some(self.get(dev, inum));
            }
        }
        println!("ialloc: no inodes");
        None
    }

    /// Find or create the in-memory entry for `(dev, inum)`. Does not
    /// lock or read it from disk.
    fn get(&self, dev: u32, inum: u32) -> Inode {
        let mut guard = self.lock();

        let mut empty: Option<&mut Option<Arc<MInode>>> = None;
        for ip in guard.iter_mut() {
            match ip {
                Some(ip) if ip.dev == dev && ip.inum == inum => {
                    return Inode::new(Arc::clone(ip));
                }
                None if empty.is_none() => empty = Some(ip),
                _ => (),
            }
        }

        let empty = empty.expect("iget: no inodes");
        let ip = Arc::new(MInode::new(dev, inum));
        empty.replace(Arc::clone(&ip));
        Inode::new(ip)
    }

    /// Drop a reference; if it was the last one and the link count has
    /// also fallen to zero, truncate and free the inode on disk. Callers
    /// must already be inside a transaction.
    fn put(&self, inode: Arc<MInode>) {
        let mut guard = self.lock();

        if Arc::strong_count(&inode) == 2 {
            // Only this table slot and `inode` itself hold a reference,
            // so no other process can have it sleep-locked.
            let mut idata = inode.data.lock();
            let itable = Mutex::unlock(guard);

            if idata.valid && idata.nlink == 0 {
                idata.trunc();
                idata.itype = IType::None;
                idata.update();
                idata.valid = false;
            }

            guard = itable.lock();
            for mip in guard.iter_mut() {
                if matches!(mip, Some(ip) if Arc::ptr_eq(&inode, ip)) {
                    mip.take();
                }
            }
        }
    }
}

/// Create `new` as a hard link to the same inode as `old`.
pub fn link(old: &Path, new: &Path) -> Result<(), ()> {
    let (_, ip) = old.namei().ok_or(())?;
    {
        let ip_guard = ip.lock();
        if ip_guard.itype == IType::Dir {
            return Err(());
        }
    }

    let (name, dp) = new.nameiparent().ok_or(())?;
    let mut dp_guard = dp.lock();
    if dp.dev != ip.dev || dp_guard.dirlink(name, ip.inum).is_err() {
        return Err(());
    }
    drop(dp_guard);

    let mut ip_guard = ip.lock();
    ip_guard.nlink += 1;
    ip_guard.update();
    Ok(())
}

pub fn unlink(path: &Path) -> Result<(), ()> {
    let de: DirEnt = Default::default();

    let (name, dp) = path.nameiparent().ok_or(())?;
    let mut dp_guard = dp.lock();

    if name == "." || name == ".." {
        return Err(());
    }

    let mut off: u32 = 0;
    let ip = dp_guard.dirlookup(name, Some(&mut off)).ok_or(())?;
    let mut ip_guard = ip.lock();

    if ip_guard.nlink < 1 {
        panic!("unlink: nlink < 1");
    }
    if ip_guard.itype == IType::Dir && !ip_guard.is_dir_empty() {
        return Err(());
    }

    dp_guard
        .write(VirtAddr::Kernel(&de as *const _ as usize), off, size_of::<DirEnt>())
        .unwrap();
    if ip_guard.itype == IType::Dir {
        dp_guard.nlink -= 1;
        dp_guard.update();
    }

    ip_guard.nlink -= 1;
    ip_guard.update();

    Ok(())
}

pub fn create(path: &Path, type_: IType, major: u16, minor: u16) -> Option<Inode> {
    let (name, dp) = path.nameiparent()?;
    let ip: Inode;
    {
        let mut dp_guard = dp.lock();

        if let Some(ip) = dp_guard.dirlookup(name, None) {
            SleepLock::unlock(dp_guard);
            let ip_guard = ip.lock();
            return match type_ {
                IType::File if ip_guard.itype == IType::File || ip_guard.itype == IType::Device => {
                    SleepLock::unlock(ip_guard);
                    Some(ip)
                }
                _ => None,
            };
        }

        ip = ITABLE.alloc(dp.dev, type_)?;
        let mut ip_guard = ip.lock();
        ip_guard.major = Major::from_u16(major);
        ip_guard.minor = minor;
        ip_guard.update();

        if type_ == IType::Dir {
            // No nlink bump for "." -- that would make a reference cycle.
            ip_guard.dirlink(".", ip.inum).ok()?;
            ip_guard.dirlink("..", dp.inum).ok()?;
        }

        dp_guard.dirlink(name, ip.inum).ok()?;

        if type_ == IType::Dir {
            dp_guard.nlink += 1; // for ".."
            dp_guard.update();
        }

        ip_guard.nlink = 1;
        ip_guard.update();
    }

    Some(ip)
}

// Paths.

/// A borrowed path, the way `Path` in `std` wraps `str`.
#[repr(transparent)]
pub struct Path {
    inner: str,
}

impl AsRef<Path> for str {
    fn as_ref(&self) -> &Path {
        Path::new(self)
    }
}

impl Path {
    pub fn new<S: AsRef<str> + ?Sized>(s: &S) -> &Path {
        unsafe { &*(s.as_ref() as *const str as *const Path) }
    }

    pub fn file_name(&self) -> Option<&str> {
        if self.inner.ends_with("..") {
            return None;
        }
        match self.inner.rsplit_once('/') {
            Some((_, file_name)) => Some(file_name),
            None => Some(&self.inner),
        }
    }

    /// Split off the next path element: `skip_elem("a/bb/c") ==
    /// (Some("a"), Some("bb/c"))`, `skip_elem("") == (None, None)`.
    /// An element longer than `DIRSIZ` is truncated, not rejected, whether
    /// or not it's the last one.
    pub fn skip_elem(&self) -> (Option<&str>, Option<&Path>) {
        let trimmed = self.inner.trim_matches('/');
        if trimmed.is_empty() {
            return (None, None);
        }
        match trimmed.split_once('/') {
            Some((name, path)) => {
                let name = &name[..name.len().min(DIRSIZ)];
                (Some(name), Some(Path::new(path)))
            }
            None => {
                let name = &trimmed[..trimmed.len().min(DIRSIZ)];
                (Some(name), None)
            }
        }
    }

    /// Walk `path` to the named inode, or (if `parent`) to its parent
    /// directory. Must run inside a transaction: dropping an `Inode`
    /// along the way may call `ITable::put`.
    pub fn namex<'a>(path: &'a Path, parent: bool) -> Option<(&'a str, Inode)> {
        let mut ip = match path.inner.get(0..1) {
            Some("/") => ITABLE.get(ROOTDEV, ROOTINO),
            _ => unsafe { &*CPUS.my_proc().unwrap().data.get() }.cwd.as_ref().unwrap().dup(),
        };

        let mut path = path;
        loop {
            let mut guard = ip.lock();
            if guard.itype != IType::Dir {
                return None;
            }
            match path.skip_elem() {
                (Some(name), Some(npath)) => {
                    if let Some(nip) = guard.dirlookup(name, None) {
                        SleepLock::unlock(guard);
                        ip = nip;
                        path = npath;
                        continue;
                    }
                    return None;
                }
                (Some(name), None) if !parent => {
                    let nip = guard.dirlookup(name, None)?;
                    SleepLock::unlock(guard);
                    return Some((name, nip));
                }
                (Some(name), None) => {
                    SleepLock::unlock(guard);
                    return Some((name, ip));
                }
                _ => return None,
            }
        }
    }

    pub fn namei(&self) -> Option<(&str, Inode)> {
        Self::namex(self, false)
    }

    pub fn nameiparent(&self) -> Option<(&str, Inode)> {
        Self::namex(self, true)
    }
}
