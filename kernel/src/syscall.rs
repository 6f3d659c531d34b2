//! System call dispatch. `trap::usertrap` hands the ecall off to
//! `syscall()`, which reads the number out of `a7` and looks up the
//! implementing function in `TABLE`. Every syscall body is a zero-arg
//! method that reaches its own arguments through `CPUS.my_proc()`, the
//! same way `trap.rs` does.
use crate::{
    exec::exec,
    fcntl::OMode,
    file::{FType, File, FTABLE},
    fs::{self, Path},
    log::log,
    param::{MAXARG, MAXPATH},
    pipe::Pipe,
    proc::{ProcData, Process, CPUS},
    riscv::PGSIZE,
    stat::IType,
    trap::TICKS,
    vm::{Addr, UVAddr},
};

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use array_macro::array;
use core::mem::{size_of, size_of_val, variant_count};

#[derive(Copy, Clone, Debug)]
#[repr(usize)]
pub enum SysCalls {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Pipe = 4,
    Read = 5,
    Kill = 6,
    Exec = 7,
    Fstat = 8,
    Chdir = 9,
    Dup = 10,
    Getpid = 11,
    Sbrk = 12,
    Sleep = 13,
    Uptime = 14,
    Open = 15,
    Write = 16,
    Mknod = 17,
    Unlink = 18,
    Link = 19,
    Mkdir = 20,
    Close = 21,
    Invalid = 0,
}

impl SysCalls {
    const TABLE: [fn() -> Result<usize, ()>; variant_count::<Self>()] = [
        Self::invalid,
        Self::fork,
        Self::exit,
        Self::wait,
        Self::pipe,
        Self::read,
        Self::kill,
        Self::exec,
        Self::fstat,
        Self::chdir,
        Self::dup,
        Self::getpid,
        Self::sbrk,
        Self::sleep,
        Self::uptime,
        Self::open,
        Self::write,
        Self::mknod,
        Self::unlink,
        Self::link,
        Self::mkdir,
        Self::close,
    ];

    fn invalid() -> Result<usize, ()> {
        unreachable!()
    }

    fn from_usize(n: usize) -> Self {
        match n {
            1 => Self::Fork,
            2 => Self::Exit,
            3 => Self::Wait,
            4 => Self::Pipe,
            5 => Self::Read,
            6 => Self::Kill,
            7 => Self::Exec,
            8 => Self::Fstat,
            9 => Self::Chdir,
            10 => Self::Dup,
            11 => Self::Getpid,
            12 => Self::Sbrk,
            13 => Self::Sleep,
            14 => Self::Uptime,
            15 => Self::Open,
            16 => Self::Write,
            17 => Self::Mknod,
            18 => Self::Unlink,
            19 => Self::Link,
            20 => Self::Mkdir,
            21 => Self::Close,
            _ => Self::Invalid,
        }
    }
}

/// Read the syscall number and arguments out of the trapframe of the
/// currently running process, dispatch, and return the value to stash
/// back into `a0`.
pub fn syscall() -> usize {
    let p = CPUS.my_proc().unwrap();
    let data = p.data();
    let a7 = unsafe { data.trapframe.unwrap().as_ref() }.a7;
    let id = SysCalls::from_usize(a7);
    match id {
        SysCalls::Invalid => {
            println!("{} {}: unknown sys call {}", p.pid(), data.name, a7);
            -1_isize as usize
        }
        _ => SysCalls::TABLE[id as usize]().unwrap_or(-1_isize as usize),
    }
}

type RawFd = usize;

impl ProcData {
    pub fn arg(&self, n: usize) -> usize {
        let tf = unsafe { self.trapframe.unwrap().as_ref() };
        match n {
            0 => tf.a0,
            1 => tf.a1,
            2 => tf.a2,
            3 => tf.a3,
            4 => tf.a4,
            5 => tf.a5,
            _ => panic!("arg"),
        }
    }

    /// Retrieve an argument as a UVAddr. Doesn't check legality itself;
    /// copyin/copyout does that.
    pub fn arg_addr(&self, n: usize) -> UVAddr {
        UVAddr::from(self.arg(n))
    }

    /// Fetch the data at `addr` from the current process's address space.
    pub unsafe fn fetch_data<T: ?Sized>(&mut self, addr: UVAddr, buf: &mut T) -> Result<usize, ()> {
        if addr.into_usize() >= self.sz || addr.into_usize() + size_of_val(buf) > self.sz {
            return Err(());
        }
        self.uvm.as_mut().unwrap().copyin(buf, addr).and(Ok(0))
    }

    pub unsafe fn fetch_slice<T>(&mut self, addr: UVAddr, buf: &mut [T]) -> Result<usize, ()> {
        let mut data: UVAddr = UVAddr::from(0);
        let mut len: usize = 0;
        self.fetch_data(addr, &mut data)?;
        self.fetch_data(addr + size_of::<usize>(), &mut len)?;
        if len > buf.len() || len == 0 || data.into_usize() == 0 {
            return Err(());
        }
        self.uvm
            .as_mut()
            .unwrap()
            .copyin(&mut buf[..len], data)
            .and(Ok(0))
    }

    /// Fetch the nul-terminated string at `addr` into `buf`.
    pub fn fetch_str<'a>(&mut self, addr: UVAddr, buf: &'a mut [u8]) -> Result<&'a str, ()> {
        unsafe {
            self.fetch_slice(addr, buf)?;
        }
        Ok(core::str::from_utf8_mut(buf)
            .or(Err(()))?
            .trim_end_matches(char::from(0)))
    }

    /// Fetch the nth syscall argument as a string, copied into `buf`.
    pub fn arg_str<'a>(&mut self, n: usize, buf: &'a mut [u8]) -> Result<&'a str, ()> {
        self.fetch_str(self.arg_addr(n), buf)
    }

    /// Fetch the nth syscall argument as a file descriptor, returning
    /// both it and the open file it names.
    pub fn arg_fd(&self, n: usize) -> Option<(RawFd, &Arc<File>)> {
        let fd = self.arg(n);
        match self.ofile.get(fd)? {
            Some(f) => Some((fd, f)),
            None => None,
        }
    }

    /// Allocate a file descriptor for `file`, which may be a freshly
    /// opened `File` or an `Arc<File>` already shared by another fd
    /// (as `dup` needs).
    pub fn fdalloc(&mut self, file: impl Into<Arc<File>>) -> Option<RawFd> {
        let file = file.into();
        for (fd, f) in self.ofile.iter_mut().enumerate() {
            if f.is_none() {
                f.replace(file);
                return Some(fd);
            }
        }
        None
    }
}

// Process-related system calls.
impl SysCalls {
    fn exit() -> Result<usize, ()> {
        let p = CPUS.my_proc().unwrap();
        let n = p.data().arg(0) as i32;
        p.exit(n)
        // never reached
    }

    fn getpid() -> Result<usize, ()> {
        Ok(CPUS.my_proc().unwrap().pid())
    }

    fn fork() -> Result<usize, ()> {
        CPUS.my_proc().unwrap().fork()
    }

    fn wait() -> Result<usize, ()> {
        let p = CPUS.my_proc().unwrap();
        let addr = p.data().arg_addr(0);
        p.wait(addr).ok_or(())
    }

    fn sbrk() -> Result<usize, ()> {
        let p = CPUS.my_proc().unwrap();
        let n = p.data().arg(0) as isize;
        let addr = p.data().sz;
        p.grow_proc(n).and(Ok(addr))
    }

    fn sleep() -> Result<usize, ()> {
        let p = CPUS.my_proc().unwrap();
        let n = p.data().arg(0);
        let mut ticks = TICKS.lock();
        let ticks0 = *ticks;
        while *ticks - ticks0 < n {
            if p.inner.lock().killed {
                return Err(());
            }
            ticks = p.sleep(&(*ticks) as *const _ as usize, ticks);
        }
        Ok(0)
    }

    fn kill() -> Result<usize, ()> {
        let p = CPUS.my_proc().unwrap();
        let pid = p.data().arg(0);
        crate::proc::procs().kill(pid).and(Ok(0))
    }

    fn uptime() -> Result<usize, ()> {
        Ok(*TICKS.lock())
    }
}

// File-related system calls.
impl SysCalls {
    fn dup() -> Result<usize, ()> {
        let data = CPUS.my_proc().unwrap().data_mut();
        if let Some((_, f)) = data.arg_fd(0) {
            let f = f.clone();
            data.fdalloc(f).ok_or(())
        } else {
            Err(())
        }
    }

    fn read() -> Result<usize, ()> {
        let data = CPUS.my_proc().unwrap().data();
        let addr = data.arg_addr(1);
        let len = data.arg(2);
        let (_, f) = data.arg_fd(0).ok_or(())?;
        f.read(From::from(addr), len)
    }

    fn write() -> Result<usize, ()> {
        let data = CPUS.my_proc().unwrap().data();
        let addr = data.arg_addr(1);
        let len = data.arg(2);
        let (_, f) = data.arg_fd(0).ok_or(())?;
        f.write(From::from(addr), len)
    }

    fn close() -> Result<usize, ()> {
        let data = CPUS.my_proc().unwrap().data_mut();
        let (fd, _) = data.arg_fd(0).ok_or(())?;
        data.ofile[fd].take().unwrap();
        Ok(0)
    }

    fn fstat() -> Result<usize, ()> {
        let data = CPUS.my_proc().unwrap().data();
        let st = data.arg_addr(0);
        let (_, f) = data.arg_fd(1).ok_or(())?;
        f.stat(From::from(st)).and(Ok(0))
    }

    fn link() -> Result<usize, ()> {
        let mut old = [0; MAXPATH];
        let mut new = [0; MAXPATH];
        let data = CPUS.my_proc().unwrap().data_mut();
        let old_path = Path::new(data.arg_str(0, &mut old)?);
        let new_path = Path::new(data.arg_str(1, &mut new)?);

        log().begin_op();
        let res = fs::link(old_path, new_path);
        log().end_op();
        res.and(Ok(0))
    }

    fn unlink() -> Result<usize, ()> {
        let mut path = [0; MAXPATH];
        let data = CPUS.my_proc().unwrap().data_mut();
        let path = Path::new(data.arg_str(0, &mut path)?);

        log().begin_op();
        let res = fs::unlink(path);
        log().end_op();
        res.and(Ok(0))
    }

    fn open() -> Result<usize, ()> {
        let mut path = [0u8; MAXPATH];
        let data = CPUS.my_proc().unwrap().data_mut();
        let omode = data.arg(1);
        let path = Path::new(data.arg_str(0, &mut path)?);

        log().begin_op();
        let fd = FTABLE
            .alloc(OMode::from_usize(omode), FType::Node(path))
            .and_then(|f| data.fdalloc(f));
        log().end_op();
        fd.ok_or(())
    }

    fn mkdir() -> Result<usize, ()> {
        let mut path = [0u8; MAXPATH];
        let path = Path::new(CPUS.my_proc().unwrap().data_mut().arg_str(0, &mut path)?);

        log().begin_op();
        let res = fs::create(path, IType::Dir, 0, 0).and(Some(0)).ok_or(());
        log().end_op();
        res
    }

    fn mknod() -> Result<usize, ()> {
        let mut path = [0u8; MAXPATH];
        let data = CPUS.my_proc().unwrap().data_mut();
        let path = Path::new(data.arg_str(0, &mut path)?);
        let major = data.arg(1) as u16;
        let minor = data.arg(2) as u16;

        log().begin_op();
        let res = fs::create(path, IType::Device, major, minor)
            .and(Some(0))
            .ok_or(());
        log().end_op();
        res
    }

    fn chdir() -> Result<usize, ()> {
        let mut path = [0u8; MAXPATH];
        let data = CPUS.my_proc().unwrap().data_mut();
        let path = Path::new(data.arg_str(0, &mut path)?);

        log().begin_op();
        let res = (|| -> Result<usize, ()> {
            let (_, ip) = path.namei().ok_or(())?;
            if ip.lock().itype() != IType::Dir {
                return Err(());
            }
            data.cwd.replace(ip);
            Ok(0)
        })();
        log().end_op();
        res
    }

    fn exec() -> Result<usize, ()> {
        let mut path = [0u8; MAXPATH];
        let data = CPUS.my_proc().unwrap().data_mut();
        let path = Path::new(data.arg_str(0, &mut path)?);

        let mut argv: [Option<String>; MAXARG] = array![_ => None; MAXARG];
        let mut uargv: [Option<&str>; MAXARG] = [None; MAXARG];
        let mut buf: [u8; PGSIZE] = [0u8; PGSIZE];

        unsafe { data.fetch_slice(data.arg_addr(1), &mut uargv) }?;

        for (i, uarg) in uargv
            .iter()
            .take_while(|uarg| uarg.is_some())
            .filter_map(|uarg| uarg.as_ref())
            .enumerate()
        {
            argv[i].replace(
                data.fetch_str(UVAddr::from(*uarg as *const str as *const u8 as usize), &mut buf)?
                    .to_string(),
            );
        }
        exec(path, argv)
    }

    fn pipe() -> Result<usize, ()> {
        let data = CPUS.my_proc().unwrap().data_mut();
        let fdarr: UVAddr = data.arg_addr(0); // user pointer to a pair of ints

        let (rf, wf) = Pipe::alloc().ok_or(())?;
        let fd0 = data.fdalloc(rf).ok_or(())?;
        let fd1 = match data.fdalloc(wf) {
            Some(fd) => fd,
            None => {
                data.ofile[fd0].take();
                return Err(());
            }
        };

        let uvm = data.uvm.as_mut().unwrap();
        if unsafe {
            uvm.copyout(fdarr, &fd0).is_err()
                || uvm.copyout(fdarr + size_of::<usize>(), &fd1).is_err()
        } {
            data.ofile[fd0].take();
            data.ofile[fd1].take();
            return Err(());
        }
        Ok(0)
    }
}
