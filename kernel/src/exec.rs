//! Load and run an ELF executable, replacing the calling process's
//! memory image. Grounded in the classic two-phase exec: build the new
//! image into a fresh page table first, and only swap it in for the old
//! one once every fallible step (reading headers, mapping segments,
//! laying out the stack) has succeeded.
use crate::{
    fs::{IData, Path},
    memlayout::USERSTACK,
    param::MAXARG,
    proc::{CopyInOut, Process, CPUS},
    riscv::{pgroundup, PGSIZE},
    vm::{Addr, PteFlags, UVAddr, Uvm, VirtAddr},
};
use alloc::string::String;
use zerocopy::{AsBytes, FromBytes};

const ELF_MAGIC: u32 = 0x464c457f;
const ELF_PROG_LOAD: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
struct ElfHdr {
    magic: u32,
    elf: [u8; 12],
    etype: u16,
    machine: u16,
    version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
struct ProgHdr {
    ptype: u32,
    flags: u32,
    off: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

fn flags2perm(flags: u32) -> PteFlags {
    let mut perm = PteFlags::empty();
    if flags & 0x1 != 0 {
        perm |= PteFlags::X;
    }
    if flags & 0x2 != 0 {
        perm |= PteFlags::W;
    }
    perm
}

/// Replace the current process's image with the ELF binary at `path`,
/// passing `argv` as the new `main`'s arguments. Only returns on
/// failure; success resumes the calling process at the new entry point.
pub fn exec(path: &Path, argv: [Option<String>; MAXARG]) -> Result<usize, ()> {
    let mut sz: usize = 0;

    let (_, ip) = path.namei().ok_or(())?;
    let mut guard = ip.lock();

    let mut elf = ElfHdr::default();
    if guard.read(VirtAddr::Kernel(&mut elf as *mut _ as usize), 0, core::mem::size_of::<ElfHdr>())
        != Ok(core::mem::size_of::<ElfHdr>())
    {
        return Err(());
    }
    if elf.magic != ELF_MAGIC {
        return Err(());
    }

    let p = CPUS.my_proc().unwrap();
    let mut uvm = p.proc_uvmcreate().ok_or(())?;

    let result = (|| -> Result<(), ()> {
        let mut off = elf.phoff;
        for _ in 0..elf.phnum {
            let mut ph = ProgHdr::default();
            if guard.read(
                VirtAddr::Kernel(&mut ph as *mut _ as usize),
                off as u32,
                core::mem::size_of::<ProgHdr>(),
            ) != Ok(core::mem::size_of::<ProgHdr>())
            {
                return Err(());
            }
            off += core::mem::size_of::<ProgHdr>() as u64;

            if ph.ptype != ELF_PROG_LOAD {
                continue;
            }
            if ph.memsz < ph.filesz {
                return Err(());
            }
            if ph.vaddr.checked_add(ph.memsz).is_none() {
                return Err(());
            }
            if ph.vaddr as usize % PGSIZE != 0 {
                return Err(());
            }

            sz = uvm
                .alloc(sz, (ph.vaddr + ph.memsz) as usize, flags2perm(ph.flags))
                .ok_or(())?;
            loadseg(&mut uvm, ph.vaddr as usize, &mut guard, ph.off as u32, ph.filesz as usize)?;
        }
        Ok(())
    })();

    drop(guard);

    if result.is_err() {
        uvm.free(sz);
        return Err(());
    }

    let data = p.data_mut();
    let oldsz = data.sz;

    // One guard page below the user stack, stack itself above it.
    sz = pgroundup(sz);
    let sz1 = match uvm.alloc(sz, sz + (USERSTACK + 1) * PGSIZE, PteFlags::W) {
        Some(sz1) => sz1,
        None => {
            uvm.free(sz);
            return Err(());
        }
    };
    sz = sz1;
    uvm.clear(UVAddr::from(sz - (USERSTACK + 1) * PGSIZE));

    let mut sp = sz;
    let stackbase = sp - USERSTACK * PGSIZE;

    // Copy each argument string onto the new stack, recording its
    // address, highest address first so argv[0] ends up lowest.
    let mut ustack = [0usize; MAXARG];
    let mut argc = 0;
    for arg in argv.iter() {
        let arg = match arg {
            Some(a) => a,
            None => break,
        };
        if argc >= MAXARG {
            uvm.free(sz);
            return Err(());
        }
        sp -= arg.len() + 1;
        sp -= sp % 16;
        if sp < stackbase {
            uvm.free(sz);
            return Err(());
        }
        if unsafe { uvm.copyout(UVAddr::from(sp), arg.as_bytes()).is_err() }
            || unsafe { uvm.copyout(UVAddr::from(sp + arg.len()), &0u8).is_err() }
        {
            uvm.free(sz);
            return Err(());
        }
        ustack[argc] = sp;
        argc += 1;
    }
    ustack[argc] = 0;

    // argv[] pointer array itself.
    sp -= (argc + 1) * core::mem::size_of::<usize>();
    sp -= sp % 16;
    if sp < stackbase {
        uvm.free(sz);
        return Err(());
    }
    if unsafe { uvm.copyout(UVAddr::from(sp), &ustack[..=argc]).is_err() } {
        uvm.free(sz);
        return Err(());
    }

    // main(argc, argv): argc goes in a0 via the caller's return value,
    // argv in a1.
    let tf = unsafe { data.trapframe.unwrap().as_mut() };
    tf.a1 = sp;

    // Use the final path component as the process name, for debugging.
    let name = path.file_name().unwrap_or("?");
    data.name.clear();
    data.name.push_str(name);

    let old_uvm = data.uvm.replace(uvm);
    data.sz = sz;
    tf.epc = elf.entry as usize;
    tf.sp = sp;

    if let Some(mut old_uvm) = old_uvm {
        old_uvm.free(oldsz);
    }

    Ok(argc)
}

/// Load one `PT_LOAD` program-header segment into already-mapped pages
/// of `uvm`. `va` must be page-aligned.
fn loadseg(
    uvm: &mut Uvm,
    va: usize,
    ip: &mut IData,
    offset: u32,
    sz: usize,
) -> Result<(), ()> {
    let mut i = 0;
    while i < sz {
        let pa = uvm.walkaddr(UVAddr::from(va + i)).ok_or(())?;
        let n = if sz - i < PGSIZE { sz - i } else { PGSIZE };
        if ip.read(VirtAddr::Kernel(pa.into_usize()), offset + i as u32, n) != Ok(n) {
            return Err(());
        }
        i += PGSIZE;
    }
    Ok(())
}
