//! Trap entry from both user and kernel space. `uservec`/`kernelvec`
//! (trampoline.rs / kernelvec.rs) do the raw register save and hand off
//! to `usertrap`/`kerneltrap` here, which classify the trap and either
//! service it or hand it to the scheduler.
use crate::{
    kernelvec::kernelvec,
    memlayout::{TRAMPOLINE, TRAPFRAME, UART0_IRQ, VIRTIO0_IRQ},
    plic,
    proc::{procs, Cpus, ProcState, Process, CPUS},
    riscv::{intr_get, intr_off, intr_on, r_sstatus, w_sstatus, PGSIZE},
    spinlock::Mutex,
    trampoline::trampoline,
    uart,
    virtio_disk::DISK,
};
use riscv::register::*;
use scause::{Exception, Interrupt, Trap};

extern "C" {
    fn uservec();
    fn userret(trapframe: usize, satp: usize) -> !;
}

#[derive(PartialEq)]
pub enum Intr {
    Timer,
    Device,
}

pub static TICKS: Mutex<usize> = Mutex::new(0, "time");

/// Take exceptions and traps while in the kernel itself.
#[no_mangle]
pub fn inithart() {
    unsafe {
        stvec::write(kernelvec as usize, stvec::TrapMode::Direct);
    }
}

/// Handle an interrupt, exception, or system call from user space.
/// Entered from `trampoline.rs`'s `uservec`.
#[no_mangle]
pub extern "C" fn usertrap() -> ! {
    assert!(
        sstatus::read().spp() == sstatus::SPP::User,
        "usertrap: not from user mode"
    );
    assert!(!intr_get(), "usertrap: interrupts enabled");

    // send interrupts and exceptions to kerneltrap(), now that we're in
    // the kernel.
    unsafe {
        stvec::write(kernelvec as usize, stvec::TrapMode::Direct);
    }

    let p = CPUS.my_proc().unwrap();
    let data = unsafe { &mut (*p.data.get()) };
    let tf = unsafe { data.trapframe.unwrap().as_mut() };

    // save the user program counter.
    tf.epc = sepc::read();

    let mut which_dev = None;
    match scause::read().cause() {
        Trap::Exception(Exception::UserEnvCall) => {
            if p.inner.lock().killed {
                p.exit(-1);
            }

            // sepc points to the ecall instruction, but we want to
            // resume at the one after it.
            tf.epc += 4;

            // an interrupt will change sstatus &c registers, so don't
            // enable them until we're done reading those registers.
            intr_on();

            tf.a0 = crate::syscall::syscall() as usize;
        }
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        _ => {
            let mut inner = p.inner.lock();
            println!(
                "usertrap(): unexpected scause {:?}, pid={:?}",
                scause::read().cause(),
                inner.pid
            );
            println!("            sepc={}, stval={}", sepc::read(), stval::read());
            inner.killed = true;
        }
    }

    if p.inner.lock().killed {
        p.exit(-1)
    }

    // give up the CPU if this is a timer interrupt.
    if Some(Intr::Timer) == which_dev {
        p.yielding()
    }

    unsafe { usertrap_ret() }
}

/// Return to user space.
#[no_mangle]
pub unsafe extern "C" fn usertrap_ret() -> ! {
    let p = CPUS.my_proc().unwrap();

    // we're about to switch the destination of traps from kerneltrap()
    // to usertrap(), so turn off interrupts until we're back in user
    // space, where usertrap() is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to trampoline.rs's
    // uservec.
    stvec::write(
        TRAMPOLINE + (uservec as usize - trampoline as usize),
        stvec::TrapMode::Direct,
    );

    let data = &mut *p.data.get();

    // set up the trapframe values uservec will need the next time this
    // process re-enters the kernel.
    let tf = data.trapframe.unwrap().as_mut();
    tf.kernel_satp = satp::read().bits();
    tf.kernel_sp = data.kstack + PGSIZE;
    tf.kernel_trap = usertrap as usize;
    tf.kernel_hartid = Cpus::cpu_id();

    // set up the registers trampoline.rs's sret will use to get back
    // to user space.
    sstatus::set_spp(sstatus::SPP::User);
    sstatus::set_spie(); // enable interrupts in user mode.
    sepc::write(tf.epc);

    // tell trampoline.rs which user page table to switch to.
    let satp = data.uvm.as_ref().unwrap().as_satp();

    // jump to trampoline.rs at the top of memory, which switches to the
    // user page table, restores user registers, and enters user mode
    // via sret.
    let fn_0: usize = TRAMPOLINE + (userret as usize - trampoline as usize);
    let fn_0: extern "C" fn(usize, usize) -> ! = core::mem::transmute(fn_0);
    fn_0(TRAPFRAME, satp)
}

/// Interrupts and exceptions from kernel code arrive here via
/// kernelvec, on whatever the interrupted kernel stack happens to be.
#[no_mangle]
pub extern "C" fn kerneltrap() {
    let mut which_dev = None;
    let sepc = sepc::read();
    let sstatus = sstatus::read();
    let scause = scause::read();
    let sstatus_bits = r_sstatus();

    assert!(
        sstatus.spp() == sstatus::SPP::Supervisor,
        "kerneltrap: not from supervisor mode"
    );
    assert!(!intr_get(), "kerneltrap: interrupts enabled");

    match scause.cause() {
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_none()
            } =>
        {
            println!("scause {:?}", scause.cause());
            println!("sepc={} stval={}", sepc::read(), stval::read());
            panic!("kerneltrap");
        }
        _ => {}
    }

    // give up the CPU if this is a timer interrupt.
    if Some(Intr::Timer) == which_dev {
        if let Some(p) = CPUS.my_proc() {
            if p.inner.lock().state == ProcState::RUNNING {
                p.yielding()
            }
        }
    }

    // the yielding() above may have clobbered sepc/sstatus via a trap
    // of its own; restore them for kernelvec's sret.
    sepc::write(sepc);
    w_sstatus(sstatus_bits);
}

fn clockintr() {
    let mut ticks = TICKS.lock();
    *ticks += 1;
    procs().wakeup(&(*ticks) as *const _ as usize)
}

/// Classify a supervisor interrupt and service it. Only ever called
/// from the non-interruptible prefix of usertrap/kerneltrap.
fn devintr(intr: Interrupt) -> Option<Intr> {
    match intr {
        Interrupt::SupervisorExternal => {
            // external interrupt, via the PLIC.
            let irq = plic::claim();

            if let Some(irq) = irq {
                match irq {
                    UART0_IRQ => uart::intr(),
                    VIRTIO0_IRQ => DISK.intr(),
                    _ => println!("unexpected interrupt irq={}", irq),
                }
                // the PLIC allows each device to raise at most one
                // interrupt at a time; tell it this hart is done.
                plic::complete(irq);
            }

            Some(Intr::Device)
        }
        Interrupt::SupervisorTimer => {
            // Sstc lets S-mode rearm its own timer interrupt directly,
            // without bouncing through machine mode.
            if unsafe { Cpus::cpu_id() == 0 } {
                clockintr();
            }
            crate::riscv::w_stimecmp(crate::riscv::r_time() + 1_000_000);
            Some(Intr::Timer)
        }
        _ => None,
    }
}
