//! M-mode to S-mode handoff. `_entry` (entry.rs) jumps here once each hart
//! has a stack; `start` arranges for `mret` to drop into S-mode at the
//! kernel's `main`, then gets out of the way.
use crate::param::NCPU;
use crate::riscv::*;
use core::arch::asm;

/// One page of boot stack per hart, indexed by `entry.rs`'s
/// `STACK0 + (hartid + 1) * 4096`.
#[no_mangle]
#[link_section = ".bss.stack"]
pub static mut STACK0: [u8; 4096 * NCPU] = [0; 4096 * NCPU];

extern "C" {
    fn main() -> !;
}

/// Entered once per hart, in M-mode, with `sp` already set by `_entry`.
#[no_mangle]
pub unsafe extern "C" fn start() -> ! {
    // Set MPP to S-mode so `mret` drops us into supervisor mode.
    let mut x = r_mstatus();
    x &= !MSTATUS_MPP_MASK;
    x |= MSTATUS_MPP_S;
    w_mstatus(x);

    // mret jumps to mepc; point it at the kernel's main (medany codegen
    // makes this a PC-relative load, so the address is position-correct).
    w_mepc(main as usize);

    // Disable paging for now, delegate all traps/interrupts to S-mode.
    w_satp(0);
    w_medeleg(0xffff);
    w_mideleg(0xffff);
    w_sie(r_sie() | SIE_SEIE | SIE_STIE | SIE_SSIE);

    // Give S-mode access to all of physical memory.
    w_pmpaddr0(0x3fffffffffffff);
    w_pmpcfg0(0xf);

    timerinit();

    // Stash this hart's id in tp for Cpus::cpu_id().
    let id = r_mhartid();
    w_tp(id);

    asm!("mret", options(noreturn));
}

/// Ask for a (roughly 0.1s) Sstc timer interrupt and let S-mode rearm it
/// itself from then on via `stimecmp`, without trapping back to M-mode.
unsafe fn timerinit() {
    w_mie(r_mie() | MIE_STIE);
    w_menvcfg(r_menvcfg() | (1 << 63));
    w_mcounteren(r_mcounteren() | 2);
    w_stimecmp(r_time() + 1_000_000);
}
