//! RISC-V Platform-Level Interrupt Controller: priorities, per-hart
//! S-mode enable bits, and the claim/complete handshake `trap::devintr`
//! uses to find out which external interrupt fired.
#![allow(dead_code)]

use crate::memlayout::{plic_sclaim, plic_senable, plic_spriority, PLIC, UART0_IRQ, VIRTIO0_IRQ};
use crate::proc::Cpus;
use core::ptr;

/// Give the uart and virtio disk a nonzero priority; priority 0 disables
/// an interrupt source entirely.
pub fn init() {
    unsafe {
        ptr::write_volatile((PLIC + UART0_IRQ * 4) as *mut u32, 1);
        ptr::write_volatile((PLIC + VIRTIO0_IRQ * 4) as *mut u32, 1);
    }
}

/// Enable the uart and virtio disk interrupts for this hart's S-mode,
/// and set its priority threshold to 0 (accept anything above priority 0).
pub fn inithart() {
    let hart = unsafe { Cpus::cpu_id() };
    unsafe {
        ptr::write_volatile(
            plic_senable(hart) as *mut u32,
            (1 << UART0_IRQ | 1 << VIRTIO0_IRQ) as u32,
        );
        ptr::write_volatile(plic_spriority(hart) as *mut u32, 0);
    }
}

/// Ask the PLIC which interrupt this hart should service next, or
/// `None` if nothing is pending.
pub fn claim() -> Option<usize> {
    let hart = unsafe { Cpus::cpu_id() };
    match unsafe { ptr::read_volatile(plic_sclaim(hart) as *const u32) } {
        0 => None,
        irq => Some(irq as usize),
    }
}

/// Tell the PLIC this hart is done with `irq`, so it may interrupt again.
pub fn complete(irq: usize) {
    let hart = unsafe { Cpus::cpu_id() };
    unsafe { ptr::write_volatile(plic_sclaim(hart) as *mut u32, irq as u32) }
}
