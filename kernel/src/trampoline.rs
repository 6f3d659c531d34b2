//! Code that switches between user and kernel space. Mapped at the same
//! virtual address (TRAMPOLINE) in every page table, kernel and user
//! alike, so it keeps working across the `satp` switch that `uservec`
//! and `userret` themselves perform. `kernel.ld` aligns this to a page
//! boundary.
use core::arch::asm;
use core::hint::unreachable_unchecked;

#[link_section = "trampsec"]
#[no_mangle]
pub unsafe extern "C" fn trampoline() -> ! {
    asm!(".align 4");

    #[link_section = "trampsec"]
    #[no_mangle]
    pub unsafe extern "C" fn uservec() -> ! {
        // trap.rs points stvec here, so traps from user space land here,
        // in supervisor mode, but still with the user page table live.
        //
        // sscratch holds where this process's trapframe is mapped in
        // user space, at TRAPFRAME.

        // Swap a0 and sscratch so a0 becomes TRAPFRAME.
        asm!("csrrw a0, sscratch, a0");

        // Save the user registers into the trapframe.
        asm!(
            "sd ra, 40(a0)",
            "sd sp, 48(a0)",
            "sd gp, 56(a0)",
            "sd tp, 64(a0)",
            "sd t0, 72(a0)",
            "sd t1, 80(a0)",
            "sd t2, 88(a0)",
            "sd s0, 96(a0)",
            "sd s1, 104(a0)",
            "sd a1, 120(a0)",
            "sd a2, 128(a0)",
            "sd a3, 136(a0)",
            "sd a4, 144(a0)",
            "sd a5, 152(a0)",
            "sd a6, 160(a0)",
            "sd a7, 168(a0)",
            "sd s2, 176(a0)",
            "sd s3, 184(a0)",
            "sd s4, 192(a0)",
            "sd s5, 200(a0)",
            "sd s6, 208(a0)",
            "sd s7, 216(a0)",
            "sd s8, 224(a0)",
            "sd s9, 232(a0)",
            "sd s10, 240(a0)",
            "sd s11, 248(a0)",
            "sd t3, 256(a0)",
            "sd t4, 264(a0)",
            "sd t5, 272(a0)",
            "sd t6, 280(a0)",
        );

        // Save the user a0 (parked in sscratch) into the trapframe too.
        asm!("csrr t0, sscratch", "sd t0, 112(a0)");

        // Restore the kernel stack pointer from trapframe.kernel_sp.
        asm!("ld sp, 8(a0)");

        // Load the current hartid into tp, from trapframe.kernel_hartid.
        asm!("ld tp, 32(a0)");

        // Load the address of usertrap() from trapframe.kernel_trap.
        asm!("ld t0, 16(a0)");

        // Switch to the kernel page table, from trapframe.kernel_satp.
        asm!("ld t1, 0(a0)", "csrw satp, t1", "sfence.vma zero, zero");

        // a0 is no longer valid here: the kernel page table doesn't map
        // the trapframe specially.

        asm!("jr t0"); // jump to usertrap(), never returns
        unreachable_unchecked()
    }

    #[link_section = "trampsec"]
    #[no_mangle]
    pub unsafe extern "C" fn userret(trapframe: usize, pagetable: usize) -> ! {
        // userret(TRAPFRAME, pagetable): switch from kernel to user.
        // usertrap_ret() calls here.
        // a0: TRAPFRAME, mapped in the user page table.
        // a1: user page table, for satp.

        asm!(
            "csrw satp, {0}",
            "sfence.vma zero, zero",
            in(reg) pagetable,
        );

        // Stash the saved user a0 in sscratch, to swap back with the
        // real a0 (TRAPFRAME) in the last step below.
        asm!(
            "ld t0, 112({0})",
            "csrw sscratch, t0",
            in(reg) trapframe,
        );

        // Restore every register but a0 from the trapframe.
        asm!(
            "ld ra, 40({0})",
            "ld sp, 48({0})",
            "ld gp, 56({0})",
            "ld tp, 64({0})",
            "ld t0, 72({0})",
            "ld t1, 80({0})",
            "ld t2, 88({0})",
            "ld s0, 96({0})",
            "ld s1, 104({0})",
            "ld a1, 120({0})",
            "ld a2, 128({0})",
            "ld a3, 136({0})",
            "ld a4, 144({0})",
            "ld a5, 152({0})",
            "ld a6, 160({0})",
            "ld a7, 168({0})",
            "ld s2, 176({0})",
            "ld s3, 184({0})",
            "ld s4, 192({0})",
            "ld s5, 200({0})",
            "ld s6, 208({0})",
            "ld s7, 216({0})",
            "ld s8, 224({0})",
            "ld s9, 232({0})",
            "ld s10, 240({0})",
            "ld s11, 248({0})",
            "ld t3, 256({0})",
            "ld t4, 264({0})",
            "ld t5, 272({0})",
            "ld t6, 280({0})",
            in(reg) trapframe,
        );

        // Restore user a0, saving TRAPFRAME back into sscratch.
        asm!("csrrw a0, sscratch, a0");

        // Return to user mode at the pc usertrap_ret() set up in sepc.
        asm!("sret");
        unreachable_unchecked()
    }

    unreachable_unchecked()
}
