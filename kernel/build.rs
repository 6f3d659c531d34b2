// Links the kernel against its own linker script. `mkfs` and `user` are
// plain workspace members (see ../mkfs, ../user) built independently
// rather than cross-compiled from here, and the syscall stubs are
// hand-written in user/src/usys.rs rather than generated.
fn main() {
    println!("cargo:rerun-if-changed=kernel.ld");
    println!("cargo:rustc-link-arg=-Tkernel.ld");
}
