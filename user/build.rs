// Links every binary in this crate against the flat user-space layout
// `exec` expects: a single image starting at virtual address 0.
fn main() {
    println!("cargo:rerun-if-changed=user.ld");
    println!("cargo:rustc-link-arg=-Tuser.ld");
}
