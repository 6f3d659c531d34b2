//! The first user process. Makes sure a console device file exists, wires
//! stdin/stdout/stderr up to it, then forks and execs a shell over and
//! over: if the shell ever exits, start another one.
#![no_std]
#![no_main]

use ulib::{println, usys};

ulib::entry!(main);

const O_RDWR: usize = 0x002;
const CONSOLE_MAJOR: u16 = 1;

fn main() -> i32 {
    if ulib::open("console", O_RDWR) < 0 {
        ulib::mknod("console", CONSOLE_MAJOR, 0);
        ulib::open("console", O_RDWR);
    }
    usys::dup(0); // stdout
    usys::dup(0); // stderr

    loop {
        println!("init: starting sh");
        let pid = usys::fork();
        if pid < 0 {
            println!("init: fork failed");
            usys::exit(1);
        }
        if pid == 0 {
            ulib::exec("sh", &["sh"]);
            println!("init: exec sh failed");
            usys::exit(1);
        }

        loop {
            let wpid = usys::wait(core::ptr::null_mut());
            if wpid == pid {
                break;
            }
            if wpid < 0 {
                println!("init: wait returned an error");
                usys::exit(1);
            }
        }
    }
}
