//! Console input/output over the UART: line-buffered reads with the usual
//! control characters (backspace, kill-line, end-of-line, process dump),
//! byte-at-a-time echoing writes.
use crate::file::{Device, Major, DEVSW};
use crate::proc::{procdump, procs, CopyInOut, Process, CPUS};
use crate::spinlock::Mutex;
use crate::uart;
use crate::vm::VirtAddr;
use core::num::Wrapping;

pub static CONS: Mutex<Cons> = Mutex::new(Cons::new(), "cons");

const BS: u8 = 0x08;

const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

const INPUT_BUF: usize = 128;

pub struct Cons {
    buf: [u8; INPUT_BUF],
    r: Wrapping<usize>,
    w: Wrapping<usize>,
    e: Wrapping<usize>,
}

impl Cons {
    const fn new() -> Cons {
        Cons {
            buf: [0; INPUT_BUF],
            r: Wrapping(0),
            w: Wrapping(0),
            e: Wrapping(0),
        }
    }
}

impl Device for Mutex<Cons> {
    /// Copy up to `n` bytes of one input line to user address `dst`.
    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize, ()> {
        let mut cons_guard = self.lock();
        let mut size = 0;
        for i in 0..n {
            while cons_guard.r == cons_guard.w {
                let p = CPUS.my_proc().unwrap();
                if p.inner.lock().killed {
                    return Err(());
                }
                cons_guard = p.sleep(&cons_guard.r as *const _ as usize, cons_guard);
            }
            let c = cons_guard.buf[cons_guard.r.0 % INPUT_BUF];
            cons_guard.r += Wrapping(1);

            if c == ctrl(b'D') {
                if i > 0 {
                    // leave ^D for next read, so this one reports EOF
                    cons_guard.r -= Wrapping(1);
                }
                break;
            }

            let p = CPUS.my_proc().unwrap();
            if unsafe { p.either_copyout(dst + i, &c).is_err() } {
                break;
            }
            size = i + 1;

            if c == b'\n' {
                break;
            }
        }
        Ok(size)
    }

    /// Copy `n` bytes from user address `src`, echoing each to the uart.
    fn write(&self, src: VirtAddr, n: usize) -> Result<usize, ()> {
        let mut c = 0;
        for i in 0..n {
            let p = CPUS.my_proc().unwrap();
            if unsafe { p.either_copyin(&mut c, src + i).is_err() } {
                return Ok(i);
            }
            putc(c);
        }
        Ok(n)
    }

    fn major(&self) -> Major {
        Major::Console
    }
}

impl Mutex<Cons> {
    /// Console input interrupt handler: erase/kill processing, append to
    /// the line buffer, wake a waiting reader once a line is complete.
    pub fn intr(&self, c: u8) {
        let mut cons_guard = self.lock();
        match c {
            m if m == ctrl(b'P') => procdump(),
            m if m == ctrl(b'U') => {
                while cons_guard.e != cons_guard.w
                    && cons_guard.buf[(cons_guard.e - Wrapping(1)).0 % INPUT_BUF] != b'\n'
                {
                    cons_guard.e -= Wrapping(1);
                    putc(ctrl(b'H'));
                }
            }
            m if m == ctrl(b'H') || m == 0x7f => {
                if cons_guard.e != cons_guard.w {
                    cons_guard.e -= Wrapping(1);
                    putc(ctrl(b'H'));
                }
            }
            _ => {
                if c != 0 && (cons_guard.e - cons_guard.r).0 < INPUT_BUF {
                    let c = if c == b'\r' { b'\n' } else { c };
                    putc(c);
                    let e_idx = cons_guard.e.0 % INPUT_BUF;
                    cons_guard.buf[e_idx] = c;
                    cons_guard.e += Wrapping(1);

                    if c == b'\n' || c == ctrl(b'D') || (cons_guard.e - cons_guard.r).0 == INPUT_BUF {
                        cons_guard.w = cons_guard.e;
                        procs().wakeup(&cons_guard.r as *const _ as usize);
                    }
                }
            }
        }
    }
}

pub fn init() {
    unsafe { uart::init() }
    DEVSW.set(Major::Console, &CONS).unwrap();
}

/// Send one character to the uart; used by `printf` and input echo, never
/// by `Device::write`.
pub fn putc(c: u8) {
    if c == ctrl(b'H') {
        uart::putc_sync(BS);
        uart::putc_sync(b' ');
        uart::putc_sync(BS);
    } else {
        uart::putc_sync(c);
    }
}
