//! 16550a UART driver. `putc_sync` busy-waits and is what `printf`/the
//! panic handler use so kernel diagnostics keep working with interrupts
//! off; `putc` queues into a small interrupt-driven transmit ring and is
//! what `Device::write` uses for ordinary console output.
#![allow(dead_code)]

use crate::console;
use crate::memlayout::UART0;
use crate::printf::PR;
use crate::proc::{procs, CPUS};
use crate::spinlock::Mutex;
use core::num::Wrapping;
use core::ptr;
use core::sync::atomic::Ordering;

const RHR: usize = 0;
const THR: usize = 0;
const IER: usize = 1;
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
const FCR: usize = 2;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1;
const LCR: usize = 3;
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7;
const LSR: usize = 5;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

fn reg(r: usize) -> *mut u8 {
    (UART0 + r) as *mut u8
}

fn read_reg(r: usize) -> u8 {
    unsafe { ptr::read_volatile(reg(r)) }
}

fn write_reg(r: usize, v: u8) {
    unsafe { ptr::write_volatile(reg(r), v) }
}

const TX_BUF_SIZE: usize = 32;

struct Tx {
    buf: [u8; TX_BUF_SIZE],
    w: Wrapping<usize>, // next free slot uartputc() will fill
    r: Wrapping<usize>, // next slot start() will send
}

static TX: Mutex<Tx> = Mutex::new(
    Tx {
        buf: [0; TX_BUF_SIZE],
        w: Wrapping(0),
        r: Wrapping(0),
    },
    "uart",
);

/// Reset the chip to 38.4K 8N1 and enable its interrupts. Must run once,
/// from `console::init`, before anything calls `putc`/`putc_sync`.
pub unsafe fn init() {
    write_reg(IER, 0x00);
    write_reg(LCR, LCR_BAUD_LATCH);
    write_reg(0, 0x03); // baud rate LSB
    write_reg(1, 0x00); // baud rate MSB
    write_reg(LCR, LCR_EIGHT_BITS);
    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
    write_reg(IER, IER_TX_ENABLE | IER_RX_ENABLE);
}

/// Queue one byte for interrupt-driven transmit, sleeping if the ring is
/// full. Used by `Device::write`; never by `printf`/the panic handler.
pub fn putc(c: u8) {
    let mut tx = TX.lock();
    if PR.panicked().load(Ordering::Relaxed) {
        loop {}
    }
    while tx.w - tx.r == Wrapping(TX_BUF_SIZE) {
        let p = CPUS.my_proc().unwrap();
        tx = p.sleep(&tx.r as *const _ as usize, tx);
    }
    let idx = tx.w.0 % TX_BUF_SIZE;
    tx.buf[idx] = c;
    tx.w += Wrapping(1);
    start(&mut tx);
}

/// Send straight to THR, busy-waiting for it to go idle. Used by
/// `printf` and the panic handler, which must keep working even with
/// interrupts off or the transmit ring stuck.
pub fn putc_sync(c: u8) {
    let _intr_lock = CPUS.intr_lock();
    if PR.panicked().load(Ordering::Relaxed) {
        loop {}
    }
    while read_reg(LSR) & LSR_TX_IDLE == 0 {}
    write_reg(THR, c);
}

/// If the UART is idle and the ring has bytes queued, push the next one.
/// Caller must hold `TX`.
fn start(tx: &mut Tx) {
    loop {
        if tx.w == tx.r {
            return;
        }
        if read_reg(LSR) & LSR_TX_IDLE == 0 {
            return;
        }
        let idx = tx.r.0 % TX_BUF_SIZE;
        let c = tx.buf[idx];
        tx.r += Wrapping(1);
        procs().wakeup(&tx.r as *const _ as usize);
        write_reg(THR, c);
    }
}

/// Drain pending input to the console line discipline and restart output
/// now that the chip has interrupted us.
pub fn intr() {
    loop {
        if read_reg(LSR) & LSR_RX_READY == 0 {
            break;
        }
        let c = read_reg(RHR);
        console::CONS.intr(c);
    }
    let mut tx = TX.lock();
    start(&mut tx);
}
