//! Write-ahead, group-commit redo log. A transaction covers the updates of
//! one or more file-system syscalls; the log only commits once every
//! syscall active when the window opened has called `end_op`, so there is
//! never a question of whether a commit might persist a half-finished
//! syscall's writes.
//!
//! On-disk layout: a header block listing which block numbers are logged,
//! followed by that many logged copies. `begin_op`/`end_op` bracket a
//! reservation of up to `MAXOPBLOCKS` blocks; log appends are synchronous.
use crate::{
    bio::{BufGuard, BCACHE},
    fs::{BSIZE, SB},
    param::{LOGSIZE, MAXOPBLOCKS, ROOTDEV},
    proc::{procs, Process, CPUS},
    spinlock::Mutex,
    sync::OnceLock,
};
use core::ops::{Deref, DerefMut};

pub static LOG: OnceLock<Mutex<Log>> = OnceLock::new();

pub fn log() -> &'static Mutex<Log> {
    LOG.get_or_init(|| Mutex::new(Log::new(ROOTDEV), "log"))
}

#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
struct LogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

pub struct Log {
    start: u32,
    size: u32,
    dev: u32,
    outstanding: u32,
    committing: bool,
    lh: LogHeader,
}

impl Log {
    fn new(dev: u32) -> Self {
        let sb = SB.get().unwrap();
        let mut log = Self {
            start: sb.logstart,
            size: sb.nlog,
            dev,
            outstanding: 0,
            committing: false,
            lh: LogHeader { n: 0, block: [0; LOGSIZE] },
        };
        log.recover();
        log
    }

    fn recover(&mut self) {
        self.read_head();
        self.install_trans(true); // if committed, copy log to disk
        self.lh.n = 0;
        self.write_head(); // clear the log
    }

    fn read_head(&mut self) {
        let buf = BCACHE.read(self.dev, self.start);
        let lh = buf.align_to::<LogHeader>().get(0).unwrap();
        self.lh = *lh;
    }

    fn install_trans(&self, recovering: bool) {
        for tail in 0..self.lh.n {
            let lbuf = BCACHE.read(self.dev, self.start + tail + 1);
            let mut dbuf = BCACHE.read(self.dev, self.lh.block[tail as usize]);
            dbuf.copy_from_slice(lbuf.deref().deref());
            dbuf.write();
            if !recovering {
                dbuf.unpin();
            }
        }
    }

    /// Writing the header is the actual commit point.
    fn write_head(&self) {
        let mut buf = BCACHE.read(self.dev, self.start);
        let hb = buf.align_to_mut::<LogHeader>().get_mut(0).unwrap();
        *hb = self.lh;
        buf.write();
    }

    fn write_log(&mut self) {
        for tail in 0..self.lh.n {
            let mut to = BCACHE.read(self.dev, self.start + tail + 1);
            let from = BCACHE.read(self.dev, self.lh.block[tail as usize]);
            to.copy_from_slice(from.deref().deref());
            to.write();
        }
    }

    fn commit(&mut self) {
        if self.lh.n > 0 {
            self.write_log();
            self.write_head();
            self.install_trans(false);
            self.lh.n = 0;
            self.write_head();
        }
    }
}

impl Mutex<Log> {
    /// Sanity-check that a log header block can actually hold
    /// `LogHeader`; called once right after the log is first touched.
    pub fn init(&self) {
        assert!(core::mem::size_of::<LogHeader>() <= BSIZE, "initlog: too big logheader");
    }

    /// Called once at the start of every file-system syscall.
    pub fn begin_op(&self) {
        let mut guard = self.lock();
        let p = CPUS.my_proc().unwrap();
        loop {
            if guard.committing {
                guard = p.sleep(guard.deref() as *const _ as usize, guard);
            } else if (guard.lh.n as usize + (guard.outstanding + 1) as usize * MAXOPBLOCKS)
                > LOGSIZE
            {
                // this op might exhaust log space; wait for a commit.
                guard = p.sleep(guard.deref() as *const _ as usize, guard);
            } else {
                guard.outstanding += 1;
                break;
            }
        }
    }

    /// Called at the end of every file-system syscall; commits if this was
    /// the last outstanding one.
    pub fn end_op(&self) {
        let mut do_commit: Option<*mut Log> = None;

        {
            let mut guard = self.lock();
            guard.outstanding -= 1;
            assert!(!guard.committing, "end_op: already committing");
            if guard.outstanding == 0 {
                do_commit = Some(guard.deref_mut() as *mut _);
                guard.committing = true;
            } else {
                // begin_op() may be waiting for log space, which decrementing
                // outstanding has just freed up some of.
                procs().wakeup(guard.deref() as *const _ as usize);
            }
        }

        if let Some(log) = do_commit {
            // commit without holding any lock: committing may itself
            // touch the buffer cache, and we must not sleep while locked.
            unsafe { (*log).commit() };
            let mut guard = self.lock();
            guard.committing = false;
            procs().wakeup(guard.deref() as *const _ as usize);
        }
    }

    /// Record that the caller modified `b` and is done with it; the actual
    /// disk write happens at commit time. Absorbs repeat writes to the
    /// same block within one transaction instead of logging it twice.
    pub fn write(&self, b: BufGuard) {
        let mut guard = self.lock();
        assert!(
            (guard.lh.n as usize) < LOGSIZE && guard.lh.n < guard.size - 1,
            "too big a transaction"
        );
        assert!(guard.outstanding >= 1, "log write outside of transaction");

        let blockno = b.blockno();
        for i in 0..guard.lh.n {
            if guard.lh.block[i as usize] == blockno {
                return; // log absorption
            }
        }
        let n = guard.lh.n as usize;
        guard.lh.block[n] = blockno;
        b.pin();
        guard.lh.n += 1;
    }
}
