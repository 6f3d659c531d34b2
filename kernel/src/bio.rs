//! Buffer cache: a fixed pool of `NBUF` sleep-locked blocks, kept on an
//! LRU list so a new `read()` reuses the block nobody holds a reference to
//! anymore. Callers take a block with `read`, may modify it in place, and
//! release it with `drop`; `write` pushes it to disk while still held.
//!
//! Only one process at a time may hold a given block (enforced by the
//! sleep lock embedded in each slot), so callers must not hold one longer
//! than necessary.
use crate::{
    fs::BSIZE,
    param::NBUF,
    sleeplock::{SleepLock, SleepLockGuard},
    spinlock::Mutex,
    virtio_disk::DISK,
};
use alloc::{
    rc::{Rc, Weak},
    sync::Arc,
};
use array_macro::array;
use core::{
    cell::RefCell,
    ops::{Deref, DerefMut},
};

pub static BCACHE: BCache = BCache::new();

pub struct BCache {
    buf: [SleepLock<Data>; NBUF],
    lru: Mutex<Lru>,
}

pub struct Data {
    pub data: [u8; BSIZE],
    pub disk: bool, // device currently owns this buffer
    blockno: u32,
    dev: u32,
    valid: bool, // has data been read from disk?
}

pub struct Lru {
    head: Option<Rc<Buf>>,
    tail: Option<Weak<Buf>>,
    n: usize,
}

pub struct Buf {
    data: Arc<&'static SleepLock<Data>>,
    meta: RefCell<Meta>,
}

#[derive(Default)]
struct Meta {
    dev: u32,
    blockno: u32,
    next: Option<Rc<Buf>>,
    prev: Option<Weak<Buf>>,
}

pub struct BufGuard {
    data_guard: Option<SleepLockGuard<'static, Data>>,
    _ref: Option<Arc<&'static SleepLock<Data>>>,
    _link: Option<Rc<Buf>>,
}

impl Deref for BufGuard {
    type Target = SleepLockGuard<'static, Data>;
    fn deref(&self) -> &Self::Target {
        self.data_guard.as_ref().unwrap()
    }
}

impl DerefMut for BufGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_guard.as_mut().unwrap()
    }
}

impl BufGuard {
    /// Write this block's contents to disk. Must still be locked.
    pub fn write(&mut self) {
        if !self.holding() {
            panic!("bwrite");
        }
        self.data_guard = DISK.rw(self.data_guard.take(), true);
    }

    /// Keep this block cached even after the last `BufGuard` drops, by
    /// holding an extra reference the LRU recycler will never see drop to
    /// one (used by the log while it owns a block across several ops).
    pub fn pin(&self) {
        unsafe { Arc::increment_strong_count(Arc::as_ptr(self._ref.as_ref().unwrap())) }
    }
    pub fn unpin(&self) {
        unsafe { Arc::decrement_strong_count(Arc::as_ptr(self._ref.as_ref().unwrap())) }
    }

    pub fn align_to<U>(&self) -> &[U] {
        let (head, body, _) = unsafe { self.data_guard.as_ref().unwrap().data.align_to::<U>() };
        assert!(head.is_empty(), "buffer was not aligned");
        body
    }
    pub fn align_to_mut<U>(&mut self) -> &mut [U] {
        let (head, body, _) = unsafe { self.data_guard.as_mut().unwrap().data.align_to_mut::<U>() };
        assert!(head.is_empty(), "buffer was not aligned");
        body
    }
}

impl Drop for BufGuard {
    fn drop(&mut self) {
        if !self.holding() {
            panic!("brelse: not held");
        }
        self.data_guard.take();
        self._ref.take();
        BCACHE.lru.lock().relse(self._link.take().unwrap())
    }
}

impl Buf {
    fn new(data: Arc<&'static SleepLock<Data>>) -> Self {
        Self {
            data,
            meta: Default::default(),
        }
    }
}

impl Lru {
    const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            n: 0,
        }
    }

    fn add(&mut self, data: &'static SleepLock<Data>) {
        let data = Arc::new(data);
        let buf = Rc::new(Buf::new(data));
        match self.tail.take() {
            Some(old_tail) => {
                old_tail.upgrade().unwrap().meta.borrow_mut().next = Some(Rc::clone(&buf));
                buf.meta.borrow_mut().prev = Some(old_tail);
            }
            None => {
                self.head = Some(Rc::clone(&buf));
            }
        }
        self.tail = Some(Rc::downgrade(&buf));
        self.n += 1;
    }

    fn get(&self, dev: u32, blockno: u32) -> BufGuard {
        // already cached?
        for b in self.iter() {
            if b.meta.borrow().dev == dev && b.meta.borrow().blockno == blockno {
                return BufGuard {
                    data_guard: Some(b.data.lock()),
                    _ref: Some(Arc::clone(&b.data)),
                    _link: Some(b),
                };
            }
        }

        // not cached: recycle the least recently used unused block.
        for b in self.iter().rev() {
            if Arc::strong_count(&b.data) == 1 {
                b.meta.borrow_mut().dev = dev;
                b.meta.borrow_mut().blockno = blockno;
                let mut sleeplock = b.data.lock();
                sleeplock.valid = false;
                sleeplock.blockno = blockno;
                sleeplock.dev = dev;
                return BufGuard {
                    data_guard: Some(sleeplock),
                    _ref: Some(Arc::clone(&b.data)),
                    _link: Some(b),
                };
            }
        }
        panic!("no buffers");
    }

    fn relse(&mut self, buf: Rc<Buf>) {
        if Arc::strong_count(&buf.data) == 1 {
            let next = buf.meta.borrow_mut().next.take();
            let prev = buf.meta.borrow_mut().prev.take();
            if let Some(ref n) = next {
                n.meta.borrow_mut().prev = prev.clone();
            }
            if let Some(ref p) = prev {
                p.upgrade().unwrap().meta.borrow_mut().next = next.clone();
            }

            match self.head.take() {
                Some(old_head) => {
                    old_head.meta.borrow_mut().prev = Some(Rc::downgrade(&buf));
                    buf.meta.borrow_mut().next = Some(old_head);
                }
                None => {
                    self.tail = Some(Rc::downgrade(&buf));
                }
            }
            self.head = Some(buf);
        }
    }

    fn iter(&self) -> Iter {
        Iter {
            head: self.head.clone(),
            tail: self.tail.as_ref().and_then(|tail| tail.upgrade()),
        }
    }
}

struct Iter {
    head: Option<Rc<Buf>>,
    tail: Option<Rc<Buf>>,
}

impl Iterator for Iter {
    type Item = Rc<Buf>;
    fn next(&mut self) -> Option<Self::Item> {
        match self.head.take() {
            Some(old_head) => {
                self.head = old_head.meta.borrow().next.clone();
                Some(old_head)
            }
            None => None,
        }
    }
}

impl DoubleEndedIterator for Iter {
    fn next_back(&mut self) -> Option<Self::Item> {
        match self.tail.take() {
            Some(old_tail) => {
                self.tail = old_tail.meta.borrow().prev.as_ref().and_then(|p| p.upgrade());
                Some(old_tail)
            }
            None => None,
        }
    }
}

impl Data {
    const fn new() -> Self {
        Self {
            data: [0; BSIZE],
            disk: false,
            blockno: 0,
            dev: 0,
            valid: false,
        }
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }
}

impl Deref for Data {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl BCache {
    const fn new() -> Self {
        Self {
            buf: array![_ => SleepLock::new(Data::new(), "buffer"); NBUF],
            lru: Mutex::new(Lru::new(), "bcache"),
        }
    }

    /// Return a locked buffer holding the contents of the given block.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard {
        let mut b = self.lru.lock().get(dev, blockno);
        if !b.valid {
            b.data_guard = DISK.rw(b.data_guard.take(), false);
            b.valid = true;
        }
        b
    }
}

pub fn init() {
    let mut lru = BCACHE.lru.lock();
    for b in BCACHE.buf.iter() {
        lru.add(b);
    }
}
