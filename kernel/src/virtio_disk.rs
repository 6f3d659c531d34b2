//! Driver for qemu's virtio-blk device over its legacy MMIO interface.
//! Lays out the descriptor table / avail ring / used ring as one static,
//! page-aligned struct so no runtime DMA-buffer allocation is needed; see
//! the virtio 1.1 spec §2.6 for the ring layout this mirrors.
use crate::{
    bio::Data,
    fs::BSIZE,
    memlayout::VIRTIO0,
    proc::{procs, Process, CPUS},
    riscv::{PGSHIFT, PGSIZE},
    sleeplock::SleepLockGuard,
    spinlock::Mutex,
};
use bitflags::bitflags;
use core::{
    convert::TryInto,
    sync::atomic::{fence, Ordering},
};

pub static DISK: Mutex<Disk> = Mutex::new(Disk::new(), "virtio_disk");

#[repr(usize)]
enum VirtioMMIO {
    MagicValue = 0x000,
    Version = 0x004,
    DeviceId = 0x008,
    VenderId = 0x00c,
    DeviceFeatures = 0x010,
    DriverFeatures = 0x020,
    GuestPageSize = 0x028,
    QueueSel = 0x030,
    QueueNumMax = 0x034,
    QueueNum = 0x038,
    QueuePfn = 0x040,
    QueueNotify = 0x050,
    InterruptStatus = 0x060,
    InterruptAck = 0x064,
    Status = 0x070,
}

impl VirtioMMIO {
    fn read(self) -> u32 {
        unsafe { core::ptr::read_volatile((VIRTIO0 + self as usize) as *const u32) }
    }
    unsafe fn write(self, data: u32) {
        core::ptr::write_volatile((VIRTIO0 + self as usize) as *mut u32, data);
    }
}

bitflags! {
    struct VirtioStatus: u32 {
        const ACKNOWLEDGE = 0b0001;
        const DRIVER = 0b0010;
        const DRIVER_OK = 0b0100;
        const FEATURES_OK = 0b1000;
    }
}

bitflags! {
    struct VirtioFeatures: u32 {
        const BLK_F_RO = 1 << 5;
        const BLK_F_SCSI = 1 << 7;
        const BLK_F_CONFIG_WCE = 1 << 11;
        const BLK_F_MQ = 1 << 12;
        const F_ANY_LAYOUT = 1 << 27;
        const RING_F_INDIRECT_DESC = 1 << 28;
        const RING_F_EVENT_IDX = 1 << 29;
    }
}

// must be a power of 2.
const NUM: usize = 8;

#[repr(C, align(4096))]
pub struct Disk {
    pad1: PadPGA,
    desc: [VirtqDesc; NUM],
    avail: VirtqAvail,

    pad2: PadPGA,
    used: VirtqUsed,

    pad3: PadPGA,
    free: [bool; NUM],
    used_idx: u16,

    info: [Info; NUM],
    ops: [VirtioBlkReq; NUM],
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(4096))]
struct PadPGA();

impl PadPGA {
    const fn new() -> Self {
        Self()
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: VirtqDescFlags,
    next: u16,
}

bitflags! {
    struct VirtqDescFlags: u16 {
        const FREED = 0b00;
        const NEXT = 0b01;
        const WRITE = 0b10;
    }
}

impl VirtqDesc {
    const fn new() -> Self {
        Self {
            addr: 0,
            len: 0,
            flags: VirtqDescFlags::FREED,
            next: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(2))]
struct VirtqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; NUM],
    unused: u16,
}

impl VirtqAvail {
    const fn new() -> Self {
        Self {
            flags: 0,
            idx: 0,
            ring: [0; NUM],
            unused: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct VirtqUsedElem {
    id: u32,
    len: u32,
}

impl VirtqUsedElem {
    const fn new() -> Self {
        Self { id: 0, len: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(4))]
struct VirtqUsed {
    flags: u16,
    idx: u16,
    ring: [VirtqUsedElem; NUM],
}

impl VirtqUsed {
    const fn new() -> Self {
        Self {
            flags: 0,
            idx: 0,
            ring: [VirtqUsedElem::new(); NUM],
        }
    }
}

/// Per-descriptor-chain bookkeeping, indexed by the head descriptor. `chan`
/// is the wakeup channel `intr()` notifies once the device is done with it.
#[derive(Clone, Copy)]
#[repr(C)]
struct Info {
    chan: usize,
    status: u8,
}

impl Info {
    const fn new() -> Self {
        Self { chan: 0, status: 0 }
    }
}

pub const VIRTIO_BLK_T_IN: u32 = 0;
pub const VIRTIO_BLK_T_OUT: u32 = 1;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct VirtioBlkReq {
    type_: u32,
    reserved: u32,
    sector: u64,
}

impl VirtioBlkReq {
    const fn new() -> Self {
        Self {
            type_: 0,
            reserved: 0,
            sector: 0,
        }
    }
}

impl Disk {
    const fn new() -> Self {
        Self {
            pad1: PadPGA::new(),
            desc: [VirtqDesc::new(); NUM],
            avail: VirtqAvail::new(),
            pad2: PadPGA::new(),
            used: VirtqUsed::new(),
            pad3: PadPGA::new(),
            free: [false; NUM],
            used_idx: 0,
            info: [Info::new(); NUM],
            ops: [VirtioBlkReq::new(); NUM],
        }
    }

    unsafe fn init(&mut self) {
        let mut status = VirtioStatus::empty();

        if VirtioMMIO::MagicValue.read() != 0x74726976
            || VirtioMMIO::Version.read() != 1
            || VirtioMMIO::DeviceId.read() != 2
            || VirtioMMIO::VenderId.read() != 0x554d4551
        {
            panic!("could not find virtio disk");
        }

        status.insert(VirtioStatus::ACKNOWLEDGE);
        VirtioMMIO::Status.write(status.bits());
        status.insert(VirtioStatus::DRIVER);
        VirtioMMIO::Status.write(status.bits());

        let features = VirtioFeatures::from_bits_truncate(VirtioMMIO::DeviceFeatures.read())
            - (VirtioFeatures::BLK_F_RO
                | VirtioFeatures::BLK_F_SCSI
                | VirtioFeatures::BLK_F_CONFIG_WCE
                | VirtioFeatures::BLK_F_MQ
                | VirtioFeatures::F_ANY_LAYOUT
                | VirtioFeatures::RING_F_EVENT_IDX
                | VirtioFeatures::RING_F_INDIRECT_DESC);
        VirtioMMIO::DriverFeatures.write(features.bits());

        status.insert(VirtioStatus::FEATURES_OK);
        VirtioMMIO::Status.write(status.bits());
        status.insert(VirtioStatus::DRIVER_OK);
        VirtioMMIO::Status.write(status.bits());

        VirtioMMIO::GuestPageSize.write(PGSIZE as _);

        VirtioMMIO::QueueSel.write(0);
        let max = VirtioMMIO::QueueNumMax.read();
        assert!(max != 0, "virtio disk has no queue 0");
        assert!(max >= NUM as u32, "virtio disk max queue too short");
        VirtioMMIO::QueueNum.write(NUM as _);
        VirtioMMIO::QueuePfn.write((self as *const _ as usize >> PGSHIFT) as _);

        self.free.iter_mut().for_each(|f| *f = true);

        // plic.rs and trap.rs arrange for interrupts from VIRTIO0_IRQ.
    }

    fn alloc_desc(&mut self) -> Option<usize> {
        self.free
            .iter_mut()
            .enumerate()
            .find(|(_, v)| **v)
            .map(|(i, v)| {
                *v = false;
                i
            })
    }

    fn free_desc(&mut self, i: usize) {
        assert!(i < NUM, "free_desc 1");
        assert!(!self.free[i], "free_desc 2");
        self.desc[i].addr = 0;
        self.desc[i].len = 0;
        self.desc[i].flags = VirtqDescFlags::empty();
        self.desc[i].next = 0;
        self.free[i] = true;
        procs().wakeup(&self.free[0] as *const _ as usize);
    }

    fn free_chain(&mut self, mut i: usize) {
        loop {
            let desc = self.desc[i];
            self.free_desc(i);
            if !(desc.flags & VirtqDescFlags::NEXT).is_empty() {
                i = desc.next as usize;
            } else {
                break;
            }
        }
    }

    fn alloc3_desc(&mut self, idx: &mut [usize; 3]) -> Result<(), ()> {
        for (i, idxi) in idx.iter_mut().enumerate() {
            match self.alloc_desc() {
                Some(ix) => *idxi = ix,
                None => {
                    for j in idx.iter().take(i) {
                        self.free_desc(*j);
                    }
                    return Err(());
                }
            }
        }
        Ok(())
    }
}

impl Mutex<Disk> {
    /// Issue one disk request and block until `intr()` reports it done.
    /// The caller's sleep lock on `data` stays held throughout, which is
    /// exactly what keeps the buffer pinned to this request.
    pub fn rw(
        &self,
        data: Option<SleepLockGuard<'static, Data>>,
        write: bool,
    ) -> Option<SleepLockGuard<'static, Data>> {
        let mut data = data.unwrap();
        let sector = data.blockno() as usize * (BSIZE / 512);
        let raw_data = data.data.as_mut_ptr();

        let mut guard = self.lock();
        let p = CPUS.my_proc().unwrap();

        let mut idx: [usize; 3] = [0; 3];
        loop {
            if guard.alloc3_desc(&mut idx).is_ok() {
                break;
            }
            guard = p.sleep(&guard.free[0] as *const _ as usize, guard);
        }

        let buf0 = &mut guard.ops[idx[0]];
        buf0.type_ = if write {
            VIRTIO_BLK_T_OUT
        } else {
            VIRTIO_BLK_T_IN
        };
        buf0.reserved = 0;
        buf0.sector = sector as u64;

        guard.desc[idx[0]].addr = buf0 as *mut _ as u64;
        guard.desc[idx[0]].len = core::mem::size_of::<VirtioBlkReq>().try_into().unwrap();
        guard.desc[idx[0]].flags = VirtqDescFlags::NEXT;
        guard.desc[idx[0]].next = idx[1].try_into().unwrap();

        guard.desc[idx[1]].addr = raw_data as u64;
        guard.desc[idx[1]].len = BSIZE.try_into().unwrap();
        guard.desc[idx[1]].flags = if write {
            VirtqDescFlags::empty()
        } else {
            VirtqDescFlags::WRITE
        };
        guard.desc[idx[1]].flags |= VirtqDescFlags::NEXT;
        guard.desc[idx[1]].next = idx[2].try_into().unwrap();

        guard.info[idx[0]].status = 0xff;
        guard.desc[idx[2]].addr = &mut guard.info[idx[0]].status as *mut _ as u64;
        guard.desc[idx[2]].len = 1;
        guard.desc[idx[2]].flags = VirtqDescFlags::WRITE;
        guard.desc[idx[2]].next = 0;

        data.disk = true;
        guard.info[idx[0]].chan = raw_data as usize;

        let i = guard.avail.idx as usize % NUM;
        guard.avail.ring[i] = idx[0].try_into().unwrap();

        fence(Ordering::SeqCst);
        guard.avail.idx += 1;
        fence(Ordering::SeqCst);

        unsafe {
            VirtioMMIO::QueueNotify.write(0);
        }

        while data.disk {
            guard = p.sleep(raw_data as usize, guard);
        }

        guard.free_chain(idx[0]);
        Some(data)
    }

    pub fn intr(&self) {
        let mut guard = self.lock();
        let intr_stat = VirtioMMIO::InterruptStatus.read();
        unsafe {
            VirtioMMIO::InterruptAck.write(intr_stat & 0x3);
        }

        fence(Ordering::SeqCst);

        while guard.used_idx != guard.used.idx {
            fence(Ordering::SeqCst);
            let id = guard.used.ring[guard.used_idx as usize % NUM].id as usize;

            if guard.info[id].status != 0 {
                panic!("disk intr status");
            }

            let chan = guard.info[id].chan;
            procs().wakeup(chan);

            guard.used_idx += 1;
        }
    }
}

pub fn init() {
    unsafe {
        DISK.get_mut().init();
    }
}
