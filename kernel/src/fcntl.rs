//! `open(2)` flag bits. Values match the historical xv6 numbering so a
//! `usize` straight off a syscall's argument register decodes directly.
pub const O_RDONLY: usize = 0x000;
pub const O_WRONLY: usize = 0x001;
pub const O_RDWR: usize = 0x002;
pub const O_CREATE: usize = 0x200;
pub const O_TRUNC: usize = 0x400;

#[derive(Clone, Copy, Debug, Default)]
pub struct OMode {
    read: bool,
    write: bool,
    create: bool,
    truncate: bool,
}

impl OMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the raw flags word a syscall argument carries.
    pub fn from_usize(bits: usize) -> Self {
        let mut m = Self::new();
        m.create = bits & O_CREATE != 0;
        m.truncate = bits & O_TRUNC != 0;
        match bits & O_RDWR {
            O_RDWR => {
                m.read = true;
                m.write = true;
            }
            O_WRONLY => m.write = true,
            _ => m.read = true,
        }
        m
    }

    pub fn read(&mut self, on: bool) -> &mut Self {
        self.read = on;
        self
    }
    pub fn write(&mut self, on: bool) -> &mut Self {
        self.write = on;
        self
    }
    pub fn create(&mut self, on: bool) -> &mut Self {
        self.create = on;
        self
    }
    pub fn truncate(&mut self, on: bool) -> &mut Self {
        self.truncate = on;
        self
    }

    pub fn is_read(&self) -> bool {
        self.read
    }
    pub fn is_write(&self) -> bool {
        self.write
    }
    pub fn is_rdonly(&self) -> bool {
        self.read && !self.write
    }
    pub fn is_create(&self) -> bool {
        self.create
    }
    pub fn is_trunc(&self) -> bool {
        self.truncate
    }
}
