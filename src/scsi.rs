//! SCSI task abstraction
//!
//! The PDU engine does not interpret CDBs. A [`ScsiTask`] only carries the
//! command descriptor block (at most 16 bytes) and transfer direction/length
//! so it can be encoded into a SCSI Command PDU.

use crate::error::{IscsiError, IscsiResult};
use crate::header::CDB_SIZE;
use byteorder::{BigEndian, ByteOrder};
use std::any::Any;

/// SCSI command opcodes with CDB builders below
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiOpcode {
    TestUnitReady = 0x00,
    Inquiry = 0x12,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2A,
}

/// Direction of the data transfer, seen from the initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XferDir {
    #[default]
    None,
    Read,
    Write,
}

/// A SCSI command to be carried in a SCSI Command PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScsiTask {
    cdb: [u8; CDB_SIZE],
    cdb_size: usize,
    xfer_dir: XferDir,
    expxferlen: u32,
}

impl ScsiTask {
    /// Wrap a raw CDB. Fails if it is longer than 16 bytes.
    pub fn new(cdb: &[u8]) -> IscsiResult<Self> {
        if cdb.len() > CDB_SIZE {
            return Err(IscsiError::InvalidCdb(cdb.len()));
        }
        let mut buf = [0u8; CDB_SIZE];
        buf[..cdb.len()].copy_from_slice(cdb);
        Ok(ScsiTask {
            cdb: buf,
            cdb_size: cdb.len(),
            xfer_dir: XferDir::None,
            expxferlen: 0,
        })
    }

    /// Set the transfer direction and expected transfer length
    pub fn with_transfer(mut self, dir: XferDir, expxferlen: u32) -> Self {
        self.xfer_dir = dir;
        self.expxferlen = expxferlen;
        self
    }

    pub fn cdb(&self) -> &[u8] {
        &self.cdb[..self.cdb_size]
    }

    pub fn xfer_dir(&self) -> XferDir {
        self.xfer_dir
    }

    pub fn expxferlen(&self) -> u32 {
        self.expxferlen
    }

    pub fn test_unit_ready() -> Self {
        Self::from_array([ScsiOpcode::TestUnitReady as u8, 0, 0, 0, 0, 0])
    }

    pub fn inquiry(alloc_len: u16) -> Self {
        let mut cdb = [0u8; 6];
        cdb[0] = ScsiOpcode::Inquiry as u8;
        BigEndian::write_u16(&mut cdb[3..5], alloc_len);
        Self::from_array(cdb).with_transfer(XferDir::Read, alloc_len as u32)
    }

    pub fn read_capacity10() -> Self {
        let mut cdb = [0u8; 10];
        cdb[0] = ScsiOpcode::ReadCapacity10 as u8;
        Self::from_array(cdb).with_transfer(XferDir::Read, 8)
    }

    pub fn read10(lba: u32, blocks: u16, block_size: u32) -> Self {
        Self::rw10(ScsiOpcode::Read10, lba, blocks)
            .with_transfer(XferDir::Read, blocks as u32 * block_size)
    }

    pub fn write10(lba: u32, blocks: u16, block_size: u32) -> Self {
        Self::rw10(ScsiOpcode::Write10, lba, blocks)
            .with_transfer(XferDir::Write, blocks as u32 * block_size)
    }

    fn rw10(op: ScsiOpcode, lba: u32, blocks: u16) -> Self {
        let mut cdb = [0u8; 10];
        cdb[0] = op as u8;
        BigEndian::write_u32(&mut cdb[2..6], lba);
        BigEndian::write_u16(&mut cdb[7..9], blocks);
        Self::from_array(cdb)
    }

    fn from_array<const N: usize>(cdb: [u8; N]) -> Self {
        let mut buf = [0u8; CDB_SIZE];
        buf[..N].copy_from_slice(&cdb);
        ScsiTask {
            cdb: buf,
            cdb_size: N,
            xfer_dir: XferDir::None,
            expxferlen: 0,
        }
    }
}

/// Per-command context attached to a SCSI Command PDU.
///
/// `private` is handed through to reply handlers unexamined.
pub struct ScsiCbData {
    pub task: ScsiTask,
    pub private: Option<Box<dyn Any>>,
}

impl ScsiCbData {
    pub fn new(task: ScsiTask) -> Self {
        ScsiCbData { task, private: None }
    }

    pub fn with_private<T: Any>(mut self, private: T) -> Self {
        self.private = Some(Box::new(private));
        self
    }

    /// Borrow the private context as `T`, if it is one
    pub fn private_ref<T: Any>(&self) -> Option<&T> {
        self.private.as_ref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for ScsiCbData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScsiCbData")
            .field("task", &self.task)
            .field("private", &self.private.is_some())
            .finish()
    }
}
