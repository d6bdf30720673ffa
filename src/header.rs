//! Basic Header Segment (BHS) accessors
//!
//! Fixed-offset, big-endian fields inside the 48-byte iSCSI header
//! (RFC 3720 Section 10.2.1). Setters are plain overwrites and can run in
//! any order once the PDU has been allocated.
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!    +---------------+---------------+---------------+---------------+
//!   0|.|I| Opcode    |F|  Opcode-specific fields                     |
//!    +---------------+---------------+---------------+---------------+
//!   4|TotalAHSLength | DataSegmentLength                             |
//!    +---------------+---------------+---------------+---------------+
//!   8| LUN or ISID / opcode-specific fields                          |
//!  12|                                                               |
//!    +---------------+---------------+---------------+---------------+
//!  16| Initiator Task Tag                                            |
//!    +---------------+---------------+---------------+---------------+
//!  20| TTT / Expected Data Transfer Length                           |
//!  24| CmdSN                                                         |
//!  28| ExpStatSN                                                     |
//!  32| CDB (16 bytes)             / DataSN at 36, BufferOffset at 40 |
//!  44|                                                               |
//!    +---------------+---------------+---------------+---------------+
//! ```

use crate::error::{IscsiError, IscsiResult};
use crate::scsi::ScsiTask;
use byteorder::{BigEndian, ByteOrder};

/// BHS (Basic Header Segment) size in bytes
pub const BHS_SIZE: usize = 48;

/// Maximum CDB length carried in the BHS
pub const CDB_SIZE: usize = 16;

/// Immediate delivery bit, OR-ed into byte 0
pub const IMMEDIATE: u8 = 0x40;

/// Low 6 bits of byte 0
pub const OPCODE_MASK: u8 = 0x3F;

/// Low 24 bits of the word at offset 4
pub const DATA_SEGMENT_LENGTH_MASK: u32 = 0x00FF_FFFF;

/// Byte offsets of BHS fields
pub mod offset {
    pub const OPCODE: usize = 0;
    pub const FLAGS: usize = 1;
    pub const TOTAL_AHS_LENGTH: usize = 4;
    pub const DATA_SEGMENT_LENGTH: usize = 4;
    pub const ISID: usize = 8;
    pub const LUN: usize = 9;
    pub const ITT: usize = 16;
    pub const TTT: usize = 20;
    pub const EXP_XFER_LEN: usize = 20;
    pub const CMD_SN: usize = 24;
    pub const EXP_STAT_SN: usize = 28;
    pub const CDB: usize = 32;
    pub const DATA_SN: usize = 36;
    pub const BUFFER_OFFSET: usize = 40;
}

/// Round a byte count up to the next 4-byte boundary
pub fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Number of data-segment bytes present on the wire for a received header:
/// the declared length masked to 24 bits and rounded up to 4 bytes.
pub fn data_segment_size(hdr: &[u8]) -> IscsiResult<usize> {
    if hdr.len() < BHS_SIZE {
        return Err(IscsiError::InvalidPdu(format!(
            "header too short: {} bytes, need at least {}",
            hdr.len(),
            BHS_SIZE
        )));
    }
    let declared = BigEndian::read_u32(&hdr[offset::DATA_SEGMENT_LENGTH..]) & DATA_SEGMENT_LENGTH_MASK;
    Ok(pad4(declared as usize))
}

/// The 48-byte BHS of one PDU
#[derive(Clone, PartialEq, Eq)]
pub struct BasicHeader {
    bytes: [u8; BHS_SIZE],
}

impl Default for BasicHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BasicHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicHeader")
            .field("bytes", &hex::encode(self.bytes))
            .finish()
    }
}

impl BasicHeader {
    /// Zero-filled header
    pub fn new() -> Self {
        BasicHeader { bytes: [0u8; BHS_SIZE] }
    }

    /// Copy the first 48 bytes of a received header
    pub fn from_bytes(buf: &[u8]) -> IscsiResult<Self> {
        if buf.len() < BHS_SIZE {
            return Err(IscsiError::InvalidPdu(format!(
                "header too short: {} bytes, need at least {}",
                buf.len(),
                BHS_SIZE
            )));
        }
        let mut bytes = [0u8; BHS_SIZE];
        bytes.copy_from_slice(&buf[..BHS_SIZE]);
        Ok(BasicHeader { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; BHS_SIZE] {
        &self.bytes
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    /// Overwrite byte 0 with a raw opcode (clears the immediate bit)
    pub fn set_opcode(&mut self, opcode: u8) {
        self.bytes[offset::OPCODE] = opcode;
    }

    pub fn set_immediate(&mut self) {
        self.bytes[offset::OPCODE] |= IMMEDIATE;
    }

    pub fn set_pduflags(&mut self, flags: u8) {
        self.bytes[offset::FLAGS] = flags;
    }

    /// Only the low byte of the LUN is encoded (byte 9).
    pub fn set_lun(&mut self, lun: u32) {
        self.bytes[offset::LUN] = lun as u8;
    }

    pub fn set_isid(&mut self, isid: &[u8; 6]) {
        self.bytes[offset::ISID..offset::ISID + 6].copy_from_slice(isid);
    }

    /// Write the low 24 bits of `len`, leaving TotalAHSLength untouched.
    pub fn set_data_segment_length(&mut self, len: u32) {
        BigEndian::write_u24(
            &mut self.bytes[offset::DATA_SEGMENT_LENGTH + 1..offset::DATA_SEGMENT_LENGTH + 4],
            len & DATA_SEGMENT_LENGTH_MASK,
        );
    }

    pub fn set_itt(&mut self, itt: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::ITT..], itt);
    }

    pub fn set_ttt(&mut self, ttt: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::TTT..], ttt);
    }

    pub fn set_expxferlen(&mut self, expxferlen: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::EXP_XFER_LEN..], expxferlen);
    }

    pub fn set_cmdsn(&mut self, cmdsn: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::CMD_SN..], cmdsn);
    }

    pub fn set_expstatsn(&mut self, expstatsn: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::EXP_STAT_SN..], expstatsn);
    }

    pub fn set_datasn(&mut self, datasn: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::DATA_SN..], datasn);
    }

    pub fn set_bufferoffset(&mut self, bufferoffset: u32) {
        BigEndian::write_u32(&mut self.bytes[offset::BUFFER_OFFSET..], bufferoffset);
    }

    /// Zero the 16-byte CDB area, then copy in the task's CDB.
    pub fn set_cdb(&mut self, task: &ScsiTask) {
        let cdb = task.cdb();
        let area = &mut self.bytes[offset::CDB..offset::CDB + CDB_SIZE];
        area.fill(0);
        area[..cdb.len()].copy_from_slice(cdb);
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn opcode(&self) -> u8 {
        self.bytes[offset::OPCODE] & OPCODE_MASK
    }

    pub fn is_immediate(&self) -> bool {
        self.bytes[offset::OPCODE] & IMMEDIATE != 0
    }

    pub fn pduflags(&self) -> u8 {
        self.bytes[offset::FLAGS]
    }

    pub fn total_ahs_length(&self) -> u8 {
        self.bytes[offset::TOTAL_AHS_LENGTH]
    }

    /// Declared (unpadded) data segment length
    pub fn data_segment_length(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::DATA_SEGMENT_LENGTH..]) & DATA_SEGMENT_LENGTH_MASK
    }

    /// Declared data segment length rounded up to the 4-byte wire boundary
    pub fn padded_data_segment_length(&self) -> usize {
        pad4(self.data_segment_length() as usize)
    }

    pub fn lun(&self) -> u8 {
        self.bytes[offset::LUN]
    }

    pub fn isid(&self) -> [u8; 6] {
        let mut isid = [0u8; 6];
        isid.copy_from_slice(&self.bytes[offset::ISID..offset::ISID + 6]);
        isid
    }

    pub fn itt(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::ITT..])
    }

    pub fn ttt(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::TTT..])
    }

    pub fn cmdsn(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::CMD_SN..])
    }

    pub fn expstatsn(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::EXP_STAT_SN..])
    }

    pub fn cdb(&self) -> &[u8] {
        &self.bytes[offset::CDB..offset::CDB + CDB_SIZE]
    }

    pub fn datasn(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::DATA_SN..])
    }

    pub fn bufferoffset(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[offset::BUFFER_OFFSET..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_offsets_big_endian() {
        let mut hdr = BasicHeader::new();
        hdr.set_itt(0x0102_0304);
        hdr.set_ttt(0x1112_1314);
        hdr.set_cmdsn(0x2122_2324);
        hdr.set_expstatsn(0x3132_3334);
        hdr.set_datasn(0x4142_4344);
        hdr.set_bufferoffset(0x5152_5354);

        let b = hdr.as_bytes();
        assert_eq!(&b[16..20], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&b[20..24], &[0x11, 0x12, 0x13, 0x14]);
        assert_eq!(&b[24..28], &[0x21, 0x22, 0x23, 0x24]);
        assert_eq!(&b[28..32], &[0x31, 0x32, 0x33, 0x34]);
        assert_eq!(&b[36..40], &[0x41, 0x42, 0x43, 0x44]);
        assert_eq!(&b[40..44], &[0x51, 0x52, 0x53, 0x54]);
    }

    #[test]
    fn test_expxferlen_shares_ttt_slot() {
        let mut hdr = BasicHeader::new();
        hdr.set_ttt(0xFFFF_FFFF);
        hdr.set_expxferlen(4096);
        assert_eq!(hdr.ttt(), 4096);
    }

    #[test]
    fn test_lun_truncated_to_low_byte() {
        let mut hdr = BasicHeader::new();
        hdr.set_lun(0x0000_0105);
        assert_eq!(hdr.as_bytes()[9], 0x05);
        assert_eq!(hdr.as_bytes()[8], 0x00);
        assert_eq!(hdr.lun(), 0x05);
    }

    #[test]
    fn test_immediate_is_or_ed() {
        let mut hdr = BasicHeader::new();
        hdr.set_opcode(0x03);
        hdr.set_immediate();
        assert_eq!(hdr.as_bytes()[0], 0x43);
        assert_eq!(hdr.opcode(), 0x03);
        assert!(hdr.is_immediate());
    }

    #[test]
    fn test_data_segment_length_keeps_ahs_byte() {
        let mut hdr = BasicHeader::new();
        hdr.bytes[4] = 0x07;
        hdr.set_data_segment_length(0x0012_3456);
        assert_eq!(&hdr.as_bytes()[4..8], &[0x07, 0x12, 0x34, 0x56]);
        assert_eq!(hdr.data_segment_length(), 0x0012_3456);
        assert_eq!(hdr.total_ahs_length(), 0x07);
    }

    #[test]
    fn test_data_segment_size_rounds_up() {
        for len in [0u32, 1, 2, 3, 4, 5, 511, 512, 0x00FF_FFFD] {
            let mut hdr = BasicHeader::new();
            hdr.set_data_segment_length(len);
            let expected = ((len + 3) & !3) as usize;
            assert_eq!(data_segment_size(hdr.as_bytes()).unwrap(), expected);
            assert_eq!(hdr.padded_data_segment_length(), expected);
        }
    }

    #[test]
    fn test_data_segment_size_ignores_ahs_byte() {
        let mut raw = [0u8; BHS_SIZE];
        raw[4..8].copy_from_slice(&[0xFF, 0x00, 0x00, 0x05]);
        assert_eq!(data_segment_size(&raw).unwrap(), 8);
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(data_segment_size(&[0u8; 20]).is_err());
        assert!(BasicHeader::from_bytes(&[0u8; 47]).is_err());
    }

    #[test]
    fn test_cdb_zero_fills_tail() {
        let mut hdr = BasicHeader::new();
        hdr.bytes[32..48].fill(0xEE);
        let task = ScsiTask::new(&[0x12, 0x00, 0x00, 0x00, 0x60, 0x00]).unwrap();
        hdr.set_cdb(&task);
        assert_eq!(&hdr.cdb()[..6], &[0x12, 0x00, 0x00, 0x00, 0x60, 0x00]);
        assert!(hdr.cdb()[6..].iter().all(|&b| b == 0));
    }
}
