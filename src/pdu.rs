//! iSCSI PDU (Protocol Data Unit) objects
//!
//! Outbound [`Pdu`]s bundle a BHS and data segment with the metadata needed
//! to match the target's reply; received PDUs are wrapped in [`InboundPdu`]
//! for the duration of one dispatch.
//! Based on RFC 3720: https://datatracker.ietf.org/doc/html/rfc3720

use crate::data::DataSegment;
use crate::error::{IscsiError, IscsiResult};
use crate::header::{BasicHeader, BHS_SIZE, DATA_SEGMENT_LENGTH_MASK, OPCODE_MASK};
use crate::scsi::ScsiCbData;
use bitflags::bitflags;

/// iSCSI PDU Opcodes (RFC 3720 Section 10)
pub mod opcode {
    // Initiator opcodes (initiator → target)
    pub const NOP_OUT: u8 = 0x00;
    pub const SCSI_COMMAND: u8 = 0x01;
    pub const TASK_MANAGEMENT_REQUEST: u8 = 0x02;
    pub const LOGIN_REQUEST: u8 = 0x03;
    pub const TEXT_REQUEST: u8 = 0x04;
    pub const SCSI_DATA_OUT: u8 = 0x05;
    pub const LOGOUT_REQUEST: u8 = 0x06;
    pub const SNACK_REQUEST: u8 = 0x10;

    // Target opcodes (target → initiator)
    pub const NOP_IN: u8 = 0x20;
    pub const SCSI_RESPONSE: u8 = 0x21;
    pub const TASK_MANAGEMENT_RESPONSE: u8 = 0x22;
    pub const LOGIN_RESPONSE: u8 = 0x23;
    pub const TEXT_RESPONSE: u8 = 0x24;
    pub const SCSI_DATA_IN: u8 = 0x25;
    pub const LOGOUT_RESPONSE: u8 = 0x26;
    pub const R2T: u8 = 0x31;
    pub const ASYNC_MESSAGE: u8 = 0x32;
    pub const REJECT: u8 = 0x3F;
}

/// iSCSI PDU flags carried in byte 1 (opcode-specific)
pub mod flags {
    pub const FINAL: u8 = 0x80;
    pub const CONTINUE: u8 = 0x40;

    // SCSI command flags
    pub const READ: u8 = 0x40;
    pub const WRITE: u8 = 0x20;

    // SCSI data-in: status present
    pub const STATUS: u8 = 0x01;

    // Login flags
    pub const TRANSIT: u8 = 0x80;
}

/// Typed view of the opcode byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    NopOut = opcode::NOP_OUT,
    ScsiCommand = opcode::SCSI_COMMAND,
    TaskManagementRequest = opcode::TASK_MANAGEMENT_REQUEST,
    LoginRequest = opcode::LOGIN_REQUEST,
    TextRequest = opcode::TEXT_REQUEST,
    ScsiDataOut = opcode::SCSI_DATA_OUT,
    LogoutRequest = opcode::LOGOUT_REQUEST,
    SnackRequest = opcode::SNACK_REQUEST,
    NopIn = opcode::NOP_IN,
    ScsiResponse = opcode::SCSI_RESPONSE,
    TaskManagementResponse = opcode::TASK_MANAGEMENT_RESPONSE,
    LoginResponse = opcode::LOGIN_RESPONSE,
    TextResponse = opcode::TEXT_RESPONSE,
    ScsiDataIn = opcode::SCSI_DATA_IN,
    LogoutResponse = opcode::LOGOUT_RESPONSE,
    R2t = opcode::R2T,
    AsyncMessage = opcode::ASYNC_MESSAGE,
    Reject = opcode::REJECT,
}

impl Opcode {
    /// Decode the low 6 bits of a BHS byte 0
    pub fn from_u8(val: u8) -> Option<Self> {
        match val & OPCODE_MASK {
            opcode::NOP_OUT => Some(Opcode::NopOut),
            opcode::SCSI_COMMAND => Some(Opcode::ScsiCommand),
            opcode::TASK_MANAGEMENT_REQUEST => Some(Opcode::TaskManagementRequest),
            opcode::LOGIN_REQUEST => Some(Opcode::LoginRequest),
            opcode::TEXT_REQUEST => Some(Opcode::TextRequest),
            opcode::SCSI_DATA_OUT => Some(Opcode::ScsiDataOut),
            opcode::LOGOUT_REQUEST => Some(Opcode::LogoutRequest),
            opcode::SNACK_REQUEST => Some(Opcode::SnackRequest),
            opcode::NOP_IN => Some(Opcode::NopIn),
            opcode::SCSI_RESPONSE => Some(Opcode::ScsiResponse),
            opcode::TASK_MANAGEMENT_RESPONSE => Some(Opcode::TaskManagementResponse),
            opcode::LOGIN_RESPONSE => Some(Opcode::LoginResponse),
            opcode::TEXT_RESPONSE => Some(Opcode::TextResponse),
            opcode::SCSI_DATA_IN => Some(Opcode::ScsiDataIn),
            opcode::LOGOUT_RESPONSE => Some(Opcode::LogoutResponse),
            opcode::R2T => Some(Opcode::R2t),
            opcode::ASYNC_MESSAGE => Some(Opcode::AsyncMessage),
            opcode::REJECT => Some(Opcode::Reject),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the opcode name for debugging
    pub fn name(self) -> &'static str {
        match self {
            Opcode::NopOut => "NOP-Out",
            Opcode::ScsiCommand => "SCSI Command",
            Opcode::TaskManagementRequest => "Task Management Request",
            Opcode::LoginRequest => "Login Request",
            Opcode::TextRequest => "Text Request",
            Opcode::ScsiDataOut => "SCSI Data-Out",
            Opcode::LogoutRequest => "Logout Request",
            Opcode::SnackRequest => "SNACK Request",
            Opcode::NopIn => "NOP-In",
            Opcode::ScsiResponse => "SCSI Response",
            Opcode::TaskManagementResponse => "Task Management Response",
            Opcode::LoginResponse => "Login Response",
            Opcode::TextResponse => "Text Response",
            Opcode::ScsiDataIn => "SCSI Data-In",
            Opcode::LogoutResponse => "Logout Response",
            Opcode::R2t => "Ready To Transfer",
            Opcode::AsyncMessage => "Async Message",
            Opcode::Reject => "Reject",
        }
    }
}

/// Name of a raw opcode byte, "Unknown" if it is not an iSCSI opcode
pub fn opcode_name(raw: u8) -> &'static str {
    Opcode::from_u8(raw).map_or("Unknown", Opcode::name)
}

bitflags! {
    /// Engine-side PDU flags; never put on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PduFlags: u32 {
        /// No reply is expected: destroy instead of registering once sent
        const DELETE_WHEN_SENT = 0x0000_0001;
        /// Reply handlers should not invoke the command callback
        const NO_CALLBACK = 0x0000_0002;
    }
}

/// An outbound PDU together with its reply-matching metadata
#[derive(Debug)]
pub struct Pdu {
    header: BasicHeader,
    outdata: DataSegment,
    indata: DataSegment,
    itt: u32,
    response_opcode: Opcode,
    flags: PduFlags,
    /// Per-command context, released together with the PDU
    pub scsi_cbdata: Option<ScsiCbData>,
}

impl Pdu {
    /// Zero-filled header with opcode, ISID (login requests only) and ITT set
    pub(crate) fn new(
        opcode: Opcode,
        response_opcode: Opcode,
        itt: u32,
        flags: PduFlags,
        isid: &[u8; 6],
    ) -> Self {
        let mut header = BasicHeader::new();
        header.set_opcode(opcode.as_u8());
        if opcode == Opcode::LoginRequest {
            header.set_isid(isid);
        }
        header.set_itt(itt);

        Pdu {
            header,
            outdata: DataSegment::new(),
            indata: DataSegment::new(),
            itt,
            response_opcode,
            flags,
            scsi_cbdata: None,
        }
    }

    pub fn itt(&self) -> u32 {
        self.itt
    }

    pub fn response_opcode(&self) -> Opcode {
        self.response_opcode
    }

    pub fn flags(&self) -> PduFlags {
        self.flags
    }

    pub fn header(&self) -> &BasicHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut BasicHeader {
        &mut self.header
    }

    /// Outbound data segment
    pub fn data(&self) -> &DataSegment {
        &self.outdata
    }

    /// Data gathered from replies (e.g. Data-In payload)
    pub fn indata(&self) -> &DataSegment {
        &self.indata
    }

    /// Append to the outbound data segment with 4-byte alignment and
    /// rewrite DataSegmentLength from the new unpadded length.
    ///
    /// Fails without touching the PDU if the result would not fit the
    /// 24-bit DataSegmentLength field.
    pub fn add_data(&mut self, bytes: &[u8]) -> IscsiResult<()> {
        let len = self.outdata.len() + bytes.len();
        if len > DATA_SEGMENT_LENGTH_MASK as usize {
            return Err(IscsiError::DataSegmentTooLong(len));
        }
        self.outdata.append(bytes, true)?;
        self.header.set_data_segment_length(self.outdata.len() as u32);
        Ok(())
    }

    /// Accumulate reply payload; no alignment is applied.
    pub fn add_indata(&mut self, bytes: &[u8]) -> IscsiResult<()> {
        self.indata.append(bytes, false)
    }

    /// Wire bytes: BHS followed by the padded data segment
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BHS_SIZE + self.outdata.storage_len());
        buf.extend_from_slice(self.header.as_bytes());
        buf.extend_from_slice(self.outdata.storage());
        buf
    }
}

/// A received PDU, borrowed for one dispatch call
#[derive(Debug, Clone)]
pub struct InboundPdu<'a> {
    header: BasicHeader,
    data: &'a [u8],
}

impl<'a> InboundPdu<'a> {
    /// Wrap an already-framed header and its (unpadded) data segment
    pub fn new(hdr: &[u8], data: &'a [u8]) -> IscsiResult<Self> {
        Ok(InboundPdu {
            header: BasicHeader::from_bytes(hdr)?,
            data,
        })
    }

    /// Split a contiguous buffer holding BHS + data segment (+ padding).
    ///
    /// The returned data slice holds exactly DataSegmentLength bytes.
    pub fn from_bytes(buf: &'a [u8]) -> IscsiResult<Self> {
        let header = BasicHeader::from_bytes(buf)?;
        let data_len = header.data_segment_length() as usize;
        if buf.len() < BHS_SIZE + data_len {
            return Err(IscsiError::InvalidPdu(format!(
                "PDU incomplete: {} bytes, need {} (BHS={}, data={})",
                buf.len(),
                BHS_SIZE + data_len,
                BHS_SIZE,
                data_len
            )));
        }
        Ok(InboundPdu {
            header,
            data: &buf[BHS_SIZE..BHS_SIZE + data_len],
        })
    }

    pub fn header(&self) -> &BasicHeader {
        &self.header
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Raw opcode (low 6 bits of byte 0)
    pub fn opcode_raw(&self) -> u8 {
        self.header.opcode()
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.header.opcode())
    }

    pub fn itt(&self) -> u32 {
        self.header.itt()
    }

    pub fn total_ahs_length(&self) -> u8 {
        self.header.total_ahs_length()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::ScsiTask;

    const ISID: [u8; 6] = [0x80, 0x01, 0x02, 0x03, 0x04, 0x05];

    #[test]
    fn test_opcode_roundtrip() {
        for raw in 0u8..=0x3F {
            if let Some(op) = Opcode::from_u8(raw) {
                assert_eq!(op.as_u8(), raw);
            }
        }
        assert_eq!(Opcode::from_u8(0x40 | opcode::LOGIN_REQUEST), Some(Opcode::LoginRequest));
        assert_eq!(Opcode::from_u8(0x3E), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(opcode::LOGIN_REQUEST), "Login Request");
        assert_eq!(opcode_name(opcode::SCSI_COMMAND), "SCSI Command");
        assert_eq!(opcode_name(opcode::R2T), "Ready To Transfer");
        assert_eq!(opcode_name(0x3E), "Unknown");
    }

    #[test]
    fn test_new_login_request_carries_isid() {
        let pdu = Pdu::new(Opcode::LoginRequest, Opcode::LoginResponse, 5, PduFlags::empty(), &ISID);
        let b = pdu.header().as_bytes();
        assert_eq!(b[0], opcode::LOGIN_REQUEST);
        assert_eq!(&b[8..14], &ISID);
        assert_eq!(pdu.header().itt(), 5);
        assert_eq!(pdu.itt(), 5);
    }

    #[test]
    fn test_new_non_login_has_no_isid() {
        let pdu = Pdu::new(Opcode::NopOut, Opcode::NopIn, 1, PduFlags::empty(), &ISID);
        assert_eq!(&pdu.header().as_bytes()[8..14], &[0u8; 6]);
        assert_eq!(pdu.response_opcode(), Opcode::NopIn);
    }

    #[test]
    fn test_add_data_updates_length_unpadded() {
        let mut pdu = Pdu::new(Opcode::TextRequest, Opcode::TextResponse, 2, PduFlags::empty(), &ISID);
        pdu.add_data(b"SendTargets=All\0").unwrap();
        pdu.add_data(b"x").unwrap();
        assert_eq!(pdu.header().data_segment_length(), 17);
        assert_eq!(pdu.data().storage_len(), 20);

        let bytes = pdu.to_bytes();
        assert_eq!(bytes.len(), BHS_SIZE + 20);
        assert_eq!(&bytes[BHS_SIZE + 17..], &[0, 0, 0]);
    }

    #[test]
    fn test_add_data_beyond_24_bits_rejected() {
        let mut pdu = Pdu::new(Opcode::ScsiCommand, Opcode::ScsiResponse, 4, PduFlags::empty(), &ISID);
        pdu.add_data(&[1, 2, 3, 4]).unwrap();

        let err = pdu.add_data(&vec![0u8; 0x0100_0000]).unwrap_err();
        assert!(matches!(err, IscsiError::DataSegmentTooLong(0x0100_0004)));
        assert_eq!(pdu.header().data_segment_length(), 4);
        assert_eq!(pdu.data().as_slice(), &[1, 2, 3, 4]);
        assert_eq!(pdu.data().storage_len(), 4);
    }

    #[test]
    fn test_add_data_fills_24_bit_field() {
        let mut pdu = Pdu::new(Opcode::ScsiCommand, Opcode::ScsiResponse, 4, PduFlags::empty(), &ISID);
        pdu.add_data(&vec![0u8; DATA_SEGMENT_LENGTH_MASK as usize]).unwrap();
        assert_eq!(pdu.header().data_segment_length(), DATA_SEGMENT_LENGTH_MASK);
        assert!(matches!(pdu.add_data(&[0]), Err(IscsiError::DataSegmentTooLong(_))));
    }

    #[test]
    fn test_add_empty_data_rejected() {
        let mut pdu = Pdu::new(Opcode::NopOut, Opcode::NopIn, 2, PduFlags::empty(), &ISID);
        assert!(matches!(pdu.add_data(&[]), Err(IscsiError::EmptyAppend)));
        assert_eq!(pdu.header().data_segment_length(), 0);
    }

    #[test]
    fn test_indata_is_unaligned() {
        let mut pdu = Pdu::new(Opcode::ScsiCommand, Opcode::ScsiResponse, 3, PduFlags::empty(), &ISID);
        pdu.add_indata(&[1, 2, 3]).unwrap();
        pdu.add_indata(&[4, 5]).unwrap();
        assert_eq!(pdu.indata().as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(pdu.indata().storage_len(), 5);
        assert_eq!(pdu.header().data_segment_length(), 0);
    }

    #[test]
    fn test_scsi_command_cdb() {
        let mut pdu = Pdu::new(Opcode::ScsiCommand, Opcode::ScsiResponse, 9, PduFlags::empty(), &ISID);
        let task = ScsiTask::read10(100, 1, 512);
        pdu.header_mut().set_pduflags(flags::FINAL | flags::READ);
        pdu.header_mut().set_expxferlen(task.expxferlen());
        pdu.header_mut().set_cdb(&task);
        pdu.scsi_cbdata = Some(ScsiCbData::new(task));

        let b = pdu.header().as_bytes();
        assert_eq!(b[1], 0xC0);
        assert_eq!(&b[20..24], &512u32.to_be_bytes());
        assert_eq!(b[32], 0x28);
        assert!(b[42..48].iter().all(|&x| x == 0));
    }

    #[test]
    fn test_inbound_from_bytes_strips_padding() {
        let mut raw = vec![0u8; BHS_SIZE + 8];
        raw[0] = opcode::TEXT_RESPONSE;
        raw[7] = 5;
        raw[BHS_SIZE..BHS_SIZE + 5].copy_from_slice(b"A=B\0\0");
        let inbound = InboundPdu::from_bytes(&raw).unwrap();
        assert_eq!(inbound.opcode(), Some(Opcode::TextResponse));
        assert_eq!(inbound.data().len(), 5);
    }

    #[test]
    fn test_inbound_incomplete() {
        let mut raw = vec![0u8; BHS_SIZE + 2];
        raw[7] = 5;
        assert!(InboundPdu::from_bytes(&raw).is_err());
        assert!(InboundPdu::new(&raw[..20], &[]).is_err());
    }
}
