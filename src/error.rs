//! Error types for iSCSI PDU operations

use thiserror::Error;

/// iSCSI PDU engine errors
#[derive(Debug, Error)]
pub enum IscsiError {
    #[error("failed to allocate buffer for {0} bytes")]
    AllocationFailure(usize),

    #[error("trying to append zero size data")]
    EmptyAppend,

    #[error("no PDU supplied")]
    NullPdu,

    #[error("can't handle expanded headers (TotalAHSLength={0})")]
    UnsupportedHeader(u8),

    #[error("got wrong opcode back for itt:{itt} got:0x{got:02x} expected:0x{expected:02x}")]
    OpcodeMismatch { itt: u32, got: u8, expected: u8 },

    #[error("don't know how to handle opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("Invalid PDU: {0}")]
    InvalidPdu(String),

    #[error("CDB too long: {0} bytes, at most 16 allowed")]
    InvalidCdb(usize),

    #[error("data segment too long: {0} bytes, at most 16777215 allowed")]
    DataSegmentTooLong(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reply handler error: {0}")]
    Handler(String),
}

impl IscsiError {
    /// True for errors that indicate the session's view of the exchange is
    /// inconsistent with the target's and the session should be torn down.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            IscsiError::UnsupportedHeader(_)
                | IscsiError::OpcodeMismatch { .. }
                | IscsiError::UnknownOpcode(_)
        )
    }
}

/// Result type for iSCSI PDU operations
pub type IscsiResult<T> = Result<T, IscsiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_mismatch_message() {
        let err = IscsiError::OpcodeMismatch { itt: 7, got: 0x23, expected: 0x21 };
        assert_eq!(err.to_string(), "got wrong opcode back for itt:7 got:0x23 expected:0x21");
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_caller_errors_are_not_protocol_errors() {
        assert!(!IscsiError::EmptyAppend.is_protocol_error());
        assert!(!IscsiError::NullPdu.is_protocol_error());
        assert!(!IscsiError::AllocationFailure(16).is_protocol_error());
    }
}
