//! iSCSI initiator PDU engine
//!
//! This library builds outgoing iSCSI PDUs in their exact wire layout,
//! appends 4-byte aligned data segments, and correlates the target's replies
//! with pending requests by Initiator Task Tag. Socket I/O, login/text
//! negotiation and SCSI semantics live outside; the surrounding initiator
//! implements the `ReplyHandler` trait to process each matched reply.
//!
//! # Example
//!
//! ```no_run
//! use iscsi_pdu::{InboundPdu, Opcode, Pdu, ReplyHandler, IscsiResult, Session};
//!
//! struct Replies;
//!
//! impl ReplyHandler for Replies {
//!     fn login_reply(&mut self, _: &mut Session, _: &mut Pdu, _: &InboundPdu<'_>) -> IscsiResult<()> { Ok(()) }
//!     fn text_reply(&mut self, _: &mut Session, _: &mut Pdu, _: &InboundPdu<'_>) -> IscsiResult<()> { Ok(()) }
//!     fn logout_reply(&mut self, _: &mut Session, _: &mut Pdu, _: &InboundPdu<'_>) -> IscsiResult<()> { Ok(()) }
//!     fn scsi_reply(&mut self, _: &mut Session, _: &mut Pdu, _: &InboundPdu<'_>) -> IscsiResult<()> { Ok(()) }
//!     fn data_in(&mut self, _: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<bool> {
//!         pdu.add_indata(inbound.data())?;
//!         Ok(inbound.header().pduflags() & 0x80 != 0)
//!     }
//!     fn nop_in_reply(&mut self, _: &mut Session, _: &mut Pdu, _: &InboundPdu<'_>) -> IscsiResult<()> { Ok(()) }
//!     fn r2t(&mut self, _: &mut Session, _: &mut Pdu, _: &InboundPdu<'_>) -> IscsiResult<()> { Ok(()) }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::builder().initial_itt(1).build()?;
//! let mut nop = session.allocate_pdu(Opcode::NopOut, Opcode::NopIn);
//! nop.header_mut().set_pduflags(0x80);
//! session.queue_pdu(nop);
//!
//! let wire = session.next_outbound().expect("queued above");
//! // ... write `wire` to the socket, read the reply into `reply` ...
//! # let reply = vec![0u8; 48];
//! let inbound = InboundPdu::from_bytes(&reply)?;
//! session.process_pdu(&mut Replies, &inbound)?;
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod dispatch;
pub mod error;
pub mod header;
pub mod pdu;
pub mod queue;
pub mod scsi;
pub mod session;

pub use data::DataSegment;
pub use dispatch::{Dispatch, ReplyHandler};
pub use error::{IscsiError, IscsiResult};
pub use header::{BasicHeader, BHS_SIZE};
pub use pdu::{InboundPdu, Opcode, Pdu, PduFlags};
pub use queue::PendingQueue;
pub use scsi::{ScsiCbData, ScsiTask, XferDir};
pub use session::{Session, SessionBuilder};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
