//! Reply correlation and dispatch
//!
//! An inbound PDU is matched to the pending request with the same ITT, its
//! opcode is checked against the reply the request expects, and the
//! matching [`ReplyHandler`] method runs. The pending entry is freed when the
//! exchange is finished or the handler fails.

use crate::error::{IscsiError, IscsiResult};
use crate::pdu::{opcode_name, InboundPdu, Opcode, Pdu};
use crate::session::Session;

/// Per-opcode reply processing supplied by the login, text, logout and SCSI
/// layers.
///
/// While a handler runs, `pdu` has been taken out of the session's pending
/// registry; the handler may queue or register new PDUs on `session`.
pub trait ReplyHandler {
    fn login_reply(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<()>;

    fn text_reply(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<()>;

    fn logout_reply(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<()>;

    fn scsi_reply(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<()>;

    /// Returns `true` once the command has received all of its data
    fn data_in(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<bool>;

    fn nop_in_reply(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<()>;

    /// Solicitation for more Data-Out; never completes the command
    fn r2t(&mut self, session: &mut Session, pdu: &mut Pdu, inbound: &InboundPdu<'_>) -> IscsiResult<()>;
}

/// Outcome of a successful [`Session::process_pdu`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No pending request carries this ITT
    Ignored,
    /// The exchange is complete and its PDU was freed
    Finished,
    /// The exchange stays pending, awaiting more replies
    Open,
    /// The handler removed the exchange from the session (e.g. teardown)
    /// while it ran; its PDU was freed
    Cancelled,
}

/// Opcode a pending request will accept, given the opcode that arrived.
///
/// A SCSI command may be answered by Data-In as well as by a SCSI Response,
/// and any outstanding command may be sent an R2T.
pub fn effective_response(expected: Opcode, incoming: Opcode) -> Opcode {
    match (incoming, expected) {
        (Opcode::ScsiDataIn, Opcode::ScsiResponse) => Opcode::ScsiDataIn,
        (Opcode::R2t, _) => Opcode::R2t,
        (_, expected) => expected,
    }
}

/// Run the handler for `opcode`; `None` if there is no handler for it.
fn run_reply_handler<H: ReplyHandler + ?Sized>(
    handler: &mut H,
    session: &mut Session,
    opcode: Opcode,
    pdu: &mut Pdu,
    inbound: &InboundPdu<'_>,
) -> Option<(IscsiResult<Dispatch>, &'static str)> {
    let ran = match opcode {
        Opcode::LoginResponse => (
            handler.login_reply(session, pdu, inbound).map(|()| Dispatch::Finished),
            "login reply",
        ),
        Opcode::TextResponse => (
            handler.text_reply(session, pdu, inbound).map(|()| Dispatch::Finished),
            "text reply",
        ),
        Opcode::LogoutResponse => (
            handler.logout_reply(session, pdu, inbound).map(|()| Dispatch::Finished),
            "logout reply",
        ),
        Opcode::ScsiResponse => (
            handler.scsi_reply(session, pdu, inbound).map(|()| Dispatch::Finished),
            "response reply",
        ),
        Opcode::ScsiDataIn => (
            handler
                .data_in(session, pdu, inbound)
                .map(|finished| if finished { Dispatch::Finished } else { Dispatch::Open }),
            "data in",
        ),
        Opcode::NopIn => (
            handler.nop_in_reply(session, pdu, inbound).map(|()| Dispatch::Finished),
            "nop-in",
        ),
        Opcode::R2t => (
            handler.r2t(session, pdu, inbound).map(|()| Dispatch::Open),
            "r2t",
        ),
        _ => return None,
    };
    Some(ran)
}

impl Session {
    /// Correlate one received PDU with its pending request and run the reply
    /// handler for it.
    ///
    /// Only the first pending entry with a matching ITT is considered.
    /// Protocol errors and handler failures free that entry and are returned
    /// to the caller; the rest of the registry is left untouched. If the
    /// handler removes its own exchange through [`Session::remove_pending`]
    /// or [`Session::drain_pending`], the PDU is freed rather than put back.
    pub fn process_pdu<H: ReplyHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        inbound: &InboundPdu<'_>,
    ) -> IscsiResult<Dispatch> {
        let ahslen = inbound.total_ahs_length();
        if ahslen != 0 {
            self.set_error("can't handle expanded headers yet");
            return Err(IscsiError::UnsupportedHeader(ahslen));
        }

        let raw = inbound.opcode_raw();
        let itt = inbound.itt();
        log::trace!("received {} itt:0x{:08x} {:?}", opcode_name(raw), itt, inbound.header());

        let Some(index) = self.pending().position(itt) else {
            log::debug!("ignoring {} for unknown itt:0x{:08x}", opcode_name(raw), itt);
            return Ok(Dispatch::Ignored);
        };
        let mut pdu = self.pending_mut().take(index);
        let expected = pdu.response_opcode();

        let opcode = match Opcode::from_u8(raw) {
            Some(incoming) if effective_response(expected, incoming) == incoming => incoming,
            _ => {
                self.release(pdu);
                let err = IscsiError::OpcodeMismatch {
                    itt,
                    got: raw,
                    expected: expected.as_u8(),
                };
                self.set_error(err.to_string());
                return Err(err);
            }
        };

        self.begin_dispatch(itt);
        let ran = run_reply_handler(handler, self, opcode, &mut pdu, inbound);
        let cancelled = self.end_dispatch();

        let Some((result, what)) = ran else {
            self.release(pdu);
            self.set_error(format!("don't know how to handle opcode 0x{:02x}", raw));
            return Err(IscsiError::UnknownOpcode(raw));
        };

        match result {
            Err(e) => {
                self.release(pdu);
                self.set_error(format!("iscsi {} failed: {}", what, e));
                Err(e)
            }
            Ok(_) if cancelled => {
                log::debug!("itt:0x{:08x} removed by its {} handler", itt, what);
                self.release(pdu);
                Ok(Dispatch::Cancelled)
            }
            Ok(Dispatch::Open) => {
                log::trace!("itt:0x{:08x} still open after {}", itt, what);
                self.pending_mut().restore(index, pdu);
                Ok(Dispatch::Open)
            }
            Ok(done) => {
                log::trace!("itt:0x{:08x} finished by {}", itt, what);
                self.release(pdu);
                Ok(done)
            }
        }
    }
}
