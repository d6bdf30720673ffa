//! iSCSI initiator session context
//!
//! Holds the per-session state the PDU engine needs: the ITT counter, the
//! ISID written into login requests, the outbound queue, the pending-reply
//! registry and the last recorded error. All operations take `&mut self`;
//! a host that shares a session between threads must serialize access.

use crate::error::{IscsiError, IscsiResult};
use crate::pdu::{Opcode, Pdu, PduFlags};
use crate::queue::PendingQueue;
use rand::Rng;
use std::collections::VecDeque;

/// ISID type "Random" (RFC 3720 Section 10.12.5): T bits = 0b10
const ISID_TYPE_RANDOM: u8 = 0x80;
const ISID_TYPE_MASK: u8 = 0xC0;
const ISID_TYPE_RESERVED: u8 = 0xC0;

/// An exchange whose reply handler is running; its PDU is outside the
/// pending registry until the handler returns.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    itt: u32,
    cancelled: bool,
}

/// Per-session PDU engine state
#[derive(Debug)]
pub struct Session {
    isid: [u8; 6],
    itt: u32,
    outqueue: VecDeque<Pdu>,
    waitpdu: PendingQueue,
    /// Innermost last; handlers may dispatch re-entrantly
    in_flight: Vec<InFlight>,
    error: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Session with a random ISID and ITTs starting at 0
    pub fn new() -> Self {
        Session::with_parts(random_isid(), 0)
    }

    /// Create a new builder for configuring the session
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    fn with_parts(isid: [u8; 6], itt: u32) -> Self {
        Session {
            isid,
            itt,
            outqueue: VecDeque::new(),
            waitpdu: PendingQueue::new(),
            in_flight: Vec::new(),
            error: None,
        }
    }

    pub fn isid(&self) -> &[u8; 6] {
        &self.isid
    }

    /// ITT the next [`allocate_pdu`](Self::allocate_pdu) will hand out
    pub fn next_itt(&self) -> u32 {
        self.itt
    }

    // ------------------------------------------------------------------
    // Error sink
    // ------------------------------------------------------------------

    /// Record a diagnostic message as the session's last error
    pub fn set_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::error!("{}", msg);
        self.error = Some(msg);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // ------------------------------------------------------------------
    // PDU lifecycle
    // ------------------------------------------------------------------

    /// Allocate a PDU tagged with the next ITT from the session counter
    pub fn allocate_pdu(&mut self, opcode: Opcode, response_opcode: Opcode) -> Pdu {
        let itt = self.itt;
        self.itt = self.itt.wrapping_add(1);
        self.allocate_pdu_with_itt_flags(opcode, response_opcode, itt, PduFlags::empty())
    }

    /// Allocate a PDU with a caller-chosen ITT; the caller keeps it unique
    /// among pending requests.
    pub fn allocate_pdu_with_itt_flags(
        &mut self,
        opcode: Opcode,
        response_opcode: Opcode,
        itt: u32,
        flags: PduFlags,
    ) -> Pdu {
        log::trace!(
            "allocate {} (reply {}) itt:0x{:08x} flags:{:?}",
            opcode.name(),
            response_opcode.name(),
            itt,
            flags
        );
        Pdu::new(opcode, response_opcode, itt, flags, &self.isid)
    }

    /// Append payload to a PDU's data segment and refresh DataSegmentLength
    pub fn pdu_add_data(&mut self, pdu: Option<&mut Pdu>, bytes: &[u8]) -> IscsiResult<()> {
        let Some(pdu) = pdu else {
            self.set_error("trying to add data to NULL pdu");
            return Err(IscsiError::NullPdu);
        };
        if bytes.is_empty() {
            self.set_error("Trying to append zero size data to pdu");
            return Err(IscsiError::EmptyAppend);
        }
        pdu.add_data(bytes).map_err(|e| {
            self.set_error("failed to add data to pdu buffer");
            e
        })
    }

    /// Release a PDU with its data segments and command context
    pub fn free_pdu(&mut self, pdu: Option<Pdu>) -> IscsiResult<()> {
        let Some(pdu) = pdu else {
            self.set_error("trying to free NULL pdu");
            return Err(IscsiError::NullPdu);
        };
        self.release(pdu);
        Ok(())
    }

    pub(crate) fn release(&mut self, pdu: Pdu) {
        log::trace!(
            "free itt:0x{:08x} (reply {}){}",
            pdu.itt(),
            pdu.response_opcode().name(),
            if pdu.scsi_cbdata.is_some() { " with scsi cbdata" } else { "" }
        );
        drop(pdu);
    }

    // ------------------------------------------------------------------
    // Outbound queue and pending registry
    // ------------------------------------------------------------------

    /// Queue a PDU for transmission
    pub fn queue_pdu(&mut self, pdu: Pdu) {
        self.outqueue.push_back(pdu);
    }

    pub fn outqueue_len(&self) -> usize {
        self.outqueue.len()
    }

    /// Serialize the next queued PDU for the transport.
    ///
    /// The PDU then waits in the pending registry for its reply, unless it
    /// was flagged [`PduFlags::DELETE_WHEN_SENT`], in which case it is freed.
    pub fn next_outbound(&mut self) -> Option<Vec<u8>> {
        let pdu = self.outqueue.pop_front()?;
        let bytes = pdu.to_bytes();
        log::debug!(
            "sending {} itt:0x{:08x} ({} bytes)",
            crate::pdu::opcode_name(pdu.header().opcode()),
            pdu.itt(),
            bytes.len()
        );
        if pdu.flags().contains(PduFlags::DELETE_WHEN_SENT) {
            self.release(pdu);
        } else {
            self.waitpdu.push(pdu);
        }
        Some(bytes)
    }

    /// Insert a sent PDU straight into the pending registry
    pub fn register_pdu(&mut self, pdu: Pdu) {
        self.waitpdu.push(pdu);
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.waitpdu
    }

    pub(crate) fn pending_mut(&mut self) -> &mut PendingQueue {
        &mut self.waitpdu
    }

    /// Remove a pending exchange without a reply (e.g. on timeout) and free it.
    ///
    /// Called from a reply handler on the exchange being dispatched, the PDU
    /// is freed once the handler returns. Returns false if no PDU with this
    /// ITT is pending.
    pub fn remove_pending(&mut self, itt: u32) -> bool {
        if let Some(pdu) = self.waitpdu.remove(itt) {
            log::debug!("removing pending itt:0x{:08x} without reply", itt);
            self.release(pdu);
            return true;
        }
        match self.in_flight.iter_mut().rev().find(|f| f.itt == itt && !f.cancelled) {
            Some(flight) => {
                log::debug!("cancelling in-flight itt:0x{:08x}", itt);
                flight.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// Free every queued and pending PDU, returning how many were dropped.
    ///
    /// Exchanges whose reply handler is running are counted and freed when
    /// the handler returns.
    pub fn drain_pending(&mut self) -> usize {
        let mut pdus: Vec<Pdu> = self.outqueue.drain(..).collect();
        pdus.extend(self.waitpdu.drain());
        let mut count = pdus.len();
        for pdu in pdus {
            self.release(pdu);
        }
        for flight in self.in_flight.iter_mut().filter(|f| !f.cancelled) {
            flight.cancelled = true;
            count += 1;
        }
        if count > 0 {
            log::debug!("dropped {} outstanding PDUs", count);
        }
        count
    }

    pub(crate) fn begin_dispatch(&mut self, itt: u32) {
        self.in_flight.push(InFlight { itt, cancelled: false });
    }

    /// Returns true if the exchange was removed while its handler ran
    pub(crate) fn end_dispatch(&mut self) -> bool {
        self.in_flight.pop().is_some_and(|f| f.cancelled)
    }
}

fn random_isid() -> [u8; 6] {
    let mut isid = [0u8; 6];
    isid[0] = ISID_TYPE_RANDOM;
    rand::thread_rng().fill(&mut isid[1..]);
    isid
}

/// Builder for configuring a [`Session`]
#[derive(Debug, Default)]
pub struct SessionBuilder {
    isid: Option<[u8; 6]>,
    initial_itt: Option<u32>,
}

impl SessionBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Set the ISID (default: random type, random qualifier)
    pub fn isid(mut self, isid: [u8; 6]) -> Self {
        self.isid = Some(isid);
        self
    }

    /// Set the first ITT handed out (default: 0)
    pub fn initial_itt(mut self, itt: u32) -> Self {
        self.initial_itt = Some(itt);
        self
    }

    pub fn build(self) -> IscsiResult<Session> {
        let isid = self.isid.unwrap_or_else(random_isid);
        if isid[0] & ISID_TYPE_MASK == ISID_TYPE_RESERVED {
            return Err(IscsiError::Config(format!(
                "ISID {} uses the reserved type 0b11",
                hex::encode(isid)
            )));
        }
        Ok(Session::with_parts(isid, self.initial_itt.unwrap_or(0)))
    }
}
