//! Pending-request registry
//!
//! PDUs that have been sent and are waiting for the target's reply, kept in
//! send order. Lookup is a linear scan by ITT where the first match wins;
//! keeping ITTs unique among pending entries is the caller's job.

use crate::pdu::Pdu;

/// Ordered collection of in-flight PDUs, owned exclusively by the queue
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<Pdu>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the tail
    pub fn push(&mut self, pdu: Pdu) {
        self.entries.push(pdu);
    }

    /// Index of the first entry with this ITT
    pub fn position(&self, itt: u32) -> Option<usize> {
        self.entries.iter().position(|pdu| pdu.itt() == itt)
    }

    pub fn find(&self, itt: u32) -> Option<&Pdu> {
        self.entries.iter().find(|pdu| pdu.itt() == itt)
    }

    pub fn find_mut(&mut self, itt: u32) -> Option<&mut Pdu> {
        self.entries.iter_mut().find(|pdu| pdu.itt() == itt)
    }

    /// Remove the first entry with this ITT, handing ownership back
    pub fn remove(&mut self, itt: u32) -> Option<Pdu> {
        let index = self.position(itt)?;
        Some(self.entries.remove(index))
    }

    /// Remove the entry at `index`, as returned by [`position`](Self::position)
    pub(crate) fn take(&mut self, index: usize) -> Pdu {
        self.entries.remove(index)
    }

    /// Put an entry back where [`take`](Self::take) found it
    pub(crate) fn restore(&mut self, index: usize, pdu: Pdu) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, pdu);
    }

    /// Entries in send order
    pub fn iter(&self) -> impl Iterator<Item = &Pdu> {
        self.entries.iter()
    }

    /// Remove every entry, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = Pdu> + '_ {
        self.entries.drain(..)
    }
}
