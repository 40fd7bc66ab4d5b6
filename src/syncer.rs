//! Tasks used to instruct a chain syncer what state to track on-chain and
//! events returned by the syncer to update the trade state representation.
//! The trade protocol feeds the syncer with the published deposit and payout
//! transaction identifiers; the protocol state itself never polls the chain.

use std::error;
use std::fmt;
use std::io;

use thiserror::Error;

use bitcoin::blockdata::transaction::Transaction;
use bitcoin::hash_types::Txid;

use crate::consensus::{self, CanonicalBytes, Decodable, Encodable};

/// Errors encountered when manipulating syncer tasks. [`Self::Other`] can
/// carry out errors from external sources.
#[derive(Error, Debug)]
pub enum Error {
    /// The task lifetime is expired.
    #[error("Lifetime expired")]
    LifetimeExpired,
    /// Any syncer error not part of this list.
    #[error("Syncer error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new syncer error of type other with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// A syncer keeps trades synchronized with the blockchain by receiving tasks,
/// processing them, and producing [`Event`]s in return. A task can produce
/// any amount of events until it is aborted or completed with its last event.
pub trait Syncer {
    /// Stop tracking the task with the given identifier.
    fn abort(&mut self, task: Abort) -> Result<(), Error>;
    /// Track confirmations of a transaction.
    fn watch_transaction(&mut self, task: WatchTransaction) -> Result<(), Error>;
    /// Broadcast a finalized transaction to the network.
    fn broadcast_transaction(&mut self, task: BroadcastTransaction) -> Result<(), Error>;
}

/// Abort a previously registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    /// Identifier of the task to abort.
    pub id: u32,
}

impl Encodable for Abort {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.id.consensus_encode(s)
    }
}

impl Decodable for Abort {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            id: u32::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(Abort);

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "abort id {}", self.id)
    }
}

/// Track a transaction on-chain and report its confirmations up to the given
/// bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTransaction {
    /// Task identifier, echoed in the produced events.
    pub id: u32,
    /// Block height after which the task expires.
    pub lifetime: u64,
    /// Identifier of the transaction to watch.
    pub txid: Txid,
    /// Stop reporting after this many confirmations.
    pub confirmation_bound: u16,
}

impl Encodable for WatchTransaction {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.id.consensus_encode(s)?;
        len += self.lifetime.consensus_encode(s)?;
        len += self.txid.as_canonical_bytes().consensus_encode(s)?;
        Ok(len + self.confirmation_bound.consensus_encode(s)?)
    }
}

impl Decodable for WatchTransaction {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            id: u32::consensus_decode(d)?,
            lifetime: u64::consensus_decode(d)?,
            txid: Txid::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            confirmation_bound: u16::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(WatchTransaction);

impl fmt::Display for WatchTransaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "watchtransaction {}", self.txid)
    }
}

/// Broadcast a finalized transaction to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastTransaction {
    /// Task identifier, echoed in the produced events.
    pub id: u32,
    /// The fully signed transaction to broadcast.
    pub tx: Transaction,
}

impl Encodable for BroadcastTransaction {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.id.consensus_encode(s)?;
        Ok(len + self.tx.as_canonical_bytes().consensus_encode(s)?)
    }
}

impl Decodable for BroadcastTransaction {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            id: u32::consensus_decode(d)?,
            tx: Transaction::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
        })
    }
}

impl_strict_encoding!(BroadcastTransaction);

impl fmt::Display for BroadcastTransaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "broadcasttransaction {}", self.tx.txid())
    }
}

/// Events produced by a syncer while processing tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// New confirmation count for a watched transaction. `None` means the
    /// transaction is not mined yet.
    TransactionConfirmations {
        /// Identifier of the task that produced the event.
        id: u32,
        /// Number of confirmations, `None` while in the mempool.
        confirmations: Option<u32>,
    },
    /// Result of a broadcast task.
    TransactionBroadcasted {
        /// Identifier of the task that produced the event.
        id: u32,
        /// Broadcast error reported by the network, if any.
        error: Option<String>,
    },
    /// A task was aborted.
    TaskAborted {
        /// Identifier of the aborted task.
        id: u32,
    },
}

impl Encodable for Event {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        match self {
            Event::TransactionConfirmations { id, confirmations } => {
                let mut len = 0x01u8.consensus_encode(s)?;
                len += id.consensus_encode(s)?;
                Ok(len + confirmations.consensus_encode(s)?)
            }
            Event::TransactionBroadcasted { id, error } => {
                let mut len = 0x02u8.consensus_encode(s)?;
                len += id.consensus_encode(s)?;
                Ok(len + error.consensus_encode(s)?)
            }
            Event::TaskAborted { id } => {
                let len = 0x03u8.consensus_encode(s)?;
                Ok(len + id.consensus_encode(s)?)
            }
        }
    }
}

impl Decodable for Event {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(Event::TransactionConfirmations {
                id: u32::consensus_decode(d)?,
                confirmations: Decodable::consensus_decode(d)?,
            }),
            0x02u8 => Ok(Event::TransactionBroadcasted {
                id: u32::consensus_decode(d)?,
                error: Decodable::consensus_decode(d)?,
            }),
            0x03u8 => Ok(Event::TaskAborted {
                id: u32::consensus_decode(d)?,
            }),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(Event);

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn watch_transaction_roundtrip() {
        let task = WatchTransaction {
            id: 7,
            lifetime: 100_000,
            txid: Txid::from_slice(&[0x42; 32]).unwrap(),
            confirmation_bound: 6,
        };
        let bytes = consensus::serialize(&task);
        assert_eq!(consensus::deserialize::<WatchTransaction>(&bytes).unwrap(), task);
    }

    #[test]
    fn event_roundtrip() {
        let events = vec![
            Event::TransactionConfirmations {
                id: 1,
                confirmations: None,
            },
            Event::TransactionConfirmations {
                id: 1,
                confirmations: Some(3),
            },
            Event::TransactionBroadcasted { id: 2, error: None },
            Event::TaskAborted { id: 3 },
        ];
        for event in events {
            let bytes = consensus::serialize(&event);
            assert_eq!(consensus::deserialize::<Event>(&bytes).unwrap(), event);
        }
    }
}
