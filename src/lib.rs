// Copyright 2024-2026 Peertrade Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Peertrade Core library
//!
//! Data structures, validation logic, and collaborator interfaces used to
//! execute a trust-minimized trade of bitcoin against an off-chain fiat
//! payment between two peers. The offerer published the offer, the taker
//! accepted it; both jointly fund a 2-of-2 escrow deposit transaction and
//! later co-sign the payout transaction that settles the final balances.
//!
//! The central type is the [`protocol::SellerAsTaker`] trade state container:
//! the mutable protocol state of the participant selling bitcoin after taking
//! an offer. Every field written during the deposit-and-payout sub-protocol
//! goes through a validated, write-once setter; any validation failure is
//! terminal for the trade.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate serde;

use std::io;
use std::str::FromStr;

use thiserror::Error;

#[macro_use]
pub mod consensus;
pub mod bitcoin;
pub mod blockchain;
pub mod crypto;
pub mod escrow;
pub mod fee;
pub mod fiat;
pub mod protocol;
pub mod role;
pub mod syncer;
pub mod trade;

mod hash;

use consensus::{Decodable, Encodable};

/// A unique identifier used for offers and trades. This wraps a [`uuid::Uuid`]
/// and implements the crate consensus encoding over its 16 raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
#[display(inner)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    /// Generate a new random (version 4) identifier.
    pub fn new() -> Self {
        Uuid(uuid::Uuid::new_v4())
    }

    /// Return the identifier raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for Uuid {
    fn from(u: uuid::Uuid) -> Self {
        Uuid(u)
    }
}

impl FromStr for Uuid {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Uuid(uuid::Uuid::from_str(s).map_err(consensus::Error::new)?))
    }
}

impl Encodable for Uuid {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        (*self.0.as_bytes()).consensus_encode(s)
    }
}

impl Decodable for Uuid {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let bytes: [u8; 16] = Decodable::consensus_decode(d)?;
        Ok(Uuid(uuid::Uuid::from_bytes(bytes)))
    }
}

impl_strict_encoding!(Uuid);

/// Errors that can be raised anywhere in a trade lifetime, regrouping errors
/// from all the modules of the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// A consensus encoding/decoding error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
    /// A cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::Error),
    /// An escrow transaction validation error.
    #[error("Escrow error: {0}")]
    Escrow(#[from] escrow::Error),
    /// A fee strategy error.
    #[error("Fee strategy error: {0}")]
    FeeStrategy(#[from] blockchain::FeeStrategyError),
    /// A trade protocol state error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::Error),
    /// A chain syncer error.
    #[error("Syncer error: {0}")]
    Syncer(#[from] syncer::Error),
    /// An offer or trade manipulation error.
    #[error("Trade error: {0}")]
    Trade(#[from] trade::Error),
}

/// Result type used when the returned result can come from any part of a
/// trade lifetime.
pub type Res<T> = Result<T, Error>;
