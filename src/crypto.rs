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

//! Cryptographic traits (derive keys, sign, verify) used to abstract the
//! wallet and signing backends behind the protocol state. The trade state
//! container receives these as injected handles so it never reaches for an
//! ambient key store and can be exercised with substitutes in tests.

use std::error;

use thiserror::Error;

use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, VerifyOnly};
use bitcoin::Address;

use crate::trade::TradeId;

/// List of cryptographic errors that can be encountered in cryptographic
/// operations such as signatures or key derivation.
#[derive(Error, Debug)]
pub enum Error {
    /// The key identifier is not supported and the key cannot be derived.
    #[error("The key identifier is not supported and the key cannot be derived")]
    UnsupportedKey,
    /// The key or key identifier does not exists or is missing.
    #[error("The key or key identifier does not exists or is missing")]
    MissingKey,
    /// The wallet could not produce the address entry bound to the trade.
    #[error("The wallet could not produce the address entry bound to the trade")]
    MissingAddressEntry,
    /// The signature does not pass the validation tests.
    #[error("The signature does not pass the validation")]
    InvalidSignature,
    /// Any cryptographic error not part of this list.
    #[error("Cryptographic error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new cryptographic error of type [`Self::Other`] with an
    /// arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function
    /// will return [`Some`], otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// List of all key usages inside a trade. A wallet derives one key pair per
/// trade and usage, so two trades never share key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum TradeKeyId {
    /// Key used in the 2-of-2 escrow output of the deposit transaction.
    Escrow,
    /// Key controlling the payout destination of this participant.
    Payout,
    /// Any other key needed by an extension of the protocol. Contains its own
    /// identifier.
    Extra(u16),
}

/// Key chain of the local wallet. Derivation is deterministic per trade and
/// key identifier: asking twice for the same pair yields the same key.
pub trait KeyChain {
    /// Retrieve the public key bound to the given trade for the given usage.
    /// If the key cannot be derived the implementation must return an
    /// [`Error::UnsupportedKey`] or [`Error::MissingAddressEntry`].
    fn trade_pubkey(&mut self, trade_id: TradeId, key_id: TradeKeyId) -> Result<PublicKey, Error>;

    /// Return the address funds of the local participant should be paid out
    /// to for the given trade.
    fn payout_address(&mut self, trade_id: TradeId) -> Result<Address, Error>;
}

/// Signature generator. Produces signatures with the private key bound to the
/// given trade and key identifier; the private key never leaves the wallet.
pub trait Sign {
    /// Sign the message with the corresponding private key identified by the
    /// provided trade and key identifier.
    fn sign(
        &mut self,
        trade_id: TradeId,
        key_id: TradeKeyId,
        msg: Sha256dHash,
    ) -> Result<Signature, Error>;
}

/// Signature verifier. Validation is pure: no key material is required beyond
/// the counterparty public key.
pub trait Verify {
    /// Verify a signature for a given message with the provided public key,
    /// return [`Error::InvalidSignature`] if the signature does not
    /// recompute.
    fn verify_signature(
        &self,
        key: &PublicKey,
        msg: Sha256dHash,
        sig: &Signature,
    ) -> Result<(), Error>;
}

/// Engine to validate ECDSA signatures against the secp256k1 curve.
#[derive(Debug)]
pub struct SignatureEngine {
    context: Secp256k1<VerifyOnly>,
}

impl SignatureEngine {
    /// Create a new verification-only engine.
    pub fn new() -> Self {
        Self {
            context: Secp256k1::verification_only(),
        }
    }
}

impl Default for SignatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Verify for SignatureEngine {
    fn verify_signature(
        &self,
        key: &PublicKey,
        msg: Sha256dHash,
        sig: &Signature,
    ) -> Result<(), Error> {
        let message = Message::from_slice(&msg[..]).map_err(Error::new)?;
        self.context
            .verify_ecdsa(&message, sig, key)
            .map_err(|_| Error::InvalidSignature)
    }
}
