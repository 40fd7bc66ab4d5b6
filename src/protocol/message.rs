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

//! Messages exchanged between the two trade daemons during the
//! deposit-and-payout sub-protocol. The sequencer serializes trade state
//! fields into these messages; every message carries the trade identifier so
//! stale or misrouted responses can be discarded on reception.

use std::error;
use std::fmt;
use std::io;

use thiserror::Error;

use bitcoin::blockdata::transaction::{Transaction, TxOut};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::{Address, Amount};

use crate::consensus::{self, CanonicalBytes, Decodable, Encodable};
use crate::escrow::ConnectedOutput;
use crate::fiat::FiatAccount;
use crate::trade::{Peer, TradeId};

/// Errors raised by the message delivery collaborator.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote peer cannot be reached.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    /// Any messaging error not part of this list.
    #[error("Messaging error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new messaging error of type [`Self::Other`] with an
    /// arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }
}

/// Message delivery collaborator. The protocol state holds a handle and the
/// sequencer drives the sends; delivery must be lossless since signature
/// validation on the other side is byte-exact.
pub trait Messenger {
    /// Send a trade message to the given peer.
    fn send(&mut self, peer: &Peer, message: TradeMessage) -> Result<(), Error>;
}

fn encode_outputs<W: io::Write>(outputs: &[TxOut], s: &mut W) -> Result<usize, io::Error> {
    let wrapped: Vec<Vec<u8>> = outputs.iter().map(|o| o.as_canonical_bytes()).collect();
    wrapped.consensus_encode(s)
}

fn decode_outputs<D: io::Read>(d: &mut D) -> Result<Vec<TxOut>, consensus::Error> {
    let wrapped: Vec<Vec<u8>> = Decodable::consensus_decode(d)?;
    wrapped
        .iter()
        .map(|bytes| TxOut::from_canonical_bytes(bytes))
        .collect()
}

/// `deposit_inputs_request` opens the sub-protocol after the take-offer fee
/// is paid: the taker reveals its escrow public key and the fiat account the
/// off-chain payment will settle against, and asks the offerer for its
/// deposit funding data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositInputsRequest {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// The taker public key for the 2-of-2 escrow output.
    pub taker_pubkey: PublicKey,
    /// The taker account identifier on the trade network.
    pub taker_account_id: String,
    /// The taker fiat account the payment will settle against.
    pub taker_fiat_account: FiatAccount,
}

impl Encodable for DepositInputsRequest {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.trade_id.consensus_encode(s)?;
        len += self.taker_pubkey.as_canonical_bytes().consensus_encode(s)?;
        len += self.taker_account_id.consensus_encode(s)?;
        Ok(len + self.taker_fiat_account.consensus_encode(s)?)
    }
}

impl Decodable for DepositInputsRequest {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            taker_pubkey: PublicKey::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            taker_account_id: Decodable::consensus_decode(d)?,
            taker_fiat_account: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(DepositInputsRequest);

impl fmt::Display for DepositInputsRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "depositinputsrequest {}", self.trade_id)
    }
}

/// `deposit_funding_proposal` is the offerer's answer: its escrow public key,
/// the outputs funding its deposit inputs, the change outputs it takes back,
/// and the address its share of the payout must be sent to. Upon reception
/// the taker cross-validates the declared values before building the deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositFundingProposal {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// The offerer public key for the 2-of-2 escrow output.
    pub offerer_pubkey: PublicKey,
    /// The outputs funding the offerer's deposit inputs.
    pub offerer_connected_outputs: Vec<ConnectedOutput>,
    /// The change outputs the offerer contributes to the deposit.
    pub offerer_outputs: Vec<TxOut>,
    /// The destination of the offerer's share of the payout.
    pub offerer_payout_address: Address,
}

impl Encodable for DepositFundingProposal {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.trade_id.consensus_encode(s)?;
        len += self
            .offerer_pubkey
            .as_canonical_bytes()
            .consensus_encode(s)?;
        len += self.offerer_connected_outputs.consensus_encode(s)?;
        len += encode_outputs(&self.offerer_outputs, s)?;
        Ok(len
            + self
                .offerer_payout_address
                .as_canonical_bytes()
                .consensus_encode(s)?)
    }
}

impl Decodable for DepositFundingProposal {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            offerer_pubkey: PublicKey::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            offerer_connected_outputs: Decodable::consensus_decode(d)?,
            offerer_outputs: decode_outputs(d)?,
            offerer_payout_address: Address::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
        })
    }
}

impl_strict_encoding!(DepositFundingProposal);

impl fmt::Display for DepositFundingProposal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "depositfundingproposal {}", self.trade_id)
    }
}

/// `deposit_publish_request` sends the taker-signed deposit transaction back
/// to the offerer together with the taker funding declarations, asking the
/// offerer to co-sign and publish. The offerer must verify the transaction
/// spends exactly the declared input set before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositPublishRequest {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// The partially signed deposit transaction.
    pub signed_deposit: PartiallySignedTransaction,
    /// The outputs funding the taker's deposit inputs.
    pub taker_connected_outputs: Vec<ConnectedOutput>,
    /// The change outputs the taker contributes to the deposit.
    pub taker_outputs: Vec<TxOut>,
}

impl Encodable for DepositPublishRequest {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.trade_id.consensus_encode(s)?;
        len += self
            .signed_deposit
            .as_canonical_bytes()
            .consensus_encode(s)?;
        len += self.taker_connected_outputs.consensus_encode(s)?;
        Ok(len + encode_outputs(&self.taker_outputs, s)?)
    }
}

impl Decodable for DepositPublishRequest {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            signed_deposit: PartiallySignedTransaction::from_canonical_bytes(
                unwrap_vec_ref!(d).as_ref(),
            )?,
            taker_connected_outputs: Decodable::consensus_decode(d)?,
            taker_outputs: decode_outputs(d)?,
        })
    }
}

impl_strict_encoding!(DepositPublishRequest);

impl fmt::Display for DepositPublishRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "depositpublishrequest {}", self.trade_id)
    }
}

/// `deposit_published` notifies the taker that the fully signed deposit
/// transaction was broadcast. From this point on funds are locked in the
/// escrow output and failures require dispute handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositPublished {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// The deposit transaction as broadcast to the network.
    pub deposit_tx: Transaction,
}

impl Encodable for DepositPublished {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.trade_id.consensus_encode(s)?;
        Ok(len + self.deposit_tx.as_canonical_bytes().consensus_encode(s)?)
    }
}

impl Decodable for DepositPublished {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            deposit_tx: Transaction::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
        })
    }
}

impl_strict_encoding!(DepositPublished);

impl fmt::Display for DepositPublished {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "depositpublished {}", self.trade_id)
    }
}

/// `fiat_transfer_started` tells the seller the off-chain payment is on its
/// way. It carries the payout split the offerer commits to, the destination
/// of its share, and its signature over the payout transaction built from
/// exactly these values. A split deviating from the agreed terms or a
/// signature that does not validate aborts the trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiatTransferStarted {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// The offerer signature over the payout transaction.
    pub offerer_payout_signature: Signature,
    /// Amount assigned to the offerer in the payout.
    pub offerer_payout_amount: Amount,
    /// Amount assigned to the taker in the payout.
    pub taker_payout_amount: Amount,
    /// The destination of the offerer's share of the payout.
    pub offerer_payout_address: Address,
}

impl Encodable for FiatTransferStarted {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.trade_id.consensus_encode(s)?;
        len += self
            .offerer_payout_signature
            .as_canonical_bytes()
            .consensus_encode(s)?;
        len += self
            .offerer_payout_amount
            .as_canonical_bytes()
            .consensus_encode(s)?;
        len += self
            .taker_payout_amount
            .as_canonical_bytes()
            .consensus_encode(s)?;
        Ok(len
            + self
                .offerer_payout_address
                .as_canonical_bytes()
                .consensus_encode(s)?)
    }
}

impl Decodable for FiatTransferStarted {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            offerer_payout_signature: Signature::from_canonical_bytes(
                unwrap_vec_ref!(d).as_ref(),
            )?,
            offerer_payout_amount: Amount::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            taker_payout_amount: Amount::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            offerer_payout_address: Address::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
        })
    }
}

impl_strict_encoding!(FiatTransferStarted);

impl fmt::Display for FiatTransferStarted {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fiattransferstarted {}", self.trade_id)
    }
}

/// `payout_published` closes the trade: the taker broadcast the co-signed
/// payout transaction and forwards it so the offerer can track confirmations
/// on its own syncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPublished {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// The payout transaction as broadcast to the network.
    pub payout_tx: Transaction,
}

impl Encodable for PayoutPublished {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.trade_id.consensus_encode(s)?;
        Ok(len + self.payout_tx.as_canonical_bytes().consensus_encode(s)?)
    }
}

impl Decodable for PayoutPublished {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            payout_tx: Transaction::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
        })
    }
}

impl_strict_encoding!(PayoutPublished);

impl fmt::Display for PayoutPublished {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "payoutpublished {}", self.trade_id)
    }
}

/// `trade_abort` is an `OPTIONAL` courtesy message from either trade partner
/// to inform the counterparty that they have aborted the trade with an
/// `OPTIONAL` message body to provide the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeAbort {
    /// The trade identifier.
    pub trade_id: TradeId,
    /// OPTIONAL `body`: error code | string.
    pub error_body: Option<String>,
}

impl Encodable for TradeAbort {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.trade_id.consensus_encode(s)?;
        Ok(len + self.error_body.consensus_encode(s)?)
    }
}

impl Decodable for TradeAbort {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            trade_id: Decodable::consensus_decode(d)?,
            error_body: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(TradeAbort);

impl fmt::Display for TradeAbort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tradeabort {}", self.trade_id)
    }
}

/// All the messages of the deposit-and-payout sub-protocol, wrapped for
/// transport through the [`Messenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeMessage {
    /// See [`DepositInputsRequest`].
    DepositInputsRequest(DepositInputsRequest),
    /// See [`DepositFundingProposal`].
    DepositFundingProposal(DepositFundingProposal),
    /// See [`DepositPublishRequest`].
    DepositPublishRequest(DepositPublishRequest),
    /// See [`DepositPublished`].
    DepositPublished(DepositPublished),
    /// See [`FiatTransferStarted`].
    FiatTransferStarted(FiatTransferStarted),
    /// See [`PayoutPublished`].
    PayoutPublished(PayoutPublished),
    /// See [`TradeAbort`].
    TradeAbort(TradeAbort),
}

impl TradeMessage {
    /// Return the trade identifier the message belongs to.
    pub fn trade_id(&self) -> TradeId {
        match self {
            Self::DepositInputsRequest(m) => m.trade_id,
            Self::DepositFundingProposal(m) => m.trade_id,
            Self::DepositPublishRequest(m) => m.trade_id,
            Self::DepositPublished(m) => m.trade_id,
            Self::FiatTransferStarted(m) => m.trade_id,
            Self::PayoutPublished(m) => m.trade_id,
            Self::TradeAbort(m) => m.trade_id,
        }
    }
}

impl Encodable for TradeMessage {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        match self {
            Self::DepositInputsRequest(m) => {
                Ok(0x01u8.consensus_encode(s)? + m.consensus_encode(s)?)
            }
            Self::DepositFundingProposal(m) => {
                Ok(0x02u8.consensus_encode(s)? + m.consensus_encode(s)?)
            }
            Self::DepositPublishRequest(m) => {
                Ok(0x03u8.consensus_encode(s)? + m.consensus_encode(s)?)
            }
            Self::DepositPublished(m) => Ok(0x04u8.consensus_encode(s)? + m.consensus_encode(s)?),
            Self::FiatTransferStarted(m) => {
                Ok(0x05u8.consensus_encode(s)? + m.consensus_encode(s)?)
            }
            Self::PayoutPublished(m) => Ok(0x06u8.consensus_encode(s)? + m.consensus_encode(s)?),
            Self::TradeAbort(m) => Ok(0x07u8.consensus_encode(s)? + m.consensus_encode(s)?),
        }
    }
}

impl Decodable for TradeMessage {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(Self::DepositInputsRequest(Decodable::consensus_decode(d)?)),
            0x02u8 => Ok(Self::DepositFundingProposal(Decodable::consensus_decode(
                d,
            )?)),
            0x03u8 => Ok(Self::DepositPublishRequest(Decodable::consensus_decode(d)?)),
            0x04u8 => Ok(Self::DepositPublished(Decodable::consensus_decode(d)?)),
            0x05u8 => Ok(Self::FiatTransferStarted(Decodable::consensus_decode(d)?)),
            0x06u8 => Ok(Self::PayoutPublished(Decodable::consensus_decode(d)?)),
            0x07u8 => Ok(Self::TradeAbort(Decodable::consensus_decode(d)?)),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(TradeMessage);

impl fmt::Display for TradeMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DepositInputsRequest(m) => m.fmt(f),
            Self::DepositFundingProposal(m) => m.fmt(f),
            Self::DepositPublishRequest(m) => m.fmt(f),
            Self::DepositPublished(m) => m.fmt(f),
            Self::FiatTransferStarted(m) => m.fmt(f),
            Self::PayoutPublished(m) => m.fmt(f),
            Self::TradeAbort(m) => m.fmt(f),
        }
    }
}

impl From<DepositInputsRequest> for TradeMessage {
    fn from(m: DepositInputsRequest) -> Self {
        Self::DepositInputsRequest(m)
    }
}

impl From<DepositFundingProposal> for TradeMessage {
    fn from(m: DepositFundingProposal) -> Self {
        Self::DepositFundingProposal(m)
    }
}

impl From<DepositPublishRequest> for TradeMessage {
    fn from(m: DepositPublishRequest) -> Self {
        Self::DepositPublishRequest(m)
    }
}

impl From<DepositPublished> for TradeMessage {
    fn from(m: DepositPublished) -> Self {
        Self::DepositPublished(m)
    }
}

impl From<FiatTransferStarted> for TradeMessage {
    fn from(m: FiatTransferStarted) -> Self {
        Self::FiatTransferStarted(m)
    }
}

impl From<PayoutPublished> for TradeMessage {
    fn from(m: PayoutPublished) -> Self {
        Self::PayoutPublished(m)
    }
}

impl From<TradeAbort> for TradeMessage {
    fn from(m: TradeAbort) -> Self {
        Self::TradeAbort(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiat::{FiatCurrency, PaymentMethod};
    use crate::trade::TradeId;
    use std::str::FromStr;

    #[test]
    fn create_trade_abort_message() {
        let msg = TradeAbort {
            trade_id: TradeId::random(),
            error_body: Some(String::from("An error occured ;)")),
        };
        let bytes = consensus::serialize(&msg);
        assert_eq!(consensus::deserialize::<TradeAbort>(&bytes).unwrap(), msg);
    }

    #[test]
    fn deposit_inputs_request_roundtrip() {
        let pk = PublicKey::from_slice(&[
            0x02, 0xc6, 0x6e, 0x7d, 0x89, 0x66, 0xb5, 0xc5, 0x55, 0xaf, 0x58, 0x05, 0x98, 0x9d,
            0xa9, 0xfb, 0xf8, 0xdb, 0x95, 0xe1, 0x56, 0x31, 0xce, 0x35, 0x8c, 0x3a, 0x17, 0x10,
            0xc9, 0x62, 0x67, 0x90, 0x63,
        ])
        .unwrap();
        let msg = TradeMessage::from(DepositInputsRequest {
            trade_id: TradeId::random(),
            taker_pubkey: pk,
            taker_account_id: "taker-1".into(),
            taker_fiat_account: FiatAccount {
                holder_name: "Taker".into(),
                account_number: "DE02120300000000202051".into(),
                currency: FiatCurrency::from_str("EUR").unwrap(),
                payment_method: PaymentMethod::Sepa,
                country: "DE".into(),
            },
        });
        let bytes = consensus::serialize(&msg);
        assert_eq!(consensus::deserialize::<TradeMessage>(&bytes).unwrap(), msg);
    }
}
