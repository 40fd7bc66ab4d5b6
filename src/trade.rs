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

//! Offer and trade structures. Offerer and taker use offers to communicate
//! the parameters of a trade.
//!
//! ## Offers
//!
//! An offer is shared across the network by an offerer. It contains all the
//! data regarding what the trade is about (amount, price, currency, payment
//! method, deposits, fees) and where to connect to take the offer.
//!
//! An offer is formatted as (base58 is Monero base58):
//!
//! ```text
//! "Offer:" | base58(serialize(offer))
//! ```
//!
//! The offer contains:
//!
//! - A version number, used for the version and potentially enabling features
//! - The offer parameters, containing the amounts, price, timings, etc.
//! - A node identifier, used to secure the communication with the other peer
//! - A peer address, used to connect to the other peer

use bitcoin::secp256k1::PublicKey;
use bitcoin::Amount;
use inet2_addr::InetSocketAddr;
use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};
use strict_encoding::{StrictDecode, StrictEncode};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use std::fmt::{self, Display};
use std::io;
use std::str::FromStr;

use crate::blockchain::{FeePriority, FeeStrategy, Network};
use crate::consensus::{self, serialize, serialize_hex, CanonicalBytes, Decodable, Encodable};
use crate::escrow::EscrowTerms;
use crate::fee::{self, SatPerKvB};
use crate::fiat::{FiatAmount, FiatCurrency, PaymentMethod};
use crate::hash::HashString;
use crate::role::{MarketRole, Position, TradeRole};
use crate::Uuid;

/// First six magic bytes of an offer. Bytes are included inside the base58
/// encoded part.
pub const OFFER_MAGIC_BYTES: &[u8; 6] = b"PTRADE";

/// Prefix for serialized offer.
pub const OFFER_PREFIX: &str = "Offer:";

/// An offer version containing the version and the activated features if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("v{0}")]
pub struct Version(u16);

impl Version {
    /// Create a new version 1 offer.
    pub fn new_v1() -> Self {
        Self::new(1)
    }

    /// Create an offer version from a raw version and feature `u16`.
    pub fn new(version: u16) -> Self {
        Version(version)
    }

    /// Version and features as `u16`.
    pub fn to_u16(&self) -> u16 {
        self.0
    }
}

impl Encodable for Version {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.to_u16().consensus_encode(s)
    }
}

impl Decodable for Version {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self::new(Decodable::consensus_decode(d)?))
    }
}

/// Errors used when manipulating offers and trades.
#[derive(Error, Debug)]
pub enum Error {
    /// The offer version is not supported.
    #[error("Unsupported version")]
    UnsupportedVersion,
    /// The taken amount is not within the offer bounds.
    #[error("Trade amount {amount} exceeds the offered {max}")]
    AmountOutOfRange {
        /// The amount the taker asked for.
        amount: Amount,
        /// The maximum amount the offer allows.
        max: Amount,
    },
    /// The escrow value cannot cover the expected payout.
    #[error("Escrow value {escrow} cannot cover the expected payout")]
    InsufficientEscrow {
        /// The value locked in the escrow output.
        escrow: Amount,
    },
}

/// The identifier of an offer. This is a wrapper around [`Uuid`] that can be
/// transformed into a [`TradeId`] when the offer is taken.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    Serialize,
    Deserialize,
    StrictEncode,
    StrictDecode,
)]
#[serde(transparent)]
#[display(inner)]
pub struct OfferId(pub Uuid);

impl From<Uuid> for OfferId {
    fn from(u: Uuid) -> Self {
        OfferId(u)
    }
}

impl From<uuid::Uuid> for OfferId {
    fn from(u: uuid::Uuid) -> Self {
        OfferId(u.into())
    }
}

impl Encodable for OfferId {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(s)
    }
}

impl Decodable for OfferId {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self(Decodable::consensus_decode(d)?))
    }
}

/// The identifier of a trade. This is a wrapper around [`Uuid`] that can be
/// constructed from an [`OfferId`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    Serialize,
    Deserialize,
    StrictEncode,
    StrictDecode,
)]
#[serde(transparent)]
#[display(inner)]
pub struct TradeId(pub Uuid);

impl TradeId {
    /// Generate a new random trade identifier.
    pub fn random() -> Self {
        TradeId(Uuid::new())
    }
}

impl From<Uuid> for TradeId {
    fn from(u: Uuid) -> Self {
        TradeId(u)
    }
}

impl From<uuid::Uuid> for TradeId {
    fn from(u: uuid::Uuid) -> Self {
        TradeId(u.into())
    }
}

impl From<OfferId> for TradeId {
    fn from(o: OfferId) -> Self {
        TradeId(o.0)
    }
}

impl Encodable for TradeId {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(s)
    }
}

impl Decodable for TradeId {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self(Decodable::consensus_decode(d)?))
    }
}

fixed_hash::construct_fixed_hash!(
    /// Identify an offer by its content, internally store the hash of the
    /// offer serialized with Peertrade consensus.
    pub struct OfferFingerprint(32);
);

impl Serialize for OfferFingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{:#x}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for OfferFingerprint {
    fn deserialize<D>(deserializer: D) -> Result<OfferFingerprint, D::Error>
    where
        D: Deserializer<'de>,
    {
        OfferFingerprint::from_str(&deserializer.deserialize_string(HashString)?)
            .map_err(de::Error::custom)
    }
}

/// `OfferParameters` is created by a [`TradeRole::Offerer`] before the start
/// of his daemon, it references all the data needed to parametrize an offer
/// and be validated from a [`TradeRole::Taker`] perspective. The daemon
/// starts when the offerer is ready to finalize his offer, transforming the
/// parameters into an [`Offer`] which contains the data needed to a taker to
/// connect to the offerer's daemon (address and identity).
///
/// ## Serde implementation
/// Bitcoin amounts have multiple serialization representations, e.g. btc and
/// sat. Using [`Display`] and [`FromStr`] unifies the interface to
/// de/serialize generic amounts.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OfferParameters {
    /// The offer unique identifier.
    pub uuid: OfferId,
    /// Network to use.
    pub network: Network,
    /// Amount of bitcoin to exchange.
    #[serde(with = "string")]
    pub trade_amount: Amount,
    /// Price asked for a whole bitcoin, in minor units of the fiat currency.
    pub price: FiatAmount,
    /// The fiat currency the off-chain payment must be made in.
    pub currency: FiatCurrency,
    /// The payment rail the off-chain payment must use.
    pub payment_method: PaymentMethod,
    /// Security deposit each party locks in the escrow on top of the traded
    /// amount.
    #[serde(with = "string")]
    pub security_deposit: Amount,
    /// The chosen fee strategy for the escrow transactions.
    pub fee_strategy: FeeStrategy<SatPerKvB>,
    /// The economic role taken by the offerer.
    pub offerer_role: MarketRole,
}

mod string {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Display for OfferParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Uuid: {}", self.uuid)?;
        writeln!(f, "Fingerprint: {:?}", self.fingerprint())?;
        writeln!(f, "Network: {}", self.network)?;
        writeln!(f, "Amount: {}", self.trade_amount)?;
        writeln!(f, "Price: {} {}", self.price, self.currency)?;
        writeln!(f, "Payment method: {}", self.payment_method)?;
        writeln!(f, "Security deposit: {}", self.security_deposit)?;
        writeln!(f, "Fee strategy: {}", self.fee_strategy)?;
        writeln!(f, "Offerer market role: {}", self.offerer_role)
    }
}

impl OfferParameters {
    /// Transform the offer parameters in an offer of [`Version`] 1.
    pub fn to_v1(self, node_id: PublicKey, peer_address: InetSocketAddr) -> Offer {
        Offer {
            version: Version::new_v1(),
            parameters: self,
            node_id,
            peer_address,
        }
    }

    /// Return the future market role for the given trade role.
    pub fn market_role(&self, trade_role: &TradeRole) -> MarketRole {
        match trade_role {
            TradeRole::Offerer => self.offerer_role,
            TradeRole::Taker => self.offerer_role.other(),
        }
    }

    /// Return the unique offer identifier. Same as [`Self::uuid()`].
    pub fn id(&self) -> OfferId {
        self.uuid()
    }

    /// Return the unique offer identifier.
    pub fn uuid(&self) -> OfferId {
        self.uuid
    }

    /// Reset offer's uuid with a new identifier.
    pub fn randomize_uuid(&mut self) {
        self.uuid = OfferId(Uuid::new());
    }

    /// Generate the [`OfferFingerprint`] from the offer parameters. The
    /// fingerprint identifies the content of an offer's parameters (**without
    /// the uuid**) by taking the hash value of its serialization.
    pub fn fingerprint(&self) -> OfferFingerprint {
        let mut keccak = Keccak::v256();
        let mut out = [0u8; 32];
        keccak.update(&serialize(self)[16..]);
        keccak.finalize(&mut out);
        OfferFingerprint(out)
    }
}

impl Encodable for OfferParameters {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.uuid.consensus_encode(s)?;
        len += self.network.consensus_encode(s)?;
        len += self.trade_amount.as_canonical_bytes().consensus_encode(s)?;
        len += self.price.consensus_encode(s)?;
        len += self.currency.consensus_encode(s)?;
        len += self.payment_method.consensus_encode(s)?;
        len += self
            .security_deposit
            .as_canonical_bytes()
            .consensus_encode(s)?;
        len += self.fee_strategy.consensus_encode(s)?;
        Ok(len + self.offerer_role.consensus_encode(s)?)
    }
}

impl Decodable for OfferParameters {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(OfferParameters {
            uuid: Decodable::consensus_decode(d)?,
            network: Decodable::consensus_decode(d)?,
            trade_amount: Amount::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            price: Decodable::consensus_decode(d)?,
            currency: Decodable::consensus_decode(d)?,
            payment_method: Decodable::consensus_decode(d)?,
            security_deposit: Amount::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            fee_strategy: Decodable::consensus_decode(d)?,
            offerer_role: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(OfferParameters);

/// An offer is shared across the [`TradeRole::Offerer`]'s preferred network to
/// signal it is willing to trade some bitcoin at some conditions. The amounts
/// and conditions are defined in the [`OfferParameters`], offerer peer
/// connection information are contained in the offer.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// The offer version.
    pub version: Version,
    /// The content of the offer.
    pub parameters: OfferParameters,
    /// Node public key, used both as an ID and encryption key for per-session
    /// ECDH.
    pub node_id: PublicKey,
    /// Address of the listening daemon's peer. An internet socket address,
    /// which consists of an IP or Tor address and a port number.
    pub peer_address: InetSocketAddr,
}

impl Offer {
    /// Generate the offer [`OfferFingerprint`]. Serialize the offer (**without
    /// uuid**) and return its keccak hash.
    pub fn fingerprint(&self) -> OfferFingerprint {
        let mut keccak = Keccak::v256();
        let mut out = [0u8; 32];
        let ser = serialize(self);
        keccak.update(&ser[..8]);
        keccak.update(&ser[24..]);
        keccak.finalize(&mut out);
        OfferFingerprint(out)
    }

    /// Returns the hex string representation of the consensus encoded offer.
    pub fn to_hex(&self) -> String {
        serialize_hex(self)
    }

    /// Return the unique offer identifier. Same as [`Self::uuid()`].
    pub fn id(&self) -> OfferId {
        self.uuid()
    }

    /// Return the unique offer identifier.
    pub fn uuid(&self) -> OfferId {
        self.parameters.uuid()
    }

    /// Reset offer's uuid with a new identifier.
    pub fn randomize_uuid(&mut self) {
        self.parameters.randomize_uuid();
    }

    /// Return the future market role for the given trade role.
    pub fn market_role(&self, trade_role: &TradeRole) -> MarketRole {
        self.parameters.market_role(trade_role)
    }
}

impl Display for Offer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encoded = base58_monero::encode_check(consensus::serialize(self).as_ref())
            .expect("Encoding in base58 check works");
        write!(f, "{}{}", OFFER_PREFIX, encoded)
    }
}

impl FromStr for Offer {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with(OFFER_PREFIX) {
            return Err(consensus::Error::IncorrectMagicBytes);
        }
        let decoded = base58_monero::decode_check(&s[OFFER_PREFIX.len()..])
            .map_err(consensus::Error::new)?;
        let mut res = std::io::Cursor::new(decoded);
        Decodable::consensus_decode(&mut res)
    }
}

impl Encodable for Offer {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = OFFER_MAGIC_BYTES.consensus_encode(s)?;
        len += self.version.consensus_encode(s)?;
        len += self.parameters.consensus_encode(s)?;
        len += self.node_id.as_canonical_bytes().consensus_encode(s)?;
        len +=
            strict_encoding::StrictEncode::strict_encode(&self.peer_address, s).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Failed to encode InetSocketAddr",
                )
            })?;
        Ok(len)
    }
}

impl Decodable for Offer {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let magic_bytes: [u8; 6] = Decodable::consensus_decode(d)?;
        if magic_bytes != *OFFER_MAGIC_BYTES {
            return Err(consensus::Error::IncorrectMagicBytes);
        }
        Ok(Offer {
            version: Decodable::consensus_decode(d)?,
            parameters: Decodable::consensus_decode(d)?,
            node_id: PublicKey::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            peer_address: strict_encoding::StrictDecode::strict_decode(d)
                .map_err(consensus::Error::new)?,
        })
    }
}

impl_strict_encoding!(Offer);

/// The network identity of the remote party of a trade: its node public key
/// and the socket address its daemon listens on. Immutable for the life of a
/// trade.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Node public key of the remote party.
    pub node_id: PublicKey,
    /// Socket address the remote daemon listens on.
    pub address: InetSocketAddr,
}

impl Peer {
    /// Create a new peer reference.
    pub fn new(node_id: PublicKey, address: InetSocketAddr) -> Self {
        Peer { node_id, address }
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.address)
    }
}

impl Encodable for Peer {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.node_id.as_canonical_bytes().consensus_encode(s)?;
        Ok(len
            + strict_encoding::StrictEncode::strict_encode(&self.address, s).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Failed to encode InetSocketAddr",
                )
            })?)
    }
}

impl Decodable for Peer {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Peer {
            node_id: PublicKey::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            address: strict_encoding::StrictDecode::strict_decode(d)
                .map_err(consensus::Error::new)?,
        })
    }
}

impl_strict_encoding!(Peer);

/// The economic agreement created when a taker accepts an offer: the offer,
/// the actual amount taken, and the escrow terms both parties must fund and
/// settle against. Referenced by the protocol state container, not owned by
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    /// The trade unique identifier.
    pub id: TradeId,
    /// The offer this trade is built on.
    pub offer: Offer,
    /// Amount of bitcoin actually traded, at most the offered amount.
    pub amount: Amount,
    /// The escrow funding and settlement terms of this trade.
    pub terms: EscrowTerms,
}

impl Trade {
    /// Create a trade by taking an offer for the given amount, resolving the
    /// escrow terms from the offer's fee strategy.
    pub fn new(
        id: TradeId,
        offer: Offer,
        amount: Amount,
        fee_priority: FeePriority,
    ) -> Result<Self, Error> {
        if offer.version != Version::new_v1() {
            return Err(Error::UnsupportedVersion);
        }
        if amount > offer.parameters.trade_amount {
            return Err(Error::AmountOutOfRange {
                amount,
                max: offer.parameters.trade_amount,
            });
        }
        let payout_fee = fee::payout_fee(&offer.parameters.fee_strategy, fee_priority);
        let terms = EscrowTerms::for_trade(
            offer.parameters.offerer_role.other(),
            amount,
            offer.parameters.security_deposit,
            payout_fee,
        );
        Ok(Trade {
            id,
            offer,
            amount,
            terms,
        })
    }

    /// Create a trade with explicit escrow terms, bypassing fee resolution.
    pub fn with_terms(id: TradeId, offer: Offer, amount: Amount, terms: EscrowTerms) -> Self {
        Trade {
            id,
            offer,
            amount,
            terms,
        }
    }

    /// Return the trade unique identifier.
    pub fn id(&self) -> TradeId {
        self.id
    }

    /// Return the market role of the taker of this trade.
    pub fn taker_market_role(&self) -> MarketRole {
        self.offer.parameters.offerer_role.other()
    }

    /// Return the position held by the participant with the given trade role.
    pub fn position(&self, trade_role: TradeRole) -> Position {
        Position::new(self.offer.market_role(&trade_role), trade_role)
    }

    /// Return the payout split `(offerer, taker)` this trade's terms call
    /// for, given the value locked in the escrow output: the buyer receives
    /// the traded amount plus its security deposit back, the seller receives
    /// the remainder after the payout fee.
    pub fn expected_payout(&self, escrow_value: Amount) -> Result<(Amount, Amount), Error> {
        let buyer = self
            .amount
            .checked_add(self.offer.parameters.security_deposit)
            .ok_or(Error::InsufficientEscrow {
                escrow: escrow_value,
            })?;
        let seller = escrow_value
            .checked_sub(self.terms.payout_fee)
            .and_then(|rest| rest.checked_sub(buyer))
            .ok_or(Error::InsufficientEscrow {
                escrow: escrow_value,
            })?;
        match self.offer.parameters.offerer_role {
            MarketRole::Buyer => Ok((buyer, seller)),
            MarketRole::Seller => Ok((seller, buyer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::blockchain::{FeeStrategy, Network};
    use crate::fee::SatPerKvB;
    use crate::fiat::PaymentMethod;
    use crate::role::MarketRole;
    use inet2_addr::InetSocketAddr;
    use secp256k1::PublicKey;
    use uuid::uuid;

    lazy_static::lazy_static! {
        pub static ref NODE_ID: PublicKey = {
            let sk =
                bitcoin::util::key::PrivateKey::from_wif("L1HKVVLHXiUhecWnwFYF6L3shkf1E12HUmuZTESvBXUdx3yqVP1D")
                    .unwrap()
                    .inner;
            secp256k1::PublicKey::from_secret_key(&secp256k1::Secp256k1::new(), &sk)
        };

        pub static ref PEER_ADDRESS: InetSocketAddr = {
            InetSocketAddr::socket(
                FromStr::from_str("1.2.3.4").unwrap(),
                FromStr::from_str("9735").unwrap(),
            )
        };

        pub static ref OFFER_PARAMS: OfferParameters = {
            OfferParameters {
                uuid: uuid!("67e55044-10b1-426f-9247-bb680e5fe0c8").into(),
                network: Network::Testnet,
                trade_amount: Amount::from_sat(1_350_000),
                price: FiatAmount::from_minor(6_500_000),
                currency: FiatCurrency::from_str("EUR").unwrap(),
                payment_method: PaymentMethod::Sepa,
                security_deposit: Amount::from_sat(135_000),
                fee_strategy: FeeStrategy::Fixed(SatPerKvB::from_sat(1000)),
                offerer_role: MarketRole::Buyer,
            }
        };
    }

    #[test]
    fn display_and_parse_offer() {
        let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
        let s = format!("{}", offer);
        assert!(s.starts_with(OFFER_PREFIX));
        let parsed = Offer::from_str(&s).expect("Valid offer string");
        assert_eq!(parsed, offer);
    }

    #[test]
    fn parse_offer_fail_without_prefix() {
        let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
        let s = format!("{}", offer);
        match Offer::from_str(&s[OFFER_PREFIX.len()..]) {
            Err(consensus::Error::IncorrectMagicBytes) => (),
            _ => panic!("Should have return an error IncorrectMagicBytes"),
        }
    }

    #[test]
    fn fingerprint_ignores_uuid() {
        let params = OFFER_PARAMS.clone();
        let mut randomized = params.clone();
        randomized.randomize_uuid();
        assert_ne!(params.uuid(), randomized.uuid());
        assert_eq!(params.fingerprint(), randomized.fingerprint());
    }

    #[test]
    fn consensus_offer_params_roundtrip() {
        let bytes = serialize(&*OFFER_PARAMS);
        let decoded = consensus::deserialize::<OfferParameters>(&bytes).unwrap();
        assert_eq!(*OFFER_PARAMS, decoded);
    }

    #[test]
    fn take_offer_respects_amount_bound() {
        let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
        let too_much = Amount::from_sat(2_000_000);
        match Trade::new(TradeId::random(), offer, too_much, FeePriority::Low) {
            Err(Error::AmountOutOfRange { .. }) => (),
            _ => panic!("Should have rejected an amount above the offer"),
        }
    }

    #[test]
    fn expected_payout_returns_deposit_to_buyer() {
        let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
        let amount = Amount::from_sat(1_000_000);
        let trade = Trade::with_terms(
            TradeId::random(),
            offer,
            amount,
            EscrowTerms {
                taker_funding: Amount::from_sat(1_135_000),
                offerer_funding: Amount::from_sat(135_000),
                payout_fee: Amount::from_sat(1_000),
            },
        );
        // escrow holds both fundings minus a 500 sat deposit fee
        let escrow_value = Amount::from_sat(1_269_500);
        let (offerer, taker) = trade.expected_payout(escrow_value).unwrap();
        // the offerer bought: traded amount plus its deposit back
        assert_eq!(offerer, Amount::from_sat(1_135_000));
        // the taker sold: the remainder minus the payout fee
        assert_eq!(taker, Amount::from_sat(133_500));
    }
}
