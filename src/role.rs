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

//! Roles used to distinguish the participants of a trade. A participant
//! carries two independent roles: the trade role describes who initiated the
//! trade (the offerer published the offer, the taker accepted it), the market
//! role describes the economic side (the buyer acquires bitcoin, the seller
//! disposes of it). Both combine into the four possible positions of a
//! participant.

use std::io;
use std::str::FromStr;

use crate::consensus::{self, Decodable, Encodable};

/// Role of a participant relative to the offer lifecycle. Immutable for the
/// life of a trade.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum TradeRole {
    /// The offerer role created the offer and shared it on the network, it
    /// waits for incoming takers.
    Offerer,
    /// The taker role parses offers and chooses to connect to an offerer node
    /// to start trading.
    Taker,
}

impl TradeRole {
    /// Return the other role possible in a trade.
    pub fn other(&self) -> Self {
        match self {
            Self::Offerer => Self::Taker,
            Self::Taker => Self::Offerer,
        }
    }
}

impl Encodable for TradeRole {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            TradeRole::Offerer => 0x01u8.consensus_encode(writer),
            TradeRole::Taker => 0x02u8.consensus_encode(writer),
        }
    }
}

impl Decodable for TradeRole {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(TradeRole::Offerer),
            0x02u8 => Ok(TradeRole::Taker),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(TradeRole);

impl FromStr for TradeRole {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Offerer" | "offerer" => Ok(TradeRole::Offerer),
            "Taker" | "taker" => Ok(TradeRole::Taker),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// Economic role of a participant, independent of which one initiated the
/// trade.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum MarketRole {
    /// The buyer acquires bitcoin and pays with an off-chain fiat transfer.
    Buyer,
    /// The seller locks bitcoin in the escrow and receives an off-chain fiat
    /// transfer.
    Seller,
}

impl MarketRole {
    /// Return the other economic role.
    pub fn other(&self) -> Self {
        match self {
            Self::Buyer => Self::Seller,
            Self::Seller => Self::Buyer,
        }
    }
}

impl Encodable for MarketRole {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            MarketRole::Buyer => 0x01u8.consensus_encode(writer),
            MarketRole::Seller => 0x02u8.consensus_encode(writer),
        }
    }
}

impl Decodable for MarketRole {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(MarketRole::Buyer),
            0x02u8 => Ok(MarketRole::Seller),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(MarketRole);

impl FromStr for MarketRole {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buyer" | "buyer" => Ok(MarketRole::Buyer),
            "Seller" | "seller" => Ok(MarketRole::Seller),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// The four possible positions of a participant in a trade, combining its
/// [`MarketRole`] and its [`TradeRole`]. Role-specific protocol state is
/// expressed per position while sharing the common validation logic.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum Position {
    /// Buying bitcoin through an offer we published.
    BuyerAsOfferer,
    /// Buying bitcoin through an offer we accepted.
    BuyerAsTaker,
    /// Selling bitcoin through an offer we published.
    SellerAsOfferer,
    /// Selling bitcoin through an offer we accepted.
    SellerAsTaker,
}

impl Position {
    /// Combine a market role and a trade role into a position.
    pub fn new(market_role: MarketRole, trade_role: TradeRole) -> Self {
        match (market_role, trade_role) {
            (MarketRole::Buyer, TradeRole::Offerer) => Self::BuyerAsOfferer,
            (MarketRole::Buyer, TradeRole::Taker) => Self::BuyerAsTaker,
            (MarketRole::Seller, TradeRole::Offerer) => Self::SellerAsOfferer,
            (MarketRole::Seller, TradeRole::Taker) => Self::SellerAsTaker,
        }
    }

    /// Return the economic role of this position.
    pub fn market_role(&self) -> MarketRole {
        match self {
            Self::BuyerAsOfferer | Self::BuyerAsTaker => MarketRole::Buyer,
            Self::SellerAsOfferer | Self::SellerAsTaker => MarketRole::Seller,
        }
    }

    /// Return the trade role of this position.
    pub fn trade_role(&self) -> TradeRole {
        match self {
            Self::BuyerAsOfferer | Self::SellerAsOfferer => TradeRole::Offerer,
            Self::BuyerAsTaker | Self::SellerAsTaker => TradeRole::Taker,
        }
    }

    /// Return the position held by the counterparty: both roles flip.
    pub fn counterparty(&self) -> Self {
        Self::new(self.market_role().other(), self.trade_role().other())
    }
}

impl Encodable for Position {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            Position::BuyerAsOfferer => 0x01u8.consensus_encode(writer),
            Position::BuyerAsTaker => 0x02u8.consensus_encode(writer),
            Position::SellerAsOfferer => 0x03u8.consensus_encode(writer),
            Position::SellerAsTaker => 0x04u8.consensus_encode(writer),
        }
    }
}

impl Decodable for Position {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(Position::BuyerAsOfferer),
            0x02u8 => Ok(Position::BuyerAsTaker),
            0x03u8 => Ok(Position::SellerAsOfferer),
            0x04u8 => Ok(Position::SellerAsTaker),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(Position);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_roundtrip_roles() {
        for market in [MarketRole::Buyer, MarketRole::Seller] {
            for trade in [TradeRole::Offerer, TradeRole::Taker] {
                let position = Position::new(market, trade);
                assert_eq!(position.market_role(), market);
                assert_eq!(position.trade_role(), trade);
            }
        }
    }

    #[test]
    fn counterparty_flips_both_roles() {
        let position = Position::SellerAsTaker;
        assert_eq!(position.counterparty(), Position::BuyerAsOfferer);
        assert_eq!(position.counterparty().counterparty(), position);
    }
}
