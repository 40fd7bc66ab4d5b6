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

//! Fiat side of a trade: currencies, amounts in minor units, payment methods,
//! and the account references exchanged between peers so the buyer knows
//! where to send the off-chain payment. The library never verifies the fiat
//! transfer itself, it only transports and stores these references.

use std::fmt;
use std::io;
use std::str::FromStr;

use crate::consensus::{self, CanonicalBytes, Decodable, Encodable};

/// An ISO 4217-style alphabetic currency code, e.g. `EUR` or `USD`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FiatCurrency(String);

impl FiatCurrency {
    /// Return the currency code as a string slice.
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FiatCurrency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FiatCurrency {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 3 && s.chars().all(|c| c.is_ascii_uppercase()) {
            Ok(FiatCurrency(s.into()))
        } else {
            Err(consensus::Error::ParseFailed(
                "currency code must be 3 uppercase ASCII letters",
            ))
        }
    }
}

impl CanonicalBytes for FiatCurrency {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().into()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        std::str::from_utf8(bytes)
            .map_err(consensus::Error::new)?
            .parse()
    }
}

impl Encodable for FiatCurrency {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(s)
    }
}

impl Decodable for FiatCurrency {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        String::consensus_decode(d)?
            .parse()
            .map_err(|_| consensus::Error::ParseFailed("invalid currency code"))
    }
}

impl_strict_encoding!(FiatCurrency);

/// A fiat amount expressed in the minor unit of its currency (e.g. cents).
/// The currency is carried separately, amounts of different currencies must
/// never be compared.
#[derive(
    Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[serde(transparent)]
#[display(inner)]
pub struct FiatAmount(pub u64);

impl FiatAmount {
    /// Create an amount from a number of minor currency units.
    pub fn from_minor(units: u64) -> Self {
        FiatAmount(units)
    }

    /// Return the number of minor currency units.
    pub fn as_minor(&self) -> u64 {
        self.0
    }
}

impl FromStr for FiatAmount {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FiatAmount(s.parse().map_err(consensus::Error::new)?))
    }
}

impl Encodable for FiatAmount {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(s)
    }
}

impl Decodable for FiatAmount {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(FiatAmount(u64::consensus_decode(d)?))
    }
}

impl_strict_encoding!(FiatAmount);

/// Payment rails supported for the off-chain leg of a trade.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum PaymentMethod {
    /// SEPA bank transfer, EUR only.
    Sepa,
    /// Domestic bank transfer.
    NationalBank,
    /// International wire transfer.
    InternationalBank,
    /// Revolut account to account transfer.
    Revolut,
    /// Swish mobile payment, SEK only.
    Swish,
}

impl FromStr for PaymentMethod {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sepa" | "sepa" => Ok(PaymentMethod::Sepa),
            "NationalBank" => Ok(PaymentMethod::NationalBank),
            "InternationalBank" => Ok(PaymentMethod::InternationalBank),
            "Revolut" | "revolut" => Ok(PaymentMethod::Revolut),
            "Swish" | "swish" => Ok(PaymentMethod::Swish),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl Encodable for PaymentMethod {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            PaymentMethod::Sepa => 0x01u8.consensus_encode(writer),
            PaymentMethod::NationalBank => 0x02u8.consensus_encode(writer),
            PaymentMethod::InternationalBank => 0x03u8.consensus_encode(writer),
            PaymentMethod::Revolut => 0x04u8.consensus_encode(writer),
            PaymentMethod::Swish => 0x05u8.consensus_encode(writer),
        }
    }
}

impl Decodable for PaymentMethod {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(PaymentMethod::Sepa),
            0x02u8 => Ok(PaymentMethod::NationalBank),
            0x03u8 => Ok(PaymentMethod::InternationalBank),
            0x04u8 => Ok(PaymentMethod::Revolut),
            0x05u8 => Ok(PaymentMethod::Swish),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(PaymentMethod);

/// A reference to an off-chain payment account of one participant. Shared
/// with the counterparty so the fiat transfer can be initiated and matched;
/// the holder name and account number are opaque to the protocol.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatAccount {
    /// Name of the account holder as registered with the payment provider.
    pub holder_name: String,
    /// Account number, IBAN, or provider-specific identifier.
    pub account_number: String,
    /// Currency the account operates in.
    pub currency: FiatCurrency,
    /// Payment rail the account belongs to.
    pub payment_method: PaymentMethod,
    /// ISO 3166 country code of the account.
    pub country: String,
}

impl Encodable for FiatAccount {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.holder_name.consensus_encode(s)?;
        len += self.account_number.consensus_encode(s)?;
        len += self.currency.consensus_encode(s)?;
        len += self.payment_method.consensus_encode(s)?;
        Ok(len + self.country.consensus_encode(s)?)
    }
}

impl Decodable for FiatAccount {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(FiatAccount {
            holder_name: Decodable::consensus_decode(d)?,
            account_number: Decodable::consensus_decode(d)?,
            currency: Decodable::consensus_decode(d)?,
            payment_method: Decodable::consensus_decode(d)?,
            country: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(FiatAccount);

impl fmt::Display for FiatAccount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} account {} ({})",
            self.payment_method, self.account_number, self.currency
        )
    }
}

/// Local user state a trade draws on: the account identifier registered with
/// the network and the fiat account to settle trades against. Owned by the
/// user store, borrowed by each trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The user account identifier on the trade network.
    pub account_id: String,
    /// The fiat account used to send or receive the off-chain payment.
    pub fiat_account: FiatAccount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_currency_code() {
        assert!(FiatCurrency::from_str("EUR").is_ok());
        assert!(FiatCurrency::from_str("usd").is_err());
        assert!(FiatCurrency::from_str("EURO").is_err());
    }

    #[test]
    fn fiat_account_consensus_roundtrip() {
        let account = FiatAccount {
            holder_name: "Satoshi Nakamoto".into(),
            account_number: "DE02120300000000202051".into(),
            currency: FiatCurrency::from_str("EUR").unwrap(),
            payment_method: PaymentMethod::Sepa,
            country: "DE".into(),
        };
        let bytes = consensus::serialize(&account);
        let decoded = consensus::deserialize::<FiatAccount>(&bytes).unwrap();
        assert_eq!(account, decoded);
    }
}
