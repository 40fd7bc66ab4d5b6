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

//! Transaction fee unit type and implementation. Defines the [`SatPerKvB`]
//! unit used in methods that set the fee and check the fee on transactions
//! given a [`FeeStrategy`] and a [`FeePriority`].
//!
//! ```rust
//! use peertrade_core::fee::SatPerKvB;
//!
//!# fn main() -> Result<(), peertrade_core::consensus::Error> {
//! // Parse a Bitcoin amount suffixed with '/kvB'
//! let rate = "100 satoshi/kvB".parse::<SatPerKvB>()?;
//! // ...also work with any other valid Bitcoin denomination
//! let rate = "0.000001 BTC/kvB".parse::<SatPerKvB>()?;
//!
//! // Always displayed as 'statoshi/kvB'
//! assert_eq!("100 satoshi/kvB", format!("{}", rate));
//!# Ok(())
//!# }
//! ```

use bitcoin::blockdata::transaction::TxOut;
use bitcoin::blockdata::witness::Witness;
use bitcoin::util::amount::Denomination;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::Amount;

use crate::blockchain::{Fee, FeePriority, FeeStrategy, FeeStrategyError};
use crate::consensus::{self, CanonicalBytes};

use std::str::FromStr;

use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};

/// The unit used to mesure a quantity, or weight, for a Bitcoin transaction.
/// This represent a 1'000 of virtual Bytes.
pub const WEIGHT_UNIT: &str = "kvB";

/// Virtual size upper bound of the payout transaction: one escrow input with
/// two signatures and the witness script, two P2WPKH outputs.
pub const PAYOUT_TX_VSIZE: u64 = 172;

/// An amount of Bitcoin (internally in satoshis) representing the number of
/// satoshis per virtual byte a transaction must use for its fee. A
/// [`FeeStrategy`] can use one of more of this type depending of its
/// complexity (fixed, range, etc).
#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Hash, Eq, Display)]
#[display(display_sats_per_vbyte)]
pub struct SatPerKvB(Amount);

fn display_sats_per_vbyte(rate: &SatPerKvB) -> String {
    format!(
        "{}/{}",
        rate.as_native_unit()
            .to_string_with_denomination(Denomination::Satoshi),
        WEIGHT_UNIT
    )
}

impl SatPerKvB {
    /// Create a fee quantity per virtual byte of given satoshis.
    pub fn from_sat(satoshis: u64) -> Self {
        SatPerKvB(Amount::from_sat(satoshis))
    }

    /// Return the number of satoshis per virtual byte to use for calculating
    /// the fee.
    pub fn as_sat(&self) -> u64 {
        self.0.as_sat()
    }

    /// Create a fee quantity per virtual byte of given `bitcoin` crate amount.
    pub fn from_native_unit(amount: Amount) -> Self {
        SatPerKvB(amount)
    }

    /// Return the number of bitcoins per virtual byte to use for calculating
    /// the fee as the native `bitcoin` crate amount.
    pub fn as_native_unit(&self) -> Amount {
        self.0
    }

    /// Return the fee amount corresponding to the given virtual size.
    pub fn fee_for_vsize(&self, vsize: u64) -> Amount {
        let rate = self.0.to_float_in(Denomination::Satoshi);
        let fee_amount = rate / 1000f64 * vsize as f64;
        Amount::from_sat(fee_amount.round() as u64)
    }
}

impl Serialize for SatPerKvB {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for SatPerKvB {
    fn deserialize<D>(deserializer: D) -> Result<SatPerKvB, D::Error>
    where
        D: Deserializer<'de>,
    {
        SatPerKvB::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

impl CanonicalBytes for SatPerKvB {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(&self.0.as_sat())
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        Ok(SatPerKvB(Amount::from_sat(
            bitcoin::consensus::encode::deserialize(bytes).map_err(consensus::Error::new)?,
        )))
    }
}

impl FromStr for SatPerKvB {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('/').collect::<Vec<&str>>();
        if parts.len() != 2 {
            return Err(consensus::Error::ParseFailed(
                "sat/kvB format is not respected",
            ));
        }
        let amount = parts[0].parse::<Amount>().map_err(consensus::Error::new)?;
        match parts[1] {
            WEIGHT_UNIT => Ok(Self(amount)),
            _ => Err(consensus::Error::ParseFailed("Weight unit parse failed")),
        }
    }
}

/// Resolve the fee rate to use for the given strategy and priority.
pub fn resolve_rate(strategy: &FeeStrategy<SatPerKvB>, priority: FeePriority) -> SatPerKvB {
    match strategy {
        FeeStrategy::Fixed(rate) => *rate,
        FeeStrategy::Range { min_inc, max_inc } => match priority {
            FeePriority::Low => *min_inc,
            FeePriority::High => *max_inc,
        },
    }
}

/// Return the fee amount to reserve for the payout transaction under the
/// given strategy. Used when resolving the escrow terms at take-offer time.
pub fn payout_fee(strategy: &FeeStrategy<SatPerKvB>, priority: FeePriority) -> Amount {
    resolve_rate(strategy, priority).fee_for_vsize(PAYOUT_TX_VSIZE)
}

fn get_available_input_sat(tx: &PartiallySignedTransaction) -> Result<Amount, FeeStrategyError> {
    // Get the available amount on the transaction
    let inputs: Result<Vec<TxOut>, FeeStrategyError> = tx
        .inputs
        .iter()
        .map(|psbt_in| {
            psbt_in
                .witness_utxo
                .clone()
                .ok_or(FeeStrategyError::MissingInputsMetadata)
        })
        .collect();
    Ok(Amount::from_sat(
        inputs?.iter().map(|txout| txout.value).sum(),
    ))
}

fn simulated_witness() -> Witness {
    // Simulate a P2WPKH spend: one signature and one compressed public key
    Witness::from_vec(vec![vec![0; 72], vec![0; 33]])
}

impl Fee for PartiallySignedTransaction {
    type FeeUnit = SatPerKvB;

    type Amount = Amount;

    /// Calculates and sets the fee on the given transaction and return the
    /// fee set. The fee is deducted from the first output, the escrow output
    /// of a deposit transaction; change outputs are left untouched.
    fn set_fee(
        &mut self,
        strategy: &FeeStrategy<SatPerKvB>,
        priority: FeePriority,
    ) -> Result<Amount, FeeStrategyError> {
        if self.unsigned_tx.output.is_empty() {
            return Err(FeeStrategyError::new("transaction has no outputs"));
        }

        let input_sum = get_available_input_sat(self)?;
        let change_sum = Amount::from_sat(
            self.unsigned_tx
                .output
                .iter()
                .skip(1)
                .map(|txout| txout.value)
                .sum(),
        );

        // simulate witness data on every input
        for txin in self.unsigned_tx.input.iter_mut() {
            txin.witness = simulated_witness();
        }
        let vsize = self.unsigned_tx.vsize() as u64;
        // remove witness
        for txin in self.unsigned_tx.input.iter_mut() {
            txin.witness = Witness::new();
        }

        let fee_amount = resolve_rate(strategy, priority).fee_for_vsize(vsize);

        // Apply the fee on the first output
        self.unsigned_tx.output[0].value = input_sum
            .checked_sub(change_sum)
            .and_then(|a| a.checked_sub(fee_amount))
            .ok_or(FeeStrategyError::NotEnoughAssets)?
            .as_sat();

        // Return the fee amount set in native blockchain asset unit
        Ok(fee_amount)
    }

    /// Validates that the fee for the given transaction is set accordingly to
    /// the strategy.
    fn validate_fee(
        &self,
        strategy: &FeeStrategy<SatPerKvB>,
    ) -> Result<bool, FeeStrategyError> {
        let input_sum = get_available_input_sat(self)?.as_sat();
        let output_sum: u64 = self
            .unsigned_tx
            .output
            .iter()
            .map(|txout| txout.value)
            .sum();
        let effective_fee = input_sum
            .checked_sub(output_sum)
            .ok_or(FeeStrategyError::AmountOfFeeTooHigh)?;

        // simulate witness data
        let mut tx = self.unsigned_tx.clone();
        for txin in tx.input.iter_mut() {
            txin.witness = simulated_witness();
        }
        let vsize = tx.vsize() as u64;

        match strategy {
            FeeStrategy::Fixed(rate) => Ok(effective_fee == rate.fee_for_vsize(vsize).as_sat()),
            FeeStrategy::Range { min_inc, max_inc } => {
                let low = min_inc.fee_for_vsize(vsize).as_sat();
                let high = max_inc.fee_for_vsize(vsize).as_sat();
                Ok(effective_fee >= low && effective_fee <= high)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SerdeTest {
        fee: SatPerKvB,
    }

    #[test]
    fn parse_sats_per_vbyte() {
        for s in [
            "0.0001 BTC/kvB",
            "100 satoshi/kvB",
            "100 satoshis/kvB",
            "10 satoshi/kvB",
            "1 satoshi/kvB",
        ]
        .iter()
        {
            let parse = SatPerKvB::from_str(s);
            assert!(parse.is_ok());
        }
        // MUST fail
        for s in ["1 satoshi", "100 kvB"].iter() {
            let parse = SatPerKvB::from_str(s);
            assert!(parse.is_err());
        }
    }

    #[test]
    fn display_sats_per_vbyte() {
        let fee_rate = SatPerKvB::from_sat(100);
        assert_eq!(format!("{}", fee_rate), "100 satoshi/kvB".to_string());
    }

    #[test]
    fn fee_for_vsize_rounds_to_nearest_sat() {
        let rate = SatPerKvB::from_sat(1000);
        assert_eq!(rate.fee_for_vsize(172), Amount::from_sat(172));
        let rate = SatPerKvB::from_sat(1);
        assert_eq!(rate.fee_for_vsize(400), Amount::from_sat(0));
        assert_eq!(rate.fee_for_vsize(600), Amount::from_sat(1));
    }

    #[test]
    fn serialize_fee_rate_in_yaml() {
        let fee_rate = SerdeTest {
            fee: SatPerKvB::from_sat(10),
        };
        let s = serde_yaml::to_string(&fee_rate).expect("Encode fee rate in yaml");
        assert_eq!("---\nfee: 10 satoshi/kvB\n", s);
    }

    #[test]
    fn deserialize_fee_rate_in_yaml() {
        let s = "---\nfee: 10 satoshi/kvB\n";
        let fee_rate = serde_yaml::from_str(&s).expect("Decode fee rate from yaml");
        assert_eq!(
            SerdeTest {
                fee: SatPerKvB::from_sat(10)
            },
            fee_rate
        );
    }
}
