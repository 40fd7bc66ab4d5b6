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

//! Escrow transactions of a trade: the deposit transaction jointly funded by
//! both participants paying a 2-of-2 multisig output, and the payout
//! transaction spending that output to settle the final balances. This module
//! builds both transactions and implements the structural and value checks
//! the protocol state runs before accepting data from the counterparty.

use std::collections::HashMap;
use std::error;
use std::io;

use thiserror::Error;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Script};
use bitcoin::blockdata::transaction::{EcdsaSighashType, OutPoint, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::util::sighash::SighashCache;
use bitcoin::{Address, Amount};

use crate::blockchain::Network;
use crate::consensus::{self, CanonicalBytes, Decodable, Encodable};
use crate::role::{MarketRole, TradeRole};

/// A list specifying general categories of escrow transaction errors.
#[derive(Error, Debug)]
pub enum Error {
    /// An input of the deposit transaction is not declared by either party.
    #[error("Input {0} of the deposit transaction is not part of the declared funding outputs")]
    UndeclaredInput(OutPoint),
    /// A declared funding output is not consumed by the deposit transaction.
    #[error("Declared funding output {0} is not spent by the deposit transaction")]
    UnspentDeclaredOutput(OutPoint),
    /// The same funding output appears twice in the declarations.
    #[error("Funding output {0} is declared more than once")]
    DuplicateDeclaredOutput(OutPoint),
    /// The transaction does not pay the expected escrow script.
    #[error("The transaction does not pay the expected escrow script")]
    MissingEscrowOutput,
    /// The published deposit disagrees with the negotiated draft.
    #[error("The published deposit transaction does not match the negotiated draft")]
    DepositDraftMismatch,
    /// The two views of the deposit transaction spend different input sets.
    #[error("The deposit views spend different input sets")]
    InputSetMismatch,
    /// A party's declared funding does not balance with its obligations.
    #[error("Declared funding of {declared} does not balance {expected} plus change")]
    FundingImbalance {
        /// Total value of the party's declared connected outputs.
        declared: Amount,
        /// The funding obligation of the party under the escrow terms.
        expected: Amount,
    },
    /// The payout amounts do not conserve the escrowed value.
    #[error(
        "Payout split {offerer} + {taker} + fee {fee} does not equal the escrow value {escrow}"
    )]
    SplitImbalance {
        /// Amount assigned to the offerer.
        offerer: Amount,
        /// Amount assigned to the taker.
        taker: Amount,
        /// Miner fee reserved for the payout transaction.
        fee: Amount,
        /// Value locked in the escrow output.
        escrow: Amount,
    },
    /// The payout transaction does not spend the escrow output.
    #[error("The payout transaction does not spend the escrow output")]
    WrongPayoutInput,
    /// The payout transaction outputs disagree with the agreed split.
    #[error("The payout transaction outputs do not match the agreed split")]
    WrongPayoutOutputs,
    /// The published payout differs from the co-signed payout.
    #[error("The published payout transaction differs from the co-signed one")]
    PayoutTxMismatch,
    /// Not enough funds to create the transaction.
    #[error("Not enough funds to create the transaction")]
    NotEnoughFunds,
    /// Missing public key in the script.
    #[error("Public key not found in the script")]
    MissingPublicKey,
    /// Wrong script template.
    #[error("Wrong script template: {0}")]
    WrongTemplate(&'static str),
    /// Any escrow error not part of this list.
    #[error("Escrow error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new escrow error of type [`Self::Other`] with an arbitrary
    /// payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }
}

/// A prior unspent output funding one input of the deposit transaction. The
/// output carries its value so both parties can verify value conservation on
/// the deposit before co-signing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedOutput {
    /// Location of the output on chain.
    pub out_point: OutPoint,
    /// The output itself, script and value.
    pub tx_out: TxOut,
}

impl ConnectedOutput {
    /// Create a new connected output reference.
    pub fn new(out_point: OutPoint, tx_out: TxOut) -> Self {
        ConnectedOutput { out_point, tx_out }
    }

    /// Return the value of the output.
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.tx_out.value)
    }
}

impl Encodable for ConnectedOutput {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.out_point.as_canonical_bytes().consensus_encode(s)?;
        Ok(len + self.tx_out.as_canonical_bytes().consensus_encode(s)?)
    }
}

impl Decodable for ConnectedOutput {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(ConnectedOutput {
            out_point: OutPoint::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
            tx_out: TxOut::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?,
        })
    }
}

impl_strict_encoding!(ConnectedOutput);

/// Sum the values of a list of connected outputs.
pub fn funding_total(outputs: &[ConnectedOutput]) -> Amount {
    Amount::from_sat(outputs.iter().map(|o| o.tx_out.value).sum())
}

/// The funding and settlement obligations of a trade: how much each party
/// must bring into the deposit transaction and the miner fee reserved for the
/// payout transaction. Resolved once when the offer is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowTerms {
    /// Total value the taker must bring as deposit inputs.
    pub taker_funding: Amount,
    /// Total value the offerer must bring as deposit inputs.
    pub offerer_funding: Amount,
    /// Miner fee reserved for the payout transaction.
    pub payout_fee: Amount,
}

impl EscrowTerms {
    /// Resolve the terms of a trade: the seller brings the traded amount on
    /// top of its security deposit, the buyer brings its security deposit
    /// only.
    pub fn for_trade(
        taker_role: MarketRole,
        amount: Amount,
        security_deposit: Amount,
        payout_fee: Amount,
    ) -> Self {
        match taker_role {
            MarketRole::Seller => EscrowTerms {
                taker_funding: amount + security_deposit,
                offerer_funding: security_deposit,
                payout_fee,
            },
            MarketRole::Buyer => EscrowTerms {
                taker_funding: security_deposit,
                offerer_funding: amount + security_deposit,
                payout_fee,
            },
        }
    }

    /// Return the funding obligation of the given trade role.
    pub fn funding_for(&self, role: TradeRole) -> Amount {
        match role {
            TradeRole::Offerer => self.offerer_funding,
            TradeRole::Taker => self.taker_funding,
        }
    }

    /// Return the total value both parties bring into the deposit.
    pub fn total_funding(&self) -> Amount {
        self.taker_funding + self.offerer_funding
    }
}

/// The 2-of-2 cooperative lock paying the escrow output of the deposit
/// transaction. Taker key first, offerer key second; both signatures are
/// required to spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowLock {
    taker: PublicKey,
    offerer: PublicKey,
}

impl EscrowLock {
    /// Create a new lock over the two participant keys.
    pub fn new(taker: PublicKey, offerer: PublicKey) -> Self {
        EscrowLock { taker, offerer }
    }

    /// Return the witness script of the lock.
    pub fn script(&self) -> Script {
        Builder::new()
            .push_key(&bitcoin::util::key::PublicKey::new(self.taker))
            .push_opcode(opcodes::all::OP_CHECKSIGVERIFY)
            .push_key(&bitcoin::util::key::PublicKey::new(self.offerer))
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    }

    /// Return the SegWit v0 script pubkey paying the lock.
    pub fn v0_p2wsh(&self) -> Script {
        self.script().to_v0_p2wsh()
    }

    /// Return the address paying the lock on the given network.
    pub fn address(&self, network: Network) -> Address {
        Address::p2wsh(&self.script(), network.into())
    }

    /// Parse a witness script back into the lock, validating the template.
    pub fn from_script(s: &Script) -> Result<Self, Error> {
        use bitcoin::blockdata::opcodes::all;

        let mut ints = s.instructions();
        // Taker pubkey
        let bytes = ints
            .next()
            .ok_or(Error::MissingPublicKey)
            .map_or_else(Err, |v| match v {
                Ok(Instruction::PushBytes(b)) => Ok(b),
                Err(e) => Err(Error::new(e)),
                _ => Err(Error::MissingPublicKey),
            })?;
        let taker = PublicKey::from_slice(bytes).map_err(Error::new)?;
        // Checksig verify
        ints.next()
            .ok_or(Error::WrongTemplate("Missing opcode"))
            .map_or_else(Err, |v| match v {
                Ok(Instruction::Op(all::OP_CHECKSIGVERIFY)) => Ok(()),
                Err(e) => Err(Error::new(e)),
                _ => Err(Error::WrongTemplate("Missing CHECKSIGVERIFY opcode")),
            })?;
        // Offerer pubkey
        let bytes = ints
            .next()
            .ok_or(Error::MissingPublicKey)
            .map_or_else(Err, |v| match v {
                Ok(Instruction::PushBytes(b)) => Ok(b),
                Err(e) => Err(Error::new(e)),
                _ => Err(Error::MissingPublicKey),
            })?;
        let offerer = PublicKey::from_slice(bytes).map_err(Error::new)?;
        // Checksig
        ints.next()
            .ok_or(Error::WrongTemplate("Missing opcode"))
            .map_or_else(Err, |v| match v {
                Ok(Instruction::Op(all::OP_CHECKSIG)) => Ok(()),
                Err(e) => Err(Error::new(e)),
                _ => Err(Error::WrongTemplate("Missing CHECKSIG opcode")),
            })?;

        // Script done, return an error if some error or some instruction
        if let Some(v) = ints.next() {
            return match v {
                Ok(_) => Err(Error::WrongTemplate("Too many opcodes")),
                Err(e) => Err(Error::new(e)),
            };
        }

        Ok(EscrowLock { taker, offerer })
    }

    /// Return the public key of the given trade role.
    pub fn pubkey(&self, role: TradeRole) -> &PublicKey {
        match role {
            TradeRole::Taker => &self.taker,
            TradeRole::Offerer => &self.offerer,
        }
    }
}

/// The consumable escrow output of the published deposit transaction. This
/// contains all the data needed to build the payout transaction on top of it
/// and to produce a valid unlocking witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowOutput {
    /// Location of the escrow output in the deposit transaction.
    pub out_point: OutPoint,
    /// The escrow output itself.
    pub tx_out: TxOut,
    /// The witness script locking the output.
    pub witness_script: Script,
}

impl EscrowOutput {
    /// Return the value locked in the escrow output.
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.tx_out.value)
    }
}

/// Locate the escrow output paying the given lock inside a deposit
/// transaction.
pub fn find_escrow_output(deposit: &Transaction, lock: &EscrowLock) -> Result<EscrowOutput, Error> {
    let script_pubkey = lock.v0_p2wsh();
    deposit
        .output
        .iter()
        .enumerate()
        .find(|(_, tx_out)| tx_out.script_pubkey == script_pubkey)
        .map(|(ix, tx_out)| EscrowOutput {
            out_point: OutPoint::new(deposit.txid(), ix as u32),
            tx_out: tx_out.clone(),
            witness_script: lock.script(),
        })
        .ok_or(Error::MissingEscrowOutput)
}

/// Assemble the unsigned deposit transaction: both parties' funding inputs,
/// the escrow output first, then the change outputs of the offerer and the
/// taker. The deposit miner fee is deducted from the escrow output.
pub fn build_deposit_draft(
    lock: &EscrowLock,
    offerer_connected: &[ConnectedOutput],
    offerer_change: &[TxOut],
    taker_connected: &[ConnectedOutput],
    taker_change: &[TxOut],
    deposit_fee: Amount,
) -> Result<PartiallySignedTransaction, Error> {
    let input: Vec<TxIn> = offerer_connected
        .iter()
        .chain(taker_connected.iter())
        .map(|c| TxIn {
            previous_output: c.out_point,
            script_sig: Script::default(),
            sequence: u32::MAX,
            witness: Witness::new(),
        })
        .collect();

    let change_sum: u64 = offerer_change
        .iter()
        .chain(taker_change.iter())
        .map(|o| o.value)
        .sum();
    let escrow_value = funding_total(offerer_connected)
        .checked_add(funding_total(taker_connected))
        .and_then(|total| total.checked_sub(Amount::from_sat(change_sum)))
        .and_then(|total| total.checked_sub(deposit_fee))
        .ok_or(Error::NotEnoughFunds)?;

    let mut output = vec![TxOut {
        value: escrow_value.as_sat(),
        script_pubkey: lock.v0_p2wsh(),
    }];
    output.extend(offerer_change.iter().cloned());
    output.extend(taker_change.iter().cloned());

    let unsigned_tx = Transaction {
        version: 2,
        lock_time: 0,
        input,
        output,
    };
    let mut psbt =
        PartiallySignedTransaction::from_unsigned_tx(unsigned_tx).map_err(Error::new)?;
    for (psbt_in, connected) in psbt
        .inputs
        .iter_mut()
        .zip(offerer_connected.iter().chain(taker_connected.iter()))
    {
        psbt_in.witness_utxo = Some(connected.tx_out.clone());
    }
    Ok(psbt)
}

/// Verify that the input set of the published deposit transaction is exactly
/// the union of both parties' declared connected outputs, value-for-value:
/// every input must be declared, every declared output must be spent, and the
/// declared values must cover the deposit outputs.
pub fn verify_inputs_against_declared(
    deposit: &Transaction,
    offerer_connected: &[ConnectedOutput],
    taker_connected: &[ConnectedOutput],
) -> Result<(), Error> {
    let mut declared: HashMap<OutPoint, u64> = HashMap::new();
    for output in offerer_connected.iter().chain(taker_connected.iter()) {
        if declared
            .insert(output.out_point, output.tx_out.value)
            .is_some()
        {
            return Err(Error::DuplicateDeclaredOutput(output.out_point));
        }
    }

    for txin in deposit.input.iter() {
        if !declared.contains_key(&txin.previous_output) {
            return Err(Error::UndeclaredInput(txin.previous_output));
        }
    }
    for out_point in declared.keys() {
        if !deposit
            .input
            .iter()
            .any(|txin| txin.previous_output == *out_point)
        {
            return Err(Error::UnspentDeclaredOutput(*out_point));
        }
    }

    let input_value: u64 = declared.values().sum();
    let output_value: u64 = deposit.output.iter().map(|o| o.value).sum();
    if input_value < output_value {
        return Err(Error::NotEnoughFunds);
    }
    Ok(())
}

/// Verify that a party's declared connected outputs balance its funding
/// obligation plus the change it takes back out of the deposit.
pub fn verify_party_funding(
    connected: &[ConnectedOutput],
    change: &[TxOut],
    funding: Amount,
) -> Result<(), Error> {
    let declared = funding_total(connected);
    let change_sum: u64 = change.iter().map(|o| o.value).sum();
    let expected = funding
        .checked_add(Amount::from_sat(change_sum))
        .ok_or(Error::NotEnoughFunds)?;
    if declared != expected {
        return Err(Error::FundingImbalance { declared, expected });
    }
    Ok(())
}

/// Verify that the published deposit transaction is the finalized variant of
/// the negotiated draft: same inputs, same outputs, same transaction
/// identifier.
pub fn verify_matches_draft(
    draft: &PartiallySignedTransaction,
    published: &Transaction,
) -> Result<(), Error> {
    let unsigned = &draft.unsigned_tx;
    if unsigned.input.len() != published.input.len()
        || unsigned
            .input
            .iter()
            .zip(published.input.iter())
            .any(|(a, b)| a.previous_output != b.previous_output)
    {
        return Err(Error::DepositDraftMismatch);
    }
    if unsigned.output != published.output {
        return Err(Error::DepositDraftMismatch);
    }
    // SegWit txid commits to everything but the witnesses
    if unsigned.txid() != published.txid() {
        return Err(Error::DepositDraftMismatch);
    }
    Ok(())
}

/// Verify that two views of the deposit transaction spend the same input set,
/// regardless of input ordering.
pub fn verify_same_input_set(
    draft: &PartiallySignedTransaction,
    view: &Transaction,
) -> Result<(), Error> {
    let mut ours: Vec<OutPoint> = draft
        .unsigned_tx
        .input
        .iter()
        .map(|i| i.previous_output)
        .collect();
    let mut theirs: Vec<OutPoint> = view.input.iter().map(|i| i.previous_output).collect();
    ours.sort();
    theirs.sort();
    if ours != theirs {
        return Err(Error::InputSetMismatch);
    }
    Ok(())
}

/// Verify that the payout amounts conserve the escrowed value:
/// `offerer + taker + fee` must equal the value of the escrow output.
pub fn verify_payout_split(
    offerer: Amount,
    taker: Amount,
    fee: Amount,
    escrow: Amount,
) -> Result<(), Error> {
    let total = offerer
        .checked_add(taker)
        .and_then(|t| t.checked_add(fee))
        .ok_or(Error::SplitImbalance {
            offerer,
            taker,
            fee,
            escrow,
        })?;
    if total != escrow {
        return Err(Error::SplitImbalance {
            offerer,
            taker,
            fee,
            escrow,
        });
    }
    Ok(())
}

/// Build the unsigned payout transaction spending the escrow output and
/// distributing the agreed amounts, offerer output first.
pub fn build_payout(
    escrow: &EscrowOutput,
    offerer: (Amount, &Address),
    taker: (Amount, &Address),
) -> Transaction {
    Transaction {
        version: 2,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: escrow.out_point,
            script_sig: Script::default(),
            sequence: u32::MAX,
            witness: Witness::new(),
        }],
        output: vec![
            TxOut {
                value: offerer.0.as_sat(),
                script_pubkey: offerer.1.script_pubkey(),
            },
            TxOut {
                value: taker.0.as_sat(),
                script_pubkey: taker.1.script_pubkey(),
            },
        ],
    }
}

/// Verify that a payout transaction spends exactly the escrow output and
/// pays the agreed amounts. The offerer destination is checked when known.
pub fn verify_payout_template(
    payout: &Transaction,
    escrow: &EscrowOutput,
    offerer_amount: Amount,
    taker_amount: Amount,
    offerer_address: Option<&Address>,
) -> Result<(), Error> {
    if payout.input.len() != 1 || payout.input[0].previous_output != escrow.out_point {
        return Err(Error::WrongPayoutInput);
    }
    if payout.output.len() != 2 {
        return Err(Error::WrongPayoutOutputs);
    }
    if payout.output[0].value != offerer_amount.as_sat()
        || payout.output[1].value != taker_amount.as_sat()
    {
        return Err(Error::WrongPayoutOutputs);
    }
    if let Some(address) = offerer_address {
        if payout.output[0].script_pubkey != address.script_pubkey() {
            return Err(Error::WrongPayoutOutputs);
        }
    }
    Ok(())
}

/// Computes the [`BIP-143`][bip-143] compliant sighash for a `SIGHASH_ALL`
/// signature over the payout transaction's only input, the escrow output.
///
/// [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki
pub fn payout_signature_hash(payout: &Transaction, escrow: &EscrowOutput) -> Sha256dHash {
    SighashCache::new(payout)
        .segwit_signature_hash(
            0,
            &escrow.witness_script,
            escrow.tx_out.value,
            EcdsaSighashType::All,
        )
        .expect("encoding works")
        .as_hash()
}

/// Computes the [`BIP-143`][bip-143] compliant signature for the given hash.
/// Assumes that the hash is correctly computed.
///
/// [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki
pub fn sign_hash(
    sighash: Sha256dHash,
    secret_key: &bitcoin::secp256k1::SecretKey,
) -> Result<Signature, bitcoin::secp256k1::Error> {
    let context = Secp256k1::new();
    // Makes signature.
    let msg = Message::from_slice(&sighash[..])?;
    let mut sig = context.sign_ecdsa(&msg, secret_key);
    sig.normalize_s();
    Ok(sig)
}

/// Attach both witnesses to the payout transaction, making it ready for
/// broadcast. The offerer signature sits at the bottom of the stack because
/// its key is checked last by the witness script.
pub fn finalize_payout(
    payout: &mut Transaction,
    lock: &EscrowLock,
    taker_sig: &Signature,
    offerer_sig: &Signature,
) {
    let mut offerer = offerer_sig.serialize_der().to_vec();
    offerer.push(EcdsaSighashType::All.to_u32() as u8);
    let mut taker = taker_sig.serialize_der().to_vec();
    taker.push(EcdsaSighashType::All.to_u32() as u8);
    payout.input[0].witness = Witness::from_vec(vec![
        offerer,
        taker,
        lock.script().into_bytes(),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn pubkey(fill: u8) -> PublicKey {
        // Generator point times a small scalar gives deterministic valid keys
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[fill; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    fn out_point(vout: u32) -> OutPoint {
        OutPoint::new(Txid::from_slice(&[0x11; 32]).unwrap(), vout)
    }

    fn connected(vout: u32, value: u64) -> ConnectedOutput {
        ConnectedOutput::new(
            out_point(vout),
            TxOut {
                value,
                script_pubkey: Script::new(),
            },
        )
    }

    #[test]
    fn escrow_script_roundtrip() {
        let lock = EscrowLock::new(pubkey(1), pubkey(2));
        let parsed = EscrowLock::from_script(&lock.script()).unwrap();
        assert_eq!(lock, parsed);
        assert_eq!(parsed.pubkey(TradeRole::Taker), lock.pubkey(TradeRole::Taker));
    }

    #[test]
    fn escrow_script_rejects_wrong_template() {
        let script = Builder::new()
            .push_key(&bitcoin::util::key::PublicKey::new(pubkey(1)))
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script();
        assert!(EscrowLock::from_script(&script).is_err());
    }

    #[test]
    fn split_must_balance() {
        let escrow = Amount::from_sat(149_980_000);
        assert!(verify_payout_split(
            Amount::from_sat(50_000_000),
            Amount::from_sat(99_980_000),
            Amount::from_sat(0),
            escrow,
        )
        .is_ok());
        match verify_payout_split(
            Amount::from_sat(50_000_000),
            Amount::from_sat(100_000_000),
            Amount::from_sat(0),
            escrow,
        ) {
            Err(Error::SplitImbalance { .. }) => (),
            _ => panic!("Split exceeding the escrow must not balance"),
        }
    }

    #[test]
    fn deposit_inputs_must_match_declared_union() {
        let offerer = vec![connected(0, 50_000_000)];
        let taker = vec![connected(1, 100_000_000)];
        let deposit = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![
                TxIn {
                    previous_output: out_point(0),
                    script_sig: Script::default(),
                    sequence: u32::MAX,
                    witness: Witness::new(),
                },
                TxIn {
                    previous_output: out_point(1),
                    script_sig: Script::default(),
                    sequence: u32::MAX,
                    witness: Witness::new(),
                },
            ],
            output: vec![TxOut {
                value: 149_980_000,
                script_pubkey: Script::new(),
            }],
        };
        assert!(verify_inputs_against_declared(&deposit, &offerer, &taker).is_ok());

        // one declared output is not consumed
        let mut missing = deposit.clone();
        missing.input.pop();
        match verify_inputs_against_declared(&missing, &offerer, &taker) {
            Err(Error::UnspentDeclaredOutput(_)) => (),
            _ => panic!("A declared output left unspent must be rejected"),
        }

        // one input was never declared
        let mut undeclared = deposit;
        undeclared.input[1].previous_output = out_point(7);
        match verify_inputs_against_declared(&undeclared, &offerer, &taker) {
            Err(Error::UndeclaredInput(_)) => (),
            _ => panic!("An undeclared input must be rejected"),
        }
    }

    #[test]
    fn party_funding_must_balance() {
        let connected = vec![connected(0, 100_000_000)];
        let change = vec![TxOut {
            value: 10_000_000,
            script_pubkey: Script::new(),
        }];
        assert!(
            verify_party_funding(&connected, &change, Amount::from_sat(90_000_000)).is_ok()
        );
        match verify_party_funding(&connected, &change, Amount::from_sat(95_000_000)) {
            Err(Error::FundingImbalance { .. }) => (),
            _ => panic!("Unbalanced funding must be rejected"),
        }
    }

    #[test]
    fn draft_and_view_input_sets() {
        let lock = EscrowLock::new(pubkey(1), pubkey(2));
        let offerer = vec![connected(0, 50_000_000)];
        let taker = vec![connected(1, 100_000_000)];
        let draft =
            build_deposit_draft(&lock, &offerer, &[], &taker, &[], Amount::from_sat(20_000))
                .unwrap();

        // same inputs in another order are still the same set
        let mut view = draft.unsigned_tx.clone();
        view.input.reverse();
        assert!(verify_same_input_set(&draft, &view).is_ok());

        view.input[0].previous_output = out_point(9);
        match verify_same_input_set(&draft, &view) {
            Err(Error::InputSetMismatch) => (),
            _ => panic!("A different input set must be rejected"),
        }
    }

    #[test]
    fn built_deposit_balances_and_pays_escrow() {
        let lock = EscrowLock::new(pubkey(1), pubkey(2));
        let offerer = vec![connected(0, 50_000_000)];
        let taker = vec![connected(1, 100_000_000)];
        let draft =
            build_deposit_draft(&lock, &offerer, &[], &taker, &[], Amount::from_sat(20_000))
                .unwrap();
        let escrow = find_escrow_output(&draft.unsigned_tx, &lock).unwrap();
        assert_eq!(escrow.value(), Amount::from_sat(149_980_000));
        assert!(verify_inputs_against_declared(&draft.unsigned_tx, &offerer, &taker).is_ok());
    }
}
