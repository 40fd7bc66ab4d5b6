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

//! Protocol state of a trade and the guards protecting it.
//!
//! The state container accumulates, step by step, the cryptographic and
//! transactional artifacts both parties must agree on before funds move:
//! public keys, the jointly funded deposit transaction, its connected
//! outputs, signatures over the payout transaction, and the final payout
//! split. Every field written by one protocol step is read and validated by
//! a later step, often after a network round-trip to an untrusted
//! counterparty.
//!
//! All setters are write-once: a second write to an already-set field is a
//! sequencing bug and fails loudly, never silently overwrites. A validation
//! failure is unrecoverable at this level and moves the trade to the
//! terminal [`TradePhase::Failed`]; retry policy belongs to the sequencer,
//! which must never re-enter a state that already wrote a write-once field.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use bitcoin::blockdata::transaction::{Transaction, TxOut};
use bitcoin::hash_types::Txid;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::{Address, Amount};

use crate::crypto::{self, KeyChain, TradeKeyId, Verify};
use crate::escrow::{self, ConnectedOutput, EscrowLock, EscrowOutput};
use crate::fiat::{FiatAccount, UserProfile};
use crate::protocol::message::{
    DepositFundingProposal, DepositInputsRequest, DepositPublishRequest, DepositPublished,
    FiatTransferStarted, PayoutPublished,
};
use crate::trade::{Offer, Peer, Trade};

pub mod message;

/// The phases a trade passes through, derived from the populated fields of
/// the state container. The sequencer drives the transitions, the container
/// only guards them; [`Self::Failed`] and [`Self::PayoutPublished`] are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum TradePhase {
    /// The container exists, the local key is derived.
    Created,
    /// The counterparty escrow key arrived.
    KeysExchanged,
    /// The take-offer fee transaction is recorded.
    FeePaid,
    /// Both parties declared the outputs funding their deposit inputs.
    OutputsCollected,
    /// The deposit transaction draft is assembled.
    DepositDrafted,
    /// The deposit transaction is published; funds are at risk from here on.
    DepositPublished,
    /// Both payout amounts are agreed and conserve the escrowed value.
    PayoutAmountsAgreed,
    /// The payout transaction is assembled.
    PayoutDrafted,
    /// The counterparty signature over the payout transaction validated.
    PayoutSignedByPeer,
    /// The co-signed payout transaction is published. Terminal success.
    PayoutPublished,
    /// A validation failed or the trade was aborted. Terminal.
    Failed,
}

/// Names of the write-once fields of the state container, used in errors and
/// failure reports to identify which step went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum FieldId {
    /// The counterparty escrow public key.
    OffererPubKey,
    /// The take-offer fee transaction.
    FeeTx,
    /// The outputs funding the offerer's deposit inputs.
    OffererConnectedOutputs,
    /// The change outputs of the offerer in the deposit.
    OffererOutputs,
    /// The outputs funding the taker's deposit inputs.
    TakerConnectedOutputs,
    /// The change outputs of the taker in the deposit.
    TakerOutputs,
    /// The locally assembled deposit transaction draft.
    DepositDraft,
    /// The deposit transaction as constructed by the counterparty.
    CounterpartyDepositTx,
    /// The deposit transaction as published on the network.
    PublishedDepositTx,
    /// The pair of payout amounts.
    PayoutAmounts,
    /// The destination of the offerer's payout share.
    OffererPayoutAddress,
    /// The assembled payout transaction.
    PayoutTx,
    /// The counterparty signature over the payout transaction.
    OffererSignature,
    /// The taker fiat account.
    TakerFiatAccount,
    /// The taker account identifier.
    TakerAccountId,
    /// The payout transaction as published on the network.
    PublishedPayoutTx,
}

/// Errors raised by the validated setters of the state container. All of
/// them are unrecoverable at the container level: the container never retries
/// internally and surfaces the typed failure to the sequencer.
#[derive(Error, Debug)]
pub enum Error {
    /// The local key setup failed, the trade cannot start.
    #[error("Local key derivation failed: {0}")]
    KeyDerivation(crypto::Error),
    /// The remote key is invalid: a 2-of-2 escrow requires two distinct
    /// signing keys.
    #[error("Invalid remote key: identical to the local taker key")]
    InvalidKey,
    /// A step ran out of order, a sequencing bug.
    #[error("{field} written while in phase {phase}")]
    OutOfOrder {
        /// The field the write targeted.
        field: FieldId,
        /// The phase the container was in.
        phase: TradePhase,
    },
    /// A second write to a write-once field, a sequencing bug.
    #[error("{0} is already set, write-once fields are never overwritten")]
    AlreadySet(FieldId),
    /// The published deposit disagrees with the negotiated state, a strong
    /// signal of tampering.
    #[error("Published deposit disagrees with the negotiated state: {0}")]
    DepositMismatch(escrow::Error),
    /// The payout split does not balance against the escrowed value.
    #[error("Payout split does not balance: {0}")]
    AmountConservation(escrow::Error),
    /// The payout transaction disagrees with the agreed split.
    #[error("Payout transaction inconsistent with the agreed state: {0}")]
    PayoutMismatch(escrow::Error),
    /// The remote signature fails the cryptographic check against the remote
    /// key and the exact payout transaction bytes.
    #[error("Remote payout signature rejected: {0}")]
    SignatureValidation(crypto::Error),
    /// The trade reached a terminal phase and accepts no further writes.
    #[error("The trade reached the terminal phase {0} and accepts no further writes")]
    TerminalState(TradePhase),
}

/// Record of the failure that moved a trade to [`TradePhase::Failed`]. Keeps
/// which field or step failed and whether on-chain funds were already locked
/// in the escrow when it happened, so the user can be told if dispute
/// handling is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// The field whose write failed, if the failure was a field write.
    pub field: Option<FieldId>,
    /// Human readable reason, rendered from the original error.
    pub reason: String,
    /// Whether the deposit transaction was already published.
    pub funds_at_risk: bool,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{} failed: {}", field, self.reason)?,
            None => write!(f, "trade failed: {}", self.reason)?,
        }
        if self.funds_at_risk {
            write!(f, " (funds locked on-chain, dispute handling required)")?;
        }
        Ok(())
    }
}

/// Data common to any role in a trade derived from an offer: the offer terms,
/// the counterparty-independent service handles, and the local user state.
/// Service handles are injected here so every container instance is
/// independently testable with substitute collaborators.
#[derive(Debug)]
pub struct OfferContext<M, W, C, S> {
    /// The offer the trade executes.
    pub offer: Offer,
    /// Peer message delivery handle.
    pub messenger: M,
    /// Wallet key chain handle.
    pub wallet: W,
    /// Chain syncer handle.
    pub syncer: C,
    /// Signature verification handle.
    pub signer: S,
    /// Local user state.
    pub user: UserProfile,
}

/// Protocol state of the participant selling bitcoin in a trade it joined as
/// taker of a previously published offer. Wraps the role-agnostic
/// [`OfferContext`] and adds the fields exchanged and derived during the
/// deposit-and-payout sub-protocol.
///
/// One instance is bound to exactly one trade and driven by one logical
/// sequence of steps; fields become immutable once set, so concurrent reads
/// of already-set fields need no lock.
#[derive(Debug)]
pub struct SellerAsTaker<M, W, C, S> {
    ctx: OfferContext<M, W, C, S>,
    trade: Arc<Trade>,
    offerer: Peer,
    taker_pubkey: PublicKey,
    failure: Option<Failure>,

    offerer_pubkey: Option<PublicKey>,
    fee_tx: Option<Transaction>,
    offerer_connected_outputs: Option<Vec<ConnectedOutput>>,
    offerer_outputs: Option<Vec<TxOut>>,
    taker_connected_outputs: Option<Vec<ConnectedOutput>>,
    taker_outputs: Option<Vec<TxOut>>,
    deposit_draft: Option<PartiallySignedTransaction>,
    counterparty_deposit_tx: Option<Transaction>,
    published_deposit_tx: Option<Transaction>,
    offerer_payout_amount: Option<Amount>,
    taker_payout_amount: Option<Amount>,
    offerer_payout_address: Option<Address>,
    payout_tx: Option<Transaction>,
    offerer_signature: Option<Signature>,
    taker_fiat_account: Option<FiatAccount>,
    taker_account_id: Option<String>,
    published_payout_tx: Option<Transaction>,
}

impl<M, W, C, S> SellerAsTaker<M, W, C, S>
where
    W: KeyChain,
    S: Verify,
{
    /// Create the state container for a freshly taken offer. The local taker
    /// public key is derived immediately and deterministically from the
    /// wallet's address entry bound to this trade; construction fails with
    /// [`Error::KeyDerivation`] if the wallet cannot produce it.
    pub fn new(
        trade: Arc<Trade>,
        offerer: Peer,
        messenger: M,
        mut wallet: W,
        syncer: C,
        signer: S,
        user: UserProfile,
    ) -> Result<Self, Error> {
        let taker_pubkey = wallet
            .trade_pubkey(trade.id(), TradeKeyId::Escrow)
            .map_err(Error::KeyDerivation)?;
        debug!("trade {}: taker escrow key derived", trade.id());
        let ctx = OfferContext {
            offer: trade.offer.clone(),
            messenger,
            wallet,
            syncer,
            signer,
            user,
        };
        Ok(SellerAsTaker {
            ctx,
            trade,
            offerer,
            taker_pubkey,
            failure: None,
            offerer_pubkey: None,
            fee_tx: None,
            offerer_connected_outputs: None,
            offerer_outputs: None,
            taker_connected_outputs: None,
            taker_outputs: None,
            deposit_draft: None,
            counterparty_deposit_tx: None,
            published_deposit_tx: None,
            offerer_payout_amount: None,
            taker_payout_amount: None,
            offerer_payout_address: None,
            payout_tx: None,
            offerer_signature: None,
            taker_fiat_account: None,
            taker_account_id: None,
            published_payout_tx: None,
        })
    }

    /// Derive the current phase from the populated fields: the furthest
    /// milestone reached. Hard orderings between milestones are enforced by
    /// the setter guards, not recomputed here.
    pub fn phase(&self) -> TradePhase {
        if self.failure.is_some() {
            return TradePhase::Failed;
        }
        if self.published_payout_tx.is_some() {
            return TradePhase::PayoutPublished;
        }
        if self.offerer_signature.is_some() {
            return TradePhase::PayoutSignedByPeer;
        }
        if self.payout_tx.is_some() {
            return TradePhase::PayoutDrafted;
        }
        if self.offerer_payout_amount.is_some() {
            return TradePhase::PayoutAmountsAgreed;
        }
        if self.published_deposit_tx.is_some() {
            return TradePhase::DepositPublished;
        }
        if self.deposit_draft.is_some() {
            return TradePhase::DepositDrafted;
        }
        if self.offerer_connected_outputs.is_some() && self.taker_connected_outputs.is_some() {
            return TradePhase::OutputsCollected;
        }
        if self.fee_tx.is_some() {
            return TradePhase::FeePaid;
        }
        if self.offerer_pubkey.is_some() {
            return TradePhase::KeysExchanged;
        }
        TradePhase::Created
    }

    /// Whether funds are already locked in the escrow output on-chain.
    pub fn funds_at_risk(&self) -> bool {
        self.published_deposit_tx.is_some()
    }

    /// Return the failure that moved the trade to [`TradePhase::Failed`], if
    /// any.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Mark the trade as failed without a field write, used by the sequencer
    /// on timeout or cancellation so no half-written state survives.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.failure.is_some() {
            return;
        }
        let reason = reason.into();
        warn!("trade {}: aborted: {}", self.trade.id(), reason);
        self.failure = Some(Failure {
            field: None,
            reason,
            funds_at_risk: self.published_deposit_tx.is_some(),
        });
    }

    fn guard(&self) -> Result<(), Error> {
        match self.phase() {
            phase @ (TradePhase::Failed | TradePhase::PayoutPublished) => {
                Err(Error::TerminalState(phase))
            }
            _ => Ok(()),
        }
    }

    fn poison(&mut self, field: FieldId, error: Error) -> Error {
        warn!("trade {}: {}", self.trade.id(), error);
        self.failure = Some(Failure {
            field: Some(field),
            reason: error.to_string(),
            funds_at_risk: self.published_deposit_tx.is_some(),
        });
        error
    }

    /// Record the counterparty escrow public key. Write-once; the key must
    /// differ from the local taker key.
    pub fn set_offerer_pubkey(&mut self, key: PublicKey) -> Result<(), Error> {
        self.guard()?;
        if self.offerer_pubkey.is_some() {
            return Err(self.poison(
                FieldId::OffererPubKey,
                Error::AlreadySet(FieldId::OffererPubKey),
            ));
        }
        if key == self.taker_pubkey {
            return Err(self.poison(FieldId::OffererPubKey, Error::InvalidKey));
        }
        debug!("trade {}: offerer escrow key recorded", self.trade.id());
        self.offerer_pubkey = Some(key);
        Ok(())
    }

    /// Record the transaction paying the take-offer fee. Write-once; the
    /// sequencer must only pass a transaction it has broadcast.
    pub fn set_fee_tx(&mut self, tx: Transaction) -> Result<(), Error> {
        self.guard()?;
        if self.fee_tx.is_some() {
            return Err(self.poison(FieldId::FeeTx, Error::AlreadySet(FieldId::FeeTx)));
        }
        self.fee_tx = Some(tx);
        Ok(())
    }

    /// Record the outputs funding the offerer's deposit inputs. Write-once.
    pub fn set_offerer_connected_outputs(
        &mut self,
        outputs: Vec<ConnectedOutput>,
    ) -> Result<(), Error> {
        self.guard()?;
        if self.offerer_connected_outputs.is_some() {
            return Err(self.poison(
                FieldId::OffererConnectedOutputs,
                Error::AlreadySet(FieldId::OffererConnectedOutputs),
            ));
        }
        self.offerer_connected_outputs = Some(outputs);
        Ok(())
    }

    /// Record the change outputs the offerer contributes to the deposit.
    /// Write-once.
    pub fn set_offerer_outputs(&mut self, outputs: Vec<TxOut>) -> Result<(), Error> {
        self.guard()?;
        if self.offerer_outputs.is_some() {
            return Err(self.poison(
                FieldId::OffererOutputs,
                Error::AlreadySet(FieldId::OffererOutputs),
            ));
        }
        self.offerer_outputs = Some(outputs);
        Ok(())
    }

    /// Record the outputs funding the taker's deposit inputs. Write-once.
    pub fn set_taker_connected_outputs(
        &mut self,
        outputs: Vec<ConnectedOutput>,
    ) -> Result<(), Error> {
        self.guard()?;
        if self.taker_connected_outputs.is_some() {
            return Err(self.poison(
                FieldId::TakerConnectedOutputs,
                Error::AlreadySet(FieldId::TakerConnectedOutputs),
            ));
        }
        self.taker_connected_outputs = Some(outputs);
        Ok(())
    }

    /// Record the change outputs the taker contributes to the deposit.
    /// Write-once.
    pub fn set_taker_outputs(&mut self, outputs: Vec<TxOut>) -> Result<(), Error> {
        self.guard()?;
        if self.taker_outputs.is_some() {
            return Err(self.poison(
                FieldId::TakerOutputs,
                Error::AlreadySet(FieldId::TakerOutputs),
            ));
        }
        self.taker_outputs = Some(outputs);
        Ok(())
    }

    /// Record the locally assembled deposit transaction draft. Write-once;
    /// requires both escrow keys and both connected output declarations, and
    /// the draft must spend exactly the declared outputs and pay the escrow
    /// script.
    pub fn set_deposit_draft(&mut self, draft: PartiallySignedTransaction) -> Result<(), Error> {
        self.guard()?;
        if self.deposit_draft.is_some() {
            return Err(self.poison(
                FieldId::DepositDraft,
                Error::AlreadySet(FieldId::DepositDraft),
            ));
        }
        let phase = self.phase();
        let lock = match self.escrow_lock() {
            Some(lock) => lock,
            None => {
                return Err(self.poison(
                    FieldId::DepositDraft,
                    Error::OutOfOrder {
                        field: FieldId::DepositDraft,
                        phase,
                    },
                ))
            }
        };
        let (offerer_connected, taker_connected) = match (
            self.offerer_connected_outputs.clone(),
            self.taker_connected_outputs.clone(),
        ) {
            (Some(o), Some(t)) => (o, t),
            _ => {
                return Err(self.poison(
                    FieldId::DepositDraft,
                    Error::OutOfOrder {
                        field: FieldId::DepositDraft,
                        phase,
                    },
                ))
            }
        };
        if let Err(e) = escrow::verify_inputs_against_declared(
            &draft.unsigned_tx,
            &offerer_connected,
            &taker_connected,
        ) {
            return Err(self.poison(FieldId::DepositDraft, Error::DepositMismatch(e)));
        }
        if let Err(e) = escrow::find_escrow_output(&draft.unsigned_tx, &lock) {
            return Err(self.poison(FieldId::DepositDraft, Error::DepositMismatch(e)));
        }
        if let Some(view) = self.counterparty_deposit_tx.clone() {
            if let Err(e) = escrow::verify_same_input_set(&draft, &view) {
                return Err(self.poison(FieldId::DepositDraft, Error::DepositMismatch(e)));
            }
        }
        debug!("trade {}: deposit draft recorded", self.trade.id());
        self.deposit_draft = Some(draft);
        Ok(())
    }

    /// Record the deposit transaction as constructed by the counterparty.
    /// Write-once; a pure cross-check input: whenever both this view and the
    /// local draft are present they must spend the same input set.
    pub fn set_counterparty_deposit_tx(&mut self, tx: Transaction) -> Result<(), Error> {
        self.guard()?;
        if self.counterparty_deposit_tx.is_some() {
            return Err(self.poison(
                FieldId::CounterpartyDepositTx,
                Error::AlreadySet(FieldId::CounterpartyDepositTx),
            ));
        }
        if let Some(draft) = self.deposit_draft.clone() {
            if let Err(e) = escrow::verify_same_input_set(&draft, &tx) {
                return Err(self.poison(FieldId::CounterpartyDepositTx, Error::DepositMismatch(e)));
            }
        }
        self.counterparty_deposit_tx = Some(tx);
        Ok(())
    }

    /// Record the deposit transaction as published on the network. Write-once
    /// and the point of no return: the published transaction must be the
    /// finalized variant of the negotiated draft, spend exactly the union of
    /// both parties' declared connected outputs value-for-value, balance each
    /// party's funding obligation, and pay the escrow script. If the payout
    /// amounts were already agreed they are re-checked against the escrowed
    /// value.
    pub fn set_published_deposit_tx(&mut self, tx: Transaction) -> Result<(), Error> {
        self.guard()?;
        if self.published_deposit_tx.is_some() {
            return Err(self.poison(
                FieldId::PublishedDepositTx,
                Error::AlreadySet(FieldId::PublishedDepositTx),
            ));
        }
        let phase = self.phase();
        let (draft, lock) = match (self.deposit_draft.clone(), self.escrow_lock()) {
            (Some(draft), Some(lock)) => (draft, lock),
            _ => {
                return Err(self.poison(
                    FieldId::PublishedDepositTx,
                    Error::OutOfOrder {
                        field: FieldId::PublishedDepositTx,
                        phase,
                    },
                ))
            }
        };
        if let Err(e) = escrow::verify_matches_draft(&draft, &tx) {
            return Err(self.poison(FieldId::PublishedDepositTx, Error::DepositMismatch(e)));
        }
        let offerer_connected = self.offerer_connected_outputs.clone().unwrap_or_default();
        let taker_connected = self.taker_connected_outputs.clone().unwrap_or_default();
        if let Err(e) =
            escrow::verify_inputs_against_declared(&tx, &offerer_connected, &taker_connected)
        {
            return Err(self.poison(FieldId::PublishedDepositTx, Error::DepositMismatch(e)));
        }
        let terms = self.trade.terms;
        if let Err(e) = escrow::verify_party_funding(
            &offerer_connected,
            &self.offerer_outputs.clone().unwrap_or_default(),
            terms.offerer_funding,
        ) {
            return Err(self.poison(FieldId::PublishedDepositTx, Error::DepositMismatch(e)));
        }
        if let Err(e) = escrow::verify_party_funding(
            &taker_connected,
            &self.taker_outputs.clone().unwrap_or_default(),
            terms.taker_funding,
        ) {
            return Err(self.poison(FieldId::PublishedDepositTx, Error::DepositMismatch(e)));
        }
        let escrow_output = match escrow::find_escrow_output(&tx, &lock) {
            Ok(output) => output,
            Err(e) => {
                return Err(self.poison(FieldId::PublishedDepositTx, Error::DepositMismatch(e)))
            }
        };
        if let (Some(offerer), Some(taker)) = (self.offerer_payout_amount, self.taker_payout_amount)
        {
            if let Err(e) = escrow::verify_payout_split(
                offerer,
                taker,
                terms.payout_fee,
                escrow_output.value(),
            ) {
                return Err(self.poison(FieldId::PublishedDepositTx, Error::AmountConservation(e)));
            }
        }
        debug!(
            "trade {}: deposit {} published, funds at risk from now on",
            self.trade.id(),
            tx.txid()
        );
        self.published_deposit_tx = Some(tx);
        Ok(())
    }

    /// Record the agreed payout amounts as a pair. Write-once; once the
    /// deposit is known the amounts plus the payout fee must equal the
    /// escrowed value exactly. A deviation signals a malicious or buggy
    /// counterparty and aborts the trade.
    pub fn set_payout_amounts(&mut self, offerer: Amount, taker: Amount) -> Result<(), Error> {
        self.guard()?;
        if self.offerer_payout_amount.is_some() || self.taker_payout_amount.is_some() {
            return Err(self.poison(
                FieldId::PayoutAmounts,
                Error::AlreadySet(FieldId::PayoutAmounts),
            ));
        }
        if let Some(escrow_output) = self.escrow_output() {
            if let Err(e) = escrow::verify_payout_split(
                offerer,
                taker,
                self.trade.terms.payout_fee,
                escrow_output.value(),
            ) {
                return Err(self.poison(FieldId::PayoutAmounts, Error::AmountConservation(e)));
            }
        }
        debug!(
            "trade {}: payout split agreed, offerer {} taker {}",
            self.trade.id(),
            offerer,
            taker
        );
        self.offerer_payout_amount = Some(offerer);
        self.taker_payout_amount = Some(taker);
        Ok(())
    }

    /// Record the destination of the offerer's payout share. Write-once.
    pub fn set_offerer_payout_address(&mut self, address: Address) -> Result<(), Error> {
        self.guard()?;
        if self.offerer_payout_address.is_some() {
            return Err(self.poison(
                FieldId::OffererPayoutAddress,
                Error::AlreadySet(FieldId::OffererPayoutAddress),
            ));
        }
        self.offerer_payout_address = Some(address);
        Ok(())
    }

    /// Record the assembled payout transaction. Write-once; requires the
    /// published deposit and the agreed amounts, and the transaction must
    /// spend exactly the escrow output and pay the agreed split.
    pub fn set_payout_tx(&mut self, tx: Transaction) -> Result<(), Error> {
        self.guard()?;
        if self.payout_tx.is_some() {
            return Err(self.poison(FieldId::PayoutTx, Error::AlreadySet(FieldId::PayoutTx)));
        }
        let phase = self.phase();
        let (escrow_output, offerer_amount, taker_amount) = match (
            self.escrow_output(),
            self.offerer_payout_amount,
            self.taker_payout_amount,
        ) {
            (Some(output), Some(offerer), Some(taker)) => (output, offerer, taker),
            _ => {
                return Err(self.poison(
                    FieldId::PayoutTx,
                    Error::OutOfOrder {
                        field: FieldId::PayoutTx,
                        phase,
                    },
                ))
            }
        };
        if let Err(e) = escrow::verify_payout_template(
            &tx,
            &escrow_output,
            offerer_amount,
            taker_amount,
            self.offerer_payout_address.as_ref(),
        ) {
            return Err(self.poison(FieldId::PayoutTx, Error::PayoutMismatch(e)));
        }
        debug!("trade {}: payout transaction assembled", self.trade.id());
        self.payout_tx = Some(tx);
        Ok(())
    }

    /// Record the counterparty signature over the payout transaction.
    /// Write-once; requires the assembled payout transaction and the
    /// signature must validate against the remote key over the exact
    /// byte-serialization of the current payout transaction. A mismatch is a
    /// hard failure, not a retryable condition.
    pub fn set_offerer_signature(&mut self, sig: Signature) -> Result<(), Error> {
        self.guard()?;
        if self.offerer_signature.is_some() {
            return Err(self.poison(
                FieldId::OffererSignature,
                Error::AlreadySet(FieldId::OffererSignature),
            ));
        }
        let phase = self.phase();
        let (payout, escrow_output, offerer_pubkey) = match (
            self.payout_tx.clone(),
            self.escrow_output(),
            self.offerer_pubkey,
        ) {
            (Some(payout), Some(output), Some(key)) => (payout, output, key),
            _ => {
                return Err(self.poison(
                    FieldId::OffererSignature,
                    Error::OutOfOrder {
                        field: FieldId::OffererSignature,
                        phase,
                    },
                ))
            }
        };
        let sighash = escrow::payout_signature_hash(&payout, &escrow_output);
        if let Err(e) = self
            .ctx
            .signer
            .verify_signature(&offerer_pubkey, sighash, &sig)
        {
            return Err(self.poison(FieldId::OffererSignature, Error::SignatureValidation(e)));
        }
        debug!("trade {}: offerer payout signature validated", self.trade.id());
        self.offerer_signature = Some(sig);
        Ok(())
    }

    /// Record the taker fiat account the off-chain payment settles against.
    /// Write-once, derived from the local user state in this role.
    pub fn set_taker_fiat_account(&mut self, account: FiatAccount) -> Result<(), Error> {
        self.guard()?;
        if self.taker_fiat_account.is_some() {
            return Err(self.poison(
                FieldId::TakerFiatAccount,
                Error::AlreadySet(FieldId::TakerFiatAccount),
            ));
        }
        self.taker_fiat_account = Some(account);
        Ok(())
    }

    /// Record the taker account identifier. Write-once.
    pub fn set_taker_account_id(&mut self, account_id: String) -> Result<(), Error> {
        self.guard()?;
        if self.taker_account_id.is_some() {
            return Err(self.poison(
                FieldId::TakerAccountId,
                Error::AlreadySet(FieldId::TakerAccountId),
            ));
        }
        self.taker_account_id = Some(account_id);
        Ok(())
    }

    /// Record the payout transaction as published on the network. Write-once;
    /// must be the witnessed variant of the co-signed payout transaction.
    /// Terminal success.
    pub fn set_published_payout_tx(&mut self, tx: Transaction) -> Result<(), Error> {
        self.guard()?;
        if self.published_payout_tx.is_some() {
            return Err(self.poison(
                FieldId::PublishedPayoutTx,
                Error::AlreadySet(FieldId::PublishedPayoutTx),
            ));
        }
        let phase = self.phase();
        let payout = match self.payout_tx.clone() {
            Some(payout) => payout,
            None => {
                return Err(self.poison(
                    FieldId::PublishedPayoutTx,
                    Error::OutOfOrder {
                        field: FieldId::PublishedPayoutTx,
                        phase,
                    },
                ))
            }
        };
        if tx.txid() != payout.txid() || tx.input[0].witness.is_empty() {
            return Err(self.poison(
                FieldId::PublishedPayoutTx,
                Error::PayoutMismatch(escrow::Error::PayoutTxMismatch),
            ));
        }
        debug!(
            "trade {}: payout {} published, trade settled",
            self.trade.id(),
            tx.txid()
        );
        self.published_payout_tx = Some(tx);
        Ok(())
    }

    /// Apply the counterparty's funding proposal: its escrow key, funding
    /// declarations, change outputs, and payout destination.
    pub fn apply_funding_proposal(&mut self, msg: DepositFundingProposal) -> Result<(), Error> {
        self.set_offerer_pubkey(msg.offerer_pubkey)?;
        self.set_offerer_connected_outputs(msg.offerer_connected_outputs)?;
        self.set_offerer_outputs(msg.offerer_outputs)?;
        self.set_offerer_payout_address(msg.offerer_payout_address)
    }

    /// Apply the counterparty's notification that the deposit was published.
    pub fn apply_deposit_published(&mut self, msg: DepositPublished) -> Result<(), Error> {
        self.set_published_deposit_tx(msg.deposit_tx)
    }

    /// Apply the counterparty's fiat-transfer notification: record the agreed
    /// amounts, cross-check the payout destination against the one already
    /// announced, and hand the signature back to the sequencer to attach once
    /// the payout transaction is assembled.
    pub fn apply_fiat_transfer_started(
        &mut self,
        msg: FiatTransferStarted,
    ) -> Result<Signature, Error> {
        match self.offerer_payout_address.clone() {
            None => self.set_offerer_payout_address(msg.offerer_payout_address)?,
            Some(address) if address == msg.offerer_payout_address => {}
            Some(_) => {
                return Err(self.poison(
                    FieldId::OffererPayoutAddress,
                    Error::PayoutMismatch(escrow::Error::WrongPayoutOutputs),
                ))
            }
        }
        self.set_payout_amounts(msg.offerer_payout_amount, msg.taker_payout_amount)?;
        Ok(msg.offerer_payout_signature)
    }

    /// Build the message opening the sub-protocol towards the offerer. Needs
    /// only the local taker public key and the local fiat account data.
    pub fn deposit_inputs_request(&self) -> Result<DepositInputsRequest, Error> {
        let taker_account_id = self.taker_account_id.clone().ok_or(Error::OutOfOrder {
            field: FieldId::TakerAccountId,
            phase: self.phase(),
        })?;
        let taker_fiat_account = self.taker_fiat_account.clone().ok_or(Error::OutOfOrder {
            field: FieldId::TakerFiatAccount,
            phase: self.phase(),
        })?;
        Ok(DepositInputsRequest {
            trade_id: self.trade.id(),
            taker_pubkey: self.taker_pubkey,
            taker_account_id,
            taker_fiat_account,
        })
    }

    /// Build the message asking the offerer to co-sign and publish the
    /// deposit. Needs the signed draft and the taker funding declarations.
    pub fn deposit_publish_request(
        &self,
        signed_deposit: PartiallySignedTransaction,
    ) -> Result<DepositPublishRequest, Error> {
        let taker_connected_outputs =
            self.taker_connected_outputs
                .clone()
                .ok_or(Error::OutOfOrder {
                    field: FieldId::TakerConnectedOutputs,
                    phase: self.phase(),
                })?;
        let taker_outputs = self.taker_outputs.clone().unwrap_or_default();
        Ok(DepositPublishRequest {
            trade_id: self.trade.id(),
            signed_deposit,
            taker_connected_outputs,
            taker_outputs,
        })
    }

    /// Build the message forwarding the published payout transaction to the
    /// offerer.
    pub fn payout_published(&self) -> Result<PayoutPublished, Error> {
        let payout_tx = self.published_payout_tx.clone().ok_or(Error::OutOfOrder {
            field: FieldId::PublishedPayoutTx,
            phase: self.phase(),
        })?;
        Ok(PayoutPublished {
            trade_id: self.trade.id(),
            payout_tx,
        })
    }

    /// Return the escrow lock over both participant keys, available once the
    /// counterparty key arrived.
    pub fn escrow_lock(&self) -> Option<EscrowLock> {
        self.offerer_pubkey
            .map(|offerer| EscrowLock::new(self.taker_pubkey, offerer))
    }

    /// Return the escrow output of the published deposit transaction,
    /// available once the deposit is published.
    pub fn escrow_output(&self) -> Option<EscrowOutput> {
        let lock = self.escrow_lock()?;
        let deposit = self.published_deposit_tx.as_ref()?;
        escrow::find_escrow_output(deposit, &lock).ok()
    }

    /// Return the identifier of the published deposit transaction, fed to the
    /// chain syncer for confirmation tracking.
    pub fn deposit_txid(&self) -> Option<Txid> {
        self.published_deposit_tx.as_ref().map(|tx| tx.txid())
    }

    /// Return the trade this container is bound to.
    pub fn trade(&self) -> &Trade {
        &self.trade
    }

    /// Return the offer the trade executes.
    pub fn offer(&self) -> &Offer {
        &self.ctx.offer
    }

    /// Return the counterparty network identity.
    pub fn offerer(&self) -> &Peer {
        &self.offerer
    }

    /// Return the local user state.
    pub fn user(&self) -> &UserProfile {
        &self.ctx.user
    }

    /// Return the local taker escrow public key, derived at construction.
    pub fn taker_pubkey(&self) -> &PublicKey {
        &self.taker_pubkey
    }

    /// Return the counterparty escrow public key.
    pub fn offerer_pubkey(&self) -> Option<&PublicKey> {
        self.offerer_pubkey.as_ref()
    }

    /// Return the take-offer fee transaction.
    pub fn fee_tx(&self) -> Option<&Transaction> {
        self.fee_tx.as_ref()
    }

    /// Return the outputs funding the offerer's deposit inputs.
    pub fn offerer_connected_outputs(&self) -> Option<&[ConnectedOutput]> {
        self.offerer_connected_outputs.as_deref()
    }

    /// Return the change outputs of the offerer in the deposit.
    pub fn offerer_outputs(&self) -> Option<&[TxOut]> {
        self.offerer_outputs.as_deref()
    }

    /// Return the outputs funding the taker's deposit inputs.
    pub fn taker_connected_outputs(&self) -> Option<&[ConnectedOutput]> {
        self.taker_connected_outputs.as_deref()
    }

    /// Return the change outputs of the taker in the deposit.
    pub fn taker_outputs(&self) -> Option<&[TxOut]> {
        self.taker_outputs.as_deref()
    }

    /// Return the locally assembled deposit transaction draft.
    pub fn deposit_draft(&self) -> Option<&PartiallySignedTransaction> {
        self.deposit_draft.as_ref()
    }

    /// Return the deposit transaction as constructed by the counterparty.
    pub fn counterparty_deposit_tx(&self) -> Option<&Transaction> {
        self.counterparty_deposit_tx.as_ref()
    }

    /// Return the deposit transaction as published on the network.
    pub fn published_deposit_tx(&self) -> Option<&Transaction> {
        self.published_deposit_tx.as_ref()
    }

    /// Return the agreed payout amounts `(offerer, taker)`.
    pub fn payout_amounts(&self) -> Option<(Amount, Amount)> {
        match (self.offerer_payout_amount, self.taker_payout_amount) {
            (Some(offerer), Some(taker)) => Some((offerer, taker)),
            _ => None,
        }
    }

    /// Return the destination of the offerer's payout share.
    pub fn offerer_payout_address(&self) -> Option<&Address> {
        self.offerer_payout_address.as_ref()
    }

    /// Return the assembled payout transaction.
    pub fn payout_tx(&self) -> Option<&Transaction> {
        self.payout_tx.as_ref()
    }

    /// Return the validated counterparty signature over the payout
    /// transaction.
    pub fn offerer_signature(&self) -> Option<&Signature> {
        self.offerer_signature.as_ref()
    }

    /// Return the taker fiat account.
    pub fn taker_fiat_account(&self) -> Option<&FiatAccount> {
        self.taker_fiat_account.as_ref()
    }

    /// Return the taker account identifier.
    pub fn taker_account_id(&self) -> Option<&str> {
        self.taker_account_id.as_deref()
    }

    /// Return the payout transaction as published on the network.
    pub fn published_payout_tx(&self) -> Option<&Transaction> {
        self.published_payout_tx.as_ref()
    }

    /// Return a mutable handle on the message delivery collaborator.
    pub fn messenger_mut(&mut self) -> &mut M {
        &mut self.ctx.messenger
    }

    /// Return a mutable handle on the wallet key chain collaborator.
    pub fn wallet_mut(&mut self) -> &mut W {
        &mut self.ctx.wallet
    }

    /// Return a mutable handle on the chain syncer collaborator.
    pub fn syncer_mut(&mut self) -> &mut C {
        &mut self.ctx.syncer
    }

    /// Return the signature verification collaborator.
    pub fn signer(&self) -> &S {
        &self.ctx.signer
    }
}
