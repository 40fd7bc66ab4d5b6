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

use std::str::FromStr;
use std::sync::Arc;

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Txid};
use inet2_addr::InetSocketAddr;

use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::ecdsa::Signature;

use peertrade_core::blockchain::{FeeStrategy, Network};
use peertrade_core::crypto::{self, KeyChain, Sign, SignatureEngine, TradeKeyId};
use peertrade_core::escrow::{self, ConnectedOutput, EscrowTerms};
use peertrade_core::fee::SatPerKvB;
use peertrade_core::fiat::{FiatAccount, FiatAmount, FiatCurrency, PaymentMethod, UserProfile};
use peertrade_core::protocol::message::{
    DepositFundingProposal, DepositPublished, FiatTransferStarted, Messenger, TradeMessage,
};
use peertrade_core::protocol::{Error, SellerAsTaker, TradePhase};
use peertrade_core::role::MarketRole;
use peertrade_core::syncer::{Syncer, WatchTransaction};
use peertrade_core::trade::{Offer, OfferParameters, Peer, Trade, TradeId};

struct MockWallet {
    escrow_sk: SecretKey,
    payout_address: Address,
}

impl KeyChain for MockWallet {
    fn trade_pubkey(
        &mut self,
        _trade_id: TradeId,
        _key_id: TradeKeyId,
    ) -> Result<PublicKey, crypto::Error> {
        Ok(PublicKey::from_secret_key(
            &Secp256k1::new(),
            &self.escrow_sk,
        ))
    }

    fn payout_address(&mut self, _trade_id: TradeId) -> Result<Address, crypto::Error> {
        Ok(self.payout_address.clone())
    }
}

impl Sign for MockWallet {
    fn sign(
        &mut self,
        _trade_id: TradeId,
        _key_id: TradeKeyId,
        msg: Sha256dHash,
    ) -> Result<Signature, crypto::Error> {
        escrow::sign_hash(msg, &self.escrow_sk).map_err(crypto::Error::new)
    }
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Vec<TradeMessage>,
}

impl Messenger for RecordingMessenger {
    fn send(
        &mut self,
        _peer: &Peer,
        message: TradeMessage,
    ) -> Result<(), peertrade_core::protocol::message::Error> {
        self.sent.push(message);
        Ok(())
    }
}

#[derive(Default)]
struct NullSyncer {
    watched: Vec<Txid>,
}

impl Syncer for NullSyncer {
    fn abort(
        &mut self,
        _task: peertrade_core::syncer::Abort,
    ) -> Result<(), peertrade_core::syncer::Error> {
        Ok(())
    }

    fn watch_transaction(
        &mut self,
        task: WatchTransaction,
    ) -> Result<(), peertrade_core::syncer::Error> {
        self.watched.push(task.txid);
        Ok(())
    }

    fn broadcast_transaction(
        &mut self,
        _task: peertrade_core::syncer::BroadcastTransaction,
    ) -> Result<(), peertrade_core::syncer::Error> {
        Ok(())
    }
}

type TestState = SellerAsTaker<RecordingMessenger, MockWallet, NullSyncer, SignatureEngine>;

fn secret_key(fill: u8) -> SecretKey {
    SecretKey::from_slice(&[fill; 32]).unwrap()
}

fn pubkey_of(sk: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::new(), sk)
}

fn p2wpkh(sk: &SecretKey) -> Address {
    Address::p2wpkh(
        &bitcoin::util::key::PublicKey::new(pubkey_of(sk)),
        bitcoin::network::constants::Network::Regtest,
    )
    .unwrap()
}

fn offer() -> Offer {
    let params = OfferParameters {
        uuid: uuid::Uuid::new_v4().into(),
        network: Network::Local,
        trade_amount: Amount::from_sat(100_000_000),
        price: FiatAmount::from_minor(6_500_000),
        currency: FiatCurrency::from_str("EUR").unwrap(),
        payment_method: PaymentMethod::Sepa,
        security_deposit: Amount::from_sat(50_000_000),
        fee_strategy: FeeStrategy::Fixed(SatPerKvB::from_sat(1000)),
        offerer_role: MarketRole::Buyer,
    };
    let node_sk = secret_key(9);
    let peer_address = InetSocketAddr::socket(
        FromStr::from_str("127.0.0.1").unwrap(),
        FromStr::from_str("9735").unwrap(),
    );
    params.to_v1(pubkey_of(&node_sk), peer_address)
}

fn user_profile() -> UserProfile {
    UserProfile {
        account_id: "taker-account-1".into(),
        fiat_account: FiatAccount {
            holder_name: "Taker".into(),
            account_number: "DE02120300000000202051".into(),
            currency: FiatCurrency::from_str("EUR").unwrap(),
            payment_method: PaymentMethod::Sepa,
            country: "DE".into(),
        },
    }
}

fn connected(txid_fill: u8, vout: u32, value: u64, owner: &SecretKey) -> ConnectedOutput {
    ConnectedOutput::new(
        OutPoint::new(Txid::from_slice(&[txid_fill; 32]).unwrap(), vout),
        TxOut {
            value,
            script_pubkey: p2wpkh(owner).script_pubkey(),
        },
    )
}

fn dummy_tx() -> Transaction {
    Transaction {
        version: 2,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Script::default(),
            sequence: u32::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: 10_000,
            script_pubkey: Script::new(),
        }],
    }
}

struct Fixture {
    state: TestState,
    taker_sk: SecretKey,
    offerer_sk: SecretKey,
    offerer_payout_sk: SecretKey,
    offerer_connected: Vec<ConnectedOutput>,
    taker_connected: Vec<ConnectedOutput>,
    peer: Peer,
}

/// The trade of the reference scenario: the taker sells 0.5 BTC bringing
/// 1.00 BTC into the deposit, the offerer brings 0.50 BTC, the deposit miner
/// fee is 0.0002 BTC and the payout fee is folded into the split.
fn fixture() -> Fixture {
    let taker_sk = secret_key(1);
    let offerer_sk = secret_key(2);
    let offerer_payout_sk = secret_key(3);
    let taker_funds_sk = secret_key(4);
    let offerer_funds_sk = secret_key(5);

    let offer = offer();
    let peer = Peer::new(offer.node_id, offer.peer_address);
    let trade = Trade::with_terms(
        TradeId::random(),
        offer,
        Amount::from_sat(50_000_000),
        EscrowTerms {
            taker_funding: Amount::from_sat(100_000_000),
            offerer_funding: Amount::from_sat(50_000_000),
            payout_fee: Amount::from_sat(0),
        },
    );

    let wallet = MockWallet {
        escrow_sk: taker_sk,
        payout_address: p2wpkh(&taker_sk),
    };
    let state = SellerAsTaker::new(
        Arc::new(trade),
        peer.clone(),
        RecordingMessenger::default(),
        wallet,
        NullSyncer::default(),
        SignatureEngine::new(),
        user_profile(),
    )
    .expect("key derivation works with the mock wallet");

    Fixture {
        state,
        taker_sk,
        offerer_sk,
        offerer_payout_sk,
        offerer_connected: vec![connected(0x21, 0, 50_000_000, &offerer_funds_sk)],
        taker_connected: vec![connected(0x42, 1, 100_000_000, &taker_funds_sk)],
        peer,
    }
}

/// Drive the state to `DepositPublished` along the happy path.
fn publish_deposit(fx: &mut Fixture) {
    let state = &mut fx.state;
    state
        .set_taker_account_id("taker-account-1".into())
        .unwrap();
    state
        .set_taker_fiat_account(user_profile().fiat_account)
        .unwrap();
    state
        .apply_funding_proposal(DepositFundingProposal {
            trade_id: state.trade().id(),
            offerer_pubkey: pubkey_of(&fx.offerer_sk),
            offerer_connected_outputs: fx.offerer_connected.clone(),
            offerer_outputs: vec![],
            offerer_payout_address: p2wpkh(&fx.offerer_payout_sk),
        })
        .unwrap();
    state.set_fee_tx(dummy_tx()).unwrap();
    state
        .set_taker_connected_outputs(fx.taker_connected.clone())
        .unwrap();
    state.set_taker_outputs(vec![]).unwrap();

    let lock = state.escrow_lock().unwrap();
    let draft = escrow::build_deposit_draft(
        &lock,
        &fx.offerer_connected,
        &[],
        &fx.taker_connected,
        &[],
        Amount::from_sat(20_000),
    )
    .unwrap();
    state.set_deposit_draft(draft.clone()).unwrap();
    state
        .set_counterparty_deposit_tx(draft.unsigned_tx.clone())
        .unwrap();
    state.set_published_deposit_tx(draft.unsigned_tx).unwrap();
}

#[test]
fn taker_key_derivation_is_deterministic() {
    let fx_a = fixture();
    let fx_b = fixture();
    assert_eq!(fx_a.state.taker_pubkey(), fx_b.state.taker_pubkey());
    assert_eq!(fx_a.state.phase(), TradePhase::Created);
}

#[test]
fn remote_key_equal_to_local_key_is_rejected() {
    let mut fx = fixture();
    let local = *fx.state.taker_pubkey();
    match fx.state.set_offerer_pubkey(local) {
        Err(Error::InvalidKey) => (),
        other => panic!("expected InvalidKey, got {:?}", other),
    }
    assert_eq!(fx.state.phase(), TradePhase::Failed);
    assert!(!fx.state.failure().unwrap().funds_at_risk);
}

#[test]
fn write_once_rejects_identical_second_write() {
    let mut fx = fixture();
    fx.state
        .set_taker_account_id("taker-account-1".into())
        .unwrap();
    match fx.state.set_taker_account_id("taker-account-1".into()) {
        Err(Error::AlreadySet(_)) => (),
        other => panic!("expected AlreadySet, got {:?}", other),
    }
    assert_eq!(fx.state.phase(), TradePhase::Failed);
}

#[test]
fn deposit_draft_requires_remote_key() {
    let mut fx = fixture();
    let lock = escrow::EscrowLock::new(pubkey_of(&fx.taker_sk), pubkey_of(&fx.offerer_sk));
    let draft = escrow::build_deposit_draft(
        &lock,
        &fx.offerer_connected,
        &[],
        &fx.taker_connected,
        &[],
        Amount::from_sat(20_000),
    )
    .unwrap();
    match fx.state.set_deposit_draft(draft) {
        Err(Error::OutOfOrder { .. }) => (),
        other => panic!("expected OutOfOrder, got {:?}", other),
    }
    assert_eq!(fx.state.phase(), TradePhase::Failed);
}

#[test]
fn published_deposit_missing_declared_input_is_rejected() {
    let mut fx = fixture();
    let state = &mut fx.state;
    state.set_offerer_pubkey(pubkey_of(&fx.offerer_sk)).unwrap();
    state
        .set_offerer_connected_outputs(fx.offerer_connected.clone())
        .unwrap();
    state
        .set_taker_connected_outputs(fx.taker_connected.clone())
        .unwrap();
    let lock = state.escrow_lock().unwrap();
    let draft = escrow::build_deposit_draft(
        &lock,
        &fx.offerer_connected,
        &[],
        &fx.taker_connected,
        &[],
        Amount::from_sat(20_000),
    )
    .unwrap();
    state.set_deposit_draft(draft.clone()).unwrap();

    let mut published = draft.unsigned_tx;
    published.input.pop();
    match state.set_published_deposit_tx(published) {
        Err(Error::DepositMismatch(_)) => (),
        other => panic!("expected DepositMismatch, got {:?}", other),
    }
    assert_eq!(state.phase(), TradePhase::Failed);
    assert!(!state.funds_at_risk());
}

#[test]
fn counterparty_view_with_different_inputs_is_rejected() {
    let mut fx = fixture();
    let state = &mut fx.state;
    state.set_offerer_pubkey(pubkey_of(&fx.offerer_sk)).unwrap();
    state
        .set_offerer_connected_outputs(fx.offerer_connected.clone())
        .unwrap();
    state
        .set_taker_connected_outputs(fx.taker_connected.clone())
        .unwrap();
    let lock = state.escrow_lock().unwrap();
    let draft = escrow::build_deposit_draft(
        &lock,
        &fx.offerer_connected,
        &[],
        &fx.taker_connected,
        &[],
        Amount::from_sat(20_000),
    )
    .unwrap();
    state.set_deposit_draft(draft.clone()).unwrap();

    let mut view = draft.unsigned_tx;
    view.input[0].previous_output = OutPoint::new(Txid::from_slice(&[0x99; 32]).unwrap(), 0);
    match state.set_counterparty_deposit_tx(view) {
        Err(Error::DepositMismatch(_)) => (),
        other => panic!("expected DepositMismatch, got {:?}", other),
    }
    assert_eq!(state.phase(), TradePhase::Failed);
}

#[test]
fn reference_scenario_reaches_payout_amounts_agreed() {
    let mut fx = fixture();
    publish_deposit(&mut fx);
    assert_eq!(fx.state.phase(), TradePhase::DepositPublished);
    assert!(fx.state.funds_at_risk());

    // escrow value is 1.50 BTC of inputs minus the 0.0002 BTC deposit fee
    let escrow_output = fx.state.escrow_output().unwrap();
    assert_eq!(escrow_output.value(), Amount::from_sat(149_980_000));

    fx.state
        .set_payout_amounts(Amount::from_sat(50_000_000), Amount::from_sat(99_980_000))
        .unwrap();
    assert_eq!(fx.state.phase(), TradePhase::PayoutAmountsAgreed);
}

#[test]
fn overfull_payout_split_fails_conservation() {
    let mut fx = fixture();
    publish_deposit(&mut fx);

    // offerer 0.50 + taker 1.00 exceeds the deposit minus fee
    match fx
        .state
        .set_payout_amounts(Amount::from_sat(50_000_000), Amount::from_sat(100_000_000))
    {
        Err(Error::AmountConservation(_)) => (),
        other => panic!("expected AmountConservation, got {:?}", other),
    }
    assert_eq!(fx.state.phase(), TradePhase::Failed);
    assert!(fx.state.failure().unwrap().funds_at_risk);
}

#[test]
fn wrong_signature_is_rejected_and_fatal() {
    let mut fx = fixture();
    publish_deposit(&mut fx);
    fx.state
        .set_payout_amounts(Amount::from_sat(50_000_000), Amount::from_sat(99_980_000))
        .unwrap();

    let escrow_output = fx.state.escrow_output().unwrap();
    let trade_id = fx.state.trade().id();
    let taker_address = fx.state.wallet_mut().payout_address(trade_id).unwrap();
    let offerer_address = fx.state.offerer_payout_address().unwrap().clone();
    let payout = escrow::build_payout(
        &escrow_output,
        (Amount::from_sat(50_000_000), &offerer_address),
        (Amount::from_sat(99_980_000), &taker_address),
    );
    fx.state.set_payout_tx(payout.clone()).unwrap();
    assert_eq!(fx.state.phase(), TradePhase::PayoutDrafted);

    // a syntactically valid signature produced by the wrong key
    let sighash = escrow::payout_signature_hash(&payout, &escrow_output);
    let forged = escrow::sign_hash(sighash, &fx.taker_sk).unwrap();
    match fx.state.set_offerer_signature(forged) {
        Err(Error::SignatureValidation(_)) => (),
        other => panic!("expected SignatureValidation, got {:?}", other),
    }
    assert_eq!(fx.state.phase(), TradePhase::Failed);
}

#[test]
fn full_protocol_settles_the_trade() {
    let mut fx = fixture();
    publish_deposit(&mut fx);

    // the sequencer would watch the deposit for confirmations here
    let deposit_txid = fx.state.deposit_txid().unwrap();
    fx.state
        .syncer_mut()
        .watch_transaction(WatchTransaction {
            id: 1,
            lifetime: 100_000,
            txid: deposit_txid,
            confirmation_bound: 6,
        })
        .unwrap();
    assert_eq!(fx.state.syncer_mut().watched, vec![deposit_txid]);

    // fiat transfer started: amounts, destination, and the offerer signature
    // arrive in one message, the signature is attached once the payout is
    // assembled
    let escrow_output = fx.state.escrow_output().unwrap();
    let offerer_address = p2wpkh(&fx.offerer_payout_sk);
    let taker_address = p2wpkh(&fx.taker_sk);
    let payout = escrow::build_payout(
        &escrow_output,
        (Amount::from_sat(50_000_000), &offerer_address),
        (Amount::from_sat(99_980_000), &taker_address),
    );
    let sighash = escrow::payout_signature_hash(&payout, &escrow_output);
    let offerer_sig = escrow::sign_hash(sighash, &fx.offerer_sk).unwrap();

    let pending_sig = fx
        .state
        .apply_fiat_transfer_started(FiatTransferStarted {
            trade_id: fx.state.trade().id(),
            offerer_payout_signature: offerer_sig,
            offerer_payout_amount: Amount::from_sat(50_000_000),
            taker_payout_amount: Amount::from_sat(99_980_000),
            offerer_payout_address: offerer_address.clone(),
        })
        .unwrap();
    fx.state.set_payout_tx(payout.clone()).unwrap();
    fx.state.set_offerer_signature(pending_sig).unwrap();
    assert_eq!(fx.state.phase(), TradePhase::PayoutSignedByPeer);

    // co-sign through the wallet seam and publish
    let trade_id = fx.state.trade().id();
    let taker_sig = fx
        .state
        .wallet_mut()
        .sign(trade_id, TradeKeyId::Escrow, sighash)
        .unwrap();
    let lock = fx.state.escrow_lock().unwrap();
    let mut finalized = payout;
    escrow::finalize_payout(&mut finalized, &lock, &taker_sig, &offerer_sig);
    fx.state.set_published_payout_tx(finalized).unwrap();
    assert_eq!(fx.state.phase(), TradePhase::PayoutPublished);

    // notify the counterparty
    let message = fx.state.payout_published().unwrap();
    let peer = fx.peer.clone();
    fx.state
        .messenger_mut()
        .send(&peer, message.into())
        .unwrap();
    assert_eq!(fx.state.messenger_mut().sent.len(), 1);

    // terminal: no further writes are accepted
    match fx.state.set_fee_tx(dummy_tx()) {
        Err(Error::TerminalState(TradePhase::PayoutPublished)) => (),
        other => panic!("expected TerminalState, got {:?}", other),
    }
}

#[test]
fn abort_marks_the_trade_failed() {
    let mut fx = fixture();
    fx.state.set_offerer_pubkey(pubkey_of(&fx.offerer_sk)).unwrap();
    fx.state.abort("key exchange timed out");
    assert_eq!(fx.state.phase(), TradePhase::Failed);
    let failure = fx.state.failure().unwrap();
    assert!(failure.field.is_none());
    assert!(!failure.funds_at_risk);

    match fx.state.set_fee_tx(dummy_tx()) {
        Err(Error::TerminalState(TradePhase::Failed)) => (),
        other => panic!("expected TerminalState, got {:?}", other),
    }
}

#[test]
fn deposit_inputs_request_needs_fiat_fields_first() {
    let fx = fixture();
    assert!(matches!(
        fx.state.deposit_inputs_request(),
        Err(Error::OutOfOrder { .. })
    ));

    let mut fx = fixture();
    fx.state
        .set_taker_account_id("taker-account-1".into())
        .unwrap();
    fx.state
        .set_taker_fiat_account(user_profile().fiat_account)
        .unwrap();
    let request = fx.state.deposit_inputs_request().unwrap();
    assert_eq!(&request.taker_pubkey, fx.state.taker_pubkey());

    let peer = fx.peer.clone();
    fx.state
        .messenger_mut()
        .send(&peer, request.into())
        .unwrap();
}

#[test]
fn apply_deposit_published_requires_negotiated_draft() {
    let mut fx = fixture();
    fx.state.set_offerer_pubkey(pubkey_of(&fx.offerer_sk)).unwrap();
    let msg = DepositPublished {
        trade_id: fx.state.trade().id(),
        deposit_tx: dummy_tx(),
    };
    match fx.state.apply_deposit_published(msg) {
        Err(Error::OutOfOrder { .. }) => (),
        other => panic!("expected OutOfOrder, got {:?}", other),
    }
}
