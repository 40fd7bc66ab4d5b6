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

use bitcoin::Amount;
use inet2_addr::InetSocketAddr;
use secp256k1::PublicKey;
use uuid::uuid;

use peertrade_core::blockchain::{FeePriority, FeeStrategy, Network};
use peertrade_core::consensus::{self, serialize_hex};
use peertrade_core::fee::SatPerKvB;
use peertrade_core::fiat::{FiatAmount, FiatCurrency, PaymentMethod};
use peertrade_core::role::{MarketRole, Position, TradeRole};
use peertrade_core::trade::{
    Offer, OfferParameters, Trade, TradeId, OFFER_PREFIX,
};

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
fn create_offer_params() {
    let hex = serialize_hex(&*OFFER_PARAMS);
    let strict_ser = strict_encoding::strict_serialize(&*OFFER_PARAMS).unwrap();
    assert_eq!(&hex::decode(hex).unwrap(), &strict_ser);
    let res: OfferParameters = strict_encoding::strict_deserialize(&strict_ser).unwrap();
    assert_eq!(&*OFFER_PARAMS, &res);
}

#[test]
fn offer_string_roundtrip() {
    let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
    let s = format!("{}", offer);
    assert!(s.starts_with(OFFER_PREFIX));
    let parsed = Offer::from_str(&s).expect("Valid offer");
    assert_eq!(parsed, offer);
    assert_eq!(parsed.fingerprint(), offer.fingerprint());
}

#[test]
fn offer_fingerprint_is_stable_across_uuids() {
    let mut offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
    let fingerprint = offer.fingerprint();
    offer.randomize_uuid();
    assert_eq!(fingerprint, offer.fingerprint());
}

#[test]
fn market_roles_follow_the_offer() {
    let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
    assert_eq!(offer.market_role(&TradeRole::Offerer), MarketRole::Buyer);
    assert_eq!(offer.market_role(&TradeRole::Taker), MarketRole::Seller);
}

#[test]
fn serialize_offer_params_in_yaml() {
    let s = serde_yaml::to_string(&*OFFER_PARAMS).expect("Encode offer in yaml");
    let decoded: OfferParameters = serde_yaml::from_str(&s).expect("Decode offer from yaml");
    assert_eq!(&*OFFER_PARAMS, &decoded);
    // amounts are serialized in their display form
    assert!(s.contains("0.01350000 BTC") || s.contains("0.0135 BTC"));
    assert!(s.contains("satoshi/kvB"));
}

#[test]
fn take_offer_builds_seller_as_taker_position() {
    let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
    let trade = Trade::new(
        TradeId::random(),
        offer,
        Amount::from_sat(1_000_000),
        FeePriority::Low,
    )
    .expect("amount within the offer bounds");
    assert_eq!(trade.taker_market_role(), MarketRole::Seller);
    assert_eq!(trade.position(TradeRole::Taker), Position::SellerAsTaker);
    assert_eq!(trade.position(TradeRole::Offerer), Position::BuyerAsOfferer);
    // the seller brings the traded amount on top of its deposit
    assert_eq!(
        trade.terms.taker_funding,
        Amount::from_sat(1_000_000) + trade.offer.parameters.security_deposit
    );
    assert_eq!(
        trade.terms.offerer_funding,
        trade.offer.parameters.security_deposit
    );
}

#[test]
fn consensus_offer_roundtrip() {
    let offer = OFFER_PARAMS.clone().to_v1(*NODE_ID, *PEER_ADDRESS);
    let bytes = consensus::serialize(&offer);
    let decoded: Offer = consensus::deserialize(&bytes).unwrap();
    assert_eq!(offer, decoded);
}
