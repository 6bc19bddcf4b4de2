//! End-to-end scenarios across the ledger, batch, channel and merchant
//! engines, run against the in-memory bank.
//!
//! Each test drives a small chain harness block by block and checks the
//! resulting records, balances and events.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use stablepay_settlement::mock::{MemAccounts, MemBank, StaticCompliance};
use stablepay_settlement::{Claim, PageRequest, SettlementKeeper};
use stablepay_types::*;

type Keeper = SettlementKeeper<MemBank, StaticCompliance, MemAccounts>;

const DENOM: &str = "ssusd";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn addr(s: &str) -> Address {
    Address::parse(s).expect("valid test address")
}

fn ssusd(n: u128) -> Coin {
    Coin::new(DENOM, n)
}

/// Helper: a one-module chain advancing block by block.
struct Chain {
    store: MemStore,
    keeper: Keeper,
    height: u64,
    time: DateTime<Utc>,
    events: Vec<Event>,
}

impl Chain {
    fn new() -> Self {
        init_tracing();
        let keeper = Keeper::new(
            addr("stable1gov"),
            MemBank::new(),
            StaticCompliance::new(),
            MemAccounts::new(),
        );
        let mut chain = Self {
            store: MemStore::new(),
            keeper,
            height: 1,
            time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            events: Vec::new(),
        };
        chain
            .exec(|k, ctx| k.init_genesis(ctx, &Params::default()))
            .expect("genesis");
        chain
    }

    fn fund(&mut self, who: &Address, amount: u128) {
        self.keeper.bank_mut().fund(who, &ssusd(amount));
    }

    fn balance(&self, who: &Address) -> u128 {
        self.keeper.bank().balance(who, DENOM).amount
    }

    /// Run one call on a branch, committing only on success, the way the
    /// message router does.
    fn exec<T>(&mut self, f: impl FnOnce(&mut Keeper, &mut Context<'_>) -> Result<T>) -> Result<T> {
        let keeper = &mut self.keeper;
        let mut ctx = Context::new(
            BlockHeader::new("stablepay-test", self.height, self.time),
            &mut self.store,
        );
        let out = ctx.branch(|inner| f(keeper, inner));
        self.events.extend(ctx.take_events());
        out
    }

    fn advance(&mut self, blocks: u64, secs: i64) {
        self.height += blocks;
        self.time += TimeDelta::seconds(secs);
    }

    fn end_block(&mut self) -> (usize, usize) {
        let keeper = &mut self.keeper;
        let mut ctx = Context::new(
            BlockHeader::new("stablepay-test", self.height, self.time),
            &mut self.store,
        );
        let escrows = keeper.process_expired_escrows(&mut ctx);
        let channels = keeper.process_expired_channels(&mut ctx);
        self.events.extend(ctx.take_events());
        (escrows, channels)
    }

    fn settlement(&mut self, id: SettlementId) -> Settlement {
        self.exec(|k, ctx| k.settlement(ctx, id)).expect("settlement exists")
    }

    fn channel(&mut self, id: ChannelId) -> PaymentChannel {
        self.exec(|k, ctx| k.channel(ctx, id)).expect("channel exists")
    }

    fn has_event(&self, kind: &str) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }
}

// =============================================================================
// Scenario 1: instant transfer at the default fee
// =============================================================================
#[test]
fn instant_transfer_default_fee() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    chain.fund(&a, 2_000_000);

    let id = chain
        .exec(|k, ctx| k.instant_transfer(ctx, &a, &b, &ssusd(1_000_000), "REF1", ""))
        .unwrap();

    assert_eq!(id, SettlementId(1));
    let s = chain.settlement(id);
    assert_eq!(s.fee, ssusd(5_000));
    assert_eq!(s.net_amount, ssusd(995_000));
    assert_eq!(s.status, SettlementStatus::Completed);
    assert_eq!(s.reference, "REF1");
    assert_eq!(chain.balance(&b), 995_000);
    assert_eq!(chain.balance(&a), 1_000_000);
    assert!(chain.has_event("instant_transfer"));
}

// =============================================================================
// Scenario 2: escrow then release
// =============================================================================
#[test]
fn escrow_release_pays_net() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    chain.fund(&a, 1_000_000);

    let id = chain
        .exec(|k, ctx| k.create_escrow(ctx, &a, &b, &ssusd(400_000), "INV-9", "", 3_600))
        .unwrap();
    assert_eq!(chain.settlement(id).status, SettlementStatus::Pending);
    assert_eq!(chain.balance(&b), 0);

    chain.advance(1, 5);
    chain.exec(|k, ctx| k.release_escrow(ctx, id, &a)).unwrap();

    let s = chain.settlement(id);
    assert_eq!(s.status, SettlementStatus::Completed);
    assert_eq!(s.settled_height, Some(2));
    assert_eq!(chain.balance(&b), s.net_amount.amount);
    assert_eq!(
        chain.keeper.bank().module_balance(constants::SETTLEMENT_MODULE_ACCOUNT, DENOM),
        0
    );
}

// =============================================================================
// Scenario 3: escrow expires and the sweep refunds it
// =============================================================================
#[test]
fn escrow_expiry_sweep_refunds_sender() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    chain.fund(&a, 1_000_000);

    let id = chain
        .exec(|k, ctx| k.create_escrow(ctx, &a, &b, &ssusd(250_000), "", "", 600))
        .unwrap();

    chain.advance(1, 599);
    assert_eq!(chain.end_block(), (0, 0));
    assert_eq!(chain.settlement(id).status, SettlementStatus::Pending);

    chain.advance(1, 1);
    assert_eq!(chain.end_block(), (1, 0));
    let s = chain.settlement(id);
    assert_eq!(s.status, SettlementStatus::Cancelled);
    assert!(s.metadata.contains("expired"));
    assert_eq!(chain.balance(&a), 1_000_000);
    assert!(chain.has_event("escrow_expired"));

    // Cancelled is terminal.
    assert!(chain.exec(|k, ctx| k.release_escrow(ctx, id, &a)).is_err());
}

// =============================================================================
// Scenario 4: channel claims and nonce replay
// =============================================================================
#[test]
fn channel_claim_and_replay() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    let key = SigningKey::generate(&mut OsRng);
    chain.fund(&a, 1_000_000);
    chain.keeper.accounts_mut().register(&a, key.verifying_key().as_bytes());

    let id = chain
        .exec(|k, ctx| k.open_channel(ctx, &a, &b, &ssusd(1_000_000), 1_000))
        .unwrap();

    let amount = ssusd(300_000);
    let sig = sign_claim(&key, id, &b, 300_000, 1);
    let claim = Claim {
        channel_id: id,
        recipient: &b,
        amount: &amount,
        nonce: 1,
        signature: &sig,
    };
    chain.exec(|k, ctx| k.claim_channel(ctx, &claim)).unwrap();

    let ch = chain.channel(id);
    assert_eq!(ch.balance, ssusd(700_000));
    assert_eq!(ch.spent, ssusd(300_000));
    assert_eq!(ch.nonce, 1);
    assert_eq!(chain.balance(&b), 300_000);

    for nonce in [1, 0] {
        let sig = sign_claim(&key, id, &b, 300_000, nonce);
        let replay = Claim {
            channel_id: id,
            recipient: &b,
            amount: &amount,
            nonce,
            signature: &sig,
        };
        assert!(matches!(
            chain.exec(|k, ctx| k.claim_channel(ctx, &replay)),
            Err(StablepayError::InvalidNonce { current: 1, .. })
        ));
    }
    assert_eq!(chain.channel(id), ch);
}

// =============================================================================
// Scenario 5: batch settle is authority-only
// =============================================================================
#[test]
fn batch_settle_requires_authority() {
    let mut chain = Chain::new();
    let gov = addr("stable1gov");
    let shop = addr("stable1shop");
    let payers = [addr("stable1payera"), addr("stable1payerb"), addr("stable1payerc")];
    for p in &payers {
        chain.fund(p, 100_000);
    }
    let amounts = [ssusd(10_000), ssusd(25_000), ssusd(40_000)];
    let refs = vec!["r1".to_string(), "r2".to_string(), "r3".to_string()];

    let (batch_id, ids) = chain
        .exec(|k, ctx| k.create_batch(ctx, &gov, &shop, &payers, &amounts, &refs))
        .unwrap();

    assert!(matches!(
        chain.exec(|k, ctx| k.settle_batch(ctx, batch_id, &shop)),
        Err(StablepayError::Unauthorized { .. })
    ));

    let batch = chain.exec(|k, ctx| k.settle_batch(ctx, batch_id, &gov)).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.total_amount, ssusd(75_000));
    assert_eq!(batch.count, 3);
    for id in ids {
        let s = chain.settlement(id);
        assert_eq!(s.status, SettlementStatus::Completed);
        assert_eq!(s.batch_id, Some(batch_id));
    }
    assert_eq!(chain.balance(&shop), batch.net_amount.amount);
    assert_eq!(
        chain
            .keeper
            .bank()
            .module_balance(constants::FEE_COLLECTOR_MODULE_ACCOUNT, DENOM),
        batch.total_fees.amount
    );
}

// =============================================================================
// Scenario 6: closing before and after expiry
// =============================================================================
#[test]
fn channel_close_waits_for_expiry() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    chain.fund(&a, 500_000);
    let id = chain
        .exec(|k, ctx| k.open_channel(ctx, &a, &b, &ssusd(500_000), 100))
        .unwrap();

    chain.advance(100, 600);
    assert!(matches!(
        chain.exec(|k, ctx| k.close_channel(ctx, id, &a)),
        Err(StablepayError::ChannelNotExpired { .. })
    ));
    assert!(matches!(
        chain.exec(|k, ctx| k.close_channel(ctx, id, &b)),
        Err(StablepayError::Unauthorized { .. })
    ));

    chain.advance(1, 6);
    let refunded = chain.exec(|k, ctx| k.close_channel(ctx, id, &a)).unwrap();
    assert_eq!(refunded, ssusd(500_000));
    assert!(!chain.channel(id).is_open);
    assert_eq!(chain.balance(&a), 500_000);
    assert!(matches!(
        chain.exec(|k, ctx| k.close_channel(ctx, id, &a)),
        Err(StablepayError::ChannelClosed(_))
    ));
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn every_completed_settlement_is_balanced() {
    let mut chain = Chain::new();
    let (a, gov) = (addr("stable1alice"), addr("stable1gov"));
    let shop = addr("stable1shop");
    chain.fund(&a, 50_000_000);
    chain
        .exec(|k, ctx| {
            let config = MerchantConfig {
                address: shop.clone(),
                name: "Odd Rate Shop".into(),
                fee_rate_bps: Some(37),
                min_settlement: 0,
                max_settlement: 0,
                batch_enabled: false,
                batch_threshold: 0,
                webhook_url: None,
                is_active: true,
                registered_at: Utc::now(),
            };
            k.register_merchant(ctx, &gov, config)
        })
        .unwrap();

    for amount in [1_000u128, 1_001, 3_333, 99_999, 1_234_567] {
        let id = chain
            .exec(|k, ctx| k.instant_transfer(ctx, &a, &shop, &ssusd(amount), "", ""))
            .unwrap();
        let s = chain.settlement(id);
        assert!(s.is_balanced(), "{amount}");
        assert_eq!(s.fee.amount, amount * 37 / 10_000);
    }
}

#[test]
fn channel_balance_is_conserved_across_claims() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    let key = SigningKey::generate(&mut OsRng);
    chain.fund(&a, 1_000_000);
    chain.keeper.accounts_mut().register(&a, key.verifying_key().as_bytes());
    let id = chain
        .exec(|k, ctx| k.open_channel(ctx, &a, &b, &ssusd(1_000_000), 500))
        .unwrap();

    let mut last_spent = 0;
    for (nonce, amount) in [(1u64, 10_000u128), (2, 90_000), (5, 400_000), (9, 500_000)] {
        let coin = ssusd(amount);
        let sig = sign_claim(&key, id, &b, amount, nonce);
        let claim = Claim {
            channel_id: id,
            recipient: &b,
            amount: &coin,
            nonce,
            signature: &sig,
        };
        chain.exec(|k, ctx| k.claim_channel(ctx, &claim)).unwrap();
        let ch = chain.channel(id);
        assert!(ch.is_conserved());
        assert!(ch.spent.amount >= last_spent);
        assert_eq!(ch.nonce, nonce);
        last_spent = ch.spent.amount;
    }
    assert_eq!(chain.channel(id).balance, ssusd(0));

    // Exhausted: any further claim overdraws.
    let coin = ssusd(1);
    let sig = sign_claim(&key, id, &b, 1, 10);
    let claim = Claim {
        channel_id: id,
        recipient: &b,
        amount: &coin,
        nonce: 10,
        signature: &sig,
    };
    assert!(matches!(
        chain.exec(|k, ctx| k.claim_channel(ctx, &claim)),
        Err(StablepayError::ClaimExceedsBalance { .. })
    ));
}

#[test]
fn supply_is_conserved_through_mixed_activity() {
    let mut chain = Chain::new();
    let (a, b, c) = (addr("stable1alice"), addr("stable1bob"), addr("stable1carol"));
    let gov = addr("stable1gov");
    chain.fund(&a, 10_000_000);
    chain.fund(&b, 10_000_000);
    let supply = chain.keeper.bank().total_supply(DENOM);

    chain
        .exec(|k, ctx| k.instant_transfer(ctx, &a, &b, &ssusd(123_456), "", ""))
        .unwrap();
    let escrow = chain
        .exec(|k, ctx| k.create_escrow(ctx, &b, &c, &ssusd(777_777), "", "", 60))
        .unwrap();
    chain
        .exec(|k, ctx| k.partial_refund(ctx, &gov, escrow, &ssusd(100_000), "short shipment"))
        .unwrap();
    chain
        .exec(|k, ctx| k.open_channel(ctx, &a, &c, &ssusd(50_000), 100))
        .unwrap();
    chain.advance(200, 120);
    assert_eq!(chain.end_block(), (1, 1));

    assert_eq!(chain.keeper.bank().total_supply(DENOM), supply);
    assert_eq!(
        chain.keeper.bank().module_balance(constants::SETTLEMENT_MODULE_ACCOUNT, DENOM),
        0
    );
    let refunds = chain.exec(|k, ctx| k.refunds(ctx, escrow)).unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, ssusd(100_000));
}

#[test]
fn failed_call_commits_nothing() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    chain.fund(&a, 10_000);

    let before = chain.store.len();
    assert!(chain
        .exec(|k, ctx| k.instant_transfer(ctx, &a, &b, &ssusd(20_000), "", ""))
        .is_err());
    assert_eq!(chain.store.len(), before);

    // The id sequence was not consumed by the failed call.
    let id = chain
        .exec(|k, ctx| k.instant_transfer(ctx, &a, &b, &ssusd(5_000), "", ""))
        .unwrap();
    assert_eq!(id, SettlementId(1));
    let page = chain
        .exec(|k, ctx| k.settlements_by_sender(ctx, &a, PageRequest::default()))
        .unwrap();
    assert_eq!(page.total, 1);
}

// =============================================================================
// Stored records keep their wire shape
// =============================================================================
#[test]
fn records_serialize_with_wire_strings() {
    let mut chain = Chain::new();
    let (a, b) = (addr("stable1alice"), addr("stable1bob"));
    chain.fund(&a, 2_000_000);

    let id = chain
        .exec(|k, ctx| k.create_escrow(ctx, &a, &b, &ssusd(400_000), "INV-1", "", 3_600))
        .unwrap();
    let escrow = chain.settlement(id);
    let json = serde_json::to_value(&escrow).unwrap();
    assert_eq!(json["settlement_type"], "SETTLEMENT_TYPE_ESCROW");
    assert_eq!(json["status"], "SETTLEMENT_STATUS_PENDING");
    assert_eq!(json["sender"], "stable1alice");
    assert_eq!(json["amount"]["amount"], "400000");
    assert_eq!(json["fee"]["denom"], DENOM);
    let back: Settlement = serde_json::from_value(json).unwrap();
    assert_eq!(back, escrow);

    let channel_id = chain
        .exec(|k, ctx| k.open_channel(ctx, &a, &b, &ssusd(100_000), 500))
        .unwrap();
    let channel = chain.channel(channel_id);
    let json = serde_json::to_value(&channel).unwrap();
    assert_eq!(json["id"], channel_id.0);
    assert_eq!(json["balance"]["amount"], "100000");
    assert_eq!(json["is_open"], true);
    let back: PaymentChannel = serde_json::from_value(json).unwrap();
    assert_eq!(back, channel);

    // A bad address on the wire never decodes.
    let mut tampered = serde_json::to_value(&escrow).unwrap();
    tampered["recipient"] = "bob".into();
    assert!(serde_json::from_value::<Settlement>(tampered).is_err());
}
