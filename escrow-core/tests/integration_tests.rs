//! End-to-end scenarios against the public ledger API

use escrow_core::{
    config::JournalConfig,
    storage::{Command, JournalEntry, Storage},
    Amount, AppId, AppRegistration, Config, Error, EventKind, Ledger, PayoutSink, Principal,
    ProtocolSettings, RewardSource, Role, Transfer, TransferKind,
};
use rust_decimal::Decimal;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Barrier,
};
use std::thread;
use tempfile::TempDir;

fn owner() -> Principal {
    Principal::new("0xowner")
}

fn admin() -> Principal {
    Principal::new("0xadmin")
}

fn reviewer(i: usize) -> Principal {
    Principal::new(format!("0xreviewer{}", i))
}

fn create_test_ledger() -> Ledger {
    Ledger::in_memory(ProtocolSettings::default()).unwrap()
}

fn journal_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.journal = JournalConfig {
        enabled: true,
        data_dir: temp_dir.path().to_path_buf(),
    };
    config
}

fn register(ledger: &Ledger, payment: Amount) -> AppId {
    let registration = AppRegistration {
        name: "Frames".to_string(),
        description: "Frame explorer".to_string(),
        home_url: "https://frames.example".to_string(),
        miniapp_url: "https://frames.example/mini".to_string(),
        icon_url: "https://frames.example/icon.png".to_string(),
    };
    ledger.register_app(&owner(), registration, payment).unwrap()
}

/// Sink that fails the first `failures` transfers, then accepts
struct FlakySink {
    failures: AtomicUsize,
    delivered: AtomicUsize,
}

impl FlakySink {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            delivered: AtomicUsize::new(0),
        }
    }
}

impl PayoutSink for FlakySink {
    fn transfer(&self, _transfer: &Transfer) -> escrow_core::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::TransferFailed("rpc timeout".to_string()));
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_registration_scenario() {
    let ledger = create_test_ledger();
    let mut events = ledger.subscribe();

    let payment = Amount::parse_decimal("0.11").unwrap();
    let app_id = register(&ledger, payment);

    let app = ledger.get_app(app_id).unwrap();
    assert_eq!(app.escrow_amount, payment);
    assert!(app.is_active);
    assert_eq!(app.total_ratings, 0);
    assert_eq!(app.escrow_amount.to_string(), "0.11");

    let event = events.recv().await.unwrap();
    match event.kind {
        EventKind::AppRegistered {
            app_id: id,
            owner: o,
            name,
            miniapp_url,
            payment: p,
            ..
        } => {
            assert_eq!(id, app_id);
            assert_eq!(o, owner());
            assert_eq!(name, "Frames");
            assert_eq!(miniapp_url, "https://frames.example/mini");
            assert_eq!(p, payment);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_registration_rejections() {
    let ledger = create_test_ledger();

    let err = ledger
        .register_app(&owner(), AppRegistration::named("  "), Amount::from_units(1))
        .unwrap_err();
    assert!(matches!(err, Error::EmptyName));

    let err = ledger
        .register_app(
            &owner(),
            AppRegistration::named("Frames"),
            Amount::parse_decimal("0.009").unwrap(),
        )
        .unwrap_err();
    match err {
        Error::InsufficientFee { required, provided } => {
            assert_eq!(required, Amount::parse_decimal("0.01").unwrap());
            assert_eq!(provided, Amount::parse_decimal("0.009").unwrap());
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(ledger.app_count(), 0);
}

#[test]
fn test_five_star_feedback_scenario() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(250));

    assert_eq!(ledger.base_reward(5), Amount::from_units(100));
    let receipt = ledger.submit_feedback(app_id, &reviewer(1), 5, "Love it").unwrap();
    assert_eq!(receipt.split.owner, Amount::from_units(20));
    assert_eq!(receipt.split.protocol, Amount::from_units(5));
    assert_eq!(receipt.split.reviewer, Amount::from_units(75));

    let feedback = ledger.get_feedback(receipt.feedback_id).unwrap();
    assert_eq!(feedback.reward_amount, Amount::from_units(75));
    assert_eq!(feedback.protocol_reward, Amount::from_units(5));
    assert_eq!(feedback.base_reward(), Amount::from_units(100));

    let balance = ledger.get_balance(&reviewer(1), RewardSource::App(app_id));
    assert_eq!(balance.balance, Amount::from_units(75));
    assert_eq!(balance.total_earned, Amount::from_units(75));
    assert!(balance.last_updated.is_some());
    assert_eq!(ledger.list_sources(&reviewer(1)), vec![RewardSource::App(app_id)]);

    // Unknown reviewer gets a zeroed record, not an error.
    let empty = ledger.get_balance(&reviewer(9), RewardSource::App(app_id));
    assert_eq!(empty.total_earned, Amount::ZERO);
    assert!(empty.last_updated.is_none());
}

#[test]
fn test_feedback_validation_scenarios() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(250));

    assert!(matches!(
        ledger.submit_feedback(app_id, &reviewer(1), 6, "Great"),
        Err(Error::InvalidRating(6))
    ));
    assert!(matches!(
        ledger.submit_feedback(app_id, &reviewer(1), 5, ""),
        Err(Error::EmptyComment)
    ));
    assert!(matches!(
        ledger.submit_feedback(app_id, &reviewer(1), 5, "   "),
        Err(Error::EmptyComment)
    ));
    assert!(matches!(
        ledger.submit_feedback(AppId::new(99), &reviewer(1), 5, "Great"),
        Err(Error::AppNotFound(_))
    ));

    assert_eq!(ledger.get_app(app_id).unwrap().escrow_amount, Amount::from_units(250));
    assert!(ledger.feedback_for_app(app_id).is_empty());
}

#[test]
fn test_deactivated_app_rejects_feedback() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(250));

    ledger.deactivate_app(app_id, &owner()).unwrap();
    assert!(!ledger.get_app(app_id).unwrap().is_active);

    assert!(matches!(
        ledger.submit_feedback(app_id, &reviewer(1), 5, "Great"),
        Err(Error::AppInactive(_))
    ));
    assert!(matches!(
        ledger.deactivate_app(app_id, &owner()),
        Err(Error::AppInactive(_))
    ));

    // Escrow can still be topped up and recovered after deactivation.
    ledger.add_escrow(app_id, &owner(), Amount::from_units(10)).unwrap();
    assert_eq!(ledger.withdraw_escrow(app_id, &owner()).unwrap(), Amount::from_units(260));
}

#[test]
fn test_non_owner_cannot_move_escrow() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(250));
    let stranger = Principal::new("0xstranger");

    assert!(matches!(
        ledger.withdraw_escrow(app_id, &stranger),
        Err(Error::Unauthorized { .. })
    ));
    assert!(matches!(
        ledger.add_escrow(app_id, &stranger, Amount::from_units(1)),
        Err(Error::Unauthorized { .. })
    ));
    assert!(matches!(
        ledger.deactivate_app(app_id, &stranger),
        Err(Error::Unauthorized { .. })
    ));
    assert_eq!(ledger.get_app(app_id).unwrap().escrow_amount, Amount::from_units(250));

    assert!(matches!(
        ledger.add_escrow(app_id, &owner(), Amount::ZERO),
        Err(Error::ZeroAmount)
    ));
    assert_eq!(ledger.withdraw_escrow(app_id, &owner()).unwrap(), Amount::from_units(250));
    assert!(matches!(
        ledger.withdraw_escrow(app_id, &owner()),
        Err(Error::NothingToClaim)
    ));
}

#[test]
fn test_average_rating_rounds_to_one_decimal() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(1_000));

    for (i, rating) in [5u8, 4, 4].into_iter().enumerate() {
        ledger.submit_feedback(app_id, &reviewer(i), rating, "ok").unwrap();
    }

    let app = ledger.get_app(app_id).unwrap();
    assert_eq!(app.total_ratings, 3);
    assert_eq!(app.average_rating(), Decimal::new(43, 1));

    let ids: Vec<_> = ledger
        .feedback_for_app(app_id)
        .into_iter()
        .map(|f| f.feedback_id.get())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_settings_update_changes_future_rewards() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(1_000));

    let invalid = ProtocolSettings {
        app_owner_reward_percentage: 50,
        protocol_fee_percentage: 60,
        ..Default::default()
    };
    assert!(matches!(
        ledger.update_settings(&admin(), Role::Administrator, invalid),
        Err(Error::InvalidPercentages { owner: 50, protocol: 60 })
    ));

    let bounds = ProtocolSettings {
        min_feedback_reward: Amount::from_units(50),
        max_feedback_reward: Amount::from_units(40),
        ..Default::default()
    };
    assert!(matches!(
        ledger.update_settings(&admin(), Role::Administrator, bounds),
        Err(Error::InvalidRewardBounds { .. })
    ));

    let cheaper = ProtocolSettings {
        min_feedback_reward: Amount::from_units(2),
        max_feedback_reward: Amount::from_units(10),
        app_owner_reward_percentage: 10,
        protocol_fee_percentage: 10,
        ..Default::default()
    };
    assert_eq!(
        ledger
            .update_settings(&admin(), Role::Administrator, cheaper)
            .unwrap(),
        2
    );

    let receipt = ledger.submit_feedback(app_id, &reviewer(1), 3, "ok").unwrap();
    assert_eq!(receipt.split.base, Amount::from_units(6));
    assert_eq!(receipt.split.owner, Amount::parse_decimal("0.6").unwrap());
    assert_eq!(receipt.split.reviewer, Amount::parse_decimal("4.8").unwrap());
}

#[test]
fn test_concurrent_reviewers_never_overdraw_escrow() {
    let ledger = Arc::new(create_test_ledger());
    // Enough for exactly two 5-star payouts.
    let app_id = register(&ledger, Amount::from_units(250));

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let ledger = ledger.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                ledger.submit_feedback(app_id, &reviewer(i), 5, "Great")
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => accepted += 1,
            Err(Error::InsufficientEscrow { required, available }) => {
                assert_eq!(required, Amount::from_units(100));
                assert_eq!(available, Amount::from_units(50));
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(accepted, 2);
    let app = ledger.get_app(app_id).unwrap();
    assert_eq!(app.escrow_amount, Amount::from_units(50));
    assert_eq!(app.total_ratings, 2);
    assert_eq!(ledger.transfer_outbox().len(), 2);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_failed_transfer_rolls_back_then_retry_succeeds() {
    let sink = Arc::new(FlakySink::new(1));
    let ledger = create_test_ledger().with_sink(sink.clone());
    let app_id = register(&ledger, Amount::from_units(250));
    let mut events = ledger.subscribe();

    let err = ledger.submit_feedback(app_id, &reviewer(1), 5, "Great").unwrap_err();
    assert!(matches!(err, Error::TransferFailed(_)));
    assert_eq!(ledger.get_app(app_id).unwrap().escrow_amount, Amount::from_units(250));
    assert!(!ledger.has_reviewed(app_id, &reviewer(1)));
    assert_eq!(ledger.total_earned(&reviewer(1)), Amount::ZERO);
    assert!(events.try_recv().is_err());

    ledger.submit_feedback(app_id, &reviewer(1), 5, "Great").unwrap();
    assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.get_app(app_id).unwrap().escrow_amount, Amount::from_units(150));
    assert!(matches!(
        events.try_recv().unwrap().kind,
        EventKind::FeedbackSubmitted { .. }
    ));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_owner_and_protocol_payouts() {
    let ledger = create_test_ledger();
    let app_id = register(&ledger, Amount::from_units(1_000));
    let second = register(&ledger, Amount::from_units(1_000));

    ledger.submit_feedback(app_id, &reviewer(1), 5, "Great").unwrap();
    ledger.submit_feedback(second, &reviewer(1), 1, "Meh").unwrap();

    assert_eq!(ledger.owner_claimable(&owner()), Amount::from_units(22));
    assert_eq!(ledger.protocol_treasury(), Amount::parse_decimal("5.5").unwrap());
    assert_eq!(ledger.total_earned(&reviewer(1)), Amount::parse_decimal("82.5").unwrap());
    assert_eq!(ledger.balances_for(&reviewer(1)).len(), 2);
    assert_eq!(ledger.apps_by_owner(&owner()).len(), 2);
    assert_eq!(ledger.feedback_by_reviewer(&reviewer(1)).len(), 2);

    ledger.transfer_outbox().drain().unwrap();
    assert_eq!(ledger.claim_owner_rewards(&owner()).unwrap(), Amount::from_units(22));
    let recipient = Principal::new("0xtreasury");
    assert_eq!(
        ledger
            .withdraw_protocol_fees(&admin(), Role::Administrator, &recipient)
            .unwrap(),
        Amount::parse_decimal("5.5").unwrap()
    );

    let transfers = ledger.transfer_outbox().drain().unwrap();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].kind, TransferKind::OwnerRewardClaim);
    assert_eq!(transfers[1].recipient, recipient);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_journal_replay_is_deterministic() {
    let temp_dir = TempDir::new().unwrap();
    let (apps, feedback, treasury, version, head) = {
        let ledger = Ledger::open(journal_config(&temp_dir)).unwrap();
        let app_id = register(&ledger, Amount::from_units(500));
        ledger.submit_feedback(app_id, &reviewer(1), 5, "Great").unwrap();
        ledger
            .update_settings(
                &admin(),
                Role::Administrator,
                ProtocolSettings {
                    protocol_fee_percentage: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        ledger.submit_feedback(app_id, &reviewer(2), 3, "Fine").unwrap();
        ledger.claim_owner_rewards(&owner()).unwrap();
        ledger.add_escrow(app_id, &owner(), Amount::from_units(7)).unwrap();
        assert_eq!(ledger.transfer_outbox().drain().unwrap().len(), 3);

        (
            ledger.list_apps(),
            ledger.feedback_for_app(app_id),
            ledger.protocol_treasury(),
            ledger.settings_version(),
            ledger.journal_head(),
        )
    };
    assert_eq!(head.sequence, 6);

    let ledger = Ledger::open(journal_config(&temp_dir)).unwrap();
    assert_eq!(ledger.list_apps(), apps);
    assert_eq!(ledger.feedback_for_app(apps[0].app_id), feedback);
    assert_eq!(ledger.protocol_treasury(), treasury);
    assert_eq!(ledger.settings_version(), version);
    assert_eq!(ledger.journal_head(), head);
    assert_eq!(ledger.owner_claimable(&owner()), Amount::ZERO);
    assert!(ledger.transfer_outbox().is_empty());
    ledger.check_invariants().unwrap();

    // New commands continue the chain.
    ledger.submit_feedback(apps[0].app_id, &reviewer(3), 1, "Meh").unwrap();
    assert_eq!(ledger.journal_head().sequence, 7);
}

#[test]
fn test_journal_keeps_genesis_settings() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut config = journal_config(&temp_dir);
        config.settings.max_feedback_reward = "20".to_string();
        let ledger = Ledger::open(config).unwrap();
        let app_id = register(&ledger, Amount::from_units(100));
        ledger.submit_feedback(app_id, &reviewer(1), 5, "Great").unwrap();
    }

    // Reopening with different configured settings still replays the original ones.
    let ledger = Ledger::open(journal_config(&temp_dir)).unwrap();
    assert_eq!(ledger.settings().max_feedback_reward, Amount::from_units(20));
    assert_eq!(
        ledger.get_app(AppId::new(1)).unwrap().escrow_amount,
        Amount::from_units(80)
    );
}

#[test]
fn test_tampered_journal_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = journal_config(&temp_dir);
    {
        let ledger = Ledger::open(config.clone()).unwrap();
        register(&ledger, Amount::from_units(100));
    }

    {
        let storage = Storage::open(&config.journal).unwrap();
        let forged = JournalEntry::new(
            2,
            chrono::Utc::now(),
            Command::WithdrawEscrow {
                app_id: AppId::new(1),
                caller: owner(),
            },
            [7u8; 32],
        )
        .unwrap();
        storage.append(&forged, None).unwrap();
    }

    let err = Ledger::open(config).unwrap_err();
    assert!(matches!(err, Error::JournalCorrupted(_)));
}
