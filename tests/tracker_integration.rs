//! End-to-end tracker scenarios on a paused clock

use intent_tracker::config::TrackerConfig;
use intent_tracker::dock;
use intent_tracker::intent::{
    Amount, DepositDescriptor, IntentDescription, SwapDescriptor, Token, TokenDeployment,
    WithdrawDescriptor,
};
use intent_tracker::stage::Projection;
use intent_tracker::watcher::ScriptedSource;
use intent_tracker::{
    IntentKind, OperationDescriptor, PollReport, RegisterOutcome, SettlementEvent, StageValue,
    Tracker, TrackerError, TrackingSession,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_test::{assert_pending, task};

fn config() -> TrackerConfig {
    TrackerConfig {
        poll_interval_ms: 1_000,
        synthetic_delay_ms: 400,
        settlement_channel_capacity: 32,
    }
}

fn token(symbol: &str, chain: &str) -> Token {
    Token {
        symbol: symbol.to_string(),
        chain: chain.to_string(),
        address: None,
        decimals: 6,
    }
}

fn swap() -> OperationDescriptor {
    OperationDescriptor::Swap(SwapDescriptor {
        token_in: token("USDC", "eth"),
        token_out: token("SOL", "sol"),
        amount_in: Amount(1_000_000),
        amount_out: Amount(6_500),
        intent: IntentDescription::Swap {
            exact_out: false,
            slippage_bps: 50,
        },
        deposit_address: None,
        one_click: false,
    })
}

fn deposit(amount: u128, chain_name: &str) -> OperationDescriptor {
    OperationDescriptor::Deposit(DepositDescriptor {
        token: token("USDC", chain_name),
        token_deployment: TokenDeployment {
            chain: chain_name.to_string(),
            address: "0xa0b8".to_string(),
            decimals: 6,
        },
        amount: Amount(amount),
        chain_name: chain_name.to_string(),
        user_address: "0xuser".to_string(),
    })
}

fn withdraw() -> OperationDescriptor {
    OperationDescriptor::Withdraw(WithdrawDescriptor {
        token_in: token("USDC", "near"),
        token_out: token("USDC", "eth"),
        intent: IntentDescription::Withdraw {
            destination_chain: "eth".to_string(),
            recipient: "0xrecipient".to_string(),
        },
    })
}

fn pending(stage: &str) -> PollReport {
    PollReport {
        stage: StageValue::atomic(stage),
        tx_hash: None,
        status: None,
        accepts: Vec::new(),
        terminal: false,
    }
}

fn settled(stage: &str, tx_hash: &str) -> PollReport {
    PollReport {
        stage: StageValue::atomic(stage),
        tx_hash: Some(tx_hash.to_string()),
        status: Some("SUCCESS".to_string()),
        accepts: Vec::new(),
        terminal: true,
    }
}

fn failed() -> PollReport {
    PollReport {
        stage: StageValue::atomic("error"),
        tx_hash: None,
        status: Some("FAILED".to_string()),
        accepts: vec!["retry".to_string()],
        terminal: true,
    }
}

fn tracker(kind: IntentKind) -> (Tracker, Arc<ScriptedSource>) {
    let source = Arc::new(ScriptedSource::new());
    (Tracker::new(kind, source.clone(), config()), source)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn duplicate_registrations_spawn_one_watcher() {
    let (tracker, source) = tracker(IntentKind::Swap);
    source.script("0xintent", vec![pending("finding")]);

    let outcomes: Vec<RegisterOutcome> = (0..5).map(|_| tracker.register("0xintent", swap())).collect();

    assert!(outcomes[0].is_registered());
    assert!(outcomes[1..].iter().all(|o| *o == RegisterOutcome::Duplicate));
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.spawned_total(), 1);
    assert_eq!(tracker.live_watchers(), 1);

    // One watcher means one poll per interval
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(source.poll_count("0xintent"), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scenario_a_first_descriptor_wins() {
    let (tracker, _source) = tracker(IntentKind::Deposit);

    tracker.register("dep-1", deposit(100, "eth"));
    tracker.register("dep-1", deposit(200, "base"));

    let tracked = tracker.list();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].descriptor, deposit(100, "eth"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scenario_b_synthetic_stage_then_monotonic_progress() {
    let (tracker, source) = tracker(IntentKind::Swap);
    source.script(
        "0xintent",
        vec![
            pending("finding"),
            pending("competing"),
            pending("signing"),
            settled("settled", "0xabc"),
        ],
    );
    tracker.register("0xintent", swap());

    let mut feed = tracker.follow("0xintent").unwrap();
    let mut shown: Vec<(&str, bool)> = Vec::new();
    while let Some((_, state)) = feed.next().await {
        let entry = (state.stage, state.synthetic);
        if shown.last() != Some(&entry) {
            shown.push(entry);
        }
        if state.is_terminal(tracker.plan()) {
            assert!(!state.has_error);
            assert_eq!(state.tx_hash.as_deref(), Some("0xabc"));
            assert_eq!(dock::render(&state, tracker.plan()).to_string(), "✓━✓━✓━✓");
            break;
        }
    }

    assert_eq!(
        shown,
        vec![
            ("finding", false),
            ("competing", true),
            ("competing", false),
            ("signing", false),
            ("complete", false),
        ]
    );

    // Settled without a retry on offer: nothing more to show
    let mut next = task::spawn(feed.next());
    assert_pending!(next.poll());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scenario_c_dismiss_unknown_id_changes_nothing() {
    let (tracker, _source) = tracker(IntentKind::Withdraw);
    tracker.register("y", withdraw());

    assert!(!tracker.dismiss("x"));
    let ids: Vec<String> = tracker.list().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["y".to_string()]);
    assert_eq!(tracker.live_watchers(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scenario_d_retry_moves_display_back_to_first_stage() {
    let (tracker, source) = tracker(IntentKind::Deposit);
    source.script("dep-1", vec![failed()]);
    source.script_retry("dep-1", vec![pending("detecting"), settled("credited", "0xfeed")]);
    let mut settlements = tracker.subscribe_settlements();
    tracker.register("dep-1", deposit(100, "eth"));

    let mut feed = tracker.follow("dep-1").unwrap();
    let (_, state) = feed.next().await.unwrap();
    assert_eq!(state.stage, "detecting");

    let (projection, state) = feed.next().await.unwrap();
    assert_eq!(projection, Projection::Advanced);
    assert_eq!(state.stage, "complete");
    assert!(state.has_error);
    assert!(state.can_retry);
    assert_eq!(dock::render(&state, tracker.plan()).to_string(), "✓━✓━✓━✗");

    tracker.retry("dep-1").unwrap();

    let (projection, state) = feed.next().await.unwrap();
    assert_eq!(projection, Projection::Restarted);
    assert_eq!(state.stage, "detecting");
    assert_eq!(state.index, 0);
    assert!(!state.has_error);

    // Both outcomes of the same watcher arrive in order
    let first = settlements.recv().await.unwrap();
    let second = settlements.recv().await.unwrap();
    assert!(matches!(first, SettlementEvent::Deposit { ref stage, .. } if stage == "error"));
    assert_eq!(
        second,
        SettlementEvent::Deposit {
            id: "dep-1".to_string(),
            stage: "credited".to_string(),
            tx_hash: Some("0xfeed".to_string()),
        }
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dismissed_intent_never_reaches_subscribers() {
    let (tracker, source) = tracker(IntentKind::Swap);
    source.script(
        "0xintent",
        vec![pending("finding"), pending("signing"), settled("settled", "0xabc")],
    );
    let mut settlements = tracker.subscribe_settlements();
    tracker.register("0xintent", swap());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(tracker.dismiss("0xintent"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(matches!(settlements.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(source.poll_count("0xintent"), 2);
    assert!(matches!(
        tracker.retry("0xintent"),
        Err(TrackerError::UnknownIntent { .. })
    ));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn settlements_are_relayed_unchanged_per_kind() {
    let source = Arc::new(ScriptedSource::new());
    let session = TrackingSession::new(&config(), source.clone());
    source.script("0xswap", vec![pending("finding"), settled("settled", "0x01")]);
    source.script("dep-1", vec![settled("credited", "0x02")]);
    source.script("0xwithdraw", vec![pending("bridging"), settled("released", "0x03")]);
    let mut settlements = session.subscribe_settlements();

    session.register("0xswap", swap());
    session.register("dep-1", deposit(7, "eth"));
    session.register("0xwithdraw", withdraw());

    let mut events = Vec::new();
    for _ in 0..3 {
        events.push(settlements.recv().await.unwrap());
    }
    events.sort_by(|a, b| a.intent_id().cmp(b.intent_id()));

    assert_eq!(
        events[0],
        SettlementEvent::Swap {
            settlement_ref: "0xswap".to_string(),
            tx_hash: "0x01".to_string(),
            token_in: token("USDC", "eth"),
            token_out: token("SOL", "sol"),
        }
    );
    assert_eq!(
        events[1],
        SettlementEvent::Withdraw {
            settlement_ref: "0xwithdraw".to_string(),
            tx_hash: "0x03".to_string(),
            token_in: token("USDC", "near"),
            token_out: token("USDC", "eth"),
        }
    );
    assert_eq!(events[2].kind(), IntentKind::Deposit);
    assert_eq!(events[2].tx_hash(), Some("0x02"));

    // Settled watchers stay quiet
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(matches!(settlements.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn mismatched_descriptor_is_ignored() {
    let (tracker, _source) = tracker(IntentKind::Withdraw);

    assert_eq!(tracker.register("s", swap()), RegisterOutcome::KindMismatch);
    assert_eq!(
        tracker.register("d", deposit(1, "eth")),
        RegisterOutcome::KindMismatch
    );
    assert!(tracker.is_empty());
    assert_eq!(tracker.spawned_total(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn transient_poll_failures_do_not_stop_the_watcher() {
    let (tracker, source) = tracker(IntentKind::Deposit);
    source.script("dep-1", vec![settled("credited", "0xfeed")]);
    source.fail_next("dep-1", 2);
    let mut settlements = tracker.subscribe_settlements();
    tracker.register("dep-1", deposit(100, "eth"));

    let event = settlements.recv().await.unwrap();
    assert_eq!(event.intent_id(), "dep-1");
    assert_eq!(source.poll_count("dep-1"), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn session_shutdown_stops_all_watchers() {
    let source = Arc::new(ScriptedSource::new());
    let session = TrackingSession::new(&config(), source.clone());
    for id in ["a", "b", "c"] {
        source.script(id, vec![pending("detecting")]);
        session.register(id, deposit(1, "eth"));
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.len(), 3);
    assert_eq!(session.shutdown(), 3);

    tokio::time::sleep(Duration::from_secs(5)).await;
    for id in ["a", "b", "c"] {
        assert_eq!(source.poll_count(id), 1);
    }
}
