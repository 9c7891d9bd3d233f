//! Property-based tests for the order lifecycle
//!
//! Random call sequences from random actors are thrown at a ledger. Whatever
//! the sequence, a call either fails and leaves the ledger exactly as it was,
//! or succeeds and moves it by exactly one row of the lifecycle table.

use proptest::prelude::*;
use supply_ledger::{
    access::RoleBook,
    ledger::{Action, OrderLedger},
    registry::Registry,
    types::{Address, Bytes32, OrderState, TimeStamp},
};

/// Five role holders followed by one address holding no role.
fn actors() -> Vec<Address> {
    (0..6).map(|_| Address::new_account().unwrap()).collect()
}

fn ledger(actors: &[Address]) -> OrderLedger {
    let roles = RoleBook::new(
        actors[0].clone(),
        actors[1].clone(),
        actors[2].clone(),
        actors[3].clone(),
        actors[4].clone(),
    )
    .unwrap();

    OrderLedger::new(
        Address::new_account().unwrap(),
        Bytes32::from_text("Quinoa").unwrap(),
        30,
        actors[0].clone(),
        roles,
    )
}

/// The intended caller of each forward step, as an index into `actors()`.
const HAPPY_PATH: [(Action, usize); 7] = [
    (Action::Approve, 0),
    (Action::Validated, 1),
    (Action::StoreAuditDocument, 1),
    (Action::WarehouseReceivedOrder, 2),
    (Action::WarehouseReleasedOrder, 2),
    (Action::ReceivedAndInTransit, 3),
    (Action::ConfirmDelivery, 4),
];

/// A ledger moved `steps` rows down the happy path.
fn advanced(actors: &[Address], steps: usize) -> OrderLedger {
    let mut ledger = ledger(actors);
    for (action, who) in &HAPPY_PATH[..steps] {
        ledger.apply(*action, &actors[*who], TimeStamp::new()).unwrap();
    }
    ledger
}

fn call_strategy() -> impl Strategy<Value = (Action, usize)> {
    (0..Action::ALL.len(), 0usize..6).prop_map(|(a, who)| (Action::ALL[a], who))
}

proptest! {
    /// Property: each call is all or nothing, and successful calls follow the table
    #[test]
    fn prop_calls_follow_the_table(
        steps in 0usize..=7,
        calls in prop::collection::vec(call_strategy(), 0..40),
    ) {
        let actors = actors();
        let mut ledger = advanced(&actors, steps);

        for (action, who) in calls {
            let caller = &actors[who];
            let before = ledger.clone();
            let transition = action.transition();

            let authorised = transition.guard.check(caller, before.roles(), before.owners()).is_ok();
            let in_state = match transition.requires {
                Some(required) => before.state() == required,
                None => !before.state().is_closed(),
            };

            let result = ledger.apply(action, caller, TimeStamp::new());
            prop_assert_eq!(result.is_ok(), authorised && in_state);

            if result.is_err() {
                prop_assert_eq!(&ledger, &before);
                continue;
            }

            let added = u64::from(transition.label.is_some());
            prop_assert_eq!(ledger.history_length(), before.history_length() + added);
            // earlier records are never touched
            prop_assert_eq!(&ledger.history()[..before.history().len()], before.history());

            if let Some(label) = transition.label {
                let last = ledger.history().last().unwrap();
                prop_assert_eq!(&last.actor, caller);
                prop_assert_eq!(last.action.as_str(), label);
            }

            prop_assert_eq!(ledger.state(), transition.next.unwrap_or(before.state()));
            prop_assert_eq!(ledger.meta().revoked, ledger.state() == OrderState::Revoked);
        }
    }

    /// Property: after `steps` forward moves, farmer or auditor can revoke
    /// unless the order was delivered, and nobody else ever can
    #[test]
    fn prop_revoke_from_any_open_state(steps in 0usize..=7, revoker in 0usize..6) {
        let actors = actors();
        let mut ledger = advanced(&actors, steps);
        let before = ledger.clone();

        let result = ledger.revoke(&actors[revoker], TimeStamp::new());
        let may_revoke = revoker <= 1 && before.state() != OrderState::Delivered;

        prop_assert_eq!(result.is_ok(), may_revoke);
        if may_revoke {
            prop_assert_eq!(ledger.state(), OrderState::Revoked);
            prop_assert!(ledger.meta().revoked);
            prop_assert_eq!(ledger.history_length(), before.history_length());
        } else {
            prop_assert_eq!(&ledger, &before);
        }
    }

    /// Property: timestamps in the history never go backwards
    #[test]
    fn prop_history_timestamps_are_monotonic(offsets in prop::collection::vec(-3_600i64..3_600, 7)) {
        let actors = actors();
        let mut ledger = ledger(&actors);
        let base = TimeStamp::new().to_datetime_utc();

        for ((action, who), offset) in HAPPY_PATH.iter().zip(offsets) {
            let now = TimeStamp::from(base + chrono::Duration::seconds(offset));
            ledger.apply(*action, &actors[*who], now).unwrap();
        }

        let stamps: Vec<_> = ledger.history().iter().map(|r| r.timestamp.clone()).collect();
        prop_assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: registry indices are gapless and stable
    #[test]
    fn prop_registry_indices_are_gapless(amounts in prop::collection::vec(1u64..10_000, 0..12)) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path().join("registry.db")).unwrap();
        let actors = actors();
        let roles = ledger(&actors).roles().clone();
        let registry = Registry::open(&db, Address::new_account().unwrap(), roles).unwrap();

        let mut created = vec![];
        for amount in &amounts {
            let prior = registry.amount().unwrap();
            let order = registry.create(Bytes32::default(), *amount, &actors[0]).unwrap();

            prop_assert_eq!(registry.amount().unwrap(), prior + 1);
            prop_assert_eq!(registry.orders(prior).unwrap(), order.clone());
            created.push(order);
        }

        for (i, order) in created.iter().enumerate() {
            prop_assert_eq!(&registry.orders(i as u64).unwrap(), order);
            prop_assert_eq!(registry.meta(order).unwrap().amount, amounts[i]);
        }
        prop_assert!(registry.orders(created.len() as u64).is_err());
    }
}

/// Every state on the happy path, every call, every actor: a call the table
/// does not allow is rejected and leaves the ledger untouched.
#[test]
fn rejected_calls_never_mutate_in_any_state() {
    let actors = actors();
    let mut reached = vec![];

    for steps in 0..=HAPPY_PATH.len() {
        let start = advanced(&actors, steps);
        reached.push(start.state());

        for action in Action::ALL {
            let transition = action.transition();
            for caller in &actors {
                let mut ledger = start.clone();

                let authorised = transition
                    .guard
                    .check(caller, start.roles(), start.owners())
                    .is_ok();
                let in_state = match transition.requires {
                    Some(required) => start.state() == required,
                    None => !start.state().is_closed(),
                };

                let state = start.state();
                match ledger.apply(action, caller, TimeStamp::new()) {
                    Ok(()) => assert!(authorised && in_state, "{action} accepted in {state:?}"),
                    Err(e) => {
                        assert!(!(authorised && in_state), "{action} rejected in {state:?}: {e}");
                        // the role check runs first
                        assert_eq!(e.is_authorization(), !authorised);
                        assert_eq!(ledger, start);
                    }
                }
            }
        }
    }

    assert!(reached.contains(&OrderState::WarehouseReleased));
    assert!(reached.contains(&OrderState::InTransit));
    assert!(reached.contains(&OrderState::Delivered));
}
