//! End-to-end scenarios for the runtime core

use modus_runtime::capability::{ConceptDef, GroupDef, ModifierDef, Registry};
use modus_runtime::context::RuntimeContext;
use modus_runtime::negotiation::{CapabilityOffer, OriginAllowlist, RejectAll};
use modus_runtime::{GroupOp, Runtime, RuntimeError, StateMachineTemplate};
use modus_types::{Address, StateMap, Value, ValueShape};

fn registry() -> Registry {
    let mut builder = Registry::builder();
    builder
        .state_machine(
            StateMachineTemplate::new(
                "OrderFlow",
                ["Created", "Paid", "Shipped", "Delivered", "Canceled"],
                [
                    ("Created", vec!["Paid", "Canceled"]),
                    ("Paid", vec!["Shipped", "Canceled"]),
                    ("Shipped", vec!["Delivered"]),
                ],
            )
            .unwrap()
            .with_state_key("status"),
        )
        .concept(
            ConceptDef::new("Counter")
                .expect("count", ValueShape::Int)
                .method("increment", |state, _| {
                    let next = state.get("count").and_then(Value::as_int).unwrap_or(0) + 1;
                    state.insert("count".into(), Value::Int(next));
                    Ok(Value::Null)
                })
                .method("value", |state, _| {
                    Ok(state.get("count").cloned().unwrap_or(Value::Null))
                }),
        )
        .concept(
            ConceptDef::new("User")
                .expect("name", ValueShape::Str)
                .method("has_feature", |state, args| {
                    let wanted = args.first().and_then(Value::as_str).ok_or("expected a feature name")?;
                    let found = state
                        .get("features")
                        .and_then(Value::as_list)
                        .is_some_and(|items| items.iter().any(|f| f.as_str() == Some(wanted)));
                    Ok(Value::Bool(found))
                }),
        )
        .modifier(
            ModifierDef::new("Premium")
                .declare("premium_until", ValueShape::Str)
                .declare("features", ValueShape::List)
                .on_add(|state| {
                    state.insert("premium_until".into(), Value::str("2099-12-31"));
                    state.insert(
                        "features".into(),
                        Value::list(vec![Value::str("export"), Value::str("themes")]),
                    );
                    Ok(())
                })
                .on_remove(|state| {
                    state.remove("premium_until");
                    state.remove("features");
                    Ok(())
                }),
        )
        .modifier(ModifierDef::new("Admin"))
        .group(GroupDef::new("Staff", ["Premium", "Admin"]))
        .concept(
            ConceptDef::new("Order")
                .expect("total", ValueShape::Int)
                .state_machine("OrderFlow"),
        )
        .concept(
            ConceptDef::new("Team")
                .expect("members", ValueShape::List)
                .method("add_member", |state, args| {
                    let member = args
                        .first()
                        .filter(|v| v.as_weak().is_some())
                        .cloned()
                        .ok_or("expected a weak member reference")?;
                    match state.get_mut("members").and_then(Value::as_list_mut) {
                        Some(members) => members.push(member),
                        None => return Err("members missing".into()),
                    }
                    Ok(Value::Null)
                }),
        );
    builder.build().unwrap()
}

fn user(rt: &mut Runtime) -> Address {
    let arena = rt.create_arena().unwrap();
    let mut state = StateMap::new();
    state.insert("name".into(), Value::str("ada"));
    rt.create_entity(arena, state, &["User"]).unwrap()
}

#[test]
fn test_counter_increments() {
    let mut rt = Runtime::new(registry());
    let arena = rt.create_arena().unwrap();
    let mut state = StateMap::new();
    state.insert("count".into(), Value::Int(0));
    let counter = rt.create_entity(arena, state, &["Counter"]).unwrap();

    for _ in 0..3 {
        rt.invoke(counter, "increment", &[]).unwrap();
    }
    assert_eq!(rt.invoke(counter, "value", &[]).unwrap(), Value::Int(3));
}

#[test]
fn test_premium_modifier_round_trip() {
    let mut rt = Runtime::new(registry());
    let user = user(&mut rt);
    let export = [Value::str("export")];

    rt.add_modifier(user, "Premium").unwrap();
    assert!(rt.get_state(user, "premium_until").unwrap().is_some());
    let features = rt.get_state(user, "features").unwrap().unwrap();
    assert!(!features.as_list().unwrap().is_empty());
    assert_eq!(rt.invoke(user, "has_feature", &export).unwrap(), Value::Bool(true));

    rt.remove_modifier(user, "Premium").unwrap();
    assert_eq!(rt.get_state(user, "premium_until").unwrap(), None);
    assert_eq!(rt.get_state(user, "features").unwrap(), None);
    assert_eq!(rt.invoke(user, "has_feature", &export).unwrap(), Value::Bool(false));
}

#[test]
fn test_order_state_machine() {
    let mut rt = Runtime::new(registry());
    let arena = rt.create_arena().unwrap();
    let mut state = StateMap::new();
    state.insert("total".into(), Value::Int(42));
    let order = rt.create_entity(arena, state, &["Order"]).unwrap();

    assert_eq!(
        rt.transition_to(order, "Shipped"),
        Err(RuntimeError::IllegalTransition {
            from: "Created".into(),
            to: "Shipped".into(),
        })
    );
    assert_eq!(rt.current_state(order).unwrap().as_deref(), Some("Created"));

    rt.transition_to(order, "Paid").unwrap();
    rt.transition_to(order, "Shipped").unwrap();
    assert_eq!(rt.current_state(order).unwrap().as_deref(), Some("Shipped"));
    assert_eq!(rt.get_state(order, "status").unwrap(), Some(Value::str("Shipped")));
}

#[test]
fn test_stale_team_member_is_dangling() {
    let mut rt = Runtime::new(registry());
    let arena = rt.create_arena().unwrap();

    let mut team_state = StateMap::new();
    team_state.insert("members".into(), Value::list(vec![]));
    let team = rt.create_entity(arena, team_state, &["Team"]).unwrap();

    let mut alice_state = StateMap::new();
    alice_state.insert("name".into(), Value::str("alice"));
    let alice = rt.create_entity(arena, alice_state, &["User"]).unwrap();

    let weak = rt.downgrade(alice).unwrap();
    rt.invoke(team, "add_member", &[weak]).unwrap();

    // weak references do not keep alice alive
    assert_eq!(rt.heap().ref_count(alice), 1);
    assert_eq!(rt.release(alice).unwrap(), 0);

    let members = rt.get_state(team, "members").unwrap().unwrap();
    for member in members.as_list().unwrap() {
        let address = member.as_weak().unwrap();
        assert_eq!(
            rt.deref(address).unwrap_err(),
            RuntimeError::DanglingAddress { address }
        );
    }
    // the team itself is untouched
    assert!(rt.entity(team).is_ok());
}

#[test]
fn test_strong_member_reference_rejected() {
    let mut rt = Runtime::new(registry());
    let arena = rt.create_arena().unwrap();
    let mut team_state = StateMap::new();
    team_state.insert("members".into(), Value::list(vec![]));
    let team = rt.create_entity(arena, team_state, &["Team"]).unwrap();
    let alice = rt.allocate(arena, Value::str("alice")).unwrap();

    assert_eq!(
        rt.invoke(team, "add_member", &[Value::Address(alice)]),
        Err(RuntimeError::UncountedAlias { address: alice })
    );
}

#[test]
fn test_rejected_offer_leaves_entity_unchanged() {
    let mut rt = Runtime::new(registry());
    let user = user(&mut rt);
    let before = rt.entity(user).unwrap().clone();

    let offer = CapabilityOffer::new("remote", ["Premium", "Admin"]);
    let err = rt.validate_and_merge(user, &offer, &RejectAll).unwrap_err();
    assert!(matches!(err, RuntimeError::NegotiationRejected { .. }));
    assert_eq!(rt.entity(user).unwrap(), &before);
}

#[test]
fn test_accepted_offer_merges_groups() {
    let mut rt = Runtime::new(registry());
    let user = user(&mut rt);
    rt.add_modifier(user, "Premium").unwrap();

    let offer = CapabilityOffer::new("partner", ["Staff"]);
    let merged = rt
        .validate_and_merge(user, &offer, &OriginAllowlist::new(["partner"]))
        .unwrap();
    assert_eq!(merged, vec!["Admin".to_string()]);
    assert!(rt.has(user, "Premium + Admin").unwrap());
}

#[test]
fn test_offer_respects_contexts() {
    let mut rt = Runtime::new(registry());
    let user = user(&mut rt);
    let before = rt.entity(user).unwrap().clone();

    let _deny = rt.enter(RuntimeContext::deny("no-admin", ["Admin"])).unwrap();
    let offer = CapabilityOffer::new("partner", ["Premium", "Admin"]);
    let accept = |_: &CapabilityOffer| -> Result<(), String> { Ok(()) };
    let err = rt.validate_and_merge(user, &offer, &accept).unwrap_err();

    assert!(matches!(err.root_cause(), RuntimeError::PermissionDenied { .. }));
    assert_eq!(rt.entity(user).unwrap(), &before);
}

#[test]
fn test_group_rollback_restores_state() {
    let mut rt = Runtime::new(registry());
    let user = user(&mut rt);
    let before = rt.entity(user).unwrap().clone();

    let _sandbox = rt.enter(RuntimeContext::sandbox("trial", ["Premium"])).unwrap();
    let err = rt.apply_group(user, "Staff", GroupOp::Add).unwrap_err();

    assert!(matches!(
        &err,
        RuntimeError::GroupApplicationFailed { member, .. } if member == "Admin"
    ));
    assert_eq!(rt.entity(user).unwrap(), &before);
    assert_eq!(rt.get_state(user, "features").unwrap(), None);
}

#[test]
fn test_scope_exit_tears_arena_down() {
    let mut rt = Runtime::new(registry());
    let arena = rt.create_arena().unwrap();
    let kept = rt.allocate(arena, Value::Int(1)).unwrap();

    let inner = rt
        .with_scope(arena, |rt, _| rt.allocate(arena, Value::Int(2)))
        .unwrap();
    assert!(rt.deref(inner).is_err());
    assert!(rt.deref(kept).is_ok());

    let exit = rt.exit_scope(arena).unwrap();
    assert!(exit.torn_down);
    assert!(rt.deref(kept).is_err());
    assert_eq!(rt.stats().torn_down, 1);
}
