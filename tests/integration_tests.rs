//! Integration tests for Stockroom

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::task::Poll;

use futures::executor::block_on;
use serde_json::{json, Value};
use stockroom::runtime::ReactiveRuntime;
use stockroom::{
    define_setup_store, define_store, ActionError, App, Component, Completion, Container,
    ContainerOptions, Extensions, MutationKind, Outcome, StoreError, StoreOptions,
    SubscribeOptions, SyncErrorPolicy, UseStore,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn int(value: Option<Value>) -> i64 {
    value.and_then(|v| v.as_i64()).unwrap_or_default()
}

fn counter_store() -> UseStore {
    define_store(
        "counter",
        StoreOptions::new()
            .state(|| json!({ "count": 10, "price": 100 }))
            .getter("totalPrice", |store| {
                let total = int(store.get("count")) * int(store.get("price"));
                json!(format!("¥{total}"))
            })
            .action("increment", |store, args| {
                let by = args.first().and_then(Value::as_i64).unwrap_or(1);
                store.set("count", int(store.get("count")) + by)?;
                Ok(Value::Null)
            }),
    )
}

type Log = Arc<Mutex<Vec<String>>>;

/// Suspends once, waking itself so an executor polls it again.
async fn yield_once() {
    let mut yielded = false;
    futures::future::poll_fn(move |cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

#[test]
fn counter_end_to_end() {
    init_tracing();
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();

    assert_eq!(store.get("totalPrice"), Some(json!("¥1000")));

    store.dispatch("increment", &[json!(5)]).unwrap();
    assert_eq!(store.get("count"), Some(json!(15)));
    assert_eq!(store.get("totalPrice"), Some(json!("¥1500")));

    store.patch(json!({ "count": 20 }));
    assert_eq!(store.get("count"), Some(json!(20)));
    assert_eq!(store.get("price"), Some(json!(100)));
}

#[test]
fn accessor_is_singleton_per_container() {
    let use_counter = counter_store();
    let container = Container::new();

    let first = use_counter.use_store_in(&container).unwrap();
    let second = use_counter.use_store_in(&container).unwrap();
    assert!(first.ptr_eq(&second));
}

#[test]
fn containers_hold_independent_instances() {
    let use_counter = counter_store();
    let left = Container::new();
    let right = Container::new();

    let a = use_counter.use_store_in(&left).unwrap();
    let b = use_counter.use_store_in(&right).unwrap();
    assert!(!a.ptr_eq(&b));

    a.dispatch("increment", &[json!(1)]).unwrap();
    assert_eq!(a.get("count"), Some(json!(11)));
    assert_eq!(b.get("count"), Some(json!(10)));
}

#[test]
fn redefining_an_id_returns_existing_store() {
    let container = Container::new();
    let original = counter_store().use_store_in(&container).unwrap();
    let other = define_store("counter", StoreOptions::new().state(|| json!({ "other": 1 })));

    let again = other.use_store_in(&container).unwrap();
    assert!(again.ptr_eq(&original));
    assert_eq!(again.get("other"), None);
}

#[test]
fn patch_merges_nested_objects() {
    let container = Container::new();
    let store = define_store(
        "nested",
        StoreOptions::new().state(|| json!({ "a": { "x": 0, "y": 2 } })),
    )
    .use_store_in(&container)
    .unwrap();

    store.patch(json!({ "a": { "x": 1 } }));
    assert_eq!(store.state(), json!({ "a": { "x": 1, "y": 2 } }));
}

#[test]
fn patch_replaces_opaque_values() {
    let container = Container::new();
    let store = define_setup_store("opaque", |ctx| {
        ctx.opaque_state("config", json!({ "x": 0, "y": 2 }));
        ctx.state("plain", json!({ "x": 0, "y": 2 }));
        Ok(())
    })
    .use_store_in(&container)
    .unwrap();

    store.patch(json!({ "config": { "x": 1 }, "plain": { "x": 1 } }));
    assert_eq!(store.get("config"), Some(json!({ "x": 1 })));
    assert_eq!(store.get("plain"), Some(json!({ "x": 1, "y": 2 })));
}

#[test]
fn action_hooks_run_in_order() {
    let container = Container::new();
    let log: Log = Arc::default();
    let body_log = log.clone();
    let store = define_setup_store("ordered", move |ctx| {
        let body_log = body_log.clone();
        ctx.action("work", move |_, _| {
            push(&body_log, "body");
            Ok(json!(7))
        });
        Ok(())
    })
    .use_store_in(&container)
    .unwrap();

    for tag in ["1", "2"] {
        let log = log.clone();
        let _ = store.on_action(
            move |call| {
                push(&log, format!("S{tag}"));
                let log = log.clone();
                call.after(move |value| push(&log, format!("A{tag}:{value}")));
            },
            true,
        );
    }

    assert_eq!(store.dispatch("work", &[]).unwrap(), json!(7));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["S1", "S2", "body", "A1:7", "A2:7"]
    );
}

#[test]
fn failing_action_skips_after_hooks_and_propagates() {
    let container = Container::new();
    let store = define_setup_store("failing", |ctx| {
        ctx.action("explode", |_, _| Err("boom".into()));
        Ok(())
    })
    .use_store_in(&container)
    .unwrap();

    let after_calls = Arc::new(AtomicUsize::new(0));
    let errors: Log = Arc::default();
    let _listener = store.on_action(
        {
            let after_calls = after_calls.clone();
            let errors = errors.clone();
            move |call| {
                let after_calls = after_calls.clone();
                call.after(move |_| {
                    after_calls.fetch_add(1, Ordering::SeqCst);
                });
                let errors = errors.clone();
                call.on_error(move |error| push(&errors, error.to_string()));
            }
        },
        true,
    );

    let err = store.dispatch("explode", &[]).unwrap_err();
    assert!(matches!(err, StoreError::Action { ref action, .. } if action == "explode"));
    assert_eq!(err.user_error().map(|e| e.to_string()).as_deref(), Some("boom"));
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*errors.lock().unwrap(), vec!["boom"]);
}

#[test]
fn swallow_policy_keeps_legacy_behavior() {
    let container =
        Container::with_options(ContainerOptions::new().sync_errors(SyncErrorPolicy::Swallow));
    let store = define_setup_store("legacy", |ctx| {
        ctx.action("explode", |_, _| Err("boom".into()));
        Ok(())
    })
    .use_store_in(&container)
    .unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let _listener = store.on_action(
        {
            let errors = errors.clone();
            move |call| {
                let errors = errors.clone();
                call.on_error(move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                });
            }
        },
        true,
    );

    assert_eq!(store.dispatch("explode", &[]).unwrap(), Value::Null);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn async_actions_fire_hooks_on_resolution() {
    let container = Container::new();
    let store = define_setup_store("remote", |ctx| {
        ctx.state("loaded", false);
        ctx.async_action("load", |store, args| async move {
            store.set("loaded", true)?;
            yield_once().await;
            Ok::<_, ActionError>(args.first().cloned().unwrap_or(Value::Null))
        });
        ctx.async_action("fail", |_, _| async {
            Err::<Value, ActionError>("offline".into())
        });
        Ok(())
    })
    .use_store_in(&container)
    .unwrap();

    let log: Log = Arc::default();
    let _listener = store.on_action(
        {
            let log = log.clone();
            move |call| {
                let name = call.name().to_string();
                let after_log = log.clone();
                let after_name = name.clone();
                call.after(move |value| push(&after_log, format!("{after_name} ok {value}")));
                let error_log = log.clone();
                call.on_error(move |error| push(&error_log, format!("{name} err {error}")));
            }
        },
        true,
    );

    let completion = store.call("load", &[json!("data")]).unwrap();
    assert!(completion.is_pending());
    assert_eq!(store.get("loaded"), Some(json!(true)));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(block_on(completion.into_future()).unwrap(), json!("data"));

    let err = block_on(store.dispatch_async("fail", &[])).unwrap_err();
    assert!(matches!(err, StoreError::Action { .. }));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["load ok \"data\"", "fail err offline"]
    );

    assert!(matches!(
        store.dispatch("load", &[]),
        Err(StoreError::ActionPending { .. })
    ));
}

#[test]
fn dispatch_runs_async_bodies_up_to_their_first_suspension() {
    let container = Container::new();
    let store = define_setup_store("loader", |ctx| {
        ctx.state("loaded", false);
        ctx.state("finished", false);
        ctx.async_action("load", |store, _| async move {
            store.set("loaded", true)?;
            Ok::<_, ActionError>(json!("done"))
        });
        ctx.async_action("slow", |store, _| async move {
            store.set("loaded", true)?;
            yield_once().await;
            store.set("finished", true)?;
            Ok::<_, ActionError>(Value::Null)
        });
        Ok(())
    })
    .use_store_in(&container)
    .unwrap();

    let after_calls = Arc::new(AtomicUsize::new(0));
    let _listener = store.on_action(
        {
            let after_calls = after_calls.clone();
            move |call| {
                let after_calls = after_calls.clone();
                call.after(move |_| {
                    after_calls.fetch_add(1, Ordering::SeqCst);
                });
            }
        },
        true,
    );

    assert_eq!(store.dispatch("load", &[]).unwrap(), json!("done"));
    assert_eq!(store.get("loaded"), Some(json!(true)));
    assert_eq!(after_calls.load(Ordering::SeqCst), 1);

    store.set("loaded", false).unwrap();
    assert!(matches!(
        store.dispatch("slow", &[]),
        Err(StoreError::ActionPending { .. })
    ));
    assert_eq!(store.get("loaded"), Some(json!(true)));
    assert_eq!(store.get("finished"), Some(json!(false)));
    assert_eq!(after_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn raw_actions_may_complete_either_way() {
    let container = Container::new();
    let store = define_store(
        "mixed",
        StoreOptions::new().raw_action("maybe", |_, args| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            if value.is_null() {
                Ok(Outcome::pending(async {
                    Ok::<_, ActionError>(json!("later"))
                }))
            } else {
                Ok(Outcome::ready(value))
            }
        }),
    )
    .use_store_in(&container)
    .unwrap();

    assert!(matches!(
        store.call("maybe", &[json!(1)]).unwrap(),
        Completion::Ready(v) if v == json!(1)
    ));
    assert_eq!(block_on(store.dispatch_async("maybe", &[])).unwrap(), json!("later"));
}

#[test]
fn unknown_actions_and_getter_writes_are_errors() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();

    assert!(matches!(
        store.dispatch("nope", &[]),
        Err(StoreError::UnknownAction { .. })
    ));
    assert!(matches!(
        store.set("totalPrice", 1),
        Err(StoreError::ReadOnly { .. })
    ));
}

#[test]
fn dispose_yields_a_fresh_instance() {
    let use_counter = counter_store();
    let container = Container::new();
    let store = use_counter.use_store_in(&container).unwrap();
    store.dispatch("increment", &[json!(5)]).unwrap();

    store.dispose();
    assert!(store.is_disposed());
    assert!(!container.has_store("counter"));
    assert_eq!(store.state(), json!({}));

    let fresh = use_counter.use_store_in(&container).unwrap();
    assert!(!fresh.ptr_eq(&store));
    assert_eq!(fresh.get("count"), Some(json!(10)));
}

#[test]
fn dispose_silences_subscriptions() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let _sub = store.subscribe(
        {
            let calls = calls.clone();
            move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        },
        SubscribeOptions::default().detached(),
    );

    store.set("count", 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.dispose();
    store.set("count", 2).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn disposing_one_store_leaves_siblings() {
    let container = Container::new();
    let counter = counter_store().use_store_in(&container).unwrap();
    let other = define_store(
        "other",
        StoreOptions::new()
            .state(|| json!({ "n": 1 }))
            .getter("double", |store| json!(int(store.get("n")) * 2)),
    )
    .use_store_in(&container)
    .unwrap();

    counter.dispose();
    other.set("n", 4).unwrap();
    assert_eq!(other.get("double"), Some(json!(8)));
    assert!(container.has_store("other"));
}

#[test]
fn container_dispose_disposes_every_store() {
    let container = Container::new();
    let counter = counter_store().use_store_in(&container).unwrap();

    container.dispose();
    assert!(counter.is_disposed());
    assert!(container.store_ids().is_empty());
    assert!(matches!(
        counter_store().use_store_in(&container),
        Err(StoreError::Disposed { .. })
    ));
}

#[test]
fn getter_recomputes_once_per_change() {
    let container = Container::new();
    let computations = Arc::new(AtomicUsize::new(0));
    let store = define_store(
        "cached",
        StoreOptions::new()
            .state(|| json!({ "count": 1, "label": "x" }))
            .getter("double", {
                let computations = computations.clone();
                move |store| {
                    computations.fetch_add(1, Ordering::SeqCst);
                    json!(int(store.get("count")) * 2)
                }
            }),
    )
    .use_store_in(&container)
    .unwrap();

    for _ in 0..5 {
        assert_eq!(store.get("double"), Some(json!(2)));
    }
    assert_eq!(computations.load(Ordering::SeqCst), 1);

    store.set("label", "y").unwrap();
    store.set("count", 2).unwrap();
    for _ in 0..5 {
        assert_eq!(store.get("double"), Some(json!(4)));
    }
    assert_eq!(computations.load(Ordering::SeqCst), 2);
}

#[test]
fn subscribers_hear_each_patch_once() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let _sub = store.subscribe(
        {
            let events = events.clone();
            move |event, state| events.lock().unwrap().push((event.kind, state.clone()))
        },
        SubscribeOptions::default().detached(),
    );

    store.patch(json!({ "count": 1, "price": 2 }));
    store.set("count", 3).unwrap();
    store.patch_with(|s| {
        s.set("count", 4).unwrap();
        s.set("price", 5).unwrap();
    });

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            (MutationKind::PatchObject, json!({ "count": 1, "price": 2 })),
            (MutationKind::Direct, json!({ "count": 3, "price": 2 })),
            (MutationKind::PatchFunction, json!({ "count": 4, "price": 5 })),
        ]
    );
}

#[test]
fn patch_inside_outer_batch_reports_its_kind() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let _sub = store.subscribe(
        {
            let kinds = kinds.clone();
            move |event, _| kinds.lock().unwrap().push(event.kind)
        },
        SubscribeOptions::default().detached(),
    );

    ReactiveRuntime::current().batch(|| store.patch(json!({ "count": 1 })));
    ReactiveRuntime::current().batch(|| {
        store.patch_with(|s| s.set("price", 7).unwrap());
    });
    store.set("count", 2).unwrap();

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![
            MutationKind::PatchObject,
            MutationKind::PatchFunction,
            MutationKind::Direct,
        ]
    );
}

#[test]
fn immediate_subscription_and_unsubscribe() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let sub = store.subscribe(
        {
            let calls = calls.clone();
            move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        },
        SubscribeOptions::default().detached().immediate(),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sub.unsubscribe();
    sub.unsubscribe();
    store.set("count", 99).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn component_bound_subscriptions_end_at_unmount() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();
    let state_calls = Arc::new(AtomicUsize::new(0));
    let action_calls = Arc::new(AtomicUsize::new(0));

    let component = Component::new();
    component.run(|| {
        let state_calls = state_calls.clone();
        let _ = store.subscribe(
            move |_, _| {
                state_calls.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );
        let action_calls = action_calls.clone();
        let _ = store.on_action(
            move |_| {
                action_calls.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );
    });

    store.dispatch("increment", &[]).unwrap();
    assert_eq!(state_calls.load(Ordering::SeqCst), 1);
    assert_eq!(action_calls.load(Ordering::SeqCst), 1);

    component.unmount();
    store.dispatch("increment", &[]).unwrap();
    assert_eq!(state_calls.load(Ordering::SeqCst), 1);
    assert_eq!(action_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn state_accessor_reads_and_overwrites() {
    let container = Container::new();
    let store = counter_store().use_store_in(&container).unwrap();

    assert_eq!(store.state(), json!({ "count": 10, "price": 100 }));
    store.set_state(json!({ "count": 1 }));
    assert_eq!(store.state(), json!({ "count": 1, "price": 100 }));
    assert_eq!(
        container.state_snapshot(),
        json!({ "counter": { "count": 1, "price": 100 } })
    );
}

#[test]
fn plugins_extend_every_store_in_order() {
    let container = Container::new();
    let app = App::new("shop");
    container.install(&app);
    stockroom::store::set_active_container(None);

    let seen: Log = Arc::default();
    container
        .use_plugin({
            let seen = seen.clone();
            move |ctx| {
                let app = ctx.app.as_ref().map(App::name).unwrap_or("-");
                push(&seen, format!("{}@{app}", ctx.id));
                let mut ext = Extensions::new();
                ext.insert("source".into(), json!("first"));
                ext.insert("count".into(), json!("shadowed"));
                ext
            }
        })
        .use_plugin(|ctx| {
            let mut ext = Extensions::new();
            ext.insert("source".into(), json!("second"));
            ext.insert("fields".into(), json!(ctx.store.field_names().len()));
            ext
        });

    let store = counter_store().use_store_in(&container).unwrap();
    assert_eq!(store.extension("source"), Some(json!("second")));
    assert_eq!(store.extension("fields"), Some(json!(2)));
    assert_eq!(store.get("count"), Some(json!("shadowed")));
    assert_eq!(store.state()["count"], json!(10));
    assert_eq!(*seen.lock().unwrap(), vec!["counter@shop"]);
}

#[test]
fn accessor_resolves_injected_then_active_container() {
    let previous = stockroom::store::set_active_container(None);
    let use_counter = counter_store();
    assert!(matches!(
        use_counter.use_store(),
        Err(StoreError::MissingContainer)
    ));

    let fallback = Container::new();
    stockroom::store::set_active_container(Some(fallback.clone()));
    let from_fallback = use_counter.use_store().unwrap();
    assert!(fallback.store("counter").is_some_and(|s| s.ptr_eq(&from_fallback)));

    let app = App::new("injected");
    let provided = Container::new();
    app.provide(stockroom::store::CONTAINER_KEY, provided.clone());
    let from_component = app.mount().run(|| use_counter.use_store()).unwrap();
    assert!(provided.store("counter").is_some_and(|s| s.ptr_eq(&from_component)));
    assert!(!from_component.ptr_eq(&from_fallback));

    stockroom::store::set_active_container(previous);
}
