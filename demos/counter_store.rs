//! Option-style counter store with a getter, an action, and a subscriber

use serde_json::{json, Value};
use stockroom::{define_store, App, StoreOptions, SubscribeOptions};

fn main() -> stockroom::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Counter Store Example ===\n");

    let use_counter = define_store(
        "counter",
        StoreOptions::new()
            .state(|| json!({ "count": 10, "price": 100 }))
            .getter("totalPrice", |store| {
                let count = store.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                let price = store.get("price").and_then(|v| v.as_i64()).unwrap_or(0);
                json!(format!("¥{}", count * price))
            })
            .action("increment", |store, args| {
                let by = args.first().and_then(Value::as_i64).unwrap_or(1);
                let count = store.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                store.set("count", count + by)?;
                Ok(json!(count + by))
            }),
    );

    // Installing makes the container active for `use_store`
    let app = App::new("shop");
    let container = stockroom::Container::new();
    container.install(&app);

    let counter = use_counter.use_store()?;
    println!("1. totalPrice = {}", counter.get("totalPrice").unwrap_or_default());

    let _sub = counter.subscribe(
        |event, state| println!("   -> {:?} on {}: {}", event.kind, event.store_id, state),
        SubscribeOptions::default().detached(),
    );
    let _log = counter.on_action(
        |call| {
            let name = call.name().to_string();
            println!("   -> calling {name} with {:?}", call.args());
            call.after(move |value| println!("   -> {name} returned {value}"));
        },
        true,
    );

    println!("\n2. Incrementing by 5");
    counter.dispatch("increment", &[json!(5)])?;
    println!("   totalPrice = {}", counter.get("totalPrice").unwrap_or_default());

    println!("\n3. Patching count to 20");
    counter.patch(json!({ "count": 20 }));
    println!("   state = {}", counter.state());

    println!("\n4. Resetting");
    counter.reset()?;
    println!("   state = {}", counter.state());

    println!("\n5. Disposing and rebuilding");
    counter.dispose();
    let fresh = use_counter.use_store()?;
    println!("   same instance? {}", fresh.ptr_eq(&counter));
    println!("   root state = {}", container.state_snapshot());

    println!("\n✓ Example complete!");
    Ok(())
}
