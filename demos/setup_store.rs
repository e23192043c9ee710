//! Setup-style store with an async action and a plugin

use futures::executor::block_on;
use serde_json::{json, Value};
use stockroom::{define_setup_store, ActionError, Container, Extensions};

fn main() -> stockroom::Result<()> {
    println!("=== Setup Store Example ===\n");

    let container = Container::new();
    container.use_plugin(|ctx| {
        let mut extensions = Extensions::new();
        extensions.insert("createdBy".into(), json!(format!("plugin for {}", ctx.id)));
        extensions
    });

    // State saved by a previous session wins over declared defaults
    container.hydrate("todos", json!({ "items": ["write docs"] }));

    let use_todos = define_setup_store("todos", |ctx| {
        ctx.state("items", json!([]));
        ctx.state("loading", false);
        ctx.getter("remaining", |store| {
            let items = store.get("items").unwrap_or_default();
            json!(items.as_array().map(Vec::len).unwrap_or(0))
        });
        ctx.action("add", |store, args| {
            let mut items = store.get("items").unwrap_or_else(|| json!([]));
            if let (Some(list), Some(item)) = (items.as_array_mut(), args.first()) {
                list.push(item.clone());
            }
            store.set("items", items)?;
            Ok(Value::Null)
        });
        ctx.async_action("load", |store, _| async move {
            store.set("loading", true)?;
            store.patch(json!({ "items": ["fetched item"], "loading": false }));
            Ok::<_, ActionError>(json!("loaded"))
        });
        Ok(())
    });

    let todos = use_todos.use_store_in(&container)?;
    println!("1. items = {}", todos.get("items").unwrap_or_default());
    println!("   createdBy = {}", todos.get("createdBy").unwrap_or_default());

    println!("\n2. Adding an item");
    todos.dispatch("add", &[json!("ship it")])?;
    println!("   remaining = {}", todos.get("remaining").unwrap_or_default());

    println!("\n3. Loading asynchronously");
    let result = block_on(todos.dispatch_async("load", &[]))?;
    println!("   load returned {result}");
    println!("   items = {}", todos.get("items").unwrap_or_default());

    println!("\n4. Setup stores have no reset");
    match todos.reset() {
        Ok(()) => println!("   reset succeeded"),
        Err(error) => println!("   {error}"),
    }

    println!("\n✓ Example complete!");
    Ok(())
}
