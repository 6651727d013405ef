//! Uppercase Router
//!
//! A two-page flow driven by a state machine: the first page asks for
//! text, the second shows it in uppercase.
//!
//! Key concepts:
//! - Pages are bound to states, not to routes
//! - The page's data comes from the state that owns it
//! - The host polls the router after each machine event
//!
//! Run with: cargo run --example uppercase

use stateroute::data::DataResolver;
use stateroute::page::PageDefinition;
use stateroute::router::{RouterBuilder, RouterDelegate};
use stateroute::testing::{MemoryHandle, MemoryMachine};

fn print_page(router: &RouterDelegate<MemoryMachine, String>) {
    for page in router.page_stack() {
        println!("  {:?} => {:?}", page.key, page.content);
    }
}

#[tokio::main]
async fn main() {
    println!("=== Uppercase Router Example ===\n");

    let machine = MemoryMachine::builder()
        .state("root")
        .child("root", "enterText")
        .child("root", "showUppercase")
        .initial("enterText")
        .build();

    let mut router = RouterBuilder::<MemoryHandle, String>::new()
        .page(PageDefinition::new("enterText", |_, _| "Enter some text".to_string()))
        .page(PageDefinition::with_data(
            "showUppercase",
            DataResolver::<String>::for_state("showUppercase"),
            |_, text, _| text.to_uppercase(),
        ))
        .build(machine.clone())
        .unwrap();

    router.start().await.unwrap();
    println!("After start:");
    print_page(&router);

    machine
        .go_to_with("showUppercase", String::from("hello"))
        .unwrap();
    router.poll();
    println!("\nAfter submitting \"hello\":");
    print_page(&router);

    let stats = router.subscription_stats();
    println!(
        "\nSubscriptions: {} subscribed, {} unsubscribed",
        stats.subscribes, stats.unsubscribes
    );

    router.stop().await.unwrap();
    println!("\n=== Example Complete ===");
}
