//! # Relationship Protocol Demo
//!
//! Walks two users through the whole protocol against an in-memory store:
//! 1. Alice and Bob sign up and find each other
//! 2. Alice sends a request, Bob accepts
//! 3. Alice removes Bob after confirming
//! 4. The audit confirms both records agree
//!
//! ## Run
//!
//! ```bash
//! cargo run --example relationship_demo
//! ```

use std::sync::Arc;

use studylink_core::friends::ConsistencyAuditor;
use studylink_core::time::ManualClock;
use studylink_core::{
    ConfirmChoice, CoreConfig, DirectoryService, MemoryStore, RelationshipService,
};

#[tokio::main]
async fn main() {
    println!("=================================================");
    println!("        STUDYLINK RELATIONSHIP PROTOCOL DEMO");
    println!("=================================================\n");

    let store = Arc::new(MemoryStore::new());
    let config = CoreConfig::default();
    let clock = Arc::new(ManualClock::new(1000));
    let directory = DirectoryService::new(store.clone(), &config);
    let service = RelationshipService::with_clock(store.clone(), clock.clone(), &config);

    // =========================================================================
    // STEP 1: Sign up and search
    // =========================================================================
    println!("1. Registering Alice and Bob...\n");

    directory
        .register_profile("alice", "alice@uni.edu")
        .await
        .expect("Failed to register Alice");
    directory
        .register_profile("bob", "bob@uni.edu")
        .await
        .expect("Failed to register Bob");

    let hits = directory
        .search("alice", "bob")
        .await
        .expect("Search failed");
    for profile in &hits {
        println!("   Found: {} <{}>", profile.username, profile.email);
    }
    println!();

    // =========================================================================
    // STEP 2: Send and accept
    // =========================================================================
    println!("2. Alice sends Bob a friend request...\n");

    let request_id = service
        .send_friend_request("alice", "bob")
        .await
        .expect("Failed to send request");
    println!("   Request ID: {}", request_id);
    println!(
        "   State: {:?}",
        service.relationship_between("alice", "bob").await.expect("read failed")
    );
    println!();

    println!("3. Bob accepts...\n");
    clock.advance(500);

    service
        .accept_request("bob", &request_id)
        .await
        .expect("Failed to accept request");
    let friends = service
        .friends("alice", &directory)
        .await
        .expect("Failed to list friends");
    println!(
        "   Alice's friends: {:?}",
        friends.iter().map(|p| p.username.as_str()).collect::<Vec<_>>()
    );
    println!();

    // =========================================================================
    // STEP 3: Remove
    // =========================================================================
    println!("4. Alice removes Bob (confirmed)...\n");

    let outcome = service
        .remove_friend("alice", "bob", &ConfirmChoice::Confirm)
        .await
        .expect("Failed to remove friend");
    println!("   Outcome: {:?}", outcome);

    let again = service
        .remove_friend("alice", "bob", &ConfirmChoice::Confirm)
        .await
        .expect("Failed to remove friend");
    println!("   Second attempt: {:?}", again);
    println!();

    // =========================================================================
    // STEP 4: Audit
    // =========================================================================
    println!("5. Auditing relationship records...\n");

    let report = ConsistencyAuditor::new(store)
        .audit()
        .await
        .expect("Audit failed");
    println!("   Records scanned: {}", report.records_scanned);
    println!(
        "   {}",
        if report.is_clean() {
            "[OK] All records agree"
        } else {
            "[FAIL] Inconsistencies found"
        }
    );

    println!("\n=================================================");
    println!("                  DEMO COMPLETE");
    println!("=================================================");
}
