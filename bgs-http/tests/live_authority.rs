//! Live tests against the public tick authority.
//!
//! Run with: `cargo test -p bgs-http --test live_authority -- --ignored --nocapture`

use bgs_http::{TickAuthority, DEFAULT_TICK_URL};

#[tokio::test]
#[ignore]
async fn test_fetch_live_tick() {
    let authority = TickAuthority::new(DEFAULT_TICK_URL).expect("Failed to build client");

    match authority.latest_tick().await {
        Ok(tick) => {
            println!("Latest galaxy tick: {tick}");
            assert!(!tick.trim().is_empty());
        }
        Err(e) => panic!("Tick authority request failed: {e}"),
    }
}
