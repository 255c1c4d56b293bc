//! Integration tests for the admin session guard.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use soltan_integration_tests::{
    ADMIN_EMAIL, ADMIN_PASSWORD, CUSTOMER_EMAIL, CUSTOMER_PASSWORD, TestContext, order_row, settle,
};
use soltan_storefront::AdminStatus;
use soltan_storefront::gateway::{Gateway, Table};
use soltan_storefront::storage::{Storage, keys};
use tokio::time::{Instant, sleep};

// ============================================================================
// Bounded resolution
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_no_session_resolves_to_denied() {
    let ctx = TestContext::new();
    assert!(ctx.store.admin().is_loading());

    ctx.store.start().await;

    let state = ctx.store.admin().state();
    assert_eq!(state.status, AdminStatus::Denied);
    assert!(!state.loading);
    assert_eq!(ctx.gateway.query_count(Table::AdminWhitelist), 0);
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_hanging_session_lookup_is_denied_within_watchdog() {
    let ctx = TestContext::new();
    ctx.gateway.set_session_delay(Duration::from_secs(3600));

    let started = Instant::now();
    ctx.store.start().await;

    assert!(started.elapsed() <= Duration::from_secs(5));
    assert!(!ctx.store.admin().is_admin());
    assert!(!ctx.store.admin().is_loading());
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_allowlist_is_denied_within_watchdog() {
    let ctx = TestContext::new();
    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    ctx.gateway.set_session_delay(Duration::from_millis(2900));
    ctx.gateway
        .set_query_delay(Table::AdminWhitelist, Duration::from_secs(3600));

    let started = Instant::now();
    ctx.store.start().await;

    assert!(started.elapsed() <= Duration::from_secs(5));
    assert_eq!(ctx.store.admin().state().status, AdminStatus::Denied);
    assert!(!ctx.store.admin().is_loading());
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_existing_admin_session_is_granted_on_start() {
    let ctx = TestContext::new();
    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

    ctx.store.start().await;

    assert!(ctx.store.admin().is_admin());
    assert!(!ctx.store.admin().is_loading());
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_allowlist_is_denied() {
    let ctx = TestContext::new();
    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    ctx.gateway.set_failing(Table::AdminWhitelist, true);

    ctx.store.start().await;

    assert_eq!(ctx.store.admin().state().status, AdminStatus::Denied);
    ctx.store.shutdown().await;
}

// ============================================================================
// Sign-in and sign-out
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_in_grants_after_debounce() {
    let ctx = TestContext::new();
    ctx.store.start().await;
    let queries_before = ctx.gateway.query_count(Table::AdminWhitelist);

    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    sleep(Duration::from_millis(400)).await;
    assert!(!ctx.store.admin().is_admin());

    sleep(Duration::from_millis(200)).await;
    assert!(ctx.store.admin().is_admin());
    assert_eq!(
        ctx.gateway.query_count(Table::AdminWhitelist),
        queries_before + 1
    );
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_burst_issues_one_allowlist_query() {
    let ctx = TestContext::new();
    ctx.store.start().await;
    let queries_before = ctx.gateway.query_count(Table::AdminWhitelist);

    for _ in 0..3 {
        ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_secs(2)).await;

    assert!(ctx.store.admin().is_admin());
    assert_eq!(
        ctx.gateway.query_count(Table::AdminWhitelist),
        queries_before + 1
    );
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_admin_sign_in_stays_denied() {
    let ctx = TestContext::new();
    ctx.store.start().await;

    ctx.sign_in(CUSTOMER_EMAIL, CUSTOMER_PASSWORD).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(ctx.store.admin().state().status, AdminStatus::Denied);
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wrong_password_is_refused() {
    let ctx = TestContext::new();
    ctx.store.start().await;

    assert!(ctx.sign_in(ADMIN_EMAIL, "wrong").await.is_err());
    sleep(Duration::from_secs(1)).await;
    assert!(!ctx.store.admin().is_admin());
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_sign_out_clears_orders_with_the_state_change() {
    let ctx = TestContext::new();
    ctx.gateway
        .seed(Table::Orders, vec![order_row("ORD-A", 1), order_row("ORD-B", 2)]);
    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    ctx.store.start().await;
    settle().await;
    assert_eq!(ctx.store.orders().orders().len(), 2);

    let mut admin = ctx.store.admin().watch();
    ctx.gateway.sign_out().await.unwrap();
    admin.wait_for(|state| !state.is_admin()).await.unwrap();

    // Observed together with the state change, not after a later tick.
    assert!(ctx.store.orders().orders().is_empty());
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_logout_denies_immediately() {
    let ctx = TestContext::new();
    ctx.gateway.seed(Table::Orders, vec![order_row("ORD-A", 1)]);
    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    ctx.store.start().await;
    settle().await;
    assert!(ctx.store.admin().is_admin());

    ctx.store.admin().logout().await;

    assert_eq!(ctx.store.admin().state().status, AdminStatus::Denied);
    assert!(ctx.store.orders().orders().is_empty());
    assert_eq!(ctx.gateway.get_session().await.unwrap().map(|s| s.user.id), None);
    ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_during_debounce_cancels_recheck() {
    let ctx = TestContext::new();
    ctx.store.start().await;
    let queries_before = ctx.gateway.query_count(Table::AdminWhitelist);

    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    ctx.gateway.sign_out().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert!(!ctx.store.admin().is_admin());
    assert_eq!(ctx.gateway.query_count(Table::AdminWhitelist), queries_before);
    ctx.store.shutdown().await;
}

// ============================================================================
// Session marker
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_marker_follows_privilege() {
    let ctx = TestContext::new();
    ctx.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
    ctx.store.start().await;
    settle().await;

    let marker = ctx.session_storage.get(keys::ADMIN_SESSION).unwrap().unwrap();
    let marker: serde_json::Value = serde_json::from_str(&marker).unwrap();
    assert!(marker["timestamp"].is_i64());
    // Durable storage never sees the marker.
    assert_eq!(ctx.storage.get(keys::ADMIN_SESSION).unwrap(), None);

    ctx.store.admin().logout().await;
    settle().await;
    assert_eq!(ctx.session_storage.get(keys::ADMIN_SESSION).unwrap(), None);
    ctx.store.shutdown().await;
}
