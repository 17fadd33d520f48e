//! Loopback query round trip.
//!
//! Demonstrates:
//! - Starting a QueryServer with a closure executor
//! - Building a pooled QueryClient
//! - Sending concurrent queries through a small pool
//! - Reading pool status and shutting everything down
//!
//! Usage:
//!   cargo run --example round_trip
//!   cargo run --example round_trip -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures_util::future::join_all;
use query_spool::{Error, QueryClient, QueryRequest, QueryServer, executor_fn};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    println!("=== Query Spool: Round Trip ===\n");

    // ========================================================================
    // Start Server
    // ========================================================================

    println!("[1] Starting server...");

    let executor = Arc::new(executor_fn(|request: QueryRequest| async move {
        if request.query.contains("boom") {
            return Err(Error::executor("resolver failed"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!({ "data": { "query": request.query, "variables": request.variables } }))
    }));

    let server = QueryServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, executor)
        .await
        .context("binding query server")?;

    println!("    ✓ Listening on {}\n", server.local_addr());

    // ========================================================================
    // Build Client
    // ========================================================================

    println!("[2] Building client (max 2 connections)...");

    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);

    let client = QueryClient::builder()
        .host("127.0.0.1")
        .port(server.port())
        .max_size(2)
        .acquire_timeout(Duration::from_secs(2))
        .on_connection_created(move |connection| {
            counter.fetch_add(1, Ordering::SeqCst);
            println!("    + {} opened", connection.id());
        })
        .build()?;

    println!("    ✓ Client ready\n");

    // ========================================================================
    // Single Query
    // ========================================================================

    println!("[3] Single query...");

    let data = client
        .query_data("{ scopes { name } }", Some(json!({ "limit": 5 })))
        .await?;

    println!("    ✓ {data}\n");

    // ========================================================================
    // Concurrent Queries
    // ========================================================================

    println!("[4] Eight concurrent queries...");

    let queries = (0..8).map(|n| client.query_data(format!("q{n}"), None));
    for (n, result) in join_all(queries).await.into_iter().enumerate() {
        println!("    q{n} → {}", result?["query"]);
    }

    println!(
        "    ✓ {} connections created for 8 queries\n",
        created.load(Ordering::SeqCst)
    );

    // ========================================================================
    // Executor Error
    // ========================================================================

    println!("[5] Query answered with errors...");

    match client.query_data("boom", None).await {
        Err(Error::Executor { message }) => println!("    ✓ Executor error: {message}\n"),
        other => anyhow::bail!("expected executor error, got {other:?}"),
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    println!("[6] Pool status: {:?}", client.pool().status());

    client.shutdown().await;
    server.shutdown().await;

    println!("    ✓ Shut down\n");
    println!("=== Done ===");

    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "query_spool=debug"
    } else {
        "query_spool=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
