// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic watch-cache usage example.
//!
//! Demonstrates:
//! 1. Running a cache against an in-memory store of record
//! 2. Read-your-write GET and an indexed LIST
//! 3. A paginated listing pinned to one revision
//! 4. Watching events from a revision
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use watch_cache::{
    CacheState, IndexSpec, InMemoryStore, ListOptions, NamespacedExtractor, Object, SelectionPredicate,
    Selector, WatchCache, WatchCacheConfig, WatchOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║            watch-cache: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the cache
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring watch cache...");

    let config = WatchCacheConfig {
        consistent_list_from_snapshot: true,
        ..Default::default()
    };
    let (_config_tx, config_rx) = watch::channel(config.clone());

    let extractor = Arc::new(NamespacedExtractor::new("/pods").with_field("spec.nodeName"));
    let store = Arc::new(InMemoryStore::new(extractor.clone()));
    let cache = Arc::new(WatchCache::new(
        config,
        config_rx,
        store.clone(),
        extractor,
        vec![IndexSpec::label("app"), IndexSpec::field("spec.nodeName")],
    )?);
    println!("   State: {}", cache.state());

    let feed = store.subscribe(256).await;
    let shutdown = CancellationToken::new();
    let runner = {
        let cache = cache.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { cache.run(feed, shutdown).await })
    };
    let mut state = cache.state_receiver();
    state.wait_for(|s| *s == CacheState::Ready).await?;
    println!("   ✅ Cache ready at revision {}", cache.revision());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write through the store, read back through the cache
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Writing 5 pods to the store of record...");

    let pods = [
        ("web-1", "web", "node-a"),
        ("web-2", "web", "node-b"),
        ("db-1", "db", "node-a"),
        ("cache-1", "cache", "node-c"),
        ("web-3", "web", "node-c"),
    ];
    let mut last = 0;
    for (name, app, node) in pods {
        let object = Object::new(name)
            .with_namespace("default")
            .with_label("app", app)
            .with_content(json!({"spec": {"nodeName": node}}));
        last = store.put(object).await?;
        println!("   └─ {name} ({app} on {node}) → revision {last}");
    }

    let cancel = CancellationToken::new();
    let got = cache
        .get("/pods/default/web-3", &last.to_string(), &cancel)
        .await?;
    println!("\n🔍 get(web-3 @ ≥{last}): exists={} at revision {}", got.exists(), got.revision);

    let web = SelectionPredicate::everything()
        .with_label_selector(Selector::parse("app=web")?)
        .with_index_label("app");
    let page = cache
        .list("/pods", ListOptions::at("0").with_predicate(web), &cancel)
        .await?;
    println!(
        "   └─ list(app=web): {} items via index {:?}",
        page.items.len(),
        page.index_used.as_deref().unwrap_or("(scan)")
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Paginate at a pinned revision while writes continue
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Paginating 2 at a time...");

    let mut opts = ListOptions::at(last.to_string()).exact().with_limit(2);
    let mut page_no = 1;
    loop {
        let page = cache.list("/pods", opts.clone(), &cancel).await?;
        let names: Vec<&str> = page.items.iter().map(|o| o.name.as_str()).collect();
        println!("   └─ page {page_no} @ revision {}: {:?}", page.revision, names);

        if page_no == 1 {
            // Lands mid-pagination; later pages must not see it.
            store
                .put(Object::new("aaa-late").with_namespace("default").with_label("app", "web"))
                .await?;
        }
        match page.continuation {
            Some(next) => opts = ListOptions::default().with_continuation(next).with_limit(2),
            None => break,
        }
        page_no += 1;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Watch from a revision
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n👀 Events after revision {}:", last - 2);
    let cursor = cache.events_since(last - 2, WatchOptions::default())?;
    for event in cursor {
        let event = event?;
        println!(
            "   └─ {} {} @ {}",
            event.event_type.as_str(),
            event.key().unwrap_or("-"),
            event.revision
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Cache stats: {:?}", cache.stats());
    cache.maintain();
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    shutdown.cancel();
    runner.await?;
    println!("   ✅ Shutdown complete! State: {}", cache.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key
            .labels()
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        let label_str = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels.join(","))
        };
        let name = key.name().to_string();

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, labels, value) in &counters {
        println!("   │  └─ {name}{labels} = {value}");
    }
    println!("   ├─ Gauges");
    for (name, labels, value) in &gauges {
        println!("   │  └─ {name}{labels} = {value:.2}");
    }
    println!("   └─ Histograms");
    for (name, labels, count, sum) in &histograms {
        println!("      └─ {name}{labels} count={count} sum={sum:.6}");
    }
}
