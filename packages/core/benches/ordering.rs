//! Performance benchmarks for WikiFlow ordering operations
//!
//! Run with: `cargo bench -p wikiflow-core`
//!
//! These benchmarks measure critical path performance:
//! - Range computation over a generated space (pure, in memory)
//! - Direct reorder including the full-space rebuild (libsql)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use wikiflow_core::db::DatabaseService;
use wikiflow_core::models::{Document, Space};
use wikiflow_core::operations::{CreateDocumentParams, ReorderRequest};
use wikiflow_core::services::{OrderingEngine, StaticRoleAccess, WikiService};

/// Generate a root with `groups` groups of `pages` pages each
fn generate_space(groups: usize, pages: usize) -> Vec<Document> {
    let mut root = Document::new("bench", None, "Root", "bench").with_group(true);
    root.id = "root".to_string();
    let mut docs = vec![root];
    for g in 0..groups {
        let group_id = format!("group-{}", g);
        let mut group = Document::new("bench", Some("root".to_string()), &group_id, &group_id)
            .with_group(true)
            // Reverse order so the rebuild has work to do
            .with_sort_order((groups - g) as i64);
        group.id = group_id.clone();
        docs.push(group);
        for p in 0..pages {
            let page_id = format!("{}-page-{}", group_id, p);
            let mut page = Document::new("bench", Some(group_id.clone()), &page_id, &page_id)
                .with_sort_order(p as i64);
            page.id = page_id;
            docs.push(page);
        }
    }
    docs
}

/// Setup a service with one space holding `count` root-level pages
async fn setup_test_service(count: usize) -> (WikiService, Space, Vec<String>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(DatabaseService::new(temp_dir.path().join("bench.db")).await.unwrap());
    let service = WikiService::new(db, Arc::new(StaticRoleAccess::new(["admin"])));
    let space = service.create_space("admin", "Bench", "bench").await.unwrap();

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let params = CreateDocumentParams::new(&space.id, &space.root_group, format!("Page {}", i));
        let outcome = service.create_document("admin", params, None).await.unwrap();
        ids.push(outcome.document.unwrap().id);
    }
    (service, space, ids, temp_dir)
}

fn bench_compute_ranges(c: &mut Criterion) {
    let docs = generate_space(50, 20);

    c.bench_function("compute_ranges_1000_documents", |b| {
        b.iter(|| OrderingEngine::compute_ranges(black_box("root"), black_box(&docs)).unwrap())
    });
}

fn bench_direct_reorder(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, space, ids, _temp_dir) = rt.block_on(setup_test_service(100));

    c.bench_function("direct_reorder_100_siblings", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut total = Duration::ZERO;
                for i in 0..iters {
                    // Rotate the sibling list by one each iteration
                    let mut siblings = ids.clone();
                    siblings.rotate_left((i as usize) % ids.len());
                    let request =
                        ReorderRequest::new(&siblings[0], &space.root_group, 0, siblings.clone());

                    let start = Instant::now();
                    service.reorder_or_move("admin", request, None).await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        })
    });
}

criterion_group!(benches, bench_compute_ranges, bench_direct_reorder);
criterion_main!(benches);
