use std::collections::{HashMap, HashSet};

use common::SessionId;
use criterion::{Criterion, criterion_group, criterion_main};
use fulfillment::codes::generate_license_code;
use fulfillment::issuer::plan_missing_units;
use fulfillment::{
    CheckoutCompleted, FulfillmentOrchestrator, InMemoryEmailSender, InMemoryLineItemProvider,
    LicenseIssuer, ProviderLineItem, ResolvedLineItem,
};
use store::{InMemoryStore, ProductRecord};

fn items(count: usize, quantity: u32) -> Vec<ResolvedLineItem> {
    (0..count)
        .map(|i| ResolvedLineItem {
            product_ref: "robot-kit".to_string(),
            quantity,
            line_item_id: format!("li_{i}"),
        })
        .collect()
}

fn bench_generate_code(c: &mut Criterion) {
    c.bench_function("codes/generate_license_code", |b| {
        b.iter(generate_license_code);
    });
}

fn bench_plan_missing_units(c: &mut Criterion) {
    let session = SessionId::new("sess_bench");
    let items = items(20, 5);
    let existing: HashSet<String> = (1..=50)
        .map(|u| format!("sess_bench:li_0:{u}"))
        .collect();

    c.bench_function("issuer/plan_missing_units_100", |b| {
        b.iter(|| plan_missing_units(&session, &items, &existing));
    });
}

fn bench_issue_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let product = ProductRecord::new("robot-kit", "Robot Kit");
    let products = HashMap::from([(product.slug.clone(), product)]);
    let items = items(2, 5);

    c.bench_function("issuer/issue_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let issuer = LicenseIssuer::new(store);
                issuer
                    .issue(
                        &SessionId::new("sess_bench"),
                        "buyer@example.com",
                        &items,
                        &products,
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_replay_completed_session(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let line_items = InMemoryLineItemProvider::new();
    line_items.set_line_items(
        "sess_bench",
        vec![ProviderLineItem::for_product("li_1", "robot-kit", 3)],
    );
    let orchestrator =
        FulfillmentOrchestrator::new(store.clone(), line_items, InMemoryEmailSender::new());
    let checkout = CheckoutCompleted {
        session_id: SessionId::new("sess_bench"),
        event_id: "evt_bench".to_string(),
        customer_email: Some("buyer@example.com".to_string()),
        amount_total: Some(1000),
        currency: Some("usd".to_string()),
    };
    rt.block_on(async {
        store
            .add_product(ProductRecord::new("robot-kit", "Robot Kit"))
            .await;
        orchestrator.fulfill(&checkout).await.unwrap();
    });

    c.bench_function("orchestrator/replay_completed_session", |b| {
        b.iter(|| {
            rt.block_on(async {
                orchestrator.fulfill(&checkout).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_generate_code,
    bench_plan_missing_units,
    bench_issue_batch_10,
    bench_replay_completed_session,
);
criterion_main!(benches);
