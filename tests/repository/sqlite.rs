//! Integration tests for `SqliteAggregationRepository` against a file on disk.

use std::sync::Arc;

use exchange_snapshot::{
    AggregationRepository, CodecError, CodecOptions, Exchange, RepositoryError, RuntimeContext,
    SerdeType, SqliteAggregationRepository, TypeRegistry, Value, AGGREGATED_CORRELATION_KEY,
    AGGREGATED_SIZE,
};
use tempfile::tempdir;

fn options() -> CodecOptions {
    CodecOptions {
        allow_complex_headers: true,
        repository_name: "orders".to_string(),
        ..CodecOptions::default()
    }
}

#[test]
fn aggregate_survives_reopen_in_new_context() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aggregation.db");

    let exchange_id = {
        let ctx = Arc::new(RuntimeContext::new("before-crash"));
        let repo = SqliteAggregationRepository::open(&path, ctx.clone(), &options()).unwrap();
        let mut exchange = Exchange::new();
        exchange.set_body("partial");
        exchange.set_property(AGGREGATED_SIZE, 2);
        exchange.from_endpoint = Some(ctx.add_endpoint("direct:orders"));
        repo.add("order-9", &exchange).unwrap();
        exchange.id
    };

    let ctx = Arc::new(RuntimeContext::new("after-restart"));
    ctx.add_endpoint("direct:orders");
    let repo = SqliteAggregationRepository::open(&path, ctx, &options()).unwrap();

    assert_eq!(repo.keys().unwrap(), vec!["order-9"]);
    let restored = repo.get("order-9").unwrap().unwrap();
    assert_eq!(restored.id, exchange_id);
    assert_eq!(restored.body(), Some(&Value::from("partial")));
    assert_eq!(restored.property(AGGREGATED_SIZE), Some(&Value::Int(2)));
    assert_eq!(
        restored.property(AGGREGATED_CORRELATION_KEY),
        Some(&Value::from("order-9"))
    );
    assert_eq!(
        restored.from_endpoint.as_ref().map(|e| e.uri()),
        Some("direct:orders")
    );
}

#[test]
fn completed_aggregate_can_be_recovered_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aggregation.db");
    let ctx = Arc::new(RuntimeContext::new("test"));

    let exchange = Exchange::new();
    {
        let repo = SqliteAggregationRepository::open(&path, ctx.clone(), &options()).unwrap();
        repo.add("k", &exchange).unwrap();
        repo.remove("k", &exchange).unwrap();
    }

    let repo = SqliteAggregationRepository::open(&path, ctx, &options()).unwrap();
    assert_eq!(repo.scan().unwrap(), vec![exchange.id.clone()]);
    assert!(repo.recover(&exchange.id).unwrap().is_some());
    assert!(repo.confirm(&exchange.id).unwrap());
    assert!(repo.scan().unwrap().is_empty());
}

#[test]
fn row_written_with_missing_extension_reports_unresolved_type() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aggregation.db");
    let money = SerdeType::<i64>::new("billing.cents");

    {
        let types = Arc::new(TypeRegistry::new());
        types
            .register(Arc::new(SerdeType::<i64>::new("billing.cents")))
            .unwrap();
        let ctx = Arc::new(RuntimeContext::with_types("with-billing", types));
        let repo = SqliteAggregationRepository::open(&path, ctx, &options()).unwrap();
        let mut exchange = Exchange::new();
        exchange.set_header("total", money.value(1250));
        repo.add("k", &exchange).unwrap();
    }

    let ctx = Arc::new(RuntimeContext::new("without-billing"));
    let repo = SqliteAggregationRepository::open(&path, ctx, &options()).unwrap();
    match repo.get("k") {
        Err(RepositoryError::Codec(CodecError::UnresolvedType { type_name, path })) => {
            assert_eq!(type_name, "billing.cents");
            assert_eq!(path, "headers.total");
        }
        other => panic!("expected unresolved type, got {other:?}"),
    }

    repo.context().types().register(Arc::new(money)).unwrap();
    assert!(repo.get("k").unwrap().is_some());
}

#[test]
fn separate_repositories_share_a_database_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aggregation.db");
    let ctx = Arc::new(RuntimeContext::new("test"));

    let orders = SqliteAggregationRepository::open(&path, ctx.clone(), &options()).unwrap();
    let invoices = SqliteAggregationRepository::open(
        &path,
        ctx,
        &CodecOptions {
            repository_name: "invoices".to_string(),
            ..CodecOptions::default()
        },
    )
    .unwrap();

    orders.add("k", &Exchange::new()).unwrap();
    assert_eq!(orders.keys().unwrap(), vec!["k"]);
    assert!(invoices.keys().unwrap().is_empty());
}
