//! End-to-end tests over a configured `DataService`.

use std::path::PathBuf;

use entidb_core::{
    run_as, Attribute, CoreError, CoreResult, DataType, EntidbConfig, Entity, EntityType, Fetch,
    Permission, Principal, Query, SearchIndex, Value,
};
use entidb_service::{DataService, SQLITE_BACKEND};
use uuid::Uuid;

fn memory_config() -> EntidbConfig {
    EntidbConfig::default()
}

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("entidb-service-test-{}.db", Uuid::now_v7()))
}

fn sqlite_config(path: &PathBuf) -> EntidbConfig {
    let mut config = EntidbConfig::default();
    config.storage.default_backend = SQLITE_BACKEND.to_string();
    config.storage.sqlite.enabled = true;
    config.storage.sqlite.url = format!("sqlite://{}", path.display());
    config.storage.sqlite.max_connections = 2;
    config
}

async fn as_admin<T>(work: impl std::future::Future<Output = CoreResult<T>>) -> CoreResult<T> {
    run_as(Principal::superuser("admin"), work).await
}

fn book(backend: &str) -> EntityType {
    EntityType::new("book")
        .with_backend(backend)
        .with_id_attribute(Attribute::new("isbn", DataType::String).required())
        .with_attribute(Attribute::new("title", DataType::String).required())
        .with_attribute(Attribute::new("pages", DataType::Int))
        .with_label_attribute("title")
}

async fn add_book(service: &DataService, isbn: &str, title: &str) -> CoreResult<()> {
    let repository = service.repository("book")?;
    let mut row = Entity::new(repository.entity_type().clone())
        .with("isbn", isbn)
        .with("title", title);
    repository.add(&mut row).await
}

#[tokio::test]
async fn memory_service_runs_the_demo_lifecycle() {
    let service = DataService::open(memory_config()).await.expect("open");
    as_admin(async {
        service.metadata().add_entity_type(book("memory")).await?;
        add_book(&service, "978-0", "Dune").await?;
        let repository = service.repository("book")?;
        assert_eq!(repository.count_all().await?, 1);
        let found = repository
            .find_one(&Query::new().eq("title", "Dune"))
            .await?
            .expect("found");
        assert_eq!(found.id_key()?, "978-0");

        service.metadata().delete_entity_type("book").await?;
        assert!(!service.metadata().has_repository("book"));
        Ok(())
    })
    .await
    .expect("lifecycle");
}

#[tokio::test]
async fn change_log_follows_commit_and_rollback() {
    let service = DataService::open(memory_config()).await.expect("open");
    as_admin(service.metadata().add_entity_type(book("memory")))
        .await
        .expect("type");

    as_admin(service.transaction(add_book(&service, "1", "Kept")))
        .await
        .expect("commit");
    assert_eq!(service.change_log().entries_for("book").len(), 1);

    let aborted: CoreResult<()> = as_admin(service.transaction(async {
        add_book(&service, "2", "Discarded").await?;
        Err(CoreError::internal("abort"))
    }))
    .await;
    assert!(aborted.is_err());
    assert_eq!(service.change_log().entries_for("book").len(), 1);
}

#[tokio::test]
async fn search_queries_go_through_the_index() {
    let mut config = memory_config();
    config.search.enabled = true;
    let service = DataService::open(config).await.expect("open");
    let index = service.search_index().expect("index").clone();

    as_admin(async {
        service.metadata().add_entity_type(book("memory")).await?;
        add_book(&service, "1", "The Left Hand of Darkness").await?;
        add_book(&service, "2", "A Wizard of Earthsea").await?;
        assert_eq!(index.document_count("book"), 2);

        let hits = service
            .repository("book")?
            .find_all(&Query::new().search("earthsea"))
            .await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id_key()?, "2");
        Ok(())
    })
    .await
    .expect("search");
}

#[tokio::test]
async fn reconcile_restores_lost_search_mappings() {
    let mut config = memory_config();
    config.search.enabled = true;
    let service = DataService::open(config).await.expect("open");
    let index = service.search_index().expect("index").clone();
    as_admin(async {
        service.metadata().add_entity_type(book("memory")).await?;
        add_book(&service, "1", "Solaris").await
    })
    .await
    .expect("setup");

    let book = service.metadata().get_entity_type("book").expect("book");
    index.delete_mapping(&book).await.expect("drop mapping");
    assert!(!index.has_mapping(&book).await.expect("mapping"));

    let report = as_admin(service.metadata().reconcile())
        .await
        .expect("reconcile");
    assert!(!report.repaired.is_empty());
    assert!(report.orphaned_storage.is_empty());
    assert!(index.has_mapping(&book).await.expect("mapping"));
    assert_eq!(index.document_count("book"), 1);
}

#[tokio::test]
async fn sqlite_catalog_survives_a_restart() {
    let path = temp_db_path();
    {
        let service = DataService::open(sqlite_config(&path)).await.expect("open");
        as_admin(async {
            service.metadata().add_entity_type(book(SQLITE_BACKEND)).await?;
            add_book(&service, "978-1", "Neuromancer").await?;
            service
                .metadata()
                .add_attribute("book", Attribute::new("author", DataType::String))
                .await?;
            let repository = service.repository("book")?;
            let mut row = Entity::new(repository.entity_type().clone())
                .with("isbn", "978-2")
                .with("title", "Hyperion")
                .with("author", "Simmons");
            repository.add(&mut row).await
        })
        .await
        .expect("first run");
    }

    let service = DataService::open(sqlite_config(&path)).await.expect("reopen");
    let book = service.metadata().get_entity_type("book").expect("reloaded");
    assert!(book.attribute("author").is_some());
    assert_eq!(book.backend, SQLITE_BACKEND);
    as_admin(async {
        let repository = service.repository("book")?;
        assert_eq!(repository.count_all().await?, 2);
        let hyperion = repository
            .find_one_by_id(&"978-2".into(), Fetch::Shallow)
            .await?
            .expect("row");
        assert_eq!(hyperion.get_str("author"), Some("Simmons"));
        Ok(())
    })
    .await
    .expect("second run");

    drop(service);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn widening_an_int_attribute_keeps_sqlite_rows_readable() {
    let path = temp_db_path();
    let service = DataService::open(sqlite_config(&path)).await.expect("open");
    as_admin(async {
        service.metadata().add_entity_type(book(SQLITE_BACKEND)).await?;
        let repository = service.repository("book")?;
        let mut row = Entity::new(repository.entity_type().clone())
            .with("isbn", "978-3")
            .with("title", "Roadside Picnic")
            .with("pages", 145);
        repository.add(&mut row).await?;

        let widened = EntityType::new("book")
            .with_backend(SQLITE_BACKEND)
            .with_id_attribute(Attribute::new("isbn", DataType::String).required())
            .with_attribute(Attribute::new("title", DataType::String).required())
            .with_attribute(Attribute::new("pages", DataType::Decimal))
            .with_label_attribute("title");
        service.metadata().update_entity_type(widened).await?;

        let rows = service.repository("book")?.find_all(&Query::new()).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("pages"), &Value::Decimal(145.0));
        Ok(())
    })
    .await
    .expect("widened read");

    drop(service);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn types_can_live_in_a_secondary_backend() {
    let path = temp_db_path();
    let mut config = sqlite_config(&path);
    config.storage.default_backend = "memory".to_string();
    let service = DataService::open(config).await.expect("open");
    as_admin(async {
        service.metadata().add_entity_type(book(SQLITE_BACKEND)).await?;
        add_book(&service, "1", "Ubik").await?;
        assert!(service.registry().collection(SQLITE_BACKEND)?.has_repository("book"));
        assert!(!service.registry().collection("memory")?.has_repository("book"));
        Ok(())
    })
    .await
    .expect("sqlite type");

    drop(service);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn misconfigured_backends_are_rejected() {
    let mut config = memory_config();
    config.storage.default_backend = "nowhere".to_string();
    let err = DataService::open(config).await.err().expect("unknown backend");
    assert!(matches!(err, CoreError::InvalidState { .. }));

    let mut config = memory_config();
    config.storage.default_backend = SQLITE_BACKEND.to_string();
    let err = DataService::open(config).await.err().expect("sqlite disabled");
    assert!(matches!(err, CoreError::ValidationError(_)));
}

#[tokio::test]
async fn schema_metrics_are_exported() {
    let service = DataService::open(memory_config()).await.expect("open");
    let text = service.metrics_text().expect("metrics");
    assert!(text.contains("entidb_schema_mutations_total"));
    assert!(text.contains("entidb_schema_mutation_duration_seconds"));
}

#[tokio::test]
async fn users_need_grants_for_schema_and_rows() {
    let service = DataService::open(memory_config()).await.expect("open");
    let alice = Principal::user("alice");
    let denied = run_as(alice.clone(), service.metadata().add_entity_type(book("memory"))).await;
    assert!(matches!(denied, Err(CoreError::PermissionDenied { .. })));

    service
        .permissions()
        .grant("alice", "book", Permission::WriteMeta);
    run_as(alice.clone(), async {
        service.metadata().add_entity_type(book("memory")).await?;
        add_book(&service, "1", "Kindred").await
    })
    .await
    .expect("writemeta implies write");

    let bob = run_as(Principal::user("bob"), add_book(&service, "2", "Beloved")).await;
    assert!(matches!(bob, Err(CoreError::PermissionDenied { .. })));
}
