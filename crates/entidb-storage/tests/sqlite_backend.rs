use std::path::PathBuf;
use std::sync::Arc;

use entidb_core::{
    Attribute, BackendErrorCode, BackendFailure, CoreError, DataType, Direction, Entity,
    EntityType, Fetch, Query, Repository, RepositoryCollection, Value,
};
use entidb_storage::SqliteRepositoryCollection;
use uuid::Uuid;

fn temp_db_path() -> PathBuf {
    let filename = format!("entidb-storage-test-{}.db", Uuid::now_v7());
    std::env::temp_dir().join(filename)
}

async fn open(path: &PathBuf) -> SqliteRepositoryCollection {
    let database_url = format!("sqlite://{}", path.display());
    SqliteRepositoryCollection::connect("sqlite", &database_url, 2)
        .await
        .expect("failed to open sqlite backend")
}

fn country() -> Arc<EntityType> {
    Arc::new(
        EntityType::new("country")
            .with_backend("sqlite")
            .with_id_attribute(Attribute::new("code", DataType::String).required())
            .with_attribute(Attribute::new("name", DataType::String).required().unique()),
    )
}

fn city() -> Arc<EntityType> {
    Arc::new(
        EntityType::new("city")
            .with_backend("sqlite")
            .with_id_attribute(Attribute::new("id", DataType::Int).required())
            .with_attribute(Attribute::new("name", DataType::String).required())
            .with_attribute(Attribute::new("population", DataType::Long))
            .with_attribute(Attribute::new("capital", DataType::Bool))
            .with_attribute(Attribute::new("founded", DataType::Date))
            .with_attribute(Attribute::reference("country", DataType::Xref, "country"))
            .with_attribute(Attribute::reference("twins", DataType::Mref, "city")),
    )
}

fn reference(id: &str) -> Value {
    Value::Reference(Box::new(Value::from(id)))
}

async fn seed(repo: &Arc<dyn Repository>) {
    let mut rows = vec![
        Entity::new(city())
            .with("id", 1)
            .with("name", "Amsterdam")
            .with("population", 900_000)
            .with("capital", true)
            .with("founded", Value::parse("1275-10-27", DataType::Date).expect("date"))
            .with("country", reference("nl"))
            .with("twins", Value::References(vec![Value::Int(2)])),
        Entity::new(city())
            .with("id", 2)
            .with("name", "Groningen")
            .with("population", 230_000)
            .with("capital", false)
            .with("country", reference("nl")),
        Entity::new(city())
            .with("id", 3)
            .with("name", "Berlin")
            .with("population", 3_600_000)
            .with("country", reference("de")),
    ];
    assert_eq!(repo.add_all(&mut rows).await.expect("seed"), 3);
}

#[tokio::test]
async fn values_survive_the_round_trip() {
    let path = temp_db_path();
    let backend = open(&path).await;
    let repo = backend.create_repository(&city()).await.expect("create");
    seed(&repo).await;

    let amsterdam = repo
        .find_one_by_id(&Value::Int(1), Fetch::Shallow)
        .await
        .expect("find")
        .expect("present");
    assert_eq!(amsterdam.get_str("name"), Some("Amsterdam"));
    assert_eq!(amsterdam.get_bool("capital"), Some(true));
    assert_eq!(amsterdam.get("country"), &reference("nl"));
    assert_eq!(amsterdam.get("twins"), &Value::References(vec![Value::Int(2)]));
    assert_eq!(amsterdam.get("founded").to_string(), "1275-10-27");
    assert!(repo
        .find_one_by_id(&Value::Int(42), Fetch::Shallow)
        .await
        .expect("find")
        .is_none());
}

#[tokio::test]
async fn queries_are_translated_to_sql() {
    let path = temp_db_path();
    let backend = open(&path).await;
    let repo = backend.create_repository(&city()).await.expect("create");
    seed(&repo).await;

    let dutch = Query::new()
        .eq("country", "nl")
        .sort_by("population", Direction::Desc);
    let names: Vec<String> = repo
        .find_all(&dutch)
        .await
        .expect("query")
        .iter()
        .filter_map(|e| e.get_str("name").map(str::to_string))
        .collect();
    assert_eq!(names, vec!["Amsterdam".to_string(), "Groningen".to_string()]);

    assert_eq!(repo.count(&Query::new().eq("twins", 2)).await.expect("count"), 1);
    assert_eq!(repo.count(&Query::new().is_null("capital")).await.expect("count"), 1);
    assert_eq!(repo.count(&Query::new().like("name", "ER")).await.expect("count"), 2);
    assert_eq!(
        repo.count(&Query::new().range("population", Some(Value::Int(500_000)), None))
            .await
            .expect("count"),
        2
    );
    assert_eq!(repo.count(&Query::new().search("gron")).await.expect("count"), 1);

    let page = Query::new().sort_by("id", Direction::Asc).offset(1).page_size(1);
    let rows = repo.find_all(&page).await.expect("page");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64("id"), Some(2));
    assert_eq!(repo.count(&page).await.expect("count ignores paging"), 3);
}

#[tokio::test]
async fn constraint_failures_are_classified() {
    let path = temp_db_path();
    let backend = open(&path).await;
    let repo = backend.create_repository(&country()).await.expect("create");
    repo.add(&mut Entity::new(country()).with("code", "nl").with("name", "Netherlands"))
        .await
        .expect("add");

    let err = repo
        .add(&mut Entity::new(country()).with("code", "xx").with("name", "Netherlands"))
        .await
        .expect_err("unique name");
    assert!(matches!(
        err,
        CoreError::Backend(BackendFailure { code: BackendErrorCode::UniqueViolation, .. })
    ));

    let err = repo
        .add(&mut Entity::new(country()).with("code", "de"))
        .await
        .expect_err("missing name");
    assert!(matches!(
        err,
        CoreError::Backend(BackendFailure { code: BackendErrorCode::NotNullViolation, .. })
    ));

    let err = repo
        .update(&mut Entity::new(country()).with("code", "zz").with("name", "Nowhere"))
        .await
        .expect_err("unknown row");
    assert!(err.is_not_found());

    let err = repo
        .delete_all_by_id(&[Value::from("nl"), Value::from("zz")])
        .await
        .expect_err("unknown id");
    assert!(err.is_not_found());
    assert_eq!(repo.count_all().await.expect("count"), 1, "failed batch is rolled back");
}

#[tokio::test]
async fn schema_evolves_with_attributes() {
    let path = temp_db_path();
    let backend = open(&path).await;
    let repo = backend.create_repository(&country()).await.expect("create");
    repo.add(&mut Entity::new(country()).with("code", "nl").with("name", "Netherlands"))
        .await
        .expect("add");

    let iso = Attribute::new("iso3", DataType::String).unique().with_default_value("NLD");
    let evolved = Arc::new(EntityType::clone(&country()).with_attribute(iso.clone()));
    backend.add_attribute(&evolved, &iso).await.expect("add column");

    let repo = backend.get_repository(&evolved).expect("repository");
    let nl = repo
        .find_one_by_id(&Value::from("nl"), Fetch::Shallow)
        .await
        .expect("find")
        .expect("present");
    assert_eq!(nl.get_str("iso3"), Some("NLD"));

    let err = repo
        .add(&mut Entity::new(evolved.clone()).with("code", "be").with("name", "Belgium").with("iso3", "NLD"))
        .await
        .expect_err("unique index on added column");
    assert!(matches!(
        err,
        CoreError::Backend(BackendFailure { code: BackendErrorCode::UniqueViolation, .. })
    ));

    backend.delete_attribute(&evolved, &iso).await.expect("drop column");
    let repo = backend.get_repository(&country()).expect("repository");
    let nl = repo
        .find_one_by_id(&Value::from("nl"), Fetch::Shallow)
        .await
        .expect("find")
        .expect("present");
    assert!(!nl.contains("iso3"));
}

#[tokio::test]
async fn tables_are_rediscovered_on_open() {
    let path = temp_db_path();
    {
        let backend = open(&path).await;
        backend.create_repository(&country()).await.expect("create");
        let err = backend.create_repository(&country()).await.err().expect("conflict");
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    let backend = open(&path).await;
    assert!(backend.has_repository("country"));
    assert_eq!(backend.entity_type_names(), vec!["country".to_string()]);

    backend.delete_repository(&country()).await.expect("drop");
    assert!(!backend.has_repository("country"));
    let err = backend.get_repository(&country()).err().expect("gone");
    assert!(matches!(err, CoreError::UnknownEntityType { .. }));
}

fn measure(size: DataType) -> Arc<EntityType> {
    Arc::new(
        EntityType::new("measure")
            .with_backend("sqlite")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("size", size)),
    )
}

#[tokio::test]
async fn integer_columns_read_back_as_decimals_after_a_type_change() {
    let path = temp_db_path();
    let backend = open(&path).await;
    let repo = backend.create_repository(&measure(DataType::Int)).await.expect("create");
    repo.add(&mut Entity::new(measure(DataType::Int)).with("id", "m1").with("size", 3))
        .await
        .expect("add");

    let repo = backend.get_repository(&measure(DataType::Decimal)).expect("repository");
    repo.add(&mut Entity::new(measure(DataType::Decimal)).with("id", "m2").with("size", 2.5))
        .await
        .expect("add decimal");
    let rows = repo
        .find_all(&Query::new().sort_by("id", Direction::Asc))
        .await
        .expect("decimal read of an integer column");
    let sizes: Vec<&Value> = rows.iter().map(|row| row.get("size")).collect();
    assert_eq!(sizes, vec![&Value::Decimal(3.0), &Value::Decimal(2.5)]);
}

#[tokio::test]
async fn failed_index_creation_leaves_no_table_behind() {
    let path = temp_db_path();
    let backend = open(&path).await;
    sqlx::query("CREATE TABLE \"squatter\" (\"x\" TEXT)")
        .execute(backend.pool())
        .await
        .expect("squatter table");
    sqlx::query("CREATE INDEX \"country.name.uniq\" ON \"squatter\" (\"x\")")
        .execute(backend.pool())
        .await
        .expect("clashing index");

    backend
        .create_repository(&country())
        .await
        .err()
        .expect("index name taken");
    assert!(!backend.has_repository("country"));
    let leftover: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'country'")
            .fetch_optional(backend.pool())
            .await
            .expect("catalog query");
    assert!(leftover.is_none());
}
