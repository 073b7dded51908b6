//! SQLite document store.
//!
//! Every collection is a table `(id INTEGER PRIMARY KEY, doc TEXT)` holding one
//! JSON object per row. Filters compile to `json_extract` comparisons, updates
//! to `json_set`/`json_remove`, and indexes to expression indexes over the same
//! `json_extract` terms so lookups can use them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    pool::PoolConnection,
    query::Query,
    sqlite::{
        SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
        SqlitePoolOptions,
    },
    Executor, Row, Sqlite,
};
use tracing::{debug, warn};

use super::{
    validate_collection_name, Collection, Condition, Document, DocumentClient, DocumentDatabase,
    Filter, Projection, Update, UpdateResult, ID_FIELD,
};
use crate::error::{DocumentStoreError, StoreResult};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// How long a writer waits for the database lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite connection pool acting as a document database client.
#[derive(Debug, Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
}

impl SqliteClient {
    /// Open (or create) a database file.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create an in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        // A single connection that is never recycled: the data lives and
        // dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DocumentClient for SqliteClient {
    fn database(&self) -> Arc<dyn DocumentDatabase> {
        Arc::new(SqliteDatabase {
            pool: self.pool.clone(),
        })
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SqliteDatabase {
    pool: SqlitePool,
}

#[async_trait]
impl DocumentDatabase for SqliteDatabase {
    fn collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        if self.pool.is_closed() {
            return Err(DocumentStoreError::Closed);
        }
        validate_collection_name(name)?;
        if name.starts_with("sqlite_") {
            return Err(DocumentStoreError::InvalidCollectionName(name.to_string()));
        }
        Ok(Arc::new(SqliteCollection {
            name: name.to_string(),
            table: quote_ident(name),
            pool: self.pool.clone(),
        }))
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        let mut conn = begin_immediate(&self.pool).await?;
        let result = sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(Into::into);
        finish(conn, result).await
    }
}

#[derive(Debug)]
struct SqliteCollection {
    name: String,
    table: String,
    pool: SqlitePool,
}

impl SqliteCollection {
    async fn exists<'e, E>(&self, executor: E) -> StoreResult<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?
            "#,
        )
        .bind(self.name.as_str())
        .fetch_optional(executor)
        .await?;
        Ok(row.is_some())
    }

    async fn update_locked(
        &self,
        conn: &mut SqliteConnection,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        if upsert {
            sqlx::query(&self.create_table_sql())
                .execute(&mut *conn)
                .await?;
        } else if !self.exists(&mut *conn).await? {
            return Ok(UpdateResult::default());
        }

        let (predicate, where_params) = compile_filter(filter)?;
        let (expr, mut params) = compile_update(update)?;
        params.extend(where_params);

        // The UPDATE runs even for an empty modification so a match is
        // counted before the upsert decision.
        let sql = format!("UPDATE {} SET doc = {} WHERE {}", self.table, expr, predicate);
        let matched = bind_all(sqlx::query(&sql), &params)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        let upserted = matched == 0 && upsert;
        if upserted {
            let mut doc = filter.upsert_seed();
            update.apply(&mut doc);
            let sql = format!("INSERT INTO {} (doc) VALUES (?)", self.table);
            sqlx::query(&sql)
                .bind(serde_json::to_string(&doc)?)
                .execute(&mut *conn)
                .await?;
        }

        Ok(UpdateResult { matched, upserted })
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL)",
            self.table
        )
    }

    async fn select(
        &self,
        filter: &Filter,
        projection: &Projection,
        limit: Option<u32>,
    ) -> StoreResult<Vec<Document>> {
        if !self.exists(&self.pool).await? {
            return Ok(Vec::new());
        }

        let (predicate, params) = compile_filter(filter)?;
        let mut sql = format!(
            "SELECT id, doc FROM {} WHERE {} ORDER BY id",
            self.table, predicate
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<Document> {
                let id: i64 = row.try_get("id")?;
                let text: String = row.try_get("doc")?;
                let mut doc: Document = serde_json::from_str(&text)?;
                doc.insert(ID_FIELD.to_string(), id.into());
                Ok(projection.apply(doc))
            })
            .collect()
    }
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .select(filter, projection, Some(1))
            .await?
            .into_iter()
            .next())
    }

    async fn find(&self, filter: &Filter, projection: &Projection) -> StoreResult<Vec<Document>> {
        self.select(filter, projection, None).await
    }

    async fn update_many(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        let mut conn = begin_immediate(&self.pool).await?;
        let result = self.update_locked(&mut *conn, filter, update, upsert).await;
        let result = finish(conn, result).await?;
        debug!(
            collection = %self.name,
            matched = result.matched,
            upserted = result.upserted,
            "documents updated"
        );
        Ok(result)
    }

    async fn delete_many(&self, filter: &Filter) -> StoreResult<u64> {
        let (predicate, params) = compile_filter(filter)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table, predicate);

        let mut conn = begin_immediate(&self.pool).await?;
        let result: StoreResult<u64> = async {
            if !self.exists(&mut *conn).await? {
                return Ok(0);
            }
            let done = bind_all(sqlx::query(&sql), &params)
                .execute(&mut *conn)
                .await?;
            Ok(done.rows_affected())
        }
        .await;
        finish(conn, result).await
    }

    async fn create_index(&self, fields: &[String]) -> StoreResult<()> {
        let terms = fields
            .iter()
            .map(|field| field_expr(field))
            .collect::<StoreResult<Vec<_>>>()?;
        let index = quote_ident(&format!("{}__{}", self.name, fields.join("_")));
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            index,
            self.table,
            terms.join(", ")
        );

        let mut conn = begin_immediate(&self.pool).await?;
        let result: StoreResult<()> = async {
            sqlx::query(&self.create_table_sql())
                .execute(&mut *conn)
                .await?;
            sqlx::query(&sql).execute(&mut *conn).await?;
            Ok(())
        }
        .await;
        finish(conn, result).await
    }
}

/// Check a connection out of the pool holding the database write lock.
///
/// A deferred transaction that reads before it writes cannot be upgraded
/// once another connection has committed, so every write path takes the
/// lock up front and waits on the busy timeout instead.
async fn begin_immediate(pool: &SqlitePool) -> StoreResult<PoolConnection<Sqlite>> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(conn)
}

/// Commit on success, roll back on failure.
async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: StoreResult<T>) -> StoreResult<T> {
    let outcome = match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => return Ok(value),
            Err(e) => e.into(),
        },
        Err(e) => e,
    };

    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        warn!(error = %e, "rollback failed");
    }
    Err(outcome)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// JSON path selecting a top-level field, e.g. `$."read"`.
fn field_path(field: &str) -> StoreResult<String> {
    if field.contains('"') {
        return Err(DocumentStoreError::InvalidField(field.to_string()));
    }
    Ok(format!("$.\"{field}\""))
}

/// Literal `json_extract` term for a field, shared by queries and indexes.
fn field_expr(field: &str) -> StoreResult<String> {
    let path = field_path(field)?;
    Ok(format!("json_extract(doc, '{}')", path.replace('\'', "''")))
}

fn compile_filter(filter: &Filter) -> StoreResult<(String, Vec<Value>)> {
    if filter.clauses().is_empty() {
        return Ok(("1".to_string(), Vec::new()));
    }

    let mut terms = Vec::with_capacity(filter.clauses().len());
    let mut params = Vec::new();
    for (field, condition) in filter.clauses() {
        let expr = field_expr(field)?;
        match condition {
            Condition::Eq(value) => {
                terms.push(format!("{expr} = ?"));
                params.push(value.clone());
            }
            Condition::In(values) if values.is_empty() => terms.push("0".to_string()),
            Condition::In(values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                terms.push(format!("{expr} IN ({placeholders})"));
                params.extend(values.iter().cloned());
            }
        }
    }
    Ok((terms.join(" AND "), params))
}

fn compile_update(update: &Update) -> StoreResult<(String, Vec<Value>)> {
    let mut expr = "doc".to_string();
    let mut params = Vec::new();

    if !update.set_fields().is_empty() {
        let mut args = String::new();
        for (field, value) in update.set_fields() {
            args.push_str(", ?, json(?)");
            params.push(Value::String(field_path(field)?));
            params.push(Value::String(value.to_string()));
        }
        expr = format!("json_set({expr}{args})");
    }

    if !update.unset_fields().is_empty() {
        let mut args = String::new();
        for field in update.unset_fields() {
            args.push_str(", ?");
            params.push(Value::String(field_path(field)?));
        }
        expr = format!("json_remove({expr}{args})");
    }

    Ok((expr, params))
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[Value]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use serde_json::json;

    async fn database() -> Arc<dyn DocumentDatabase> {
        SqliteClient::in_memory().await.unwrap().database()
    }

    #[test]
    fn test_compile_filter() {
        let filter = Filter::new()
            .equals("_bucketname", "roles")
            .any_of("key", vec![json!("a"), json!(2)]);
        let (sql, params) = compile_filter(&filter).unwrap();
        assert_eq!(
            sql,
            "json_extract(doc, '$.\"_bucketname\"') = ? AND json_extract(doc, '$.\"key\"') IN (?, ?)"
        );
        assert_eq!(params, vec![json!("roles"), json!("a"), json!(2)]);
    }

    #[test]
    fn test_field_with_quote_is_rejected() {
        assert!(matches!(
            field_path("a\"b"),
            Err(DocumentStoreError::InvalidField(_))
        ));
    }

    #[test]
    fn test_field_expr_escapes_single_quotes() {
        assert_eq!(
            field_expr("it's").unwrap(),
            "json_extract(doc, '$.\"it''s\"')"
        );
    }

    #[tokio::test]
    async fn test_upsert_then_merge() {
        let db = database().await;
        let coll = db.collection("acl_roles").unwrap();
        let filter = Filter::new().equals("key", "admin");

        let first = coll
            .update_many(&filter, &Update::new().set("read", true), true)
            .await
            .unwrap();
        assert!(first.upserted);

        let second = coll
            .update_many(&filter, &Update::new().set("write", true), true)
            .await
            .unwrap();
        assert_eq!(second.matched, 1);
        assert!(!second.upserted);

        let doc = coll
            .find_one(&filter, &Projection::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("key"), Some(&json!("admin")));
        assert_eq!(doc.get("read"), Some(&json!(true)));
        assert_eq!(doc.get("write"), Some(&json!(true)));
        assert!(doc.contains_key(ID_FIELD));
    }

    #[tokio::test]
    async fn test_unset_fields() {
        let db = database().await;
        let coll = db.collection("acl_roles").unwrap();
        let filter = Filter::new().equals("key", "admin");
        coll.update_many(
            &filter,
            &Update::new().set("read", true).set("write", true),
            true,
        )
        .await
        .unwrap();

        coll.update_many(&filter, &Update::new().unset("read"), false)
            .await
            .unwrap();

        let doc = coll
            .find_one(&filter, &Projection::all())
            .await
            .unwrap()
            .unwrap();
        assert!(!doc.contains_key("read"));
        assert!(doc.contains_key("write"));
    }

    #[tokio::test]
    async fn test_reads_on_missing_table_are_empty() {
        let db = database().await;
        let coll = db.collection("acl_nothing").unwrap();

        assert!(coll
            .find_one(&Filter::new(), &Projection::all())
            .await
            .unwrap()
            .is_none());
        assert_eq!(coll.delete_many(&Filter::new()).await.unwrap(), 0);
        let result = coll
            .update_many(&Filter::new().equals("key", "a"), &Update::new().unset("x"), false)
            .await
            .unwrap();
        assert_eq!(result, UpdateResult::default());
        assert!(db.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_numeric_keys_and_in_filter() {
        let db = database().await;
        let coll = db.collection("acl_users").unwrap();
        for key in [json!(1), json!(2), json!("3")] {
            coll.update_many(
                &Filter::new().equals("key", key),
                &Update::new().set("member", true),
                true,
            )
            .await
            .unwrap();
        }

        let found = coll
            .find(
                &Filter::new().any_of("key", vec![json!(1), json!("3")]),
                &Projection::all(),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let removed = coll
            .delete_many(&Filter::new().any_of("key", vec![json!(2)]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_index_and_drop() {
        let db = database().await;
        let coll = db.collection("acl_resources").unwrap();
        let fields = vec!["_bucketname".to_string(), "key".to_string()];
        coll.create_index(&fields).await.unwrap();
        coll.create_index(&fields).await.unwrap();
        assert_eq!(db.list_collections().await.unwrap(), vec!["acl_resources"]);

        db.drop_collection("acl_resources").await.unwrap();
        assert!(db.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("acl").join("acl.db");

        {
            let client = SqliteClient::new(&path).await.unwrap();
            let coll = client.database().collection("acl_roles").unwrap();
            coll.update_many(
                &Filter::new().equals("key", "admin"),
                &Update::new().set("read", true),
                true,
            )
            .await
            .unwrap();
            client.close().await.unwrap();
        }

        let client = SqliteClient::new(&path).await.unwrap();
        let coll = client.database().collection("acl_roles").unwrap();
        let doc = coll
            .find_one(&Filter::new().equals("key", "admin"), &Projection::all())
            .await
            .unwrap();
        assert!(doc.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_file_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let client = SqliteClient::new(&temp_dir.path().join("acl.db"))
            .await
            .unwrap();
        let db = client.database();
        let coll = db.collection("acl_roles").unwrap();
        let fields = vec!["key".to_string()];

        let writes = (0..20).map(|i| {
            let coll = coll.clone();
            let fields = fields.clone();
            async move {
                coll.update_many(
                    &Filter::new().equals("key", format!("k{}", i % 5)),
                    &Update::new().set(format!("v{i}"), true),
                    true,
                )
                .await?;
                coll.create_index(&fields).await?;
                Ok::<_, DocumentStoreError>(())
            }
        });
        for result in join_all(writes).await {
            result.unwrap();
        }

        let docs = coll.find(&Filter::new(), &Projection::all()).await.unwrap();
        assert_eq!(docs.len(), 5);
        let values: usize = docs.iter().map(|doc| doc.len() - 2).sum();
        assert_eq!(values, 20);

        let deletes = (0..5).map(|i| {
            let coll = coll.clone();
            async move {
                coll.delete_many(&Filter::new().equals("key", format!("k{i}")))
                    .await
            }
        });
        let removed: u64 = join_all(deletes)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .sum();
        assert_eq!(removed, 5);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_and_releases_lock() {
        let client = SqliteClient::in_memory().await.unwrap();
        let db = client.database();
        let coll = db.collection("acl_roles").unwrap();

        let result = coll
            .update_many(
                &Filter::new().equals("key", "a"),
                &Update::new().set("bad\"field", true),
                true,
            )
            .await;
        assert!(matches!(result, Err(DocumentStoreError::InvalidField(_))));
        assert!(db.list_collections().await.unwrap().is_empty());

        // The single pooled connection is usable again.
        coll.update_many(
            &Filter::new().equals("key", "a"),
            &Update::new().set("ok", true),
            true,
        )
        .await
        .unwrap();
        assert_eq!(db.list_collections().await.unwrap(), vec!["acl_roles"]);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_handles() {
        let client = SqliteClient::in_memory().await.unwrap();
        let db = client.database();
        client.close().await.unwrap();
        assert!(matches!(
            db.collection("acl_roles"),
            Err(DocumentStoreError::Closed)
        ));
    }
}
