//! Natural-language questions answered from a SQLite database.
//!
//! The model writes one read-only query from the table schemas, the query is
//! executed locally, and the model then phrases the rows as an answer.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::genai::GeminiClient;
use crate::genai::types::GenerateRequest;
use crate::retrieval::{ContextProvider, RetrievalError};

pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
pub const EMPLOYEE_TABLE: &str = "employee_info";

const EMPLOYEES: [(&str, &str, i64); 5] = [
    ("Alice Johnson", "Marketing", 65_000),
    ("Bob Smith", "Sales", 92_000),
    ("Charlie Brown", "Marketing", 70_000),
    ("David Lee", "Sales", 88_000),
    ("Emily Davis", "Finance", 105_000),
];

/// Column names plus rows rendered as JSON values.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let record: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(record)
            })
            .collect()
    }
}

/// Connection pool over one SQLite database.
#[derive(Debug, Clone)]
pub struct SqlDatabase {
    pool: SqlitePool,
}

impl SqlDatabase {
    /// Opens `url`; in-memory databases are pinned to a single long-lived connection.
    pub async fn connect(url: &str) -> Result<Self, RetrievalError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = is_in_memory(url);
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;
        debug!(url, in_memory, "sqlite pool opened");
        Ok(Self { pool })
    }

    /// Creates and fills the demo `employee_info` table.
    pub async fn seed_employee_info(&self) -> Result<(), RetrievalError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS employee_info (
                employee_id INTEGER PRIMARY KEY,
                name VARCHAR(50),
                department VARCHAR(50),
                salary INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM employee_info")
            .execute(&mut *tx)
            .await?;
        for (name, department, salary) in EMPLOYEES {
            sqlx::query("INSERT INTO employee_info (name, department, salary) VALUES (?, ?, ?)")
                .bind(name)
                .bind(department)
                .bind(salary)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(rows = EMPLOYEES.len(), "seeded employee_info");
        Ok(())
    }

    /// Schema description of `tables` in the form shown to the model.
    pub async fn describe_tables(&self, tables: &[String]) -> Result<String, RetrievalError> {
        let mut lines = Vec::with_capacity(tables.len());
        for table in tables {
            let columns: Vec<(String, String)> =
                sqlx::query_as("SELECT name, type FROM pragma_table_info(?)")
                    .bind(table)
                    .fetch_all(&self.pool)
                    .await?;
            if columns.is_empty() {
                return Err(RetrievalError::UnknownTable(table.clone()));
            }
            let rendered = columns
                .iter()
                .map(|(name, kind)| format!("{name} ({kind})"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Table '{table}' has columns: {rendered}."));
        }
        Ok(lines.join("\n"))
    }

    /// Runs one read-only statement on a connection held in `query_only` mode.
    pub async fn run_query(&self, sql: &str) -> Result<QueryRows, RetrievalError> {
        let statement = ensure_read_only(sql)?;
        let mut conn = self.pool.acquire().await?;
        sqlx::query("PRAGMA query_only = ON")
            .execute(&mut *conn)
            .await?;
        let fetched = sqlx::query(statement).fetch_all(&mut *conn).await;
        sqlx::query("PRAGMA query_only = OFF")
            .execute(&mut *conn)
            .await?;
        let rows = fetched?;
        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryRows { columns, rows })
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    let mut values = Vec::with_capacity(row.len());
    for index in 0..row.len() {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let kind = raw.type_info().name().to_ascii_uppercase();
        let value = match kind.as_str() {
            "INTEGER" | "INT" | "BIGINT" => Value::from(row.try_get::<i64, _>(index)?),
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::from(row.try_get::<f64, _>(index)?),
            "BLOB" => Value::String("<blob>".to_string()),
            _ => Value::String(row.try_get::<String, _>(index)?),
        };
        values.push(value);
    }
    Ok(values)
}

/// True for URLs that open a SQLite database living only in memory.
pub fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Accepts a single `SELECT`/`WITH` statement and returns it without a trailing `;`.
///
/// Writes hidden behind a `WITH` clause pass this check; `run_query` relies on
/// `PRAGMA query_only` to refuse them.
pub fn ensure_read_only(sql: &str) -> Result<&str, RetrievalError> {
    let trimmed = sql.trim();
    let statement = match statement_end(trimmed) {
        Some(end) if only_trivia(&trimmed[end + 1..]) => trimmed[..end].trim(),
        Some(_) => return Err(RetrievalError::UnsafeSql(trimmed.to_string())),
        None => trimmed,
    };
    if statement.is_empty() {
        return Err(RetrievalError::EmptySql);
    }
    let first_word = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !matches!(first_word.as_str(), "SELECT" | "WITH") {
        return Err(RetrievalError::UnsafeSql(statement.to_string()));
    }
    Ok(statement)
}

/// Byte offset of the first `;` outside string literals, quoted identifiers and comments.
fn statement_end(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    while i < len {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < len {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'[' => {
                while i < len && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b';' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Whether `rest` holds nothing but whitespace, comments and stray `;`.
fn only_trivia(mut rest: &str) -> bool {
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix(';') {
            rest = after;
        } else {
            return false;
        }
    }
}

/// Pulls the SQL out of a model reply that may use code fences or `SQLQuery:` labels.
pub fn extract_sql(reply: &str) -> Option<String> {
    let mut text = reply.trim();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after
            .strip_prefix("sqlite")
            .or_else(|| after.strip_prefix("sql"))
            .unwrap_or(after);
        text = after.split("```").next().unwrap_or(after);
    }
    if let Some((_, rest)) = text.split_once("SQLQuery:") {
        text = rest;
    }
    if let Some((query, _)) = text.split_once("SQLResult:") {
        text = query;
    }
    let sql = text.trim().trim_matches('`').trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Prompt asking the model for one SQLite query.
pub fn text_to_sql_prompt(schema: &str, question: &str) -> String {
    format!(
        "Given an input question, create a syntactically correct sqlite query to run. \
         Only use the tables and columns listed below, never select all columns with *, \
         and order results by a relevant column when it helps answer the question.\n\n\
         {schema}\n\n\
         Return only the SQL query, with no explanation.\n\
         Question: {question}\nSQLQuery: "
    )
}

/// Prompt asking the model to phrase query rows as an answer.
pub fn synthesis_prompt(question: &str, sql: &str, rows: &QueryRows) -> String {
    let records = serde_json::to_string(&rows.to_records()).unwrap_or_default();
    format!(
        "Given an input question, synthesize a response from the query results.\n\
         Query: {question}\nSQL: {sql}\nSQL Response: {records}\nResponse: "
    )
}

#[derive(Debug, Clone)]
pub struct SqlResponse {
    pub response: String,
    pub sql: String,
    pub rows: QueryRows,
}

/// Text-to-SQL query engine over a fixed list of tables.
#[derive(Debug, Clone)]
pub struct NlSqlQueryEngine {
    database: SqlDatabase,
    client: GeminiClient,
    model: String,
    tables: Vec<String>,
}

impl NlSqlQueryEngine {
    pub fn new(
        database: SqlDatabase,
        client: GeminiClient,
        model: impl Into<String>,
        tables: Vec<String>,
    ) -> Self {
        Self {
            database,
            client,
            model: model.into(),
            tables,
        }
    }

    pub fn database(&self) -> &SqlDatabase {
        &self.database
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub async fn query(&self, question: &str) -> Result<SqlResponse, RetrievalError> {
        let schema = self.database.describe_tables(&self.tables).await?;
        let reply = self
            .client
            .generate(&self.model, &GenerateRequest::prompt(text_to_sql_prompt(&schema, question)))
            .await?;
        let sql = extract_sql(&reply.text()).ok_or(RetrievalError::EmptySql)?;
        info!(%sql, "generated SQL");

        let rows = self.database.run_query(&sql).await?;
        debug!(rows = rows.rows.len(), "SQL executed");

        let answer = self
            .client
            .generate(&self.model, &GenerateRequest::prompt(synthesis_prompt(question, &sql, &rows)))
            .await?;
        Ok(SqlResponse {
            response: answer.text().trim().to_string(),
            sql,
            rows,
        })
    }
}

#[async_trait]
impl ContextProvider for NlSqlQueryEngine {
    async fn retrieve(&self, question: &str) -> Result<String, RetrievalError> {
        Ok(self.query(question).await?.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> SqlDatabase {
        let database = SqlDatabase::connect(DEFAULT_DATABASE_URL)
            .await
            .expect("in-memory database opens");
        database.seed_employee_info().await.expect("seed succeeds");
        database
    }

    #[tokio::test]
    async fn seeded_table_survives_across_queries() {
        let database = seeded().await;
        let rows = database
            .run_query("SELECT COUNT(*) AS total FROM employee_info")
            .await
            .expect("count runs");
        assert_eq!(rows.columns, vec!["total".to_string()]);
        assert_eq!(rows.rows, vec![vec![json!(5)]]);
    }

    #[tokio::test]
    async fn aggregates_decode_to_json() {
        let database = seeded().await;
        let rows = database
            .run_query(
                "SELECT department, SUM(salary) AS total FROM employee_info \
                 GROUP BY department ORDER BY total DESC",
            )
            .await
            .expect("aggregate runs");
        assert_eq!(rows.rows[0], vec![json!("Sales"), json!(180_000)]);
        assert_eq!(
            rows.to_records()[2],
            json!({"department": "Marketing", "total": 135_000})
        );
    }

    #[tokio::test]
    async fn reseeding_does_not_duplicate_rows() {
        let database = seeded().await;
        database.seed_employee_info().await.expect("second seed");
        let rows = database
            .run_query("SELECT MAX(salary) FROM employee_info WHERE department = 'Sales'")
            .await
            .expect("max runs");
        assert_eq!(rows.rows, vec![vec![json!(92_000)]]);
        let count = database
            .run_query("SELECT COUNT(*) FROM employee_info")
            .await
            .expect("count runs");
        assert_eq!(count.rows, vec![vec![json!(5)]]);
    }

    #[tokio::test]
    async fn describe_lists_columns_and_rejects_unknown_tables() {
        let database = seeded().await;
        let schema = database
            .describe_tables(&[EMPLOYEE_TABLE.to_string()])
            .await
            .expect("schema renders");
        assert!(schema.starts_with("Table 'employee_info' has columns: employee_id (INTEGER)"));
        assert!(schema.contains("salary (INTEGER)"));

        let missing = database.describe_tables(&["Sales_Data".to_string()]).await;
        assert!(matches!(missing, Err(RetrievalError::UnknownTable(name)) if name == "Sales_Data"));
    }

    #[tokio::test]
    async fn write_statements_are_refused() {
        let database = seeded().await;
        let result = database.run_query("DELETE FROM employee_info").await;
        assert!(matches!(result, Err(RetrievalError::UnsafeSql(_))));
        let result = database
            .run_query("SELECT 1; DROP TABLE employee_info")
            .await;
        assert!(matches!(result, Err(RetrievalError::UnsafeSql(_))));
    }

    #[tokio::test]
    async fn writes_behind_with_clauses_are_refused_by_sqlite() {
        let database = seeded().await;
        let deleted = database
            .run_query("WITH x AS (SELECT 1) DELETE FROM employee_info")
            .await;
        assert!(matches!(deleted, Err(RetrievalError::Database(_))));
        let updated = database
            .run_query("WITH x AS (SELECT 1) UPDATE employee_info SET salary = 0")
            .await;
        assert!(matches!(updated, Err(RetrievalError::Database(_))));

        let rows = database
            .run_query("SELECT COUNT(*), MIN(salary) FROM employee_info")
            .await
            .expect("count runs");
        assert_eq!(rows.rows, vec![vec![json!(5), json!(65_000)]]);

        // The pooled connection is writable again for seeding.
        database.seed_employee_info().await.expect("reseed after refusal");
    }

    #[tokio::test]
    async fn semicolons_inside_literals_are_not_separators() {
        let database = seeded().await;
        let rows = database
            .run_query("SELECT name FROM employee_info WHERE name <> 'a;b' ORDER BY name LIMIT 1;")
            .await
            .expect("literal semicolon is allowed");
        assert_eq!(rows.rows, vec![vec![json!("Alice Johnson")]]);

        assert_eq!(
            ensure_read_only("SELECT \"odd;name\" FROM t; -- trailing note").expect("allowed"),
            "SELECT \"odd;name\" FROM t"
        );
        assert!(matches!(
            ensure_read_only("SELECT ';'; DELETE FROM t"),
            Err(RetrievalError::UnsafeSql(_))
        ));
    }

    #[test]
    fn memory_urls_are_recognized() {
        assert!(is_in_memory(DEFAULT_DATABASE_URL));
        assert!(is_in_memory("sqlite:file:demo?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://hr.db"));
    }

    #[test]
    fn extract_sql_handles_fences_and_labels() {
        assert_eq!(
            extract_sql("```sql\nSELECT name FROM employee_info;\n```").as_deref(),
            Some("SELECT name FROM employee_info;")
        );
        assert_eq!(
            extract_sql("SQLQuery: SELECT 1\nSQLResult: 1").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(extract_sql("   "), None);
    }

    #[test]
    fn read_only_check_strips_trailing_semicolon() {
        assert_eq!(
            ensure_read_only("  with t as (select 1) select * from t;  ").expect("allowed"),
            "with t as (select 1) select * from t"
        );
        assert!(matches!(ensure_read_only(";"), Err(RetrievalError::EmptySql)));
    }
}
