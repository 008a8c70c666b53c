use serde_json::Value;
use sqlx::MySqlPool;

use crate::error::ApiError;

/// SQL bindable value
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Null,
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Build `UPDATE <table> SET ... WHERE <id_column> = ?` from a JSON object.
///
/// Only keys listed in `allowed` may appear; column names are never taken
/// from the request verbatim.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[&'static str],
    id_column: &str,
    id_value: u64,
) -> Result<SqlUpdate, ApiError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ApiError::bad_request("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let mut columns = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let column = allowed
            .iter()
            .find(|c| **c == key.as_str())
            .ok_or_else(|| ApiError::bad_request(format!("Field `{key}` cannot be updated")))?;
        columns.push(format!("{column} = ?"));

        values.push(match value {
            Value::String(s) => SqlValue::String(s.clone()),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    SqlValue::U64(u)
                } else if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::F64(f)
                } else {
                    return Err(ApiError::bad_request(format!("Unsupported number for `{key}`")));
                }
            }
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Null => SqlValue::Null,
            _ => return Err(ApiError::bad_request(format!("Unsupported value for `{key}`"))),
        });
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table,
        columns.join(", "),
        id_column
    );
    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLUMNS: &[&str] = &["full_name", "trade", "status"];

    #[test]
    fn builds_update_for_allowed_columns() {
        let update = build_update_sql(
            "employees",
            &json!({"full_name": "Ana Silva", "trade": null}),
            COLUMNS,
            "id",
            4,
        )
        .unwrap();

        assert_eq!(update.sql, "UPDATE employees SET full_name = ?, trade = ? WHERE id = ?");
        assert_eq!(
            update.values,
            vec![
                SqlValue::String("Ana Silva".into()),
                SqlValue::Null,
                SqlValue::U64(4)
            ]
        );
    }

    #[test]
    fn rejects_unknown_columns() {
        let err = build_update_sql("employees", &json!({"id = 1; --": 1}), COLUMNS, "id", 1).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn rejects_empty_and_non_object_payloads() {
        assert!(build_update_sql("employees", &json!({}), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("employees", &json!([1, 2]), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("employees", &json!({"trade": ["a"]}), COLUMNS, "id", 1).is_err());
    }
}
