use anyhow::{Context, Result};
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlDatabaseError, MySqlPoolOptions};

pub async fn init_db(database_url: &str, run_migrations: bool) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    Ok(pool)
}

/// True for unique-key violations (MySQL error 1062, SQLSTATE 23000).
pub fn is_duplicate_key(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// True when a referenced row does not exist (MySQL error 1452).
pub fn is_missing_reference(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_foreign_key_violation(),
        _ => false,
    }
}

/// Deadlock victim (1213, SQLSTATE 40001) or lock wait timeout (1205).
/// The transaction was rolled back and the request may be retried.
pub fn is_lock_conflict(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    if db_err.code().as_deref() == Some("40001") {
        return true;
    }
    db_err
        .try_downcast_ref::<MySqlDatabaseError>()
        .is_some_and(|e| matches!(e.number(), 1205 | 1213))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::fmt;

    /// Stand-in for a driver error so classification can be tested offline.
    #[derive(Debug)]
    pub(crate) struct FakeDbError {
        pub code: &'static str,
        pub kind: fn() -> ErrorKind,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error {}", self.code)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            (self.kind)()
        }
    }

    pub(crate) fn db_error(code: &'static str, kind: fn() -> ErrorKind) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError { code, kind }))
    }

    #[test]
    fn classifies_constraint_violations() {
        let dup = db_error("23000", || ErrorKind::UniqueViolation);
        let fk = db_error("23000", || ErrorKind::ForeignKeyViolation);

        assert!(is_duplicate_key(&dup));
        assert!(!is_missing_reference(&dup));
        assert!(is_missing_reference(&fk));
        assert!(!is_duplicate_key(&fk));
        assert!(!is_duplicate_key(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn deadlock_is_a_lock_conflict() {
        assert!(is_lock_conflict(&db_error("40001", || ErrorKind::Other)));
        assert!(!is_lock_conflict(&db_error("23000", || ErrorKind::UniqueViolation)));
        assert!(!is_lock_conflict(&sqlx::Error::PoolTimedOut));
    }
}
