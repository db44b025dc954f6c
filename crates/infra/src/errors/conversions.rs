//! Conversions from external infrastructure errors into domain errors.

use std::io;

use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use rxflow_domain::RxflowError;
use tokio::task::JoinError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub RxflowError);

impl From<InfraError> for RxflowError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<RxflowError> for InfraError {
    fn from(value: RxflowError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoRxflowError {
    fn into_rxflow(self) -> RxflowError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → RxflowError */
/* -------------------------------------------------------------------------- */

impl IntoRxflowError for SqlError {
    fn into_rxflow(self) -> RxflowError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => RxflowError::Database("database is busy".into()),
                    ErrorCode::DatabaseLocked => RxflowError::Database("database is locked".into()),
                    ErrorCode::DiskFull => RxflowError::Storage("disk full".into()),
                    ErrorCode::ReadOnly => RxflowError::Storage("database is read-only".into()),
                    ErrorCode::NotADatabase => {
                        RxflowError::Database("file is not a SQLite database".into())
                    }
                    _ => RxflowError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => RxflowError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                RxflowError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                RxflowError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidPath(path) => RxflowError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => RxflowError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_rxflow())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → RxflowError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(RxflowError::Database(format!("connection pool error: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → RxflowError */
/* -------------------------------------------------------------------------- */

impl IntoRxflowError for HttpError {
    fn into_rxflow(self) -> RxflowError {
        if self.is_timeout() {
            return RxflowError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return RxflowError::Network("HTTP connection failure".into());
        }

        if self.is_builder() {
            return RxflowError::InvalidInput(format!("invalid HTTP request: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                404 => RxflowError::NotFound(message),
                429 => RxflowError::Network(message),
                400..=499 => RxflowError::InvalidInput(message),
                _ => RxflowError::Network(message),
            };
        }

        RxflowError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_rxflow())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json / io / tempfile → RxflowError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(RxflowError::Serialization(value.to_string()))
    }
}

impl From<io::Error> for InfraError {
    fn from(value: io::Error) -> Self {
        let error = match value.kind() {
            io::ErrorKind::NotFound => RxflowError::NotFound(value.to_string()),
            io::ErrorKind::PermissionDenied => {
                RxflowError::Storage(format!("permission denied: {value}"))
            }
            _ => RxflowError::Storage(value.to_string()),
        };
        InfraError(error)
    }
}

impl From<tempfile::PersistError> for InfraError {
    fn from(value: tempfile::PersistError) -> Self {
        InfraError(RxflowError::Storage(format!("failed to replace file atomically: {}", value.error)))
    }
}

/// Convert any infrastructure error with an [`InfraError`] conversion
pub fn into_domain<E>(err: E) -> RxflowError
where
    InfraError: From<E>,
{
    InfraError::from(err).into()
}

/// Map a failed `spawn_blocking` task into the domain error
pub fn map_join_error(err: JoinError) -> RxflowError {
    if err.is_cancelled() {
        RxflowError::Internal("blocking task cancelled".into())
    } else {
        RxflowError::Internal(format!("blocking task failed: {err}"))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode};
    use rusqlite::ffi::{Error as FfiError, ErrorCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn sqlite_busy_maps_to_database_error() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::DatabaseBusy, extended_code: 5 },
            Some("database is locked".into()),
        );

        let mapped: RxflowError = InfraError::from(err).into();
        match mapped {
            RxflowError::Database(msg) => assert!(msg.contains("busy")),
            other => panic!("expected database error, got {:?}", other),
        }
    }

    #[test]
    fn io_errors_map_by_kind() {
        let missing: RxflowError = InfraError::from(io::Error::from(io::ErrorKind::NotFound)).into();
        assert!(matches!(missing, RxflowError::NotFound(_)));

        let other: RxflowError = InfraError::from(io::Error::other("boom")).into();
        assert_eq!(other, RxflowError::Storage("boom".into()));
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let mapped: RxflowError = InfraError::from(err).into();
        assert!(matches!(mapped, RxflowError::Serialization(_)));
    }

    #[tokio::test]
    async fn http_status_404_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(StatusCode::NOT_FOUND))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err();

        let mapped: RxflowError = InfraError::from(error).into();
        match mapped {
            RxflowError::NotFound(msg) => assert!(msg.contains("404")),
            other => panic!("expected not found, got {:?}", other),
        }
    }
}
