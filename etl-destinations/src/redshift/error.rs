use etl_staging::error::{ErrorKind, EtlError};
use etl_staging::etl_error;

/// Converts a `sqlx` error into an [`EtlError`] with a matching kind.
pub fn sqlx_error_to_etl_error(err: sqlx::Error) -> EtlError {
    let (kind, description) = match &err {
        sqlx::Error::Configuration(_) => (ErrorKind::ConfigError, "Invalid Redshift configuration"),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
            ErrorKind::DestinationConnectionFailed,
            "Redshift connection failed",
        ),
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // undefined_table
            Some("42P01") => (ErrorKind::DestinationTableMissing, "Redshift table missing"),
            // insufficient_privilege
            Some("42501") => (ErrorKind::PermissionDenied, "Redshift permission denied"),
            // invalid_password
            Some("28P01") | Some("28000") => (
                ErrorKind::AuthenticationError,
                "Redshift authentication failed",
            ),
            _ => (ErrorKind::DestinationQueryFailed, "Redshift query failed"),
        },
        _ => (ErrorKind::DestinationQueryFailed, "Redshift query failed"),
    };

    etl_error!(kind, description, err.to_string())
}

/// Converts an `object_store` error raised on the S3 stage into an [`EtlError`].
pub fn object_store_error_to_etl_error(err: object_store::Error) -> EtlError {
    let (kind, description) = match &err {
        object_store::Error::NotFound { .. } => {
            (ErrorKind::StagedFileMissing, "Staged object not found")
        }
        object_store::Error::InvalidPath { .. } => {
            (ErrorKind::InvalidData, "Invalid staged object path")
        }
        object_store::Error::UnknownConfigurationKey { .. } => {
            (ErrorKind::ConfigError, "Invalid S3 stage configuration")
        }
        _ => (ErrorKind::DestinationIoError, "S3 stage operation failed"),
    };

    etl_error!(kind, description, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_a_connection_failure() {
        let err = sqlx_error_to_etl_error(sqlx::Error::PoolTimedOut);

        assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
    }

    #[test]
    fn missing_object_is_a_missing_staged_file() {
        let err = object_store_error_to_etl_error(object_store::Error::NotFound {
            path: "etl/public_users/part-0.csv.gz".to_string(),
            source: "no such key".into(),
        });

        assert_eq!(err.kind(), ErrorKind::StagedFileMissing);
        assert!(err.detail().unwrap().contains("part-0.csv.gz"));
    }
}
