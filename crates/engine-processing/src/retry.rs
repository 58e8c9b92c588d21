use connectors::catalog::error::CatalogError;
use engine_core::{error::StateStoreError, retry::RetryDisposition};
use std::io::ErrorKind;

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub fn classify_catalog_error(err: &CatalogError) -> RetryDisposition {
    match err {
        CatalogError::Status {
            code, retry_after, ..
        } => {
            if !RETRYABLE_STATUSES.contains(code) {
                return RetryDisposition::Stop;
            }
            match retry_after {
                Some(hint) => RetryDisposition::RetryAfter(*hint),
                None => RetryDisposition::Retry,
            }
        }
        CatalogError::Timeout(_) | CatalogError::Network(_) => RetryDisposition::Retry,
        CatalogError::Io(io_err) => classify_io_error(io_err),
        CatalogError::NotFound(_) => RetryDisposition::Stop,
        CatalogError::Decode(_) => RetryDisposition::Stop,
        CatalogError::Serialization(_) => RetryDisposition::Stop,
    }
}

pub fn classify_state_error(err: &StateStoreError) -> RetryDisposition {
    match err {
        StateStoreError::Io(io_err) => classify_io_error(io_err),
        StateStoreError::Storage(_) => RetryDisposition::Stop,
        StateStoreError::Encode(_) => RetryDisposition::Stop,
        StateStoreError::Json(_) => RetryDisposition::Stop,
        StateStoreError::CorruptCounter(_) => RetryDisposition::Stop,
        StateStoreError::Aborted(_) => RetryDisposition::Retry,
    }
}

fn classify_io_error(err: &std::io::Error) -> RetryDisposition {
    match err.kind() {
        ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::TimedOut
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => RetryDisposition::Retry,
        _ => RetryDisposition::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::catalog::record::RemoteId;
    use std::time::Duration;

    #[test]
    fn retryable_statuses_and_transport_errors() {
        for code in RETRYABLE_STATUSES {
            assert_eq!(
                classify_catalog_error(&CatalogError::status(code, "x")),
                RetryDisposition::Retry
            );
        }
        assert_eq!(
            classify_catalog_error(&CatalogError::Network("reset".into())),
            RetryDisposition::Retry
        );
        assert_eq!(
            classify_catalog_error(&CatalogError::Timeout("slow".into())),
            RetryDisposition::Retry
        );
    }

    #[test]
    fn client_errors_stop_immediately() {
        for code in [400, 401, 403, 404, 422] {
            assert_eq!(
                classify_catalog_error(&CatalogError::status(code, "x")),
                RetryDisposition::Stop
            );
        }
        assert_eq!(
            classify_catalog_error(&CatalogError::NotFound(RemoteId(1))),
            RetryDisposition::Stop
        );
    }

    #[test]
    fn retry_after_hint_is_passed_through() {
        let err = CatalogError::rate_limited(Some(Duration::from_secs(3)));
        assert_eq!(
            classify_catalog_error(&err),
            RetryDisposition::RetryAfter(Duration::from_secs(3))
        );
    }

    #[test]
    fn state_errors() {
        let io = StateStoreError::Io(std::io::Error::from(ErrorKind::Interrupted));
        assert_eq!(classify_state_error(&io), RetryDisposition::Retry);
        let denied = StateStoreError::Io(std::io::Error::from(ErrorKind::PermissionDenied));
        assert_eq!(classify_state_error(&denied), RetryDisposition::Stop);
        assert_eq!(
            classify_state_error(&StateStoreError::CorruptCounter("x".into())),
            RetryDisposition::Stop
        );
    }
}
