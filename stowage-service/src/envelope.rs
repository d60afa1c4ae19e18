//! The serializable `{value, error}` form of a [`StorageResult`].

use serde::Serialize;

use crate::error::{ErrorKind, StorageResult};

/// Value reported for operations that succeed without a payload.
pub const OK: &str = "ok";

/// Exactly one of `value` and `error` is set.
///
/// This is the shape in which results leave the process, for example as JSON printed by a command
/// line tool. Inside Rust, operations return [`StorageResult`] and the envelope is built at the
/// boundary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope<T> {
    /// The payload on success.
    pub value: Option<T>,
    /// The error message on failure.
    pub error: Option<String>,
    /// The error classification on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T> Envelope<T> {
    /// A successful envelope.
    pub fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
            kind: None,
        }
    }

    /// Returns `true` if this envelope carries an error.
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

impl<T> From<StorageResult<T>> for Envelope<T> {
    fn from(result: StorageResult<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(err) => Self {
                value: None,
                error: Some(err.to_string()),
                kind: Some(err.kind()),
            },
        }
    }
}

impl From<StorageResult<()>> for Envelope<&'static str> {
    fn from(result: StorageResult<()>) -> Self {
        result.map(|()| OK).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn unit_results_report_ok() {
        let result: StorageResult<()> = Ok(());
        let envelope: Envelope<&str> = result.into();
        assert_eq!(envelope.value, Some("ok"));
        assert_eq!(envelope.error, None);
    }

    #[test]
    fn exactly_one_side_is_set() {
        let envelope: Envelope<u64> = Err(StorageError::not_found("no such file")).into();
        assert_eq!(envelope.value, None);
        assert_eq!(envelope.error.as_deref(), Some("no such file"));
        assert_eq!(envelope.kind, Some(ErrorKind::NotFound));

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"value": null, "error": "no such file", "kind": "not_found"})
        );

        let json = serde_json::to_value(Envelope::ok(42u64)).unwrap();
        assert_eq!(json, serde_json::json!({"value": 42, "error": null}));
    }
}
