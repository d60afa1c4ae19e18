//! Printing results.
//!
//! Every command prints exactly one JSON envelope to stdout and exits with status `1` if it
//! carries an error.

use std::io::Write;
use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;
use stowage_service::{Envelope, StorageResult};

/// Prints the result of a command that returns a value.
pub fn emit<T: Serialize>(result: StorageResult<T>) -> Result<ExitCode> {
    print(&Envelope::<T>::from(result))
}

/// Prints the result of a command without a value, reported as `"ok"`.
pub fn done(result: StorageResult<()>) -> Result<ExitCode> {
    print(&Envelope::<&str>::from(result))
}

fn print<T: Serialize>(envelope: &Envelope<T>) -> Result<ExitCode> {
    let line = render(envelope)?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;

    Ok(match envelope.is_err() {
        true => ExitCode::FAILURE,
        false => ExitCode::SUCCESS,
    })
}

fn render<T: Serialize>(envelope: &Envelope<T>) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

#[cfg(test)]
mod tests {
    use stowage_service::StorageError;

    use super::*;

    #[test]
    fn renders_values() {
        let result: StorageResult<Vec<&str>> = Ok(vec!["a", "b"]);
        let envelope = Envelope::from(result);
        assert_eq!(
            render(&envelope).unwrap(),
            r#"{"value":["a","b"],"error":null}"#
        );
    }

    #[test]
    fn renders_unit_as_ok() {
        let result: StorageResult<()> = Ok(());
        let envelope = Envelope::<&str>::from(result);
        assert_eq!(render(&envelope).unwrap(), r#"{"value":"ok","error":null}"#);
    }

    #[test]
    fn renders_errors_with_kind() {
        let result: StorageResult<()> = Err(StorageError::not_found("Could not find bucket b"));
        let envelope = Envelope::<&str>::from(result);
        assert_eq!(
            render(&envelope).unwrap(),
            r#"{"value":null,"error":"Could not find bucket b","kind":"not_found"}"#
        );
    }
}
