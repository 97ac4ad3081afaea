//! Raw JSON-RPC call

use anyhow::{Context, Result};
use serde_json::Value;

use kr_client::SerialExecutor;
use kr_core::{CallError, ClientConfig};

use super::Session;
use crate::output::print_error;

/// Parse call params; empty input means no params
pub fn parse_params(params: Option<&str>) -> Result<Value> {
    match params.map(str::trim) {
        None | Some("") => Ok(Value::Null),
        Some(text) => serde_json::from_str(text).context("Params must be valid JSON"),
    }
}

/// Call `method` and print the result as JSON
pub async fn call_command(
    config: ClientConfig,
    host: Option<&str>,
    method: &str,
    params: Option<&str>,
) -> Result<()> {
    let params = parse_params(params)?;
    let session = Session::new(config, host, SerialExecutor::spawn())?;
    let conn = session.connect().await?;

    let outcome = conn.request_raw(method, params).await;
    session.close().await;

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(CallError::Protocol(err)) => {
            print_error(&format!("{} returned error {}: {}", method, err.code, err.message));
            if let Some(data) = &err.data {
                eprintln!("{}", serde_json::to_string_pretty(data)?);
            }
            Err(CallError::Protocol(err).into())
        }
        Err(e) => Err(e).with_context(|| format!("{} failed", method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(None).unwrap(), Value::Null);
        assert_eq!(parse_params(Some("  ")).unwrap(), Value::Null);
        assert_eq!(
            parse_params(Some(r#"{"playerid": 1}"#)).unwrap(),
            json!({"playerid": 1})
        );
        assert!(parse_params(Some("{playerid: 1")).is_err());
    }
}
