//! Device connector boundary and the raw register commands built on it.

use crate::error::{AppError, Result};
use crate::registry::{Address, Namespace};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// An open session to the unit. `&mut self` keeps every call funnelled
/// through whoever owns the session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send {
    /// Invokes a named RPC command; `params` is the query part of the call.
    async fn invoke(&mut self, command: &str, params: &str) -> Result<Value>;
}

/// Opens sessions to the unit.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn open_session(&self) -> Result<Self::Session>;
}

const PING_TOKEN: u32 = 1885957735;

fn read_command(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Datapoint => "datapointReadValue",
        Namespace::Setpoint => "setpointReadValue",
    }
}

fn read_list_command(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Datapoint => "datapointReadListValue",
        Namespace::Setpoint => "setpointReadListValue",
    }
}

pub const WRITE_COMMAND: &str = "setpointWriteValue";

/// Reads `length` neighbouring raw values starting at `at`.
pub async fn read_values<S: Session + ?Sized>(
    session: &mut S,
    namespace: Namespace,
    at: Address,
    length: usize,
) -> Result<Vec<i64>> {
    let command = read_command(namespace);
    let params = format!("address={}&obj={}&length={}", at.address, at.obj, length);
    let response = session.invoke(command, &params).await?;
    values(command, &response, length)
}

/// Reads one raw value per address in a single round trip, in request order.
pub async fn read_list<S: Session + ?Sized>(
    session: &mut S,
    namespace: Namespace,
    addresses: &[Address],
) -> Result<Vec<i64>> {
    if addresses.is_empty() {
        return Ok(Vec::new());
    }
    let command = read_list_command(namespace);
    let list: Vec<Value> = addresses
        .iter()
        .map(|a| json!({ "address": a.address, "obj": a.obj }))
        .collect();
    let request = json!({ "request": { "list": list } });
    let params = format!("json={}", serde_json::to_string(&request)?);
    let response = session.invoke(command, &params).await?;
    values(command, &response, addresses.len())
}

/// Writes one raw setpoint value.
pub async fn write_value<S: Session + ?Sized>(
    session: &mut S,
    at: Address,
    raw: i64,
) -> Result<()> {
    let params = format!("address={}&obj={}&value={}", at.address, at.obj, raw);
    let response = session.invoke(WRITE_COMMAND, &params).await?;
    response_body(WRITE_COMMAND, &response)?;
    debug!(address = at.address, obj = at.obj, raw, "setpoint written");
    Ok(())
}

pub async fn ping<S: Session + ?Sized>(session: &mut S) -> Result<Value> {
    let response = session
        .invoke("ping", &format!("ping={PING_TOKEN}"))
        .await?;
    response_body("ping", &response).cloned()
}

fn response_body<'a>(command: &str, response: &'a Value) -> Result<&'a Value> {
    match response.get("response") {
        Some(body) if !body.is_null() => Ok(body),
        _ => Err(AppError::NoData(command.to_string())),
    }
}

/// Pulls `response.data[].value` out of a read response. A missing body or a
/// count different from what was asked for is reported as no data.
fn values(command: &str, response: &Value, expected: usize) -> Result<Vec<i64>> {
    let data = response_body(command, response)?
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::NoData(command.to_string()))?;
    if data.len() != expected {
        return Err(AppError::NoData(format!(
            "{command}: expected {expected} values, got {}",
            data.len()
        )));
    }
    data.iter()
        .map(|item| {
            item.get("value")
                .and_then(Value::as_i64)
                .ok_or_else(|| AppError::NoData(format!("{command}: item without integer value")))
        })
        .collect()
}
