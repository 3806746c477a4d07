#![allow(dead_code)]

use async_trait::async_trait;
use pkom_bridge::archive::{Measurement, MeasurementSink};
use pkom_bridge::device::{Connector, Session};
use pkom_bridge::mqtt::Publisher;
use pkom_bridge::registry::{Address, Namespace, Registry};
use pkom_bridge::{AppError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Register-level stand-in for the unit. Writes land on the write address and
/// are visible on the matching read address, like on the real device.
#[derive(Debug, Default)]
pub struct Registers {
    pub values: HashMap<(Namespace, Address), i64>,
    write_to_read: HashMap<Address, Address>,
    pub calls: Vec<(String, String)>,
    pub fail_reads: bool,
}

impl Registers {
    pub fn new(registry: &Registry) -> Self {
        let write_to_read = registry
            .points(Namespace::Setpoint)
            .iter()
            .map(|p| (p.write_address(), p.read))
            .collect();
        Self {
            write_to_read,
            ..Default::default()
        }
    }

    pub fn set(&mut self, registry: &Registry, namespace: Namespace, name: &str, raw: i64) {
        let def = registry.lookup(namespace, name).unwrap();
        self.values.insert((namespace, def.read), raw);
    }

    /// Read commands seen so far, single and list reads alike.
    pub fn reads(&self) -> usize {
        self.calls.iter().filter(|(c, _)| c.contains("Read")).count()
    }

    pub fn pings(&self) -> usize {
        self.calls.iter().filter(|(c, _)| c == "ping").count()
    }

    /// Parameters of every write, in order.
    pub fn writes(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(c, _)| c == "setpointWriteValue")
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn read(&self, namespace: Namespace, at: Address) -> i64 {
        self.values.get(&(namespace, at)).copied().unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct FakeSession {
    pub registers: Arc<Mutex<Registers>>,
}

fn params(raw: &str) -> HashMap<&str, &str> {
    raw.split('&').filter_map(|kv| kv.split_once('=')).collect()
}

fn address(p: &HashMap<&str, &str>) -> Address {
    Address {
        address: p["address"].parse().unwrap(),
        obj: p["obj"].parse().unwrap(),
    }
}

fn data(values: Vec<i64>) -> Value {
    let data: Vec<Value> = values.into_iter().map(|v| json!({ "value": v })).collect();
    json!({ "response": { "data": data } })
}

#[async_trait]
impl Session for FakeSession {
    async fn invoke(&mut self, command: &str, raw: &str) -> Result<Value> {
        let mut regs = self.registers.lock().unwrap();
        regs.calls.push((command.to_string(), raw.to_string()));
        let namespace = if command.starts_with("setpoint") {
            Namespace::Setpoint
        } else {
            Namespace::Datapoint
        };
        match command {
            "ping" => Ok(json!({ "response": { "ping": 1885957735u32 } })),
            "datapointReadValue" | "setpointReadValue" => {
                if regs.fail_reads {
                    return Err(AppError::Transport("connection lost".into()));
                }
                let p = params(raw);
                Ok(data(vec![regs.read(namespace, address(&p))]))
            }
            "datapointReadListValue" | "setpointReadListValue" => {
                if regs.fail_reads {
                    return Err(AppError::Transport("connection lost".into()));
                }
                let body = raw.strip_prefix("json=").unwrap();
                let request: Value = serde_json::from_str(body).unwrap();
                let values = request["request"]["list"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|item| {
                        let at = Address {
                            address: item["address"].as_u64().unwrap() as u16,
                            obj: item["obj"].as_u64().unwrap() as u8,
                        };
                        regs.read(namespace, at)
                    })
                    .collect();
                Ok(data(values))
            }
            "setpointWriteValue" => {
                let p = params(raw);
                let written = address(&p);
                let value: i64 = p["value"].parse().unwrap();
                let read = regs.write_to_read.get(&written).copied().unwrap_or(written);
                regs.values.insert((Namespace::Setpoint, read), value);
                Ok(json!({ "response": {} }))
            }
            other => Err(AppError::Transport(format!("unknown command {other}"))),
        }
    }
}

pub struct FakeConnector {
    pub registers: Arc<Mutex<Registers>>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn open_session(&self) -> Result<FakeSession> {
        Ok(FakeSession {
            registers: Arc::clone(&self.registers),
        })
    }
}

/// Publisher that records every message; fails every publish when `fail` is set.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub messages: Arc<Mutex<Vec<(String, String)>>>,
    pub fail: bool,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        if self.fail {
            return Err(AppError::Mqtt("broker unavailable".into()));
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Sink that records every commit attempt; rejects them while `fail` is set.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub batches: Arc<Mutex<Vec<Vec<Measurement>>>>,
    pub fail: Arc<Mutex<bool>>,
}

#[async_trait]
impl MeasurementSink for RecordingSink {
    async fn commit(&self, batch: &[Measurement]) -> Result<()> {
        self.batches.lock().unwrap().push(batch.to_vec());
        if *self.fail.lock().unwrap() {
            return Err(AppError::Other(anyhow::anyhow!("database unavailable")));
        }
        Ok(())
    }
}
