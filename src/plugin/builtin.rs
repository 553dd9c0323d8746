//! Bundled sample probes and callbacks

use super::{Callback, Probe, ProbeResult};
use crate::worker::OutputSink;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Greets a `name,age` seed
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloWorldProbe;

#[async_trait]
impl Probe for HelloWorldProbe {
    async fn probe(&self, seed: &str) -> anyhow::Result<Value> {
        let parts: Vec<&str> = seed.split(',').collect();
        if parts.len() != 2 {
            bail!("expected `name,age`, got {:?}", seed);
        }
        let age: i64 = parts[1]
            .trim()
            .parse()
            .with_context(|| format!("invalid age {:?}", parts[1]))?;
        Ok(Value::String(format!("Hello World! {}, {}", seed, age)))
    }
}

/// Opens a TCP connection to a `host[:port]` seed and reports latency
#[derive(Debug, Clone, Copy)]
pub struct TcpConnectProbe {
    /// Port used when the seed has none
    pub default_port: u16,
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self { default_port: 80 }
    }
}

impl TcpConnectProbe {
    /// Split a seed into host and port.
    ///
    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`.
    pub fn parse_target(&self, seed: &str) -> anyhow::Result<(String, u16)> {
        if let Some(rest) = seed.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .with_context(|| format!("unterminated IPv6 literal in {:?}", seed))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => self.default_port,
                None => bail!("unexpected {:?} after IPv6 literal", tail),
            };
            return Ok((host.to_string(), port));
        }

        match seed.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok((host.to_string(), parse_port(port)?)),
            _ => Ok((seed.to_string(), self.default_port)),
        }
    }
}

fn parse_port(port: &str) -> anyhow::Result<u16> {
    port.parse()
        .with_context(|| format!("invalid port {:?}", port))
}

#[async_trait]
impl Probe for TcpConnectProbe {
    async fn probe(&self, seed: &str) -> anyhow::Result<Value> {
        let (host, port) = self.parse_target(seed)?;
        let start = Instant::now();
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .with_context(|| format!("connect to {}:{} failed", host, port))?;
        let latency = start.elapsed();
        let peer = stream.peer_addr()?;

        Ok(json!({
            "peer": peer.to_string(),
            "latency_ms": latency.as_millis() as u64,
        }))
    }
}

/// Sleeps for the number of milliseconds given by the seed
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayProbe;

#[async_trait]
impl Probe for DelayProbe {
    async fn probe(&self, seed: &str) -> anyhow::Result<Value> {
        let millis: u64 = seed
            .parse()
            .with_context(|| format!("expected milliseconds, got {:?}", seed))?;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(json!({ "slept_ms": millis }))
    }
}

/// Prints `seed: "..", data: "..", exception: ".."` for every result
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintCallback;

impl Callback for PrintCallback {
    fn on_result(&self, result: &ProbeResult, out: &OutputSink<'_>) {
        out.line(result.to_string());
    }
}

/// Prints every result as one JSON document
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCallback;

impl Callback for JsonCallback {
    fn on_result(&self, result: &ProbeResult, out: &OutputSink<'_>) {
        match serde_json::to_string(result) {
            Ok(line) => out.line(line),
            Err(e) => out.line(format!("seed: {:?}, unserializable result: {}", result.seed, e)),
        }
    }
}

/// Produces no output
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentCallback;

impl Callback for SilentCallback {
    fn on_result(&self, _result: &ProbeResult, _out: &OutputSink<'_>) {}
}
