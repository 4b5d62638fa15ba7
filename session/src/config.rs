//! Session configuration.
//!
//! Explicit structs passed to constructors; nothing here is read from the
//! environment or from process-global state.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ciphernet_bridge::BridgeConfig;
use ciphernet_gc::{GcConfig, MpcProtocol};
use ciphernet_he::EncryptionParameters;

use crate::errors::SessionError;
use crate::SessionResult;

/// Which end of the protocol a process plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Server,
    Client,
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => Err(SessionError::Config(format!("unknown role '{other}'"))),
        }
    }
}

/// How the client delivers its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputMode {
    /// Encrypt inputs client-side (the normal mode).
    Encrypt,
    /// Send inputs in plaintext; the server then evaluates non-linear
    /// operators locally without a round trip.
    Plain,
}

impl FromStr for InputMode {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "encrypt" => Ok(InputMode::Encrypt),
            "plain" => Ok(InputMode::Plain),
            other => Err(SessionError::Config(format!(
                "unknown input mode '{other}', expected 'encrypt' or 'plain'"
            ))),
        }
    }
}

/// Garbled-circuit engine options shared by both roles.
#[derive(Clone, Debug)]
pub struct GcOptions {
    /// When disabled, non-linear operators ship unmasked ciphertexts and the
    /// client computes on decrypted values (the degraded-privacy fallback).
    pub enabled: bool,
    pub protocol: MpcProtocol,
    pub security_level: u64,
    pub bit_length: u32,
    /// Worker threads for per-element mask application.
    pub threads: usize,
    /// Gate-reservation hint for circuit builders.
    pub reserve_gates: usize,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: MpcProtocol::Yao,
            security_level: 128,
            bit_length: 64,
            threads: 1,
            reserve_gates: 4096,
        }
    }
}

impl GcOptions {
    pub fn validate(&self) -> SessionResult<()> {
        if self.security_level != 128 {
            return Err(SessionError::Config(format!(
                "unsupported security level {}",
                self.security_level
            )));
        }
        if self.enabled && self.protocol != MpcProtocol::Yao {
            return Err(SessionError::Config(format!(
                "2PC protocol '{}' is not supported by this engine",
                self.protocol
            )));
        }
        if !(2..=64).contains(&self.bit_length) {
            return Err(SessionError::Config(format!(
                "bit length {} outside 2..=64",
                self.bit_length
            )));
        }
        if self.threads == 0 {
            return Err(SessionError::Config("thread count must be >= 1".into()));
        }
        Ok(())
    }

    pub(crate) fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            bit_length: self.bit_length,
            threads: self.threads,
            reserve_gates: self.reserve_gates,
            ..BridgeConfig::default()
        }
    }

    pub(crate) fn gc_config(&self) -> GcConfig {
        GcConfig {
            protocol: self.protocol,
            security_level: self.security_level,
            bit_length: self.bit_length,
            reserve_gates: self.reserve_gates,
        }
    }
}

/// Client reconnect schedule: exponential backoff from `initial` doubling up
/// to `max`, retried until `max_attempts` (or forever when `None`).
#[derive(Clone, Debug)]
pub struct RetrySchedule {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

/// Server-side session configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Session listen address, e.g. `127.0.0.1:34000`.
    pub addr: String,
    /// Dedicated 2PC listen address.
    pub mpc_addr: String,
    pub params: EncryptionParameters,
    pub gc: GcOptions,
    /// `None` waits on the peer indefinitely (the reference behavior).
    pub peer_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn validate(&self) -> SessionResult<()> {
        self.params
            .validate()
            .map_err(|e| SessionError::Config(e.to_string()))?;
        self.gc.validate()
    }
}

/// Client-side session configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub addr: String,
    pub mpc_addr: String,
    pub gc: GcOptions,
    pub input_mode: InputMode,
    pub peer_timeout: Option<Duration>,
    pub retry: RetrySchedule,
}

impl ClientConfig {
    pub fn validate(&self) -> SessionResult<()> {
        self.gc.validate()
    }
}
