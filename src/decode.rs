//! decode.rs
//! Vendor decode-table contract.
//! The core treats signal names as opaque strings; only the handful named in
//! `config` carry meaning for the detector. Decoding failures are normal bus
//! traffic (unknown ids, short payloads) and yield an empty map, never an
//! error — the table load itself is the only fatal path, at startup.

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::slot::{SignalMap, Value};

/// Decode contract: `(id, payload) -> {signal: value}`, empty on any failure.
pub trait SignalDecoder {
    fn decode(&self, id: u16, payload: &[u8]) -> SignalMap;
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read decode table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse decode table {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate message id 0x{0:X} in decode table")]
    DuplicateId(u16),
}

/// One signal layout inside a message: little-endian bit extraction with
/// linear scaling, optionally mapped to a textual choice label.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalSpec {
    pub name: String,
    pub start_bit: u16,
    pub bit_length: u16,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub signed: bool,
    /// raw value (decimal string key) -> label, e.g. gear positions.
    #[serde(default)]
    pub choices: HashMap<String, String>,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSpec {
    #[serde(deserialize_with = "hex_or_int")]
    pub id: u16,
    pub name: String,
    #[serde(default)]
    pub signals: Vec<SignalSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableFile {
    messages: Vec<MessageSpec>,
}

/// Vendor message database, loaded once at startup.
#[derive(Debug)]
pub struct SignalTable {
    messages: HashMap<u16, MessageSpec>,
}

impl SignalTable {
    /// # Errors
    /// `TableError` if the file is unreadable, malformed, or carries a
    /// duplicate message id. Fatal at startup only.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let text = fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|e| match e {
            TableError::Parse { source, .. } => TableError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, TableError> {
        let file: TableFile = serde_json::from_str(text).map_err(|source| TableError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::from_messages(file.messages)
    }

    pub fn from_messages(specs: Vec<MessageSpec>) -> Result<Self, TableError> {
        let mut messages = HashMap::new();
        for msg in specs {
            let id = msg.id;
            if messages.insert(id, msg).is_some() {
                return Err(TableError::DuplicateId(id));
            }
        }
        Ok(Self { messages })
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl SignalDecoder for SignalTable {
    fn decode(&self, id: u16, payload: &[u8]) -> SignalMap {
        let Some(msg) = self.messages.get(&id) else {
            return IndexMap::new();
        };

        let mut out = IndexMap::new();
        for sig in &msg.signals {
            // A single out-of-range signal fails the whole message, the way
            // a DBC decoder rejects a truncated frame.
            let Some(raw) = extract_bits(payload, sig.start_bit, sig.bit_length) else {
                return IndexMap::new();
            };

            if let Some(label) = sig.choices.get(&raw.to_string()) {
                out.insert(sig.name.clone(), Value::Text(label.clone()));
                continue;
            }

            let raw = if sig.signed {
                sign_extend(raw, sig.bit_length) as f64
            } else {
                raw as f64
            };
            out.insert(sig.name.clone(), Value::Number(raw * sig.scale + sig.offset));
        }
        out
    }
}

/// Little-endian (Intel) bit extraction: bit i of the value is bit
/// `start_bit + i` of the payload, LSB-first within each byte.
fn extract_bits(payload: &[u8], start_bit: u16, bit_length: u16) -> Option<u64> {
    if bit_length == 0 || bit_length > 64 {
        return None;
    }
    let end_bit = start_bit.checked_add(bit_length)?;
    if (end_bit as usize).div_ceil(8) > payload.len() {
        return None;
    }

    let mut raw: u64 = 0;
    for i in 0..bit_length {
        let bit = (start_bit + i) as usize;
        if payload[bit / 8] >> (bit % 8) & 1 == 1 {
            raw |= 1 << i;
        }
    }
    Some(raw)
}

fn sign_extend(raw: u64, bit_length: u16) -> i64 {
    if bit_length == 64 {
        return raw as i64;
    }
    let sign = 1u64 << (bit_length - 1);
    if raw & sign != 0 {
        (raw | !((1u64 << bit_length) - 1)) as i64
    } else {
        raw as i64
    }
}

fn hex_or_int<'de, D>(de: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u16),
        Text(String),
    }

    match Raw::deserialize(de)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => {
            let t = s.trim();
            let hex = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X"));
            match hex {
                Some(h) => u16::from_str_radix(h, 16),
                None => t.parse(),
            }
            .map_err(|_| serde::de::Error::custom(format!("bad message id `{}`", s)))
        }
    }
}
