// Call Parameter Resolution
//
// Precedence per field: caller-supplied value (if convertible), then the
// stored prompt's value (reruns only), then the configured default.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Fully resolved parameters for one provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// Caller keys with no dedicated field, forwarded to the provider verbatim
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// System defaults used when neither caller nor stored prompt supplies a value.
///
/// A `None` default makes the field mandatory.
#[derive(Debug, Clone)]
pub struct CallDefaults {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

impl Default for CallDefaults {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1024),
            top_p: Some(1.0),
        }
    }
}

/// Parameter values persisted with a prompt row, replayed on rerun
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

#[derive(Error, Debug)]
pub enum ParamError {
    #[error("parameter {0} is missing and no default is configured")]
    Missing(&'static str),
}

/// Resolve the parameter set for one call.
///
/// Unconvertible caller values are ignored with a warning rather than
/// failing the unit; a missing value with no fallback at all is fatal.
pub fn resolve_params(
    caller: &Map<String, Value>,
    stored: Option<&StoredParams>,
    defaults: &CallDefaults,
) -> Result<CallParams, ParamError> {
    let temperature = pick_f64(
        "temperature",
        caller.get("temperature"),
        stored.map(|s| s.temperature),
        defaults.temperature,
    )?;
    let max_tokens = pick_u32(
        "max_tokens",
        caller.get("max_tokens"),
        stored.map(|s| s.max_tokens),
        defaults.max_tokens,
    )?;
    let top_p = pick_f64(
        "top_p",
        caller.get("top_p"),
        stored.map(|s| s.top_p),
        defaults.top_p,
    )?;

    let mut extra = caller.clone();
    extra.remove("temperature");
    extra.remove("max_tokens");
    extra.remove("top_p");

    Ok(CallParams {
        temperature,
        max_tokens,
        top_p,
        extra,
    })
}

fn pick_f64(
    name: &'static str,
    caller: Option<&Value>,
    stored: Option<f64>,
    default: Option<f64>,
) -> Result<f64, ParamError> {
    if let Some(value) = caller {
        match as_f64(value) {
            Some(parsed) => return Ok(parsed),
            None => warn!(param = name, value = %value, "unusable parameter value, falling back"),
        }
    }
    if let Some(stored) = stored {
        return Ok(stored);
    }
    default.ok_or(ParamError::Missing(name))
}

fn pick_u32(
    name: &'static str,
    caller: Option<&Value>,
    stored: Option<u32>,
    default: Option<u32>,
) -> Result<u32, ParamError> {
    if let Some(value) = caller {
        match as_u32(value) {
            Some(parsed) => return Ok(parsed),
            None => warn!(param = name, value = %value, "unusable parameter value, falling back"),
        }
    }
    if let Some(stored) = stored {
        return Ok(stored);
    }
    default.ok_or(ParamError::Missing(name))
}

// Numeric strings are accepted; callers frequently hand numbers through as text.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|u| u32::try_from(u).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
