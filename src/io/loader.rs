use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ValidationError;
use crate::kernel::ProcessSpec;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPid {
    Number(u32),
    Text(String),
}

#[derive(Deserialize)]
struct RawProcess {
    #[serde(alias = "id")]
    pid: RawPid,
    #[serde(alias = "arrival_time")]
    arrival: i64,
    #[serde(alias = "burst_time")]
    burst: i64,
    #[serde(default)]
    priority: i32,
}

#[derive(Deserialize)]
struct RawTiming {
    #[serde(alias = "arrival_time")]
    arrival: i64,
    #[serde(alias = "burst_time")]
    burst: i64,
    #[serde(default)]
    priority: i32,
}

/// Accepts `P3`, `p3` and `3`.
pub fn parse_pid(text: &str) -> Option<u32> {
    let digits = text.strip_prefix(['P', 'p']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn pid_or_malformed(text: &str, line: usize) -> Result<u32, ValidationError> {
    parse_pid(text).ok_or_else(|| ValidationError::Malformed {
        line,
        reason: format!("invalid process id '{}'", text),
    })
}

fn number<T: std::str::FromStr>(text: &str, field: &str, line: usize) -> Result<T, ValidationError> {
    text.parse().map_err(|_| ValidationError::Malformed {
        line,
        reason: format!("invalid {} '{}'", field, text),
    })
}

/// Whether `arg` is an inline list such as `P1:0:5:2,P2:1:3`.
pub fn is_inline(arg: &str) -> bool {
    !arg.is_empty()
        && arg.split(',').all(|item| {
            let fields: Vec<&str> = item.split(':').collect();
            matches!(fields.len(), 3 | 4) && parse_pid(fields[0]).is_some()
        })
}

/// `P1:0:5:2,P2:1:3:1`. The "line" of an error is the 1-based item index.
pub fn parse_inline(text: &str) -> Result<Vec<ProcessSpec>, ValidationError> {
    text.split(',')
        .enumerate()
        .map(|(idx, item)| {
            let line = idx + 1;
            let fields: Vec<&str> = item.trim().split(':').collect();
            if !matches!(fields.len(), 3 | 4) {
                return Err(ValidationError::Malformed {
                    line,
                    reason: format!("expected ID:ARRIVAL:BURST[:PRIORITY], got '{}'", item),
                });
            }
            spec_from_fields(&fields, line)
        })
        .collect()
}

fn spec_from_fields(fields: &[&str], line: usize) -> Result<ProcessSpec, ValidationError> {
    let pid = pid_or_malformed(fields[0], line)?;
    let arrival = number(fields[1], "arrival", line)?;
    let burst = number(fields[2], "burst", line)?;
    let priority = match fields.get(3) {
        Some(text) => number(text, "priority", line)?,
        None => 0,
    };

    Ok(ProcessSpec::new(pid, arrival, burst, priority))
}

/// One process per line: `ID ARRIVAL BURST [PRIORITY]`. Blank lines and
/// anything after `#` are ignored.
pub fn parse_text(text: &str) -> Result<Vec<ProcessSpec>, ValidationError> {
    let mut specs = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let fields: Vec<&str> = content.split_whitespace().collect();
        if !matches!(fields.len(), 3 | 4) {
            return Err(ValidationError::Malformed {
                line,
                reason: format!("expected 'ID ARRIVAL BURST [PRIORITY]', got '{}'", content),
            });
        }
        specs.push(spec_from_fields(&fields, line)?);
    }

    Ok(specs)
}

fn json_error(err: serde_json::Error) -> ValidationError {
    ValidationError::Malformed {
        line: err.line(),
        reason: err.to_string(),
    }
}

/// A JSON array of process objects, or an object keyed by process id.
pub fn parse_json(text: &str) -> Result<Vec<ProcessSpec>, ValidationError> {
    if text.trim_start().starts_with('[') {
        let raw: Vec<RawProcess> = serde_json::from_str(text).map_err(json_error)?;
        return raw
            .into_iter()
            .enumerate()
            .map(|(idx, process)| {
                let pid = match process.pid {
                    RawPid::Number(pid) => pid,
                    RawPid::Text(text) => pid_or_malformed(&text, idx + 1)?,
                };
                Ok(ProcessSpec::new(pid, process.arrival, process.burst, process.priority))
            })
            .collect();
    }

    let raw: BTreeMap<String, RawTiming> = serde_json::from_str(text).map_err(json_error)?;
    raw.into_iter()
        .enumerate()
        .map(|(idx, (key, timing))| {
            let pid = pid_or_malformed(&key, idx + 1)?;
            Ok(ProcessSpec::new(pid, timing.arrival, timing.burst, timing.priority))
        })
        .collect()
}

/// Detects the format of a process spec document and parses it.
pub fn load_process_specs(text: &str) -> Result<Vec<ProcessSpec>, ValidationError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        parse_json(text)
    } else if is_inline(text.trim()) {
        parse_inline(text.trim())
    } else {
        parse_text(text)
    }
}
