//! Line protocol encoding/decoding
//!
//! All board firmware speaks the same newline-delimited ASCII protocol:
//! requests are `*VERB:arg1,arg2\n` (`*VERB\n` when there are no
//! arguments), successful responses are `+VALUE,VALUE\n` and firmware
//! faults are `-CODE\n`.
//!
//! The codec is pure and stateless: it never touches a port, and the same
//! input always produces the same output. Response values are converted
//! positionally against the schema the caller expects for the verb.

use crate::error::CommsError;

/// Leading byte of every request line
pub const REQUEST_SENTINEL: u8 = b'*';
/// Leading byte of a successful response line
pub const OK_SENTINEL: u8 = b'+';
/// Leading byte of a firmware error response line
pub const ERROR_SENTINEL: u8 = b'-';

/// A typed protocol value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// The expected type of a positional response field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Str,
}

impl Value {
    /// Format the value in its on-wire form.
    ///
    /// Integers are decimal, booleans are `1`/`0`, floats use a fixed
    /// three decimal places so firmware parsers see a stable width.
    fn to_wire(&self) -> Result<String, CommsError> {
        match self {
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(format!("{v:.3}")),
            Value::Bool(v) => Ok(if *v { "1" } else { "0" }.to_string()),
            Value::Str(s) => {
                if s.bytes()
                    .any(|b| b == b',' || b == b':' || b == b'\n' || b == b'\r')
                {
                    return Err(CommsError::Protocol(format!(
                        "string argument contains a delimiter: {s:?}"
                    )));
                }
                Ok(s.clone())
            }
        }
    }

    fn parse(field: &str, kind: ValueKind) -> Result<Value, CommsError> {
        match kind {
            ValueKind::Int => field
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| CommsError::Protocol(format!("expected integer, got {field:?}"))),
            ValueKind::Float => field
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| CommsError::Protocol(format!("expected float, got {field:?}"))),
            ValueKind::Bool => match field {
                "1" => Ok(Value::Bool(true)),
                "0" => Ok(Value::Bool(false)),
                _ => Err(CommsError::Protocol(format!(
                    "expected boolean 1/0, got {field:?}"
                ))),
            },
            ValueKind::Str => Ok(Value::Str(field.to_string())),
        }
    }
}

/// Encode a request line for the given verb and arguments.
///
/// The trailing newline is included; the result can be written to the
/// transport as-is.
pub fn encode(verb: &str, args: &[Value]) -> Result<Vec<u8>, CommsError> {
    if verb.is_empty() || !verb.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return Err(CommsError::Protocol(format!(
            "invalid command verb {verb:?}"
        )));
    }

    let mut line = String::with_capacity(verb.len() + 2 + args.len() * 8);
    line.push(REQUEST_SENTINEL as char);
    line.push_str(verb);
    for (i, arg) in args.iter().enumerate() {
        line.push(if i == 0 { ':' } else { ',' });
        line.push_str(&arg.to_wire()?);
    }
    line.push('\n');
    Ok(line.into_bytes())
}

/// Decode a response line against the expected schema for the verb.
///
/// A `-CODE` line surfaces as [`CommsError::Board`]; any line that is not
/// a well-formed response (missing sentinel, wrong field count, field
/// that fails type conversion) is a [`CommsError::Protocol`].
pub fn decode(line: &[u8], schema: &[ValueKind]) -> Result<Vec<Value>, CommsError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| CommsError::Protocol("response is not ASCII".to_string()))?
        .trim_end_matches(['\r', '\n']);

    if let Some(payload) = text.strip_prefix(ERROR_SENTINEL as char) {
        let code = payload
            .parse::<u16>()
            .map_err(|_| CommsError::Protocol(format!("bad error code {payload:?}")))?;
        return Err(CommsError::Board(code));
    }

    let Some(payload) = text.strip_prefix(OK_SENTINEL as char) else {
        return Err(CommsError::Protocol(format!(
            "response missing status sentinel: {text:?}"
        )));
    };

    if schema.is_empty() {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        return Err(CommsError::Protocol(format!(
            "expected empty response, got {payload:?}"
        )));
    }

    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != schema.len() {
        return Err(CommsError::Protocol(format!(
            "expected {} fields, got {}",
            schema.len(),
            fields.len()
        )));
    }
    fields
        .iter()
        .zip(schema)
        .map(|(field, kind)| Value::parse(field, *kind))
        .collect()
}
