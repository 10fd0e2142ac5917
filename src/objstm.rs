//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded stream begins with `/N` pairs of `object-number offset`,
//! offsets relative to `/First`, followed by the object bodies.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::{parse_object, to_parse_error};

/// Decode an object stream and return every object it contains.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };

    if let Some(kind) = dict.get("Type").and_then(|o| o.as_name()) {
        if kind != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /Type /{}", kind)));
        }
    }

    let count = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /N".to_string()))? as usize;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /First".to_string()))? as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::InvalidPdf(format!(
            "object stream /First {} beyond decoded length {}",
            first,
            data.len()
        )));
    }

    let pairs = parse_header(&data[..first], count)?;
    let mut objects = HashMap::with_capacity(pairs.len());
    for (id, relative) in pairs {
        let start = first + relative;
        let body = data.get(start..).ok_or_else(|| {
            Error::InvalidPdf(format!("object {} offset {} outside object stream", id, start))
        })?;
        let (_, obj) = parse_object(body).map_err(|e| to_parse_error(start, e))?;
        objects.insert(id, obj);
    }

    Ok(objects)
}

fn parse_header(mut header: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let id = next_int(&mut header)? as u32;
        let offset = next_int(&mut header)? as usize;
        pairs.push((id, offset));
    }
    Ok(pairs)
}

fn next_int(input: &mut &[u8]) -> Result<i64> {
    match token(*input) {
        Ok((rest, Token::Integer(v))) if v >= 0 => {
            *input = rest;
            Ok(v)
        },
        _ => Err(Error::InvalidPdf("malformed object stream header".to_string())),
    }
}
