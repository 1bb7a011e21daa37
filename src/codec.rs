//! Value Codec.
//!
//! Encodes device-originated payloads in the line format (`{name:value,...}`,
//! trailing-comma elision on every closing brace/bracket) and decodes the
//! three inbound directive shapes. The encoder is hand-written directly
//! into a buffer with `core::fmt::Write`; the decoder leans on `serde_json`
//! since the inbound shapes are free-form JSON rather than a fixed wire
//! grammar.

use std::fmt::Write as _;

use serde_json::Value as Json;

use crate::error::CodecError;
use crate::named::{Name, NamedCollection, NamedValue};
use crate::registry::DataStream;
use crate::value::{Scalar, Tag, Value};

/// Append a single [`Scalar`] in its bare (non-parameter) wire form.
fn write_scalar(out: &mut String, scalar: &Scalar) -> Result<(), CodecError> {
    match scalar {
        Scalar::I32(v) => write!(out, "{v}"),
        Scalar::I16(v) => write!(out, "{v}"),
        Scalar::I8(v) => write!(out, "{v}"),
        Scalar::U32(v) => write!(out, "{v}"),
        Scalar::U16(v) => write!(out, "{v}"),
        Scalar::U8(v) => write!(out, "{v}"),
        Scalar::F32(v) => write!(out, "{v}"),
        Scalar::F64(v) => write!(out, "{v}"),
        Scalar::Bool(v) => write!(out, "{v}"),
        Scalar::Str(v) => write!(out, "\"{v}\""),
    }
    .map_err(|_| CodecError::BufferTooSmall)
}

/// Append a bare [`Value`]: a scalar, or `[v1,v2,...]` for dimension>1.
pub fn write_value(out: &mut String, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Scalar(s) => write_scalar(out, s),
        Value::Array(items) => {
            out.push('[');
            for item in items {
                write_scalar(out, item)?;
                out.push(',');
            }
            drop_trailing_comma(out);
            out.push(']');
            Ok(())
        }
    }
}

/// Append the extended parameter form `{t:<tag>,v:<value>}`.
pub fn write_param_value(out: &mut String, value: &Value, tag: Tag) -> Result<(), CodecError> {
    write!(out, "{{\"t\":\"{}\",\"v\":", tag.wire_name()).map_err(|_| CodecError::BufferTooSmall)?;
    write_value(out, value)?;
    out.push('}');
    Ok(())
}

/// Drop a trailing `,` immediately before the cursor: when closing any
/// container, if the preceding character is `,`, drop it.
fn drop_trailing_comma(out: &mut String) {
    if out.ends_with(',') {
        out.pop();
    }
}

/// Encode a flat named collection as `{name:value,...}` (status/data/resources, etc).
pub fn encode_named_collection(collection: &NamedCollection) -> Result<String, CodecError> {
    let mut out = String::new();
    out.push('{');
    for item in collection.iter() {
        write!(out, "\"{}\":", item.name()).map_err(|_| CodecError::BufferTooSmall)?;
        write_value(&mut out, &item.get())?;
        out.push(',');
    }
    drop_trailing_comma(&mut out);
    out.push('}');
    Ok(out)
}

/// Encode a named collection in the parameter wire form: every value wrapped
/// as `{t:...,v:...}` (used for `dev/cfg`).
pub fn encode_param_collection(collection: &NamedCollection) -> Result<String, CodecError> {
    let mut out = String::new();
    out.push('{');
    for item in collection.iter() {
        write!(out, "\"{}\":", item.name()).map_err(|_| CodecError::BufferTooSmall)?;
        write_param_value(&mut out, &item.get(), item.tag())?;
        out.push(',');
    }
    drop_trailing_comma(&mut out);
    out.push('}');
    Ok(out)
}

/// Encode the `dev/cfg` reply: `{"cfg":{"cid":<cid>,"cfg":{...}}}`. The
/// outer/inner `cfg` nesting matches the device's section-scoping convention
/// for acknowledging a parameter update.
pub fn encode_cfg_reply(cid: u32, params: &NamedCollection) -> Result<String, CodecError> {
    let mut out = String::new();
    write!(out, "{{\"cfg\":{{\"cid\":{cid},\"cfg\":").map_err(|_| CodecError::BufferTooSmall)?;
    out.push_str(&encode_param_collection(params)?);
    out.push_str("}}");
    Ok(out)
}

/// Encode a `dev/cmd/res` reply: `{"cid":<cid>,"res":<res>}`, optionally with
/// a returned value collection.
pub fn encode_cmd_result(
    cid: u32,
    res: i32,
    values: Option<&NamedCollection>,
) -> Result<String, CodecError> {
    let mut out = String::new();
    write!(out, "{{\"cid\":{cid},\"res\":{res}").map_err(|_| CodecError::BufferTooSmall)?;
    if let Some(values) = values {
        if !values.is_empty() {
            out.push_str(",\"val\":");
            out.push_str(&encode_named_collection(values)?);
        }
    }
    out.push('}');
    Ok(out)
}

/// Encode a `dev/rsc/upd/res` reply: `{"cid":<cid>,"res":<code>}`.
pub fn encode_rsc_update_result(cid: u32, code: i32) -> Result<String, CodecError> {
    let mut out = String::new();
    write!(out, "{{\"cid\":{cid},\"res\":{code}}}").map_err(|_| CodecError::BufferTooSmall)?;
    Ok(out)
}

/// Encode a `dev/data` publish: stream id, optional model/tags/geo-fix, and
/// the stream's values under `val`.
pub fn encode_data_publish(stream: &DataStream) -> Result<String, CodecError> {
    let mut out = String::new();
    out.push('{');
    write!(out, "\"id\":\"{}\",", stream.stream_id).map_err(|_| CodecError::BufferTooSmall)?;
    if let Some(model) = &stream.model {
        write!(out, "\"model\":\"{model}\",").map_err(|_| CodecError::BufferTooSmall)?;
    }
    if let Some(tags) = &stream.tags {
        write!(out, "\"tags\":\"{tags}\",").map_err(|_| CodecError::BufferTooSmall)?;
    }
    if let Some(geo) = &stream.geo {
        write!(
            out,
            "\"lat\":{},\"lon\":{},\"alt\":{},\"time\":{},",
            geo.lat, geo.lon, geo.alt, geo.time
        )
        .map_err(|_| CodecError::BufferTooSmall)?;
    }
    out.push_str("\"val\":");
    out.push_str(&encode_named_collection(&stream.collection)?);
    out.push('}');
    Ok(out)
}

/// Encode the resource table (`dev/rsc`): `{name:"version",...}`.
pub fn encode_resource_table(entries: &[(Name, Name)]) -> Result<String, CodecError> {
    let mut out = String::new();
    out.push('{');
    for (name, version) in entries {
        write!(out, "\"{name}\":\"{version}\",").map_err(|_| CodecError::BufferTooSmall)?;
    }
    drop_trailing_comma(&mut out);
    out.push('}');
    Ok(out)
}

/// A parameter update directive, inbound on `dev/cfg/upd`.
#[derive(Debug, Clone)]
pub struct ParamUpdateRequest {
    pub cid: u32,
    pub updates: Vec<(String, Value)>,
}

/// Decode `{"cfg":{"cid":<cid>,"cfg":{"<name>":{"t":...,"v":...},...}}}`.
pub fn decode_param_update(payload: &str) -> Result<ParamUpdateRequest, CodecError> {
    let root: Json = serde_json::from_str(payload).map_err(|_| CodecError::Malformed)?;
    let outer = root.get("cfg").ok_or(CodecError::Malformed)?;
    let cid = outer
        .get("cid")
        .and_then(Json::as_u64)
        .ok_or(CodecError::Malformed)? as u32;
    let inner = outer.get("cfg").ok_or(CodecError::Malformed)?;
    let map = inner.as_object().ok_or(CodecError::Malformed)?;

    let mut updates = Vec::with_capacity(map.len());
    for (name, entry) in map {
        let tag_name = entry.get("t").and_then(Json::as_str).ok_or(CodecError::Malformed)?;
        let tag = Tag::from_wire_name(tag_name).ok_or(CodecError::Malformed)?;
        let raw = entry.get("v").ok_or(CodecError::Malformed)?;
        let value = json_to_value(raw, tag)?;
        updates.push((name.clone(), value));
    }
    Ok(ParamUpdateRequest { cid, updates })
}

/// A command directive, inbound on `dev/cmd`.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub cid: u32,
    pub name: String,
    pub args: Vec<(String, Value)>,
}

/// Decode `{"req":"<name>","cid":<cid>,"arg":{"<name>":<value>,...}}`.
pub fn decode_command(payload: &str) -> Result<CommandRequest, CodecError> {
    let root: Json = serde_json::from_str(payload).map_err(|_| CodecError::Malformed)?;
    let name = root.get("req").and_then(Json::as_str).ok_or(CodecError::Malformed)?.to_string();
    let cid = root.get("cid").and_then(Json::as_u64).unwrap_or(0) as u32;
    let mut args = Vec::new();
    if let Some(map) = root.get("arg").and_then(Json::as_object) {
        for (name, raw) in map {
            args.push((name.clone(), json_to_untagged_value(raw)?));
        }
    }
    Ok(CommandRequest { cid, name, args })
}

/// A resource-update directive, inbound on `dev/rsc/upd`.
#[derive(Debug, Clone)]
pub struct ResourceDirective {
    pub cid: u32,
    pub name: String,
    pub old_version: String,
    pub new_version: String,
    pub uri: String,
    pub size: u64,
    pub md5: [u8; 16],
}

/// Decode `{"name":...,"old":...,"new":...,"uri":...,"size":...,"md5":"<hex>"[,"cid":...]}`.
pub fn decode_resource_directive(payload: &str) -> Result<ResourceDirective, CodecError> {
    let root: Json = serde_json::from_str(payload).map_err(|_| CodecError::Malformed)?;
    let get_str = |k: &str| root.get(k).and_then(Json::as_str).map(str::to_string);
    let name = get_str("name").ok_or(CodecError::Malformed)?;
    let old_version = get_str("old").ok_or(CodecError::Malformed)?;
    let new_version = get_str("new").ok_or(CodecError::Malformed)?;
    let uri = get_str("uri").ok_or(CodecError::Malformed)?;
    let size = root.get("size").and_then(Json::as_u64).ok_or(CodecError::Malformed)?;
    let md5_hex = get_str("md5").ok_or(CodecError::Malformed)?;
    let md5_bytes = hex::decode(&md5_hex).map_err(|_| CodecError::Malformed)?;
    if md5_bytes.len() != 16 {
        return Err(CodecError::Malformed);
    }
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&md5_bytes);
    let cid = root.get("cid").and_then(Json::as_u64).unwrap_or(0) as u32;
    Ok(ResourceDirective {
        cid,
        name,
        old_version,
        new_version,
        uri,
        size,
        md5,
    })
}

fn json_to_value(raw: &Json, tag: Tag) -> Result<Value, CodecError> {
    if let Some(arr) = raw.as_array() {
        let mut scalars = heapless::Vec::new();
        for item in arr {
            let scalar = json_to_scalar(item, tag)?;
            scalars.push(scalar).map_err(|_| CodecError::DimensionMismatch)?;
        }
        return Ok(Value::Array(scalars));
    }
    Ok(Value::Scalar(json_to_scalar(raw, tag)?))
}

fn json_to_scalar(raw: &Json, tag: Tag) -> Result<Scalar, CodecError> {
    Ok(match tag {
        Tag::I32 => Scalar::I32(raw.as_i64().ok_or(CodecError::TypeMismatch)? as i32),
        Tag::I16 => Scalar::I16(raw.as_i64().ok_or(CodecError::TypeMismatch)? as i16),
        Tag::I8 => Scalar::I8(raw.as_i64().ok_or(CodecError::TypeMismatch)? as i8),
        Tag::U32 => Scalar::U32(raw.as_u64().ok_or(CodecError::TypeMismatch)? as u32),
        Tag::U16 => Scalar::U16(raw.as_u64().ok_or(CodecError::TypeMismatch)? as u16),
        Tag::U8 => Scalar::U8(raw.as_u64().ok_or(CodecError::TypeMismatch)? as u8),
        Tag::F32 => Scalar::F32(raw.as_f64().ok_or(CodecError::TypeMismatch)? as f32),
        Tag::F64 => Scalar::F64(raw.as_f64().ok_or(CodecError::TypeMismatch)?),
        Tag::Bool => Scalar::Bool(raw.as_bool().ok_or(CodecError::TypeMismatch)?),
        Tag::Str => {
            let s = raw.as_str().ok_or(CodecError::TypeMismatch)?;
            Scalar::Str(heapless::String::try_from(s).map_err(|_| CodecError::BufferTooSmall)?)
        }
    })
}

/// Infer a value's tag from raw JSON (used for command arguments, which carry
/// no explicit `t`/`v` wrapper).
fn json_to_untagged_value(raw: &Json) -> Result<Value, CodecError> {
    match raw {
        Json::Bool(b) => Ok(Value::from(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i as i32))
            } else {
                Ok(Value::from(n.as_f64().ok_or(CodecError::TypeMismatch)?))
            }
        }
        Json::String(s) => Ok(Value::Scalar(Scalar::Str(
            heapless::String::try_from(s.as_str()).map_err(|_| CodecError::BufferTooSmall)?,
        ))),
        Json::Array(items) => {
            let mut scalars = heapless::Vec::new();
            for item in items {
                let v = json_to_untagged_value(item)?;
                if let Value::Scalar(s) = v {
                    scalars.push(s).map_err(|_| CodecError::DimensionMismatch)?;
                }
            }
            Ok(Value::Array(scalars))
        }
        _ => Err(CodecError::TypeMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::named::Name;
    use crate::registry::GeoFix;
    use crate::value::Value;

    #[test]
    fn data_publish_omits_absent_optional_fields() {
        let mut c = NamedCollection::new();
        c.push(NamedValue::new("temp", Tag::F64, 1, Value::from(21.5)));
        let stream = DataStream::new(Name::try_from("rig1").unwrap(), c);
        let out = encode_data_publish(&stream).unwrap();
        assert_eq!(out, "{\"id\":\"rig1\",\"val\":{\"temp\":21.5}}");
    }

    #[test]
    fn data_publish_includes_geo_fix_when_present() {
        let mut stream = DataStream::new(Name::try_from("rig1").unwrap(), NamedCollection::new());
        stream.geo = Some(GeoFix {
            lat: 1.0,
            lon: 2.0,
            alt: 3.0,
            time: 4,
        });
        let out = encode_data_publish(&stream).unwrap();
        assert_eq!(out, "{\"id\":\"rig1\",\"lat\":1,\"lon\":2,\"alt\":3,\"time\":4,\"val\":{}}");
    }

    #[test]
    fn trailing_comma_elided_on_array_and_object() {
        let mut c = NamedCollection::new();
        c.push(NamedValue::new("a", Tag::U32, 1, Value::from(1u32)));
        let out = encode_named_collection(&c).unwrap();
        assert_eq!(out, "{\"a\":1}");
    }

    #[test]
    fn param_form_is_extended() {
        let mut c = NamedCollection::new();
        c.push(NamedValue::new("rate", Tag::U32, 1, Value::from(10u32)));
        let out = encode_param_collection(&c).unwrap();
        assert_eq!(out, "{\"rate\":{\"t\":\"u32\",\"v\":10}}");
    }

    #[test]
    fn cfg_reply_matches_scenario_s3() {
        let mut c = NamedCollection::new();
        c.push(NamedValue::new("rate", Tag::U32, 1, Value::from(10u32)));
        let out = encode_cfg_reply(7, &c).unwrap();
        assert_eq!(out, "{\"cfg\":{\"cid\":7,\"cfg\":{\"rate\":{\"t\":\"u32\",\"v\":10}}}}");
    }

    #[test]
    fn decode_param_update_matches_scenario_s3() {
        let payload = r#"{"cfg":{"cid":7,"cfg":{"rate":{"t":"u32","v":10}}}}"#;
        let req = decode_param_update(payload).unwrap();
        assert_eq!(req.cid, 7);
        assert_eq!(req.updates.len(), 1);
        assert_eq!(req.updates[0].0, "rate");
        assert_eq!(req.updates[0].1, Value::from(10u32));
    }

    #[test]
    fn decode_command_matches_scenario_s4() {
        let payload = r#"{"req":"reboot","cid":42,"arg":{}}"#;
        let req = decode_command(payload).unwrap();
        assert_eq!(req.cid, 42);
        assert_eq!(req.name, "reboot");
        assert!(req.args.is_empty());
    }

    #[test]
    fn decode_resource_directive_roundtrip() {
        let short_md5 = r#"{"name":"firmware","old":"1.0","new":"1.1","uri":"http://h/f","size":1024,"md5":"aabb"}"#;
        // sanity: malformed md5 (not 16 bytes) is rejected
        assert!(decode_resource_directive(short_md5).is_err());

        let good = r#"{"name":"firmware","old":"1.0","new":"1.1","uri":"http://h/f","size":1024,"md5":"00112233445566778899aabbccddeeff"}"#;
        let dir = decode_resource_directive(good).unwrap();
        assert_eq!(dir.name, "firmware");
        assert_eq!(dir.size, 1024);
        assert_eq!(dir.md5[0], 0x00);
        assert_eq!(dir.md5[15], 0xff);
    }

    #[test]
    fn array_value_encodes_without_trailing_comma() {
        let mut v = heapless::Vec::new();
        v.push(Scalar::I32(1)).unwrap();
        v.push(Scalar::I32(2)).unwrap();
        let mut out = String::new();
        write_value(&mut out, &Value::Array(v)).unwrap();
        assert_eq!(out, "[1,2]");
    }
}
