//! Base64 transport encoding for shape descriptors and invocation results.
//!
//! Both directions use JSON as the generic codec and the standard base64
//! alphabet as the text wrapper, so any serde-serializable value makes the
//! trip and comes back equal. Two exceptions: non-finite floats are refused
//! at encode time, and nested options (`Some(None)`) come back as `None`.

mod finite;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::registry::SchemaRegistry;
use crate::shape::{OutputShape, PrimitiveKind, ShapeDescriptor, DESCRIPTOR_VERSION};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported descriptor version {0}")]
    UnsupportedVersion(u32),

    #[error("result is not serializable: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decodes a base64 shape token into a descriptor without resolving it.
pub fn decode_descriptor(token: &str) -> Result<ShapeDescriptor, CodecError> {
    let bytes = STANDARD.decode(token.trim())?;
    let descriptor: ShapeDescriptor = serde_json::from_slice(&bytes).map_err(CodecError::Decode)?;
    if descriptor.version != DESCRIPTOR_VERSION {
        return Err(CodecError::UnsupportedVersion(descriptor.version));
    }
    Ok(descriptor)
}

/// Produces the token a client sends as `response_format`.
pub fn encode_descriptor(descriptor: &ShapeDescriptor) -> Result<String, CodecError> {
    encode_result(descriptor)
}

/// Keyword fallback for tokens that are not descriptors. Unknown tokens map to `string`.
pub fn primitive_fallback(token: &str) -> PrimitiveKind {
    PrimitiveKind::from_keyword(token).unwrap_or(PrimitiveKind::String)
}

/// Lenient, registry-free decoding. Never fails: anything that is not a
/// self-contained descriptor degrades to the keyword table.
pub fn decode_shape(token: &str) -> OutputShape {
    decode_descriptor(token)
        .ok()
        .and_then(|descriptor| descriptor.shape.into_shape(&SchemaRegistry::default()).ok())
        .unwrap_or_else(|| OutputShape::Primitive(primitive_fallback(token)))
}

pub fn encode_result<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    finite::check(value).map_err(CodecError::Encode)?;
    let bytes = serde_json::to_vec(value).map_err(CodecError::Encode)?;
    Ok(STANDARD.encode(bytes))
}

pub fn decode_result<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    let bytes = STANDARD.decode(text)?;
    serde_json::from_slice(&bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use proptest::prelude::*;
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::*;
    use crate::shape::ShapeSpec;

    #[rstest]
    #[case("str", PrimitiveKind::String)]
    #[case("int", PrimitiveKind::Integer)]
    #[case("float", PrimitiveKind::Float)]
    #[case("bool", PrimitiveKind::Boolean)]
    #[case("zz", PrimitiveKind::String)]
    #[case("", PrimitiveKind::String)]
    #[case("not base64 at all!", PrimitiveKind::String)]
    #[case("e30=", PrimitiveKind::String)] // base64 of "{}"
    fn keywords_and_garbage_degrade_to_primitives(#[case] token: &str, #[case] expected: PrimitiveKind) {
        assert_eq!(decode_shape(token), OutputShape::Primitive(expected));
    }

    #[test]
    fn encoded_descriptor_decodes_to_custom_shape() {
        let token = encode_descriptor(&ShapeDescriptor::new(ShapeSpec::List {
            items: Box::new(ShapeSpec::Integer),
        }))
        .unwrap();

        let shape = decode_shape(&token);
        assert_eq!(
            shape.json_schema(),
            json!({ "type": "array", "items": { "type": "integer" } })
        );
    }

    #[test]
    fn future_descriptor_versions_are_refused() {
        let token = STANDARD.encode(br#"{"version": 2, "shape": {"kind": "integer"}}"#);
        assert!(matches!(
            decode_descriptor(&token),
            Err(CodecError::UnsupportedVersion(2))
        ));
        assert_eq!(decode_shape(&token), OutputShape::Primitive(PrimitiveKind::String));
    }

    #[test]
    fn integer_result_survives_transport() {
        let text = encode_result(&42).unwrap();
        assert_eq!(text, STANDARD.encode("42"));
        assert_eq!(decode_result::<i64>(&text).unwrap(), 42);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Forecast {
        city: String,
        highs: Vec<f64>,
        alerts: BTreeMap<String, bool>,
        note: Option<String>,
    }

    #[test]
    fn structured_result_survives_transport() {
        let forecast = Forecast {
            city: "Oslo".into(),
            highs: vec![3.5, -1.0],
            alerts: BTreeMap::from([("wind".to_string(), true)]),
            note: None,
        };
        let text = encode_result(&forecast).unwrap();
        assert_eq!(decode_result::<Forecast>(&text).unwrap(), forecast);
    }

    #[test]
    fn unserializable_result_is_an_encode_error() {
        // JSON object keys must be strings.
        let value = HashMap::from([((1, 2), "pair")]);
        assert!(matches!(encode_result(&value), Err(CodecError::Encode(_))));
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(f64::NEG_INFINITY)]
    fn non_finite_floats_are_encode_errors(#[case] value: f64) {
        assert!(matches!(encode_result(&value), Err(CodecError::Encode(_))));
        assert!(matches!(encode_result(&vec![1.0, value]), Err(CodecError::Encode(_))));
        assert!(matches!(
            encode_result(&BTreeMap::from([("high", Some(value))])),
            Err(CodecError::Encode(_))
        ));
    }

    #[test]
    fn f32_infinity_is_an_encode_error() {
        assert!(matches!(encode_result(&f32::INFINITY), Err(CodecError::Encode(_))));
        assert_eq!(decode_result::<f32>(&encode_result(&1.5f32).unwrap()).unwrap(), 1.5);
    }

    #[test]
    fn nested_options_collapse() {
        // JSON has a single null, so the outer Some is lost.
        let text = encode_result(&Some(None::<i32>)).unwrap();
        assert_eq!(decode_result::<Option<Option<i32>>>(&text).unwrap(), None);
    }

    #[test]
    fn float_digits_survive_transport() {
        let value = 1.0715660391465826e-75_f64;
        let decoded: f64 = decode_result(&encode_result(&value).unwrap()).unwrap();
        assert_eq!(decoded.to_bits(), value.to_bits());
    }

    fn finite_f64() -> impl Strategy<Value = f64> {
        prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            finite_f64().prop_map(Value::from),
            ".{0,16}".prop_map(Value::from),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::btree_map(".{0,8}", inner, 0..8)
                    .prop_map(|fields| Value::Object(fields.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn finite_floats_round_trip(value in finite_f64()) {
            let decoded: f64 = decode_result(&encode_result(&value).unwrap()).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn integers_round_trip(value in any::<i64>()) {
            let decoded: i64 = decode_result(&encode_result(&value).unwrap()).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn strings_round_trip(value in any::<String>()) {
            let decoded: String = decode_result(&encode_result(&value).unwrap()).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn json_values_round_trip(value in json_value()) {
            let decoded: Value = decode_result(&encode_result(&value).unwrap()).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn non_keyword_tokens_degrade_to_string(
            token in any::<String>().prop_filter("keyword", |t| PrimitiveKind::from_keyword(t).is_none())
        ) {
            prop_assert_eq!(decode_shape(&token), OutputShape::Primitive(PrimitiveKind::String));
        }
    }
}
