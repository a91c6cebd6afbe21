use bson::oid::ObjectId;
use bson::{Bson, DateTime};
use tracing::debug;

use crate::error::CoercionError;
use crate::schema::{FieldMetadata, FieldType};

/// Convert a request string to the field's declared type.
pub fn coerce(value: &str, field_type: FieldType) -> Result<Bson, CoercionError> {
    let trimmed = value.trim();
    let coerced = match field_type {
        FieldType::ObjectId => ObjectId::parse_str(trimmed).ok().map(Bson::ObjectId),
        FieldType::Date => parse_date(trimmed).map(Bson::DateTime),
        FieldType::Number => parse_number(trimmed),
        FieldType::Boolean => match trimmed {
            "true" | "1" => Some(Bson::Boolean(true)),
            "false" | "0" => Some(Bson::Boolean(false)),
            _ => None,
        },
        FieldType::String | FieldType::Document | FieldType::Mixed => {
            Some(Bson::String(value.to_string()))
        }
    };
    coerced.ok_or_else(|| CoercionError {
        value: value.to_string(),
        expected: field_type,
    })
}

/// Coerce against optional metadata, keeping the raw string when the field is
/// unknown or the value does not convert.
pub(crate) fn coerce_or_raw(value: &str, metadata: Option<&FieldMetadata>) -> Bson {
    let Some(metadata) = metadata else {
        return Bson::String(value.to_string());
    };
    coerce(value, metadata.field_type).unwrap_or_else(|e| {
        debug!(error = %e, "coercion failed, matching on the raw value");
        Bson::String(value.to_string())
    })
}

fn parse_date(value: &str) -> Option<DateTime> {
    if let Ok(dt) = DateTime::parse_rfc3339_str(value) {
        return Some(dt);
    }
    // bare calendar date: 1993-04-01
    if value.len() == 10
        && let Ok(dt) = DateTime::parse_rfc3339_str(&format!("{value}T00:00:00Z"))
    {
        return Some(dt);
    }
    value.parse::<i64>().ok().map(DateTime::from_millis)
}

fn parse_number(value: &str) -> Option<Bson> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(Bson::Int64(n));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(Bson::Double)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id() {
        let id = coerce("5cef28d32e950227cb5bfaa6", FieldType::ObjectId).unwrap();
        assert_eq!(
            id,
            Bson::ObjectId(ObjectId::parse_str("5cef28d32e950227cb5bfaa6").unwrap())
        );
        assert!(coerce("nope", FieldType::ObjectId).is_err());
    }

    #[test]
    fn dates() {
        let dt = coerce("1993-04-01T05:00:00.000Z", FieldType::Date).unwrap();
        assert_eq!(dt, Bson::DateTime(DateTime::from_millis(733640400000)));
        let day = coerce("1993-04-01", FieldType::Date).unwrap();
        assert_eq!(day, Bson::DateTime(DateTime::from_millis(733622400000)));
        assert_eq!(
            coerce("1000", FieldType::Date).unwrap(),
            Bson::DateTime(DateTime::from_millis(1000))
        );
        assert!(coerce("yesterday", FieldType::Date).is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(coerce("18", FieldType::Number).unwrap(), Bson::Int64(18));
        assert_eq!(coerce(" 1 ", FieldType::Number).unwrap(), Bson::Int64(1));
        assert_eq!(coerce("2.5", FieldType::Number).unwrap(), Bson::Double(2.5));
        assert!(coerce("NaN", FieldType::Number).is_err());
        assert!(coerce("abc", FieldType::Number).is_err());
    }

    #[test]
    fn booleans() {
        assert_eq!(coerce("true", FieldType::Boolean).unwrap(), Bson::Boolean(true));
        assert_eq!(coerce("false", FieldType::Boolean).unwrap(), Bson::Boolean(false));
        let err = coerce("maybe", FieldType::Boolean).unwrap_err();
        assert_eq!(err.expected, FieldType::Boolean);
        assert_eq!(err.to_string(), r#"cannot coerce "maybe" to boolean"#);
    }

    #[test]
    fn strings_pass_through_untrimmed() {
        assert_eq!(
            coerce(" Luis ", FieldType::String).unwrap(),
            Bson::String(" Luis ".into())
        );
    }

    #[test]
    fn raw_fallback() {
        let meta = FieldMetadata::new(FieldType::Number);
        assert_eq!(coerce_or_raw("abc", Some(&meta)), Bson::String("abc".into()));
        assert_eq!(coerce_or_raw("7", Some(&meta)), Bson::Int64(7));
        assert_eq!(coerce_or_raw("7", None), Bson::String("7".into()));
    }
}
