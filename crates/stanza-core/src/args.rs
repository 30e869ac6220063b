//! Argument binding
//!
//! Extracts a single named argument from a phase's untyped argument bag and
//! converts it into a typed value. Binding is pure and performs no I/O.

use crate::error::{Error, Result};
use crate::value::{kind_of, ArgMap, FromArg};

/// Bind a required argument
///
/// # Errors
/// - [`Error::MissingArgument`] if `key` is absent
/// - [`Error::TypeMismatch`] if the value cannot be converted to `T`
pub fn arg<T: FromArg>(args: &ArgMap, key: &str) -> Result<T> {
    let value = args
        .get(key)
        .ok_or_else(|| Error::MissingArgument(key.to_string()))?;
    T::from_arg(value).ok_or_else(|| Error::TypeMismatch {
        key: key.to_string(),
        expected: T::EXPECTED,
        actual: kind_of(value),
    })
}

/// Bind an optional argument, falling back to `default` when absent
///
/// A present value is converted exactly like [`arg`]; absence alone never
/// fails.
///
/// # Errors
/// [`Error::TypeMismatch`] if the key is present with the wrong type
pub fn opt_arg<T: FromArg>(args: &ArgMap, key: &str, default: T) -> Result<T> {
    if args.contains_key(key) {
        arg(args, key)
    } else {
        Ok(default)
    }
}

/// Check if an argument key is present
#[inline]
#[must_use]
pub fn arg_exists(args: &ArgMap, key: &str) -> bool {
    args.contains_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn bag(pairs: &[(&str, serde_json::Value)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn required_present() {
        let args = bag(&[("namespace", json!("stanza"))]);
        let ns: String = arg(&args, "namespace").unwrap();
        assert_eq!(ns, "stanza");
    }

    #[test]
    fn required_missing() {
        let args = ArgMap::new();
        let err = arg::<String>(&args, "pod").unwrap_err();
        assert!(matches!(err, Error::MissingArgument(ref k) if k == "pod"));
        assert_eq!(err.to_string(), "Required arg missing: pod");
    }

    #[test]
    fn required_wrong_type() {
        let args = bag(&[("labels", json!("app=db"))]);
        let err = arg::<BTreeMap<String, String>>(&args, "labels").unwrap_err();
        match err {
            Error::TypeMismatch {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, "labels");
                assert_eq!(expected, "mapping of strings");
                assert_eq!(actual, "string");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn optional_present_wrong_type_still_fails() {
        let args = bag(&[("name", json!(42))]);
        assert!(matches!(
            opt_arg(&args, "name", "fallback".to_string()),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn optional_reference_binding() {
        let args = bag(&[("snapshotClass", json!(null))]);
        let class: Option<String> = opt_arg(&args, "snapshotClass", Some("x".into())).unwrap();
        assert_eq!(class, None);
    }

    proptest! {
        #[test]
        fn optional_absent_yields_default(key in "[a-zA-Z]{1,12}", default in ".*", n in any::<i64>()) {
            let args = ArgMap::new();
            prop_assert_eq!(opt_arg(&args, &key, default.clone()).unwrap(), default);
            prop_assert_eq!(opt_arg(&args, &key, n).unwrap(), n);
            prop_assert_eq!(opt_arg::<Option<String>>(&args, &key, None).unwrap(), None);
        }
    }
}
