//! Key Model Tests
//!
//! Tests for key ordering and ranges:
//! - compare is a strict total order with fixed cross-type precedence
//! - value to key conversion rejects what cannot be a key
//! - range membership is monotonic as bounds widen
//! - the key generator never goes backwards

use std::cmp::Ordering;

use aerostore::key::{compare, multi_entry_key, to_key, MAX_GENERATED_KEY};
use aerostore::{Factory, Key, KeyGenerator, KeyRange, Value};

// =============================================================================
// Helper Functions
// =============================================================================

/// A sample of keys of every type, in ascending order
fn ascending_keys() -> Vec<Key> {
    vec![
        Key::date(-5.0).unwrap(),
        Key::date(0.0).unwrap(),
        Key::date(1e12).unwrap(),
        Key::number(f64::NEG_INFINITY).unwrap(),
        Key::number(-1.5).unwrap(),
        Key::from(0),
        Key::from(7),
        Key::number(f64::INFINITY).unwrap(),
        Key::from(""),
        Key::from("A"),
        Key::from("a"),
        Key::from("ab"),
        Key::binary(Vec::<u8>::new()),
        Key::binary(vec![0u8]),
        Key::binary(vec![0u8, 1]),
        Key::binary(vec![1u8]),
        Key::array(vec![]),
        Key::array(vec![Key::from(1)]),
        Key::array(vec![Key::from(1), Key::from("x")]),
        Key::array(vec![Key::from("a")]),
        Key::array(vec![Key::array(vec![])]),
    ]
}

// =============================================================================
// Ordering Tests
// =============================================================================

/// The sample is strictly ascending and compare agrees pairwise.
#[test]
fn test_compare_total_order() {
    let keys = ascending_keys();
    for (i, a) in keys.iter().enumerate() {
        assert_eq!(compare(a, a), Ordering::Equal);
        for (j, b) in keys.iter().enumerate() {
            assert_eq!(compare(a, b), i.cmp(&j), "{} vs {}", a, b);
            assert_eq!(compare(a, b), compare(b, a).reverse());
        }
    }
}

/// Any array beats any non-array, whatever it contains.
#[test]
fn test_cross_type_precedence() {
    let smallest_array = Key::array(vec![]);
    let big_binary = Key::binary(vec![255u8; 16]);
    let big_string = Key::from("\u{10FFFF}");
    let big_number = Key::number(f64::INFINITY).unwrap();
    let big_date = Key::date(8.64e15).unwrap();

    assert_eq!(compare(&smallest_array, &big_binary), Ordering::Greater);
    assert_eq!(compare(&Key::binary(Vec::<u8>::new()), &big_string), Ordering::Greater);
    assert_eq!(compare(&Key::from(""), &big_number), Ordering::Greater);
    assert_eq!(compare(&Key::number(f64::NEG_INFINITY).unwrap(), &big_date), Ordering::Greater);
}

/// Sorting by the derived Ord gives the same order as compare.
#[test]
fn test_ord_matches_compare() {
    let mut keys = ascending_keys();
    keys.reverse();
    keys.sort();
    assert_eq!(keys, ascending_keys());
}

/// Factory::cmp reports -1, 0 and 1.
#[test]
fn test_factory_cmp() {
    let factory = Factory::in_memory();
    assert_eq!(factory.cmp(&Value::from(1), &Value::from("1")).unwrap(), -1);
    assert_eq!(factory.cmp(&Value::from("b"), &Value::from("a")).unwrap(), 1);
    assert_eq!(factory.cmp(&Value::from(3), &Value::from(3.0)).unwrap(), 0);
    assert_eq!(
        factory.cmp(&Value::Null, &Value::from(1)).unwrap_err().name(),
        "InvalidKey"
    );
}

// =============================================================================
// Conversion Tests
// =============================================================================

/// Values that are not keys are rejected with InvalidKey.
#[test]
fn test_invalid_keys_rejected() {
    for value in [
        Value::Null,
        Value::Bool(true),
        Value::Undefined,
        Value::Number(f64::NAN),
        Value::Date(f64::NAN),
        Value::object([("a", Value::from(1))]),
        Value::from(vec![Value::from(1), Value::Null]),
    ] {
        assert_eq!(to_key(&value).unwrap_err().name(), "InvalidKey", "{}", value);
    }
}

/// NaN cannot become a key through any constructor, so lookups never see it.
#[test]
fn test_nan_never_becomes_a_key() {
    assert_eq!(Key::number(f64::NAN).unwrap_err().name(), "InvalidKey");
    assert_eq!(Key::date(f64::NAN).unwrap_err().name(), "InvalidKey");
    assert!(Key::try_from(f64::NAN).is_err());
    assert!(Key::try_from(&Value::from(vec![Value::Number(f64::NAN)])).is_err());
    assert_eq!(
        aerostore::Query::from_value(&Value::Number(f64::NAN)).unwrap_err().name(),
        "DataError"
    );
}

/// Arrays convert element by element.
#[test]
fn test_array_conversion() {
    let value = Value::from(vec![Value::from(1), Value::from("x"), Value::from(vec![Value::from(2)])]);
    let key = to_key(&value).unwrap();
    assert_eq!(
        key,
        Key::array(vec![Key::from(1), Key::from("x"), Key::array(vec![Key::from(2)])])
    );
}

/// Multi-entry conversion skips invalid elements and duplicates.
#[test]
fn test_multi_entry_key() {
    let value = Value::from(vec![
        Value::from("a"),
        Value::Null,
        Value::from("b"),
        Value::from("a"),
    ]);
    assert_eq!(
        multi_entry_key(&value).unwrap(),
        Key::array(vec![Key::from("a"), Key::from("b")])
    );
    assert_eq!(multi_entry_key(&Value::from(4)).unwrap(), Key::from(4));
}

// =============================================================================
// Range Tests
// =============================================================================

/// lower > upper is RangeInvalid; equal bounds with an open side are empty.
#[test]
fn test_range_construction() {
    assert_eq!(
        KeyRange::bound(Key::from(5), Key::from(1), false, false)
            .unwrap_err()
            .name(),
        "RangeInvalid"
    );

    let empty = KeyRange::bound(Key::from(3), Key::from(3), true, false).unwrap();
    assert!(!empty.includes(&Key::from(3)));

    let only = KeyRange::only(Key::from("k"));
    assert!(only.includes(&Key::from("k")));
    assert!(!only.includes(&Key::from("kk")));
}

/// Widening a bound to None never drops a member.
#[test]
fn test_range_membership_monotonic() {
    let keys = ascending_keys();
    let narrow = KeyRange::bound(Key::from(0), Key::from("a"), true, true).unwrap();
    let no_lower = KeyRange::upper_bound(Key::from("a"), true);
    let no_upper = KeyRange::lower_bound(Key::from(0), true);
    let all = KeyRange::all();

    for key in &keys {
        if narrow.includes(key) {
            assert!(no_lower.includes(key));
            assert!(no_upper.includes(key));
        }
        if no_lower.includes(key) || no_upper.includes(key) {
            assert!(all.includes(key));
        }
    }
    assert!(narrow.includes(&Key::from(7)));
    assert!(!narrow.includes(&Key::from(0)));
    assert!(!narrow.includes(&Key::from("a")));
}

// =============================================================================
// Key Generator Tests
// =============================================================================

/// Generated keys strictly increase across interleaved updates.
#[test]
fn test_generator_monotonic() {
    let mut generator = KeyGenerator::new();
    let mut last = 0;
    let mut current = generator.current();

    for step in 0..50u32 {
        if step % 3 == 0 {
            generator.possibly_update(&Key::number(f64::from(step) * 2.5).unwrap());
        } else if step % 7 == 0 {
            generator.possibly_update(&Key::from("not a number"));
        } else {
            let key = generator.generate_key().unwrap();
            assert!(key > last);
            last = key;
        }
        assert!(generator.current() >= current);
        current = generator.current();
    }
}

/// An explicit key at the ceiling exhausts the generator.
#[test]
fn test_generator_ceiling() {
    let mut generator = KeyGenerator::new();
    generator.possibly_update(&Key::number(MAX_GENERATED_KEY as f64 - 1.0).unwrap());
    assert_eq!(generator.generate_key().unwrap(), MAX_GENERATED_KEY);
    assert_eq!(generator.generate_key().unwrap_err().name(), "ConstraintError");

    let mut generator = KeyGenerator::new();
    generator.possibly_update(&Key::number(1e300).unwrap());
    assert_eq!(generator.generate_key().unwrap_err().name(), "ConstraintError");
}
