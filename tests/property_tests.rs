//! Property-based tests for name similarity and phone normalization.

use proptest::prelude::*;
use rust_hsds_analysis::matcher::{normalize_phone, service_name_score, similarity};

proptest! {
    #[test]
    fn similarity_is_symmetric(a in "\\PC{0,24}", b in "\\PC{0,24}") {
        prop_assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn similarity_of_identical_names_is_one(s in "[a-zA-Z' ]{1,30}") {
        prop_assert_eq!(similarity(&s, &s), 1.0);
    }

    #[test]
    fn similarity_stays_in_unit_range(a in "\\PC{0,24}", b in "\\PC{0,24}") {
        let score = similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn similarity_ignores_case(s in "[a-zA-Z ]{1,30}") {
        prop_assert_eq!(similarity(&s.to_uppercase(), &s.to_lowercase()), 1.0);
    }

    #[test]
    fn service_names_match_themselves_after_trim(s in "[a-zA-Z' ]{1,30}") {
        prop_assume!(!s.trim().is_empty());
        let padded = format!("  {}  ", s.to_uppercase());
        prop_assert_eq!(service_name_score(&padded, &s), Some(1.0));
    }

    #[test]
    fn formatted_us_numbers_normalize_to_eleven_digits(
        area in 200u16..=999u16,
        exchange in 200u16..=999u16,
        line in 0u16..=9999u16,
    ) {
        let plain = format!("{area}{exchange}{line:04}");
        let formatted = format!("+1 ({area}) {exchange}-{line:04}");
        let expected = format!("1{plain}");

        prop_assert_eq!(normalize_phone(&plain), expected.clone());
        prop_assert_eq!(normalize_phone(&formatted), expected);
    }

    #[test]
    fn normalized_phones_are_digits_only(raw in "\\PC{0,30}") {
        prop_assert!(normalize_phone(&raw).chars().all(|c| c.is_ascii_digit()));
    }
}

#[test]
fn empty_names_have_zero_similarity() {
    assert_eq!(similarity("", ""), 0.0);
}

#[test]
fn documented_phone_forms_agree() {
    assert_eq!(normalize_phone("+1 (234) 567-8900"), "12345678900");
    assert_eq!(normalize_phone("2345678900"), "12345678900");
}
