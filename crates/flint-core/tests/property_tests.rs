//! Property-based tests for mnemonic normalization and activity tracking

use flint_core::{Activity, MnemonicService};
use proptest::prelude::*;

const WORDS: &[&str] = &[
    "abandon", "ability", "able", "about", "above", "absent", "absorb", "abstract", "absurd",
    "abuse", "access", "accident", "zoo", "zone", "wrist", "yellow",
];

fn activity() -> impl Strategy<Value = Activity> {
    prop_oneof![
        Just(Activity::Unknown),
        Just(Activity::Inactive),
        Just(Activity::Active),
    ]
}

proptest! {
    #[test]
    fn normalize_is_idempotent(
        words in prop::collection::vec(prop::sample::select(WORDS), 12),
        upper in any::<bool>(),
        padding in "[ \t\n]{1,3}",
    ) {
        let joined = words.join(&padding);
        let input = if upper { joined.to_uppercase() } else { joined };
        let once = MnemonicService::normalize(&input).unwrap();
        let twice = MnemonicService::normalize(once.as_str()).unwrap();
        prop_assert_eq!(once.as_str(), twice.as_str());
        prop_assert_eq!(once.word_count(), 12);
    }

    #[test]
    fn normalize_rejects_other_word_counts(
        count in (1usize..30).prop_filter("accepted", |n| *n != 12 && *n != 24),
    ) {
        let input = vec!["abandon"; count].join(" ");
        prop_assert!(MnemonicService::normalize(&input).is_err());
    }

    #[test]
    fn activity_never_reverts(
        start in activity(),
        observations in prop::collection::vec(any::<bool>(), 0..20),
    ) {
        let mut state = start;
        let mut seen = start.is_active();
        for observed in observations {
            state = state.merge(observed);
            seen |= observed;
            prop_assert_eq!(state.is_active(), seen);
        }
    }
}

#[test]
fn generated_phrases_validate_after_normalization() {
    for _ in 0..8 {
        let phrase = MnemonicService::generate().unwrap();
        assert_eq!(phrase.as_str().split(' ').count(), 12);
        let normalized = MnemonicService::normalize(phrase.as_str()).unwrap();
        assert!(MnemonicService::validate(normalized.as_str()));
    }
}
