//! Property-based test generators using proptest.
//!
//! Provides strategies for local mutation sequences and clock skews
//! around the conflict epsilon.

use offsync_protocol::{ChangeOperation, EntityType, PendingKey, Timestamp};
use proptest::prelude::*;

/// Strategy for entity types drawn from a small fixed set, so sequences
/// hit the same collections repeatedly.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(vec!["notes", "budgets", "accounts"]).prop_map(EntityType::from)
}

/// Strategy for entity ids drawn from a small pool, so keys collide.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| format!("e{n}"))
}

/// Strategy for queue keys.
pub fn pending_key_strategy() -> impl Strategy<Value = PendingKey> {
    (entity_type_strategy(), entity_id_strategy())
        .prop_map(|(entity_type, id)| PendingKey::new(entity_type, id))
}

/// Strategy for change operations.
pub fn change_operation_strategy() -> impl Strategy<Value = ChangeOperation> {
    prop_oneof![
        2 => Just(ChangeOperation::Create),
        3 => Just(ChangeOperation::Update),
        1 => Just(ChangeOperation::Delete),
    ]
}

/// A local mutation against a keyed entity.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Entity touched.
    pub key: PendingKey,
    /// Operation performed.
    pub operation: ChangeOperation,
}

/// Strategy for a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    (pending_key_strategy(), change_operation_strategy())
        .prop_map(|(key, operation)| Mutation { key, operation })
}

/// Strategy for generating a sequence of mutations.
pub fn mutation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_ops..max_ops)
}

/// Strategy for timestamps within a plausible range (2020 to 2040).
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (1_577_836_800_000i64..2_208_988_800_000i64).prop_map(Timestamp::from_millis)
}

/// Strategy for clock skews in milliseconds, biased toward the one-second
/// conflict epsilon.
pub fn skew_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        3 => -1_500i64..=1_500i64,
        1 => -60_000i64..=60_000i64,
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_stay_in_pool(key in pending_key_strategy()) {
            prop_assert!(key.entity_id.starts_with('e'));
            prop_assert!(["notes", "budgets", "accounts"].contains(&key.entity_type.as_str()));
        }

        #[test]
        fn sequences_respect_bounds(ops in mutation_sequence_strategy(2, 10)) {
            prop_assert!(ops.len() >= 2 && ops.len() < 10);
        }
    }
}
