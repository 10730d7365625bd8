#![allow(dead_code)]

use proptest::prelude::*;

/// Strategy for generating namespaced cache keys
pub fn cache_key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,12}:[a-z0-9_-]{1,24}"
}

/// Strategy for generating JSON payloads of the kind handlers return
pub fn json_payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        "[a-zA-Z ]{0,32}".prop_map(|name| serde_json::json!({ "name": name })),
        (any::<i64>(), any::<bool>())
            .prop_map(|(id, active)| serde_json::json!({ "id": id, "active": active })),
        prop::collection::vec(any::<u32>(), 0..16).prop_map(|ids| serde_json::json!(ids)),
    ]
}

/// TTLs in seconds
pub fn ttl_strategy() -> impl Strategy<Value = u64> {
    1u64..86_400
}
