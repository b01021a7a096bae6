//! # Property Tests
//!
//! Signing and canonical form over generated field sets.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use relay_bus::{InMemoryNonceStore, ReplayGuard, Verifier};
    use relay_types::{
        canonical_bytes, current_timestamp, Event, EventType, Rejection, SharedSecret, Signer,
        SigningKey,
    };
    use serde_json::{Map, Value};
    use std::sync::Arc;

    const SECRET: &str = "property-secret";

    fn verifier() -> Verifier {
        let key = SigningKey::new(&SharedSecret::new(SECRET).unwrap()).unwrap();
        Verifier::new(key, ReplayGuard::new(Arc::new(InMemoryNonceStore::new()), "prop"))
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<String>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            Just(Value::Null),
            prop::collection::vec("[a-z/\"\\\\é]{0,8}", 0..4).prop_map(Value::from),
        ]
    }

    /// Payload fields that do not collide with routing or security fields.
    fn payload() -> impl Strategy<Value = Vec<(String, Value)>> {
        prop::collection::vec(("x_[a-zA-Z0-9_]{1,12}", field_value()), 0..8)
    }

    fn event(room: &str, fields: &[(String, Value)]) -> Event {
        fields
            .iter()
            .fold(
                Event::builder(EventType::NewMessage).in_room(room),
                |builder, (key, value)| builder.field(key.clone(), value.clone()),
            )
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn prop_canonical_form_ignores_insertion_order(fields in payload()) {
            let forward: Map<String, Value> = fields.iter().cloned().collect();
            let reversed: Map<String, Value> = fields.iter().rev().cloned().collect();
            // Later duplicates win in a map, so compare only when keys are unique.
            prop_assume!(forward.len() == fields.len());
            prop_assert_eq!(canonical_bytes(&forward), canonical_bytes(&reversed));
        }

        #[test]
        fn prop_signed_envelope_verifies(room in "[a-z0-9]{1,16}", fields in payload()) {
            let signer = Signer::new(&SharedSecret::new(SECRET).unwrap()).unwrap();
            let raw = signer.sign(event(&room, &fields)).to_json_bytes().unwrap();
            let verified = block_on(verifier().verify_at(&raw, current_timestamp()));
            prop_assert!(verified.is_ok(), "{:?}", verified);
            let verified = verified.unwrap();
            prop_assert_eq!(verified.event().field("chatRoomId"), Some(&Value::from(room)));
        }

        #[test]
        fn prop_any_changed_value_is_rejected(
            fields in payload(),
            replacement in "[A-Z]{1,8}",
        ) {
            prop_assume!(!fields.is_empty());
            let signer = Signer::new(&SharedSecret::new(SECRET).unwrap()).unwrap();
            let mut wire = signer.sign(event("r1", &fields)).to_wire();
            let (key, original) = &fields[fields.len() - 1];
            let replacement = Value::from(replacement);
            prop_assume!(wire.get(key) == Some(original) && *original != replacement);
            wire.insert(key.clone(), replacement);

            let raw = serde_json::to_vec(&Value::Object(wire)).unwrap();
            let outcome = block_on(verifier().verify_at(&raw, current_timestamp()));
            prop_assert_eq!(outcome, Err(Rejection::InvalidSignature));
        }
    }
}
