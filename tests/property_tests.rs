/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs: validation totality,
/// normalization stability, retry termination and balance arithmetic.
use lookup_broker::models::{Service, ServicePayload};
use lookup_broker::providers::TransportError;
use lookup_broker::retry::{call_with_retry, RetryPolicy, UpstreamError};
use lookup_broker::storage::{MemoryStorage, PrincipalUpsert, Storage};
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Property: validation and normalization never panic, whatever the client sends
proptest! {
    #[test]
    fn validation_never_panics(raw in "\\PC*") {
        for service in Service::ALL {
            let _ = service.validate(&raw);
            let _ = service.normalize(&raw);
        }
    }

    #[test]
    fn normalization_is_idempotent_for_textual_services(raw in "\\PC{0,30}") {
        for service in [Service::Vehicle, Service::Ip, Service::NationalId] {
            let once = service.normalize(&raw);
            prop_assert_eq!(service.normalize(&once), once);
        }
    }
}

// Property: client formatting noise never changes a mobile lookup's outcome
proptest! {
    #[test]
    fn mobile_formatting_noise_does_not_change_the_outcome(
        split in 1usize..10,
        sep in prop::sample::select(vec![" ", "-", "  "]),
        prefixed in proptest::bool::ANY
    ) {
        let plain = "9876543210";
        let formatted = format!("{}{}{}", &plain[..split], sep, &plain[split..]);
        let candidate = if prefixed {
            format!("+91 {}", formatted)
        } else {
            formatted
        };

        prop_assert!(Service::Mobile.validate(&candidate).is_ok());
        prop_assert_eq!(Service::Mobile.normalize(&candidate), plain);
    }
}

// Property: vehicle plates survive separator noise and case
proptest! {
    #[test]
    fn vehicle_plates_survive_separator_noise(
        letters in "[a-z]{2}",
        digits in "[0-9]{2}",
        tail in "[a-z0-9]{1,6}",
        sep in prop::sample::select(vec!["", " ", "-", "  "])
    ) {
        let plate = format!("{}{}{}{}{}", letters, sep, digits, sep, tail);
        prop_assert!(Service::Vehicle.validate(&plate).is_ok());
        prop_assert_eq!(
            Service::Vehicle.normalize(&plate),
            format!("{}{}{}", letters, digits, tail).to_uppercase()
        );
    }
}

// Property: every dotted quad is a valid IP query and already canonical
proptest! {
    #[test]
    fn dotted_quads_always_validate(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        let addr = format!("{}.{}.{}.{}", a, b, c, d);
        prop_assert!(Service::Ip.validate(&addr).is_ok());
        prop_assert_eq!(Service::Ip.normalize(&addr), addr.clone());
        prop_assert_eq!(Service::Ip.normalize(&format!("  {}  ", addr)), addr);
    }
}

// Property: national-id normalization keeps exactly the digits, in order
proptest! {
    #[test]
    fn national_id_normalization_extracts_digits_in_order(raw in "\\PC{0,30}") {
        let normalized = Service::NationalId.normalize(&raw);
        let expected: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        prop_assert_eq!(normalized, expected);
    }

    #[test]
    fn grouped_sixteen_digit_ids_validate(digits in "[0-9]{16}") {
        let grouped = format!(
            "{} {} {} {}",
            &digits[..4], &digits[4..8], &digits[8..12], &digits[12..]
        );
        prop_assert!(Service::NationalId.validate(&grouped).is_ok());
        prop_assert_eq!(Service::NationalId.normalize(&grouped), digits);
    }
}

// Property: any object payload parses for every service; unknown fields
// never break the typed view
proptest! {
    #[test]
    fn any_object_payload_parses(
        fields in prop::collection::hash_map("x[a-z]{0,7}", "\\PC{0,12}", 0..6)
    ) {
        let payload = serde_json::to_value(&fields).unwrap();
        for service in Service::ALL {
            prop_assert!(ServicePayload::parse(service, &payload).is_ok());
        }
    }
}

// Property: the retry loop always terminates within the policy bounds,
// whatever error text the provider embeds
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn retry_loop_always_terminates(message in "\\PC{0,40}") {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let policy = RetryPolicy::new(3, Duration::ZERO);
            let calls = AtomicU32::new(0);
            let result = call_with_retry(&policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                let payload = json!({ "error": message.clone() });
                async move { Ok::<_, TransportError>(payload) }
            })
            .await;

            let made = calls.load(Ordering::SeqCst);
            match result {
                // Blank error values are not errors at all
                Ok(_) => assert_eq!(made, 1),
                // Terminal classifications stop on the first attempt
                Err(UpstreamError::Absent(_)) | Err(UpstreamError::Rejected(_)) => {
                    assert_eq!(made, 1)
                }
                // Retryable classifications run the policy dry
                Err(UpstreamError::Exhausted { attempts, .. }) => {
                    assert_eq!(attempts, 3);
                    assert_eq!(made, 3);
                }
            }
        });
    }
}

// Property: storage-side balance arithmetic is exact over any sequence
// of grants and debits
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn storage_balance_arithmetic_is_exact(
        start in 0i64..10_000,
        ops in prop::collection::vec((proptest::bool::ANY, 1i64..500), 1..20)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async move {
            let storage = MemoryStorage::new();
            storage
                .upsert_principal(PrincipalUpsert {
                    id: "u1".to_string(),
                    email: None,
                    username: None,
                    signup_credits: start,
                    origin: None,
                    terms_accepted: true,
                    privacy_accepted: true,
                })
                .await
                .unwrap();

            let mut expected = start;
            for (is_grant, amount) in ops {
                let balance = if is_grant {
                    expected += amount;
                    storage.grant_credits("u1", amount).await.unwrap()
                } else {
                    expected -= amount;
                    storage.debit_credits("u1", amount).await.unwrap()
                };
                assert_eq!(balance, expected);
            }

            let principal = storage.get_principal("u1").await.unwrap().unwrap();
            assert_eq!(principal.credits, expected);
        });
    }
}
