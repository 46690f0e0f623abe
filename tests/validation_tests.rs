/// Query validation and normalization rules for each lookup service.
use lookup_broker::models::{AppSettings, Service};
use std::collections::HashMap;

#[test]
fn mobile_validation_comprehensive() {
    // Valid Indian mobile numbers in common client formats
    assert!(Service::Mobile.validate("9876543210").is_ok());
    assert!(Service::Mobile.validate("+919876543210").is_ok());
    assert!(Service::Mobile.validate("+91 98765 43210").is_ok());
    assert!(Service::Mobile.validate("098765 43210").is_ok());

    // Invalid inputs
    assert!(Service::Mobile.validate("").is_err());
    assert!(Service::Mobile.validate("123").is_err());
    assert!(Service::Mobile.validate("12345").is_err());
    assert!(Service::Mobile.validate("not-a-number").is_err());
    // US number, wrong numbering plan
    assert!(Service::Mobile.validate("+14155552671").is_err());
}

#[test]
fn mobile_normalization_strips_country_code_and_formatting() {
    assert_eq!(Service::Mobile.normalize("9876543210"), "9876543210");
    assert_eq!(Service::Mobile.normalize("+91 98765 43210"), "9876543210");
    assert_eq!(Service::Mobile.normalize("+919876543210"), "9876543210");
    assert_eq!(Service::Mobile.normalize("098765 43210"), "9876543210");
}

#[test]
fn vehicle_validation_comprehensive() {
    assert!(Service::Vehicle.validate("MH12AB1234").is_ok());
    assert!(Service::Vehicle.validate("mh12ab1234").is_ok());
    assert!(Service::Vehicle.validate("mh 12-ab 1234").is_ok());
    assert!(Service::Vehicle.validate("DL8CAF5031").is_ok());

    // Must start with two letters then two digits
    assert!(Service::Vehicle.validate("1234MH12").is_err());
    assert!(Service::Vehicle.validate("M12AB1234").is_err());
    assert!(Service::Vehicle.validate("MH12").is_err());
    assert!(Service::Vehicle.validate("").is_err());
}

#[test]
fn vehicle_normalization_uppercases_and_strips_separators() {
    assert_eq!(Service::Vehicle.normalize("mh 12-ab 1234"), "MH12AB1234");
    assert_eq!(Service::Vehicle.normalize("MH12AB1234"), "MH12AB1234");
    assert_eq!(Service::Vehicle.normalize("dl8caf5031"), "DL8CAF5031");
}

#[test]
fn ip_validation_comprehensive() {
    assert!(Service::Ip.validate("8.8.8.8").is_ok());
    assert!(Service::Ip.validate(" 1.2.3.4 ").is_ok());
    assert!(Service::Ip.validate("255.255.255.255").is_ok());

    assert!(Service::Ip.validate("999.1.1.1").is_err());
    assert!(Service::Ip.validate("8.8.8").is_err());
    assert!(Service::Ip.validate("abcd").is_err());
    assert!(Service::Ip.validate("::1").is_err());
    // Leading zeros in an octet are rejected
    assert!(Service::Ip.validate("08.8.8.8").is_err());
}

#[test]
fn ip_normalization_trims_whitespace() {
    assert_eq!(Service::Ip.normalize(" 8.8.8.8 "), "8.8.8.8");
    assert_eq!(Service::Ip.normalize("1.2.3.4"), "1.2.3.4");
}

#[test]
fn national_id_validation_comprehensive() {
    assert!(Service::NationalId.validate("1234567890123456").is_ok());
    assert!(Service::NationalId.validate("1234 5678 9012 3456").is_ok());
    assert!(Service::NationalId.validate("1234-5678-9012-3456").is_ok());

    // 15 and 17 digits
    assert!(Service::NationalId.validate("123456789012345").is_err());
    assert!(Service::NationalId.validate("12345678901234567").is_err());
    assert!(Service::NationalId.validate("1234-abcd-9012-3456").is_err());
    assert!(Service::NationalId.validate("").is_err());
}

#[test]
fn national_id_normalization_keeps_digits_only() {
    assert_eq!(
        Service::NationalId.normalize("1234 5678 9012 3456"),
        "1234567890123456"
    );
    assert_eq!(
        Service::NationalId.normalize("1234-5678-9012-3456"),
        "1234567890123456"
    );
}

#[test]
fn service_names_parse_and_round_trip() {
    for service in Service::ALL {
        let parsed: Service = service.as_str().parse().unwrap();
        assert_eq!(parsed, service);
    }

    assert!("sim".parse::<Service>().is_err());
    assert!("MOBILE".parse::<Service>().is_err());
    assert!("".parse::<Service>().is_err());
}

#[test]
fn default_settings_price_every_service() {
    let settings = AppSettings::default();
    assert_eq!(settings.signup_credits, 10);
    for service in Service::ALL {
        assert_eq!(settings.cost_for(service), 1);
    }
}

#[test]
fn missing_cost_entries_fall_back_to_one_credit() {
    let settings = AppSettings {
        service_costs: HashMap::new(),
        signup_credits: 0,
    };
    for service in Service::ALL {
        assert_eq!(settings.cost_for(service), 1);
    }
}
