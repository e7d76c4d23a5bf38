//! Typed ID definitions for rootstock entities.

use crate::define_id;

define_id!(DeviceId, "dev");
define_id!(ReadingId, "rdg");
define_id!(ScitizenId, "sci");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_device_id_prefix() {
        let id = DeviceId::new();
        assert!(id.to_string().starts_with("dev_"));
    }

    #[test]
    fn test_reading_id_rejects_device_prefix() {
        let device = DeviceId::new().to_string();
        let err = device.parse::<ReadingId>().unwrap_err();
        assert!(err.is_prefix_error());
        assert_eq!(
            err,
            crate::IdError::InvalidPrefix {
                expected: "rdg",
                actual: "dev".to_string(),
            }
        );
    }

    #[test]
    fn test_scitizen_id_missing_separator() {
        let result: Result<ScitizenId, _> = "sci01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::MissingSeparator);
    }

    #[test]
    fn test_empty_id() {
        let result: Result<DeviceId, _> = "".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<DeviceId, _> = "dev_not-a-ulid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_device_id_json_is_prefixed_string() {
        let id = DeviceId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_prefixes_unique() {
        let prefixes = [DeviceId::PREFIX, ReadingId::PREFIX, ScitizenId::PREFIX];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len());
    }

    proptest! {
        #[test]
        fn parse_inverts_display(raw in any::<u128>()) {
            let id = ScitizenId::from_ulid(crate::Ulid(raw));
            let parsed: ScitizenId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
