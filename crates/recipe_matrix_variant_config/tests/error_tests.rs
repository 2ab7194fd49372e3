use recipe_matrix_variant_config::{VariantConfig, VariantConfigError};

#[test]
fn test_invalid_yaml_reports_parse_error() {
    let err = VariantConfig::from_yaml_str("python: [3.8").unwrap_err();
    assert!(matches!(err, VariantConfigError::ParseError { path: None, .. }));
    assert!(err.to_string().contains("<string>"));
}

#[test]
fn test_root_must_be_a_mapping() {
    let err = VariantConfig::from_yaml_str("- python\n- numpy").unwrap_err();
    assert!(matches!(err, VariantConfigError::InvalidConfig { .. }));
}

#[test]
fn test_nested_lists_are_rejected() {
    let err = VariantConfig::from_yaml_str("python:\n  - [3.8, 3.9]").unwrap_err();
    match err {
        VariantConfigError::InvalidConfig { key, .. } => assert_eq!(key, "python"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_empty_document_is_an_empty_config() {
    let config = VariantConfig::from_yaml_str("").unwrap();
    assert!(config.is_empty());
}
