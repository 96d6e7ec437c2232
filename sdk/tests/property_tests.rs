use proptest::prelude::*;
use sdk::descriptor::{split_qualified_name, Arguments, CapabilityDescriptor, Origin, ParamType, SideEffect};
use sdk::errors::{EngineError, ForemanErrorExt};

// User hints never echo the error payload
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-zA-Z0-9_]{12,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::LLMProvider(error_str.clone()),
            EngineError::CapabilityNotFound(error_str.clone()),
            EngineError::ValidationRejected(error_str.clone()),
            EngineError::SandboxExecution(error_str.clone()),
            EngineError::PathDenied(std::path::PathBuf::from(&error_str)),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

proptest! {
    #[test]
    fn test_qualified_names_split_cleanly(
        namespace in "[a-z][a-z0-9_]{0,12}",
        action in "[a-z][a-z0-9_-]{0,12}",
    ) {
        let name = format!("{}:{}", namespace, action);
        prop_assert_eq!(split_qualified_name(&name), Some((namespace.as_str(), action.as_str())));
    }

    #[test]
    fn test_integer_params_reject_non_numeric(value in "[a-zA-Z]{1,10}") {
        let descriptor = CapabilityDescriptor::new("mail:fetch", "Fetch", SideEffect::Read, Origin::Builtin)
            .with_param("limit", ParamType::Integer, true);
        let mut args = Arguments::new();
        args.insert("limit".to_string(), value);
        prop_assert!(descriptor.check_arguments(&args).is_err());
    }

    #[test]
    fn test_integer_params_accept_numbers(value in any::<i32>()) {
        let descriptor = CapabilityDescriptor::new("mail:fetch", "Fetch", SideEffect::Read, Origin::Builtin)
            .with_param("limit", ParamType::Integer, true);
        let mut args = Arguments::new();
        args.insert("limit".to_string(), value.to_string());
        prop_assert!(descriptor.check_arguments(&args).is_ok());
    }
}
