// crates/orbit-core/src/kernel/tests/error_tests.rs
#![cfg(test)]

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use crate::kernel::error::Error;
use crate::plugin_system::error::PluginSystemError;

#[test]
fn test_plugin_system_errors_convert() {
    let err: Error = PluginSystemError::NotFound {
        identifier: "a@^1.0.0".to_string(),
    }
    .into();
    assert_eq!(
        err.to_string(),
        "Plugin system error: No registered plugin matches 'a@^1.0.0'"
    );
    assert!(err.source().is_some());
}

#[test]
fn test_io_error_keeps_context() {
    let err = Error::io(
        io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        "read_settings",
        PathBuf::from("/h/orbit.json"),
    );
    let message = err.to_string();
    assert!(message.contains("read_settings"));
    assert!(message.contains("/h/orbit.json"));
    assert!(err.source().is_some());
}

#[test]
fn test_config_error_without_source() {
    let err = Error::config("/h/orbit.ini", "unsupported settings format");
    assert_eq!(
        err.to_string(),
        "Configuration error in '/h/orbit.ini': unsupported settings format"
    );
    assert!(err.source().is_none());
}

#[test]
fn test_install_error_chains_cause() {
    let err = PluginSystemError::Install {
        identifier: "a".to_string(),
        message: "task 'b' failed".to_string(),
        completed: Vec::new(),
        source: Some(Box::new(PluginSystemError::NotFound {
            identifier: "b".to_string(),
        })),
    };
    assert_eq!(err.to_string(), "Install of 'a' failed after 0 completed task(s): task 'b' failed");
    assert_eq!(err.source().unwrap().to_string(), "No registered plugin matches 'b'");
}

#[test]
fn test_cycle_message() {
    let err = PluginSystemError::CyclicDependency(vec!["a@1.0.0".into(), "b@1.0.0".into(), "a@1.0.0".into()]);
    assert_eq!(err.to_string(), "Circular dependency detected: a@1.0.0 -> b@1.0.0 -> a@1.0.0");
}
