use crate::{HostProcessInfoBuilder, ModelError, SessionSummary};

fn complete_builder() -> HostProcessInfoBuilder {
    HostProcessInfoBuilder::default()
        .with_pid(4242)
        .with_endpoint("pipe:/tmp/rhost-test.sock")
        .with_host_path("/opt/rhost/R.Host")
        .with_started_at(1_700_000_000)
}

#[test]
fn given_all_fields_when_building_then_returns_info() {
    let info = complete_builder().build().unwrap();

    assert_eq!(info.pid, 4242);
    assert_eq!(info.endpoint, "pipe:/tmp/rhost-test.sock");
    assert_eq!(info.exit_code, None);
}

/// **VALUE**: PID 0 would make the supervisor signal the whole process group
/// on Unix when stopping a host.
#[test]
fn given_zero_pid_when_building_then_returns_validation_error() {
    let result = complete_builder().with_pid(0).build();

    match result {
        Err(ModelError::Validation { message, .. }) => assert_eq!(message, "PID must be non-zero"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn given_empty_endpoint_when_building_then_returns_validation_error() {
    let result = complete_builder().with_endpoint("").build();

    assert!(matches!(result, Err(ModelError::Validation { .. })));
}

#[test]
fn given_summary_when_serialized_then_uses_camel_case_keys() {
    let summary = SessionSummary {
        id: String::from("s1"),
        user: String::from("alice"),
        state: String::from("Running"),
        host: Some(complete_builder().with_exit_code(Some(0)).build().unwrap()),
    };

    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["host"]["hostPath"], "/opt/rhost/R.Host");
    assert_eq!(json["host"]["startedAt"], 1_700_000_000u64);
    assert_eq!(json["host"]["exitCode"], 0);
}
