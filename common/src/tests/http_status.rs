use crate::HttpStatusCode;

#[test]
fn given_gateway_codes_when_classified_then_only_502_and_504_are_gateway_failures() {
    assert!(HttpStatusCode::BAD_GATEWAY.is_gateway_failure());
    assert!(HttpStatusCode::GATEWAY_TIMEOUT.is_gateway_failure());
    assert!(!HttpStatusCode(500).is_gateway_failure());
    assert!(!HttpStatusCode::OK.is_gateway_failure());
}

#[test]
fn given_status_ranges_when_classified_then_success_client_and_server_are_disjoint() {
    for code in [200u16, 204, 404, 418, 500, 503] {
        let status = HttpStatusCode::from(code);
        let buckets = [
            status.is_success(),
            status.is_client_error(),
            status.is_server_error(),
        ];
        assert_eq!(buckets.iter().filter(|b| **b).count(), 1, "code {code}");
    }
}
