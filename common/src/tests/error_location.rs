use crate::ErrorLocation;
use std::panic::Location;

#[test]
#[track_caller]
fn given_caller_location_when_formatted_then_shows_file_line_and_column() {
    // GIVEN: A location captured at this call site
    let location = ErrorLocation::from(Location::caller());

    // WHEN: Formatting it
    let formatted = location.to_string();

    // THEN: "[file:line:column]"
    assert!(formatted.starts_with('[') && formatted.ends_with(']'));
    assert!(formatted.contains("error_location.rs"));
    assert!(formatted.contains(&format!(":{}:", location.line)));
}

/// **VALUE**: Every error variant in the workspace relies on `#[track_caller]`
/// propagating through constructor helpers.
///
/// **BUG THIS CATCHES**: A helper losing `#[track_caller]` would make every
/// error point at the helper instead of the failing call site.
#[test]
fn given_two_call_sites_when_capturing_through_helper_then_lines_differ() {
    #[track_caller]
    fn capture() -> ErrorLocation {
        ErrorLocation::from(Location::caller())
    }

    let first = capture();
    let second = capture();

    assert_eq!(first.file, second.file);
    assert_eq!(first.line + 1, second.line);
}
