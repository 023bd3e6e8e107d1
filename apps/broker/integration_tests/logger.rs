use rhost_broker::logger::{COMPONENT, initialize};

use std::fs::read_to_string;

use log::info;
use tempfile::TempDir;

/// **VALUE**: One run file is created and every record lands in it.
///
/// **WHY THIS MATTERS**: The run file is what gets attached to bug reports;
/// host output logged under its own target must end up there too.
///
/// **BUG THIS CATCHES**: Would catch if a second `initialize` call tried to
/// install another global logger or picked a different file.
#[test]
fn given_log_dir_when_initialized_twice_then_one_run_file_receives_records() {
    // GIVEN: An empty log directory
    let dir = TempDir::new().unwrap();

    // WHEN: Initializing twice and logging
    let first = initialize(dir.path()).unwrap();
    let second = initialize(dir.path()).unwrap();
    info!("broker-marker");
    info!(target: "engine_host", "[4242] engine starting");

    // THEN: Both calls agree on the file
    assert_eq!(first, second);

    // AND: It is named for this component and process
    let name = first.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with(&format!("{COMPONENT}_")));
    assert!(name.ends_with(&format!("_{}.log", std::process::id())));

    // AND: Both records were written
    let contents = read_to_string(&first).unwrap();
    assert!(contents.contains("broker-marker"));
    assert!(contents.contains("[engine_host] [4242] engine starting"));
}
