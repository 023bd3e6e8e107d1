mod host_process_builder;
