mod support;

mod orchestrator_tests;
mod registry_tests;
mod shutdown_tests;
