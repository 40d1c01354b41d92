//! Behaviour suites for the orchestration core.
