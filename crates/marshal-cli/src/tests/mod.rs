//! In-process tests driving complete invocations through [`crate::Runner`].

mod support;
