//! Cross-module integration tests: end-to-end scenarios and invariants that
//! span more than one component. Single-component unit tests live alongside
//! their module (`#[cfg(test)] mod tests` in `usl.rs`, `governor.rs`, etc).
