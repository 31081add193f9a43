//! CRDs that are owned by other operators, but that this operator reads or writes.

pub mod cert_manager;
