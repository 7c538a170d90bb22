//! Exit codes of the `ztxp` binary. Part of its public contract.

pub const SUCCESS: i32 = 0;
pub const FAILED: i32 = 1; // I/O or unexpected failure
pub const CONFIG_ERROR: i32 = 2; // configuration or arguments rejected
pub const SIGNATURE_INVALID: i32 = 3; // TAM signature rejected
pub const TAM_INVALID: i32 = 4; // structurally invalid or outside the freshness window
