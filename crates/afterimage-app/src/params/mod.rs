pub mod store;
pub mod types;

pub use store::{PARAM_SLOTS, ParamStore, PersistedParam};
pub use types::{ParamDef, ParamValue};
