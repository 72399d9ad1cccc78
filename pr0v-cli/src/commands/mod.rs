pub mod provision;

pub use provision::{ProvisionArgs, handle_provision};
