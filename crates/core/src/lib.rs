pub mod money;
pub mod rut;

pub use money::Money;
pub use rut::{format_rut, validate_rut, Rut, RutError};
