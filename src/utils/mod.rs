pub mod csv_out;
pub mod error;
pub mod logger;
pub mod monitor;
pub mod validation;
