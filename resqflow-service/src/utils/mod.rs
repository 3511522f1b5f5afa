pub mod password;

pub use password::generate_temporary_secret;
