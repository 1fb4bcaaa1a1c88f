pub mod password;

pub use password::PasswordDigest;
