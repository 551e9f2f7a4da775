//! Per-domain validation

use std::fmt::Display;

use crate::error::{ConfigError, ConfigResult};

/// A configuration domain that can check its own values
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Dotted path of the domain, used in error messages
    fn domain_name(&self) -> &'static str;

    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        domain_error(self.domain_name(), message)
    }
}

fn domain_error(domain: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Domain {
        domain: domain.to_string(),
        message: message.into(),
    }
}

/// Reject zero and negative values
pub fn validate_positive<T>(value: T, field: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + Display,
{
    if value <= T::default() {
        return Err(domain_error(
            domain,
            format!("{} must be greater than 0, got {}", field, value),
        ));
    }
    Ok(())
}

/// Require an `ip:port` socket address; port 0 picks a free port
pub fn validate_socket_address(value: &str, field: &str, domain: &str) -> ConfigResult<()> {
    value
        .parse::<std::net::SocketAddr>()
        .map(|_| ())
        .map_err(|e| domain_error(domain, format!("{} {:?} is not a socket address: {}", field, value, e)))
}
