//! Prefixed environment configuration shared by the server variants.

use std::collections::HashMap;
use std::time::Duration;

use envconfig::Envconfig;

use crate::ConfigError;

/// Configs whose metrics namespace defaults to the environment prefix.
pub trait Namespaced {
    fn namespace(&self) -> Option<&str>;
    fn set_namespace(&mut self, namespace: String);
}

/// Loads `T` from `{PREFIX}_{FIELD}` environment variables, e.g. `MYAPP_API_HOST`
/// for prefix `myapp`. The namespace falls back to the prefix when unset.
pub fn load_config<T>(prefix: &str) -> Result<T, ConfigError>
where
    T: Envconfig + Namespaced,
{
    let scope = format!("{}_", prefix.to_uppercase());
    let vars: HashMap<String, String> = std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&scope)
                .map(|field| (field.to_string(), value))
        })
        .collect();
    load_config_from(prefix, &vars)
}

/// [`load_config`] over an explicit map of unprefixed field names.
pub fn load_config_from<T>(prefix: &str, vars: &HashMap<String, String>) -> Result<T, ConfigError>
where
    T: Envconfig + Namespaced,
{
    let mut config = T::init_from_hashmap(vars)?;
    if config.namespace().map_or(true, str::is_empty) {
        config.set_namespace(prefix.to_string());
    }
    Ok(config)
}

/// Checks that `address` is `host:port` with a numeric port. The host may be empty.
pub fn validate_address(address: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidAddress(address.to_string());

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;
    if host.contains(char::is_whitespace) || host.starts_with('[') != host.ends_with(']') {
        return Err(invalid());
    }
    Ok(())
}

/// Zero means "no limit", as in the environment variables.
pub fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
