use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallIdentifierError {
    #[error("invalid gRPC method format: {0}")]
    Format(String),

    #[error("invalid gRPC method: service name missing in {0}")]
    MissingService(String),

    #[error("invalid gRPC method: method name missing in {0}")]
    MissingMethod(String),
}

/// Splits a full method (`/package.Service/Method`) at its last slash.
pub fn extract_service_method(full_method: &str) -> Result<(&str, &str), CallIdentifierError> {
    let format = || CallIdentifierError::Format(full_method.to_string());

    let (service, method) = full_method
        .strip_prefix('/')
        .ok_or_else(format)?
        .rsplit_once('/')
        .ok_or_else(format)?;

    if service.is_empty() {
        return Err(CallIdentifierError::MissingService(full_method.to_string()));
    }
    if method.is_empty() {
        return Err(CallIdentifierError::MissingMethod(full_method.to_string()));
    }
    Ok((service, method))
}
