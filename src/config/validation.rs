use crate::config::models::{FilterDef, PredicateDef, RouteDefinition};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Unknown predicate '{name}' in route '{route_id}'")]
    UnknownPredicate { route_id: String, name: String },

    #[error("Unknown filter '{name}' in route '{route_id}'")]
    UnknownFilter { route_id: String, name: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// The closed set of predicate names the compiler understands.
const KNOWN_PREDICATES: &[&str] = &["Path"];

/// The closed set of filter names the compiler understands. Unknown
/// names are a config error here, not a runtime surprise.
const KNOWN_FILTERS: &[&str] = &["RequestRateLimiter", "Retry", "CircuitBreaker", "StripPrefix"];

/// Route definition validator
pub struct RouteDefinitionValidator;

impl RouteDefinitionValidator {
    /// Validate a single route definition before it is compiled.
    pub fn validate(def: &RouteDefinition) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if def.id.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "id".to_string(),
            });
        }

        if let Err(e) = Self::validate_uri(def) {
            errors.push(e);
        }

        if def.predicates.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("route '{}' predicates", def.id),
            });
        }

        for predicate in &def.predicates {
            if let Err(e) = Self::validate_predicate(&def.id, predicate) {
                errors.push(e);
            }
        }

        for filter in &def.filters {
            if let Err(e) = Self::validate_filter(&def.id, filter) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_uri(def: &RouteDefinition) -> ValidationResult<()> {
        let context = format!("route '{}' uri", def.id);
        match url::Url::parse(&def.uri) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context,
                        message: format!(
                            "URI scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context,
                        message: "URI must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context,
                message: format!("Invalid URI format: {e}"),
            }),
        }
    }

    fn validate_predicate(route_id: &str, predicate: &PredicateDef) -> ValidationResult<()> {
        if !KNOWN_PREDICATES.contains(&predicate.name.as_str()) {
            return Err(ValidationError::UnknownPredicate {
                route_id: route_id.to_string(),
                name: predicate.name.clone(),
            });
        }

        if predicate.name == "Path" {
            match predicate.args.get("pattern") {
                None => {
                    return Err(ValidationError::MissingField {
                        field: format!("route '{route_id}' Path predicate 'pattern' arg"),
                    });
                }
                Some(pattern) if !pattern.starts_with('/') => {
                    return Err(ValidationError::InvalidField {
                        field: format!("route '{route_id}' Path pattern"),
                        message: "Path patterns must start with '/'".to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    fn validate_filter(route_id: &str, filter: &FilterDef) -> ValidationResult<()> {
        if !KNOWN_FILTERS.contains(&filter.name.as_str()) {
            return Err(ValidationError::UnknownFilter {
                route_id: route_id.to_string(),
                name: filter.name.clone(),
            });
        }

        match filter.name.as_str() {
            "RequestRateLimiter" => {
                for key in ["replenish-rate", "burst-capacity"] {
                    if let Some(value) = filter.args.get(key) {
                        if value.parse::<u64>().map(|v| v == 0).unwrap_or(true) {
                            return Err(ValidationError::InvalidField {
                                field: format!("route '{route_id}' RequestRateLimiter '{key}'"),
                                message: "Must be an integer greater than 0".to_string(),
                            });
                        }
                    }
                }
            }
            "Retry" => {
                if let Some(value) = filter.args.get("retries") {
                    if value.parse::<u32>().is_err() {
                        return Err(ValidationError::InvalidField {
                            field: format!("route '{route_id}' Retry 'retries'"),
                            message: "Must be a non-negative integer".to_string(),
                        });
                    }
                }
            }
            "CircuitBreaker" => {
                if filter.args.get("name").map(|n| n.is_empty()).unwrap_or(false) {
                    return Err(ValidationError::InvalidField {
                        field: format!("route '{route_id}' CircuitBreaker 'name'"),
                        message: "Breaker name cannot be empty".to_string(),
                    });
                }
            }
            "StripPrefix" => {
                if let Some(value) = filter.args.get("parts") {
                    if value.parse::<usize>().is_err() {
                        return Err(ValidationError::InvalidField {
                            field: format!("route '{route_id}' StripPrefix 'parts'"),
                            message: "Must be a non-negative integer".to_string(),
                        });
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
