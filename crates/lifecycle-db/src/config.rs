use lifecycle_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL`, or all of `DB_HOST`, `DB_USER`, `DB_PASSWORD`,
    ///   `DB_NAME` with optional `DB_PORT` (defaults to 5432)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = match get("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => url,
            None => compose_url(&get)?,
        };

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            None => 5,
            Some(raw) => {
                let parsed: u32 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            url,
            max_connections,
        })
    }
}

fn compose_url(get: &impl Fn(&str) -> Option<String>) -> Result<String, AppError> {
    let required = |key: &str| {
        get(key).ok_or_else(|| {
            AppError::ConfigError(format!(
                "DATABASE_URL not set and {key} missing. Required for database operations."
            ))
        })
    };

    let host = required("DB_HOST")?;
    let user = required("DB_USER")?;
    let password = required("DB_PASSWORD")?;
    let name = required("DB_NAME")?;
    let port = get("DB_PORT").unwrap_or_else(|| "5432".to_string());

    Ok(format!("postgres://{user}:{password}@{host}:{port}/{name}"))
}
