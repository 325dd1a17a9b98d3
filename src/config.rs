use crate::domain::Address;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub reward_token: Address,
    /// Account that receives restaked rewards before they reach the pool.
    pub intermediary: Address,
    /// Initial supervisor of a fresh store.
    pub supervisor: Address,
    pub seed_batch_size: usize,
    pub seed_max_elapsed: Duration,
    pub seed_file: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let reward_token = required_address(&env_map, "REWARD_TOKEN")?;
        let intermediary = required_address(&env_map, "INTERMEDIARY")?;
        let supervisor = required_address(&env_map, "SUPERVISOR")?;

        let seed_batch_size = env_map
            .get("SEED_BATCH_SIZE")
            .map(|s| s.as_str())
            .unwrap_or("100")
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SEED_BATCH_SIZE".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let seed_max_elapsed = env_map
            .get("SEED_MAX_ELAPSED_SECS")
            .map(|s| s.as_str())
            .unwrap_or("30")
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "SEED_MAX_ELAPSED_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let seed_file = env_map
            .get("SEED_FILE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            port,
            database_path,
            reward_token,
            intermediary,
            supervisor,
            seed_batch_size,
            seed_max_elapsed,
            seed_file,
        })
    }
}

fn required_address(env_map: &HashMap<String, String>, key: &str) -> Result<Address, ConfigError> {
    let value = env_map
        .get(key)
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))?;
    let address: Address = value
        .parse()
        .map_err(|e: crate::domain::AddressParseError| {
            ConfigError::InvalidValue(key.to_string(), e.to_string())
        })?;
    if address.is_zero() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must not be the zero address".to_string(),
        ));
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "REWARD_TOKEN".to_string(),
            "0x00000000000000000000000000000000000000ee".to_string(),
        );
        map.insert(
            "INTERMEDIARY".to_string(),
            "0x00000000000000000000000000000000000000aa".to_string(),
        );
        map.insert(
            "SUPERVISOR".to_string(),
            "0x0000000000000000000000000000000000000001".to_string(),
        );
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.seed_batch_size, 100);
        assert_eq!(config.seed_max_elapsed, Duration::from_secs(30));
        assert_eq!(config.seed_file, None);
        assert_eq!(
            config.reward_token.as_str(),
            "0x00000000000000000000000000000000000000ee"
        );
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_supervisor() {
        let mut env_map = setup_required_env();
        env_map.remove("SUPERVISOR");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "SUPERVISOR"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_reward_token() {
        let mut env_map = setup_required_env();
        env_map.insert("REWARD_TOKEN".to_string(), "token".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "REWARD_TOKEN"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_intermediary_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "INTERMEDIARY".to_string(),
            "0x0000000000000000000000000000000000000000".to_string(),
        );
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "INTERMEDIARY"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SEED_BATCH_SIZE".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SEED_BATCH_SIZE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_seed_file_and_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("SEED_FILE".to_string(), " seeds.csv ".to_string());
        env_map.insert("SEED_BATCH_SIZE".to_string(), "25".to_string());
        env_map.insert("SEED_MAX_ELAPSED_SECS".to_string(), "5".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.seed_file.as_deref(), Some("seeds.csv"));
        assert_eq!(config.seed_batch_size, 25);
        assert_eq!(config.seed_max_elapsed, Duration::from_secs(5));
    }
}
