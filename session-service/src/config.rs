// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use ludo_common::game::RulesetConfig;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub redis_url: String,
    pub cors_origins: Vec<String>,
    pub debug: bool,
    pub ws_heartbeat_interval: Duration,
    pub ws_connection_timeout: Duration,
    pub auth_timeout: Duration,
    /// Identifies this instance in `authenticated`/`connected` payloads.
    pub server_id: String,
    pub ruleset_config: RulesetConfig,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: parse_bind_addr("SESSION_SERVICE_BIND", "0.0.0.0:8080")?,
            supabase_url: env_or("SUPABASE_URL", "http://127.0.0.1:54321"),
            supabase_anon_key: env_or("SUPABASE_ANON_KEY", ""),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            cors_origins: parse_cors_origins(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            debug: env_or("DEBUG", "false").eq_ignore_ascii_case("true"),
            ws_heartbeat_interval: parse_duration_secs("WS_HEARTBEAT_INTERVAL", 30)?,
            ws_connection_timeout: parse_duration_secs("WS_CONNECTION_TIMEOUT", 60)?,
            auth_timeout: parse_duration_secs("AUTH_TIMEOUT", 30)?,
            server_id: server_id(),
            ruleset_config: load_ruleset_config(),
        })
    }

    pub fn jwks_url(&self) -> String {
        format!(
            "{}/auth/v1/.well-known/jwks.json",
            self.supabase_url.trim_end_matches('/')
        )
    }

    pub fn jwt_issuer(&self) -> String {
        format!("{}/auth/v1", self.supabase_url.trim_end_matches('/'))
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url.trim_end_matches('/'))
    }
}

fn env_or(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

fn parse_duration_secs(var_name: &str, default: u64) -> anyhow::Result<Duration> {
    let value = match std::env::var(var_name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .context(format!("invalid {var_name}"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(value.max(1)))
}

fn parse_cors_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn server_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()[..8].to_string())
}

/// Load the default ruleset config from `RULESET_CONFIG_PATH` when set.
/// Any failure falls back to the built-in defaults.
fn load_ruleset_config() -> RulesetConfig {
    let Some(path) = std::env::var("RULESET_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return RulesetConfig::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read ruleset config file");
            return RulesetConfig::default();
        }
    };

    match serde_yaml::from_str::<RulesetConfig>(&raw) {
        Ok(config) => {
            info!(path = %path, "loaded ruleset config from YAML");
            config
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse ruleset config yaml");
            RulesetConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_origins_split_on_commas() {
        let origins = parse_cors_origins("http://localhost:3000, https://game.example.com ,");
        assert_eq!(
            origins,
            vec![
                "http://localhost:3000".to_string(),
                "https://game.example.com".to_string()
            ]
        );
    }

    #[test]
    fn cors_origins_empty_input_yields_no_origins() {
        assert!(parse_cors_origins("  ").is_empty());
    }

    #[test]
    fn jwks_url_handles_trailing_slash() {
        let mut settings = test_settings();
        settings.supabase_url = "https://project.supabase.co/".to_string();
        assert_eq!(
            settings.jwks_url(),
            "https://project.supabase.co/auth/v1/.well-known/jwks.json"
        );
        assert_eq!(settings.rest_url(), "https://project.supabase.co/rest/v1");
    }

    fn test_settings() -> Settings {
        Settings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            supabase_url: "http://127.0.0.1:54321".to_string(),
            supabase_anon_key: "anon".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            debug: true,
            ws_heartbeat_interval: Duration::from_secs(30),
            ws_connection_timeout: Duration::from_secs(60),
            auth_timeout: Duration::from_secs(30),
            server_id: "test-server".to_string(),
            ruleset_config: RulesetConfig::default(),
        }
    }
}
