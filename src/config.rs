//! Configuração do CarScan carregada de `carscan.toml`.
//!
//! Campos ausentes no arquivo usam os valores padrão. As variáveis
//! `CARSCAN_API_BASE` e `CARSCAN_COOKIES` têm precedência sobre o arquivo;
//! valores vazios são ignorados.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CarscanError;
use crate::state_machine::PollConfig;

/// Configuração principal lida de `carscan.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CarscanConfig {
    /// Endpoint de envio da API; as consultas vão para `{api_base}/result/`.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Intervalo entre consultas, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consultas permitidas antes de desistir do job.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Prazo total opcional de polling, em segundos.
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,

    /// Cookies de onde o token CSRF é lido (`csrftoken=...`).
    #[serde(default)]
    pub cookies: String,
}

fn default_api_base() -> String {
    "http://localhost:8000/api/parse/".to_string()
}

// Uma consulta por segundo.
fn default_poll_interval_ms() -> u64 {
    1000
}

// Cinco minutos no intervalo padrão.
fn default_max_polls() -> u32 {
    300
}

impl Default for CarscanConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            poll_timeout_secs: None,
            cookies: String::new(),
        }
    }
}

impl CarscanConfig {
    /// Carrega `carscan.toml` do diretório atual (ou os padrões, se não
    /// existir) e aplica as variáveis de ambiente.
    pub fn load() -> Result<Self, CarscanError> {
        let mut config = Self::load_from(Path::new("carscan.toml"))?;

        if let Ok(base) = std::env::var("CARSCAN_API_BASE")
            && !base.is_empty()
        {
            config.api_base = base;
        }
        if let Ok(cookies) = std::env::var("CARSCAN_COOKIES")
            && !cookies.is_empty()
        {
            config.cookies = cookies;
        }

        Ok(config)
    }

    /// Carrega de um caminho explícito, sem variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self, CarscanError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<CarscanConfig>(&contents)?)
    }

    pub fn poll_config(&self) -> PollConfig {
        let config = PollConfig::new(Duration::from_millis(self.poll_interval_ms), self.max_polls);
        match self.poll_timeout_secs {
            Some(secs) => config.with_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}
