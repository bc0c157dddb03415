//! Interface de linha de comando do CarScan baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (lookup, status) e
//! flags globais (--api-base, --interval-ms, --max-polls, --verbose), que
//! têm precedência sobre o `carscan.toml`.

use clap::{Parser, Subcommand};

use carscan::api::types::RESERVED_FIELDS;

/// CarScan — consulta de histórico de veículos por placa ou VIN.
#[derive(Debug, Parser)]
#[command(name = "carscan", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Endpoint de envio da API de consultas.
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Milissegundos entre consultas de resultado.
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    /// Número máximo de consultas antes de desistir.
    #[arg(long, global = true)]
    pub max_polls: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Envia uma consulta e acompanha até o resultado.
    Lookup {
        /// Placa ou VIN, como escrito nos documentos do veículo.
        identifier: String,

        /// Código da região da placa.
        #[arg(long)]
        region: Option<String>,

        /// Campo extra enviado no pedido, no formato chave=valor. Pode repetir.
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Consulta uma vez uma tarefa já enviada.
    Status {
        /// Identificador da tarefa devolvido pelo backend.
        task_id: String,
    },
}

// `param1` e `region` já têm argumentos próprios e não podem ser sobrescritos.
fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, _)) if RESERVED_FIELDS.contains(&key.trim()) => Err(format!(
            "`{}` is reserved; use the positional identifier or --region",
            key.trim()
        )),
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}
