//! Tipos de erro para o cliente do backend de consultas.
//!
//! [`ApiError`] cobre as falhas de uma troca HTTP com o backend e de montagem
//! do pedido. Quem chama decide se a falha encerra o job: o mesmo erro é
//! falha de envio em `create_task` e falha transitória em `fetch_result`.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com o backend de consultas.
#[derive(Debug, Error)]
pub enum ApiError {
    /// O backend respondeu com status fora da faixa 2xx.
    #[error("backend error (status {status}): {message}")]
    Http { status: u16, message: String },

    /// A resposta do envio não trouxe um `task_id` utilizável.
    /// `message` guarda a explicação do backend, quando enviada.
    #[error("backend did not issue a task id{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    MissingTaskId { message: Option<String> },

    /// O corpo não tem o formato JSON esperado.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Campo extra com nome reservado (`param1`, `region`).
    #[error("`{0}` is a reserved request field")]
    ReservedField(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
