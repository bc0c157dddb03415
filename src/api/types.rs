//! Tipos de dados trocados com o backend de consultas.
//!
//! Envio: `POST {api_base}` com os campos coletados do formulário, respondido
//! com `{"task_id": ...}`. Consulta: `POST {api_base}/result/` com
//! `{"task_id": ...}`, respondida com `{"message": ...}` enquanto a tarefa
//! roda e `{"result": ...}` quando termina.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ApiError;

/// Nomes de campo ocupados pelo próprio pedido; não podem vir em `extra`.
pub const RESERVED_FIELDS: &[&str] = &["param1", "region"];

/// Corpo do pedido de consulta.
///
/// O backend trata o payload como dados opacos de formulário. A placa ou o
/// VIN digitado pelo usuário vai em `param1`; os demais campos coletados
/// ficam em `extra` e são achatados no mesmo objeto JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Placa ou VIN exatamente como o usuário digitou.
    #[serde(rename = "param1")]
    pub identifier: String,
    /// Região da placa, opcional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    // Só é preenchido via `with_field`, que recusa os nomes reservados.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl LookupRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            region: None,
            extra: Map::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Adiciona um campo extra ao pedido.
    ///
    /// Retorna [`ApiError::ReservedField`] para `param1` e `region`, que
    /// sobrescreveriam a placa ou a região no backend.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, ApiError> {
        let key = key.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return Err(ApiError::ReservedField(key));
        }
        self.extra.insert(key, value.into());
        Ok(self)
    }

    /// Campos extras do pedido.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Identificador da tarefa emitido pelo backend. Opaco para o cliente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Raw submit response.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskResponse {
    #[serde(default)]
    pub task_id: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CreateTaskResponse {
    /// Extract the task id. The backend has been seen issuing both strings
    /// and bare numbers (a timestamp); anything else counts as missing.
    pub fn into_task_id(self) -> Result<TaskId, ApiError> {
        match self.task_id {
            Some(Value::String(id)) if !id.trim().is_empty() => Ok(TaskId(id)),
            Some(Value::Number(n)) => Ok(TaskId(n.to_string())),
            _ => Err(ApiError::MissingTaskId {
                message: self.message,
            }),
        }
    }
}

/// Body of a poll request.
#[derive(Debug, Clone, Serialize)]
pub struct PollRequest<'a> {
    pub task_id: &'a TaskId,
}

/// Raw poll response. Both fields are optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl PollResponse {
    /// Interpret the response. `result` wins over `message` when both are
    /// present; a body with neither is malformed.
    pub fn into_reply(self) -> Result<PollReply, ApiError> {
        match (self.result, self.message) {
            (Some(result), _) => Ok(PollReply::Finished(LookupResult::from(result))),
            (None, Some(message)) => Ok(PollReply::Pending(message)),
            (None, None) => Err(ApiError::Decode(
                "poll response has neither `result` nor `message`".into(),
            )),
        }
    }
}

/// Interpreted poll response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollReply {
    /// Task still running; carries the backend's progress message.
    Pending(String),
    /// Task finished.
    Finished(LookupResult),
}

/// Final payload of a finished lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupResult {
    Text(String),
    Structured(Value),
}

impl From<Value> for LookupResult {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => LookupResult::Text(text),
            other => LookupResult::Structured(other),
        }
    }
}

impl fmt::Display for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupResult::Text(text) => f.write_str(text),
            LookupResult::Structured(value) => write!(f, "{value}"),
        }
    }
}
