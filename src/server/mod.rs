// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SERVIDOR HTTP (feature `server`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Endpoint compatível com chat/completions (sem streaming): adapta uma
// requisição de chat em uma sessão de pesquisa. O core não formata SSE -
// este adaptador devolve a resposta completa com uso de tokens.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::agent::{AgentError, ResearchAgent};
use crate::config::Config;

/// Estado compartilhado do servidor
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
}

/// Mensagem de chat no formato OpenAI
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiMessage {
    /// Papel: system, user, assistant
    pub role: String,
    /// Conteúdo da mensagem
    pub content: String,
}

/// Requisição de chat/completions
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Histórico de mensagens; a última user vira a pergunta
    pub messages: Vec<ApiMessage>,
    /// Budget opcional por requisição
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

/// Resposta no formato chat.completion
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: &'static str,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
}

/// Uma escolha da resposta
#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ApiMessage,
    pub finish_reason: String,
}

/// Uso de tokens da sessão
#[derive(Debug, Serialize)]
pub struct ChatUsage {
    pub total_tokens: u64,
}

/// Corpo de erro da API
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

/// Monta o router do servidor
pub fn router(config: Config) -> Router {
    let state = AppState {
        config: Arc::new(config),
    };

    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Sobe o servidor no endereço indicado
pub async fn serve(config: Config, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("🌐 Servidor ouvindo em {}", addr);
    axum::serve(listener, router(config)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "version": crate::VERSION}))
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ApiError>)> {
    let question = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: "no user message in request".into(),
                }),
            )
        })?;

    let mut request = state.config.request_for(&question);
    if let Some(max_tokens) = body.max_tokens {
        request.token_budget = max_tokens;
    }

    let agent = ResearchAgent::new(
        state.config.build_llm_port(),
        state.config.build_search_port(),
        state.config.build_fetch_port(),
        state.config.build_code_runner(),
        request,
    )
    .map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })?;

    let result = agent.research().await.map_err(|e| {
        let status = match e {
            AgentError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })?;

    let content = match result.answer {
        Some(answer) => answer,
        None => {
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiError {
                    error: result
                        .error
                        .unwrap_or_else(|| "could not synthesize answer".into()),
                }),
            ));
        }
    };

    Ok(Json(ChatResponse {
        id: format!("research-{}", Uuid::new_v4()),
        object: "chat.completion",
        choices: vec![ChatChoice {
            index: 0,
            message: ApiMessage {
                role: "assistant".into(),
                content,
            },
            finish_reason: if result.is_best { "length" } else { "stop" }.into(),
        }],
        usage: ChatUsage {
            total_tokens: result.metrics.tokens_used,
        },
    }))
}
