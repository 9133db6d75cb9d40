// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TIPOS COMPARTILHADOS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tipo de URL (alias para String)
pub type Url = String;

/// Idiomas suportados para a resposta final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Portuguese,
    Spanish,
    German,
    French,
    Japanese,
    Chinese,
    Other,
}

impl Language {
    /// Converte código ISO ("pt", "en", ...) para Language
    pub fn from_code(code: &str) -> Self {
        match code.to_lowercase().trim() {
            "pt" | "pt-br" | "pt-pt" => Self::Portuguese,
            "en" | "en-us" | "en-gb" => Self::English,
            "es" => Self::Spanish,
            "de" => Self::German,
            "fr" => Self::French,
            "ja" => Self::Japanese,
            "zh" | "zh-cn" => Self::Chinese,
            "" => Self::English,
            _ => Self::Other,
        }
    }

    /// Nome legível para logs
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Portuguese => "Português",
            Self::Spanish => "Español",
            Self::German => "Deutsch",
            Self::French => "Français",
            Self::Japanese => "日本語",
            Self::Chinese => "中文",
            Self::Other => "Other",
        }
    }

    /// Instrução de idioma injetada no system prompt
    pub fn llm_instruction(&self) -> &'static str {
        match self {
            Self::English => "Respond in English.",
            Self::Portuguese => "Responda em Português do Brasil.",
            Self::Spanish => "Responde en Español.",
            Self::German => "Antworte auf Deutsch.",
            Self::French => "Réponds en Français.",
            Self::Japanese => "日本語で回答してください。",
            Self::Chinese => "请用中文回答。",
            Self::Other => "Respond in the same language as the question.",
        }
    }
}

/// Query de busca SERP
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerpQuery {
    /// Texto da query
    pub q: String,
    /// Filtro de tempo (ex: "qdr:m" para último mês)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbs: Option<String>,
    /// Localização geográfica
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl SerpQuery {
    /// Cria uma query simples só com texto
    pub fn text(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            ..Default::default()
        }
    }
}

/// Referência a uma fonte citada na resposta
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reference {
    /// URL da fonte
    pub url: String,
    /// Título da página
    pub title: String,
    /// Citação exata do trecho utilizado
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_quote: Option<String>,
    /// Data de publicação (se conhecida)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Score de relevância (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f32>,
}

/// Item de conhecimento acumulado durante a pesquisa.
///
/// O log de conhecimento é append-only: itens nunca são editados nem
/// removidos durante a sessão. O `timestamp` registra o momento da coleta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Pergunta/contexto
    pub question: String,
    /// Resposta/conteúdo
    pub answer: String,
    /// Tipo de conhecimento
    pub item_type: KnowledgeType,
    /// Referências associadas
    pub references: Vec<Reference>,
    /// Momento da coleta
    pub timestamp: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Cria um item com timestamp atual
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        item_type: KnowledgeType,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            item_type,
            references: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Anexa referências ao item
    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }
}

/// Tipo de item de conhecimento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnowledgeType {
    /// Pergunta e resposta
    Qa,
    /// Conteúdo extraído de URL
    Url,
    /// Informação lateral (resultado de código, snippets de busca)
    SideInfo,
    /// Diagnóstico de uma resposta reprovada
    ErrorAnalysis,
}

impl KnowledgeType {
    /// Retorna o tipo como string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qa => "qa",
            Self::Url => "url",
            Self::SideInfo => "side-info",
            Self::ErrorAnalysis => "error-analysis",
        }
    }
}

/// Resultado bruto de uma busca SERP
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHit {
    /// URL do resultado
    pub url: String,
    /// Título do resultado
    pub title: String,
    /// Descrição/snippet
    pub snippet: String,
    /// Data de publicação reportada pelo provedor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Score de rerank reportado pelo provedor (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// Conteúdo extraído de uma página pelo FetchPort
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Texto extraído (já sem HTML, possivelmente truncado)
    pub content_text: String,
    /// Título da página
    pub title: Option<String>,
    /// Data de publicação detectada
    pub published_at: Option<String>,
    /// URL final após redirects
    pub final_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serp_query_default() {
        let query = SerpQuery::default();
        assert!(query.q.is_empty());
        assert!(query.tbs.is_none());
        assert!(query.location.is_none());
    }

    #[test]
    fn test_knowledge_type_as_str() {
        assert_eq!(KnowledgeType::Qa.as_str(), "qa");
        assert_eq!(KnowledgeType::Url.as_str(), "url");
        assert_eq!(KnowledgeType::SideInfo.as_str(), "side-info");
        assert_eq!(KnowledgeType::ErrorAnalysis.as_str(), "error-analysis");
    }

    #[test]
    fn test_language_from_code() {
        assert_eq!(Language::from_code("pt-BR"), Language::Portuguese);
        assert_eq!(Language::from_code("en"), Language::English);
        assert_eq!(Language::from_code(""), Language::English);
        assert_eq!(Language::from_code("xx"), Language::Other);
    }

    #[test]
    fn test_knowledge_item_builder() {
        let item =
            KnowledgeItem::new("q", "a", KnowledgeType::Qa).with_references(vec![Reference {
                url: "https://example.com".into(),
                title: "Example".into(),
                ..Default::default()
            }]);
        assert_eq!(item.references.len(), 1);
        assert_eq!(item.item_type, KnowledgeType::Qa);
    }
}
