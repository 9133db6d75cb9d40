// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCHEMA DE AÇÕES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// O schema por passo é o único contrato entre controller e LLM: um union
// discriminado com uma variante por ação PERMITIDA no momento, cada uma
// carregando um campo `think`. O LLM nunca recebe uma pergunta aberta
// sobre o que fazer.
//
// A variante destilada achata os campos aninhados em chaves primitivas
// (listas viram strings separadas por quebra de linha) - último recurso
// da cadeia de fallback da porta LLM.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde_json::{json, Value};

use crate::agent::{ActionPermissions, AgentAction};
use crate::llm::SchemaSpec;
use crate::types::{Reference, SerpQuery};

/// Constrói o schema de ação restrito às permissões do passo.
pub fn action_schema(permissions: &ActionPermissions) -> SchemaSpec {
    let mut variants = Vec::new();

    if permissions.search {
        variants.push(json!({
            "type": "object",
            "properties": {
                "action": {"const": "search"},
                "think": {"type": "string"},
                "queries": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5,
                },
            },
            "required": ["action", "think", "queries"],
        }));
    }

    if permissions.visit {
        variants.push(json!({
            "type": "object",
            "properties": {
                "action": {"const": "visit"},
                "think": {"type": "string"},
                "urls": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5,
                },
            },
            "required": ["action", "think", "urls"],
        }));
    }

    if permissions.reflect {
        variants.push(json!({
            "type": "object",
            "properties": {
                "action": {"const": "reflect"},
                "think": {"type": "string"},
                "questions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 4,
                },
            },
            "required": ["action", "think", "questions"],
        }));
    }

    if permissions.code {
        variants.push(json!({
            "type": "object",
            "properties": {
                "action": {"const": "code"},
                "think": {"type": "string"},
                "program": {"type": "string"},
            },
            "required": ["action", "think", "program"],
        }));
    }

    if permissions.answer {
        variants.push(json!({
            "type": "object",
            "properties": {
                "action": {"const": "answer"},
                "think": {"type": "string"},
                "answer": {"type": "string"},
                "references": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "url": {"type": "string"},
                            "title": {"type": "string"},
                            "exact_quote": {"type": "string"},
                        },
                        "required": ["url"],
                    },
                },
            },
            "required": ["action", "think", "answer"],
        }));
    }

    let allowed = permissions.allowed_actions();

    let schema = json!({
        "type": "object",
        "oneOf": variants,
        "properties": {
            "action": {"type": "string", "enum": allowed},
            "think": {"type": "string"},
        },
        "required": ["action", "think"],
    });

    // Variante achatada: listas viram strings com um item por linha
    let distilled = json!({
        "type": "object",
        "properties": {
            "action": {"type": "string", "enum": allowed},
            "think": {"type": "string"},
            "queries": {"type": "string", "description": "one query per line"},
            "urls": {"type": "string", "description": "one url per line"},
            "questions": {"type": "string", "description": "one question per line"},
            "program": {"type": "string"},
            "answer": {"type": "string"},
            "references": {"type": "string", "description": "one url per line"},
        },
        "required": ["action", "think"],
    });

    SchemaSpec::new("agent-action", schema).with_distilled(distilled)
}

/// Schema do reescritor de queries (sub-chamada da ação search)
pub fn query_rewriter_schema() -> SchemaSpec {
    SchemaSpec::new(
        "query-rewriter",
        json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5,
                },
                "think": {"type": "string"},
            },
            "required": ["queries"],
        }),
    )
}

/// Schema do Beast Mode: só resposta, nenhuma ação de tool
pub fn beast_mode_schema() -> SchemaSpec {
    let schema = json!({
        "type": "object",
        "properties": {
            "answer": {"type": "string"},
            "references": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "url": {"type": "string"},
                        "title": {"type": "string"},
                        "exact_quote": {"type": "string"},
                    },
                    "required": ["url"],
                },
            },
        },
        "required": ["answer"],
    });

    let distilled = json!({
        "type": "object",
        "properties": {
            "answer": {"type": "string"},
            "references": {"type": "string", "description": "one url per line"},
        },
        "required": ["answer"],
    });

    SchemaSpec::new("beast-mode-answer", schema).with_distilled(distilled)
}

/// Interpreta o objeto validado como uma AgentAction.
///
/// Aceita a forma aninhada E a destilada (listas como strings multi-linha).
/// A ação precisa estar permitida - saída do LLM nunca vira fluxo de
/// controle sem essa checagem.
pub fn parse_action(value: &Value, permissions: &ActionPermissions) -> Result<AgentAction, String> {
    let action = value["action"]
        .as_str()
        .ok_or_else(|| "missing action field".to_string())?;

    if !permissions.is_allowed(action) {
        return Err(format!("action '{}' is not permitted this step", action));
    }

    let think = value["think"].as_str().unwrap_or_default().to_string();

    match action {
        "search" => {
            let queries: Vec<SerpQuery> = string_list(&value["queries"])
                .into_iter()
                .map(SerpQuery::text)
                .collect();
            if queries.is_empty() {
                return Err("search action without queries".into());
            }
            Ok(AgentAction::Search { queries, think })
        }
        "visit" => {
            let urls = string_list(&value["urls"]);
            if urls.is_empty() {
                return Err("visit action without urls".into());
            }
            Ok(AgentAction::Visit { urls, think })
        }
        "reflect" => {
            let questions = string_list(&value["questions"]);
            if questions.is_empty() {
                return Err("reflect action without questions".into());
            }
            Ok(AgentAction::Reflect { questions, think })
        }
        "code" => {
            let program = value["program"].as_str().unwrap_or_default().to_string();
            if program.trim().is_empty() {
                return Err("code action without program".into());
            }
            Ok(AgentAction::Code { program, think })
        }
        "answer" => {
            let answer = value["answer"].as_str().unwrap_or_default().to_string();
            if answer.trim().is_empty() {
                return Err("answer action without answer text".into());
            }
            Ok(AgentAction::Answer {
                answer,
                references: parse_references(&value["references"]),
                think,
            })
        }
        other => Err(format!("unknown action '{}'", other)),
    }
}

/// Interpreta a resposta do Beast Mode
pub fn parse_beast_answer(value: &Value) -> Result<(String, Vec<Reference>), String> {
    let answer = value["answer"]
        .as_str()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| "beast mode reply without answer".to_string())?;

    Ok((answer.to_string(), parse_references(&value["references"])))
}

/// Interpreta a resposta do reescritor de queries
pub fn parse_rewritten_queries(value: &Value) -> Vec<SerpQuery> {
    string_list(&value["queries"])
        .into_iter()
        .map(SerpQuery::text)
        .collect()
}

/// Lê uma lista de strings: aceita array JSON, array de objetos com `q`,
/// ou string multi-linha (forma destilada).
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                item.as_str()
                    .map(String::from)
                    .or_else(|| item["q"].as_str().map(String::from))
                    .or_else(|| item["url"].as_str().map(String::from))
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(text) => text
            .lines()
            .map(|line| line.trim().trim_start_matches('-').trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Lê referências: array de objetos, ou lista de URLs (forma destilada)
fn parse_references(value: &Value) -> Vec<Reference> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                if let Some(url) = item.as_str() {
                    return Some(Reference {
                        url: url.to_string(),
                        ..Default::default()
                    });
                }
                let url = item["url"].as_str()?.to_string();
                Some(Reference {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    exact_quote: item["exact_quote"]
                        .as_str()
                        .or_else(|| item["exactQuote"].as_str())
                        .map(String::from),
                    published_at: item["published_at"]
                        .as_str()
                        .or_else(|| item["publishedAt"].as_str())
                        .map(String::from),
                    relevance_score: item["relevance_score"].as_f64().map(|s| s as f32),
                })
            })
            .collect(),
        Value::String(text) => text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|url| Reference {
                url: url.to_string(),
                ..Default::default()
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_restricted_to_permissions() {
        let perms = ActionPermissions::all_enabled().without_answer();
        let spec = action_schema(&perms);

        let variants = spec.schema["oneOf"].as_array().unwrap();
        assert_eq!(variants.len(), 4);

        let allowed = spec.schema["properties"]["action"]["enum"].as_array().unwrap();
        assert!(!allowed.iter().any(|a| a == "answer"));
    }

    #[test]
    fn test_beast_mode_schema_answer_only() {
        let spec = action_schema(&ActionPermissions::beast_mode());
        let variants = spec.schema["oneOf"].as_array().unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0]["properties"]["action"]["const"], "answer");
    }

    #[test]
    fn test_parse_search_nested() {
        let value = json!({
            "action": "search",
            "think": "need info",
            "queries": ["rust book author", {"q": "rust book"}],
        });

        let action = parse_action(&value, &ActionPermissions::all_enabled()).unwrap();
        match action {
            AgentAction::Search { queries, think } => {
                assert_eq!(queries.len(), 2);
                assert_eq!(queries[0].q, "rust book author");
                assert_eq!(queries[1].q, "rust book");
                assert_eq!(think, "need info");
            }
            other => panic!("expected search, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_distilled_multiline() {
        let value = json!({
            "action": "visit",
            "think": "reading",
            "urls": "https://a.com/1\n- https://b.com/2\n",
        });

        let action = parse_action(&value, &ActionPermissions::all_enabled()).unwrap();
        match action {
            AgentAction::Visit { urls, .. } => {
                assert_eq!(urls, vec!["https://a.com/1", "https://b.com/2"]);
            }
            other => panic!("expected visit, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_forbidden_action() {
        let value = json!({"action": "answer", "think": "t", "answer": "a"});
        let perms = ActionPermissions::all_enabled().without_answer();

        let err = parse_action(&value, &perms).unwrap_err();
        assert!(err.contains("not permitted"));
    }

    #[test]
    fn test_parse_rejects_empty_payload() {
        let perms = ActionPermissions::all_enabled();
        assert!(parse_action(&json!({"action": "search", "think": "t", "queries": []}), &perms).is_err());
        assert!(parse_action(&json!({"action": "answer", "think": "t", "answer": "  "}), &perms).is_err());
        assert!(parse_action(&json!({"think": "no action"}), &perms).is_err());
    }

    #[test]
    fn test_parse_answer_references_both_shapes() {
        let nested = json!({
            "action": "answer",
            "think": "t",
            "answer": "done",
            "references": [
                {"url": "https://a.com", "title": "A", "exactQuote": "quoted"},
                "https://b.com",
            ],
        });

        let action = parse_action(&nested, &ActionPermissions::all_enabled()).unwrap();
        match action {
            AgentAction::Answer { references, .. } => {
                assert_eq!(references.len(), 2);
                assert_eq!(references[0].exact_quote.as_deref(), Some("quoted"));
                assert_eq!(references[1].url, "https://b.com");
            }
            other => panic!("expected answer, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_beast_answer() {
        let (answer, references) = parse_beast_answer(&json!({
            "answer": "final",
            "references": "https://x.com\nhttps://y.com",
        }))
        .unwrap();
        assert_eq!(answer, "final");
        assert_eq!(references.len(), 2);

        assert!(parse_beast_answer(&json!({"answer": "  "})).is_err());
    }
}
