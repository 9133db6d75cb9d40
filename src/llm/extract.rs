// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EXTRAÇÃO E REPARO DE JSON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Cadeia de fallback para saída estruturada do LLM:
//   1. parse estrito (serde_json)
//   2. reparo tolerante (vírgulas sobrando, aspas inteligentes, chaves sem aspas)
//   3. dialeto leniente (aspas simples, True/False/None, comentários)
//
// A saída do LLM nunca é confiada como fluxo de controle: tudo que sai
// daqui ainda passa pela validação do schema da ação.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap_or_else(|e| panic!("{e}"))
});

static UNQUOTED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).unwrap_or_else(|e| panic!("{e}"))
});

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap_or_else(|e| panic!("{e}")));

static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*//[^\n]*$").unwrap_or_else(|e| panic!("{e}")));

/// Extrai o candidato a JSON de um texto livre do LLM.
///
/// Prioridade: bloco cercado por ```json ... ```; depois o primeiro objeto
/// com chaves balanceadas.
pub fn extract_json_candidate(text: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK.captures(text) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    balanced_object(text)
}

/// Encontra o primeiro objeto `{...}` com chaves balanceadas
fn balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse estrito
pub fn parse_strict(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Reparo tolerante: vírgulas sobrando, aspas tipográficas, chaves sem aspas
pub fn repair_json(text: &str) -> Option<Value> {
    let mut repaired = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    repaired = TRAILING_COMMA.replace_all(&repaired, "$1").into_owned();
    repaired = UNQUOTED_KEY.replace_all(&repaired, "$1\"$2\":").into_owned();

    parse_strict(&repaired)
}

/// Dialeto leniente: além do reparo, aceita aspas simples em strings,
/// literais Python (True/False/None) e comentários de linha.
pub fn lenient_parse(text: &str) -> Option<Value> {
    let mut loose = LINE_COMMENT.replace_all(text, "").into_owned();

    loose = loose
        .replace(": True", ": true")
        .replace(": False", ": false")
        .replace(": None", ": null")
        .replace(":True", ":true")
        .replace(":False", ":false")
        .replace(":None", ":null");

    loose = single_to_double_quotes(&loose);

    repair_json(&loose)
}

/// Converte strings com aspas simples para aspas duplas, escapando as
/// aspas duplas internas. Ignora apóstrofos dentro de strings já duplas.
fn single_to_double_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '"' if in_single => out.push_str("\\\""),
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Cadeia completa: candidato → estrito → reparo → leniente
pub fn extract_object(text: &str) -> Option<Value> {
    let candidate = extract_json_candidate(text)?;

    parse_strict(&candidate)
        .or_else(|| repair_json(&candidate))
        .or_else(|| lenient_parse(&candidate))
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_fenced_block() {
        let text = "Here you go:\n```json\n{\"action\": \"search\"}\n```\nDone.";
        let value = extract_object(text).unwrap();
        assert_eq!(value["action"], json!("search"));
    }

    #[test]
    fn test_extract_balanced_object() {
        let text = "thinking... {\"a\": {\"b\": 1}} trailing prose";
        let value = extract_object(text).unwrap();
        assert_eq!(value["a"]["b"], json!(1));
    }

    #[test]
    fn test_balanced_ignores_braces_in_strings() {
        let text = r#"{"msg": "uses { and } inside", "n": 2}"#;
        let value = extract_object(text).unwrap();
        assert_eq!(value["n"], json!(2));
    }

    #[test]
    fn test_repair_trailing_comma() {
        let value = repair_json(r#"{"a": 1, "b": [1, 2,],}"#).unwrap();
        assert_eq!(value["b"], json!([1, 2]));
    }

    #[test]
    fn test_repair_unquoted_keys() {
        let value = repair_json(r#"{action: "visit", urls: ["https://x.com"]}"#).unwrap();
        assert_eq!(value["action"], json!("visit"));
    }

    #[test]
    fn test_lenient_single_quotes_and_python_literals() {
        let value = lenient_parse(r#"{'pass': True, 'reason': 'ok', 'plan': None}"#).unwrap();
        assert_eq!(value["pass"], json!(true));
        assert_eq!(value["plan"], json!(null));
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(extract_object("complete garbage with no json at all").is_none());
        assert!(extract_object("{ unterminated").is_none());
    }

    #[test]
    fn test_non_object_rejected() {
        // Arrays soltos não são aceitos como saída estruturada
        assert!(extract_object("[1, 2, 3]").is_none());
    }
}
