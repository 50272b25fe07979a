//! Rule documents and their compiled form.
//!
//! A stored rule is a loose JSON document:
//!
//! ```json
//! { "tipo": "idade_maxima", "valor": 80, "acao": "rejeitar" }
//! ```
//!
//! Documents are compiled once, when a rule set is loaded, into
//! [`TriageRule`]. Anything that does not compile is skipped with a warning
//! and never rejects a record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use crate::models::RuleDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum RuleAction {
    #[serde(rename = "rejeitar")]
    #[strum(serialize = "rejeitar")]
    Reject,
    #[serde(rename = "priorizar")]
    #[strum(serialize = "priorizar")]
    Prioritize,
    #[serde(rename = "alertar")]
    #[strum(serialize = "alertar")]
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    /// Inclusive upper bound on age at death
    MaxAge(u32),
    /// Case-insensitive substrings of the cause of death
    ExcludedCauses(Vec<String>),
    /// Hours after death during which a record stays eligible (exclusive)
    WindowHours(u32),
    RejectUnknownIdentity(bool),
    /// Sector name to score, overriding the defaults
    SectorPriority(HashMap<String, i32>),
}

impl RuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::MaxAge(_) => "idade_maxima",
            RuleKind::ExcludedCauses(_) => "causas_excludentes",
            RuleKind::WindowHours(_) => "janela_horas",
            RuleKind::RejectUnknownIdentity(_) => "identificacao_desconhecida",
            RuleKind::SectorPriority(_) => "setor_priorizacao",
        }
    }

    fn default_action(&self) -> RuleAction {
        match self {
            RuleKind::SectorPriority(_) => RuleAction::Prioritize,
            _ => RuleAction::Reject,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("rule document must be an object with a string \"tipo\"")]
    Malformed,

    #[error("unknown rule type: {0}")]
    UnknownType(String),

    #[error("invalid \"valor\" for {tipo}: expected {expected}")]
    InvalidValue {
        tipo: &'static str,
        expected: &'static str,
    },

    #[error("invalid \"acao\": {0}")]
    InvalidAction(String),
}

/// Compiled rule, ready for evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageRule {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub kind: RuleKind,
    pub action: RuleAction,
}

impl TriageRule {
    pub fn compile(definition: &RuleDefinition) -> Result<Self, RuleParseError> {
        let (kind, action) = parse_document(&definition.definition)?;
        Ok(Self {
            id: definition.id,
            name: definition.name.clone(),
            priority: definition.priority,
            kind,
            action,
        })
    }
}

/// Parse a `{tipo, valor, acao}` document. `acao` may be omitted.
pub fn parse_document(document: &Value) -> Result<(RuleKind, RuleAction), RuleParseError> {
    let object = document.as_object().ok_or(RuleParseError::Malformed)?;
    let tipo = object
        .get("tipo")
        .and_then(Value::as_str)
        .ok_or(RuleParseError::Malformed)?;
    let valor = object.get("valor").unwrap_or(&Value::Null);

    let kind = match tipo {
        "idade_maxima" => RuleKind::MaxAge(non_negative(valor, "idade_maxima")?),
        "janela_horas" => {
            let hours = non_negative(valor, "janela_horas")?;
            if hours == 0 {
                return Err(RuleParseError::InvalidValue {
                    tipo: "janela_horas",
                    expected: "a positive number of hours",
                });
            }
            RuleKind::WindowHours(hours)
        }
        "causas_excludentes" => {
            let causes = valor.as_array().ok_or(RuleParseError::InvalidValue {
                tipo: "causas_excludentes",
                expected: "an array of strings",
            })?;
            RuleKind::ExcludedCauses(
                causes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
        "identificacao_desconhecida" => {
            RuleKind::RejectUnknownIdentity(valor.as_bool().ok_or(RuleParseError::InvalidValue {
                tipo: "identificacao_desconhecida",
                expected: "a boolean",
            })?)
        }
        "setor_priorizacao" => {
            let invalid = RuleParseError::InvalidValue {
                tipo: "setor_priorizacao",
                expected: "an object of sector to integer score",
            };
            let map = valor.as_object().ok_or(invalid)?;
            let mut scores = HashMap::with_capacity(map.len());
            for (sector, score) in map {
                let score = score.as_i64().ok_or(RuleParseError::InvalidValue {
                    tipo: "setor_priorizacao",
                    expected: "an object of sector to integer score",
                })?;
                scores.insert(sector.clone(), score.clamp(0, 100) as i32);
            }
            RuleKind::SectorPriority(scores)
        }
        other => return Err(RuleParseError::UnknownType(other.to_string())),
    };

    let action = match object.get("acao") {
        None | Some(Value::Null) => kind.default_action(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|_| RuleParseError::InvalidAction(raw.to_string()))?,
    };

    Ok((kind, action))
}

/// Whole non-negative number; JSON floats with no fraction are accepted.
fn non_negative(valor: &Value, tipo: &'static str) -> Result<u32, RuleParseError> {
    let invalid = || RuleParseError::InvalidValue {
        tipo,
        expected: "a non-negative integer",
    };
    if let Some(n) = valor.as_u64() {
        return u32::try_from(n).map_err(|_| invalid());
    }
    match valor.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) => Ok(f as u32),
        _ => Err(invalid()),
    }
}

/// Compile stored rules, highest priority first. Broken documents are
/// dropped with a warning.
pub fn compile_rules(definitions: &[RuleDefinition]) -> Vec<TriageRule> {
    let mut rules: Vec<TriageRule> = definitions
        .iter()
        .filter(|d| d.active)
        .filter_map(|d| match TriageRule::compile(d) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(rule_id = %d.id, rule = %d.name, error = %e, "Skipping unparseable triage rule");
                None
            }
        })
        .collect();
    rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    rules
}

/// Rules applied when the rule store cannot be read
pub fn default_rules(window_hours: u32) -> Vec<TriageRule> {
    vec![
        TriageRule {
            id: Uuid::nil(),
            name: "Default maximum age".to_string(),
            priority: 30,
            kind: RuleKind::MaxAge(80),
            action: RuleAction::Reject,
        },
        TriageRule {
            id: Uuid::nil(),
            name: "Default capture window".to_string(),
            priority: 20,
            kind: RuleKind::WindowHours(window_hours),
            action: RuleAction::Reject,
        },
        TriageRule {
            id: Uuid::nil(),
            name: "Default unknown identity".to_string(),
            priority: 10,
            kind: RuleKind::RejectUnknownIdentity(true),
            action: RuleAction::Reject,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn definition(priority: i32, active: bool, document: Value) -> RuleDefinition {
        RuleDefinition {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: format!("rule {priority}"),
            description: None,
            definition: document,
            active,
            priority,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_each_rule_type() {
        assert_eq!(
            parse_document(&json!({"tipo": "idade_maxima", "valor": 80, "acao": "rejeitar"})).unwrap(),
            (RuleKind::MaxAge(80), RuleAction::Reject)
        );
        assert_eq!(
            parse_document(&json!({"tipo": "janela_horas", "valor": 6.0})).unwrap(),
            (RuleKind::WindowHours(6), RuleAction::Reject)
        );
        assert_eq!(
            parse_document(&json!({"tipo": "causas_excludentes", "valor": ["sepsis", 3, " "]})).unwrap(),
            (RuleKind::ExcludedCauses(vec!["sepsis".into()]), RuleAction::Reject)
        );
        assert_eq!(
            parse_document(&json!({"tipo": "identificacao_desconhecida", "valor": true, "acao": "alertar"}))
                .unwrap(),
            (RuleKind::RejectUnknownIdentity(true), RuleAction::Alert)
        );
        let (kind, action) =
            parse_document(&json!({"tipo": "setor_priorizacao", "valor": {"UTI": 95, "Oncologia": 150}}))
                .unwrap();
        assert_eq!(action, RuleAction::Prioritize);
        match kind {
            RuleKind::SectorPriority(map) => {
                assert_eq!(map["UTI"], 95);
                assert_eq!(map["Oncologia"], 100);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_documents() {
        assert_eq!(parse_document(&json!("idade")), Err(RuleParseError::Malformed));
        assert_eq!(
            parse_document(&json!({"tipo": "cor_dos_olhos", "valor": 1})),
            Err(RuleParseError::UnknownType("cor_dos_olhos".into()))
        );
        assert!(matches!(
            parse_document(&json!({"tipo": "idade_maxima", "valor": "oitenta"})),
            Err(RuleParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_document(&json!({"tipo": "idade_maxima", "valor": -1})),
            Err(RuleParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_document(&json!({"tipo": "janela_horas", "valor": 0})),
            Err(RuleParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_document(&json!({"tipo": "idade_maxima", "valor": 80, "acao": "ignorar"})),
            Err(RuleParseError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_compile_orders_by_priority_and_skips_broken() {
        let defs = vec![
            definition(1, true, json!({"tipo": "janela_horas", "valor": 6})),
            definition(9, true, json!({"tipo": "idade_maxima", "valor": 80})),
            definition(5, true, json!({"tipo": "desconhecido"})),
            definition(7, false, json!({"tipo": "idade_maxima", "valor": 10})),
        ];
        let rules = compile_rules(&defs);
        let kinds: Vec<_> = rules.iter().map(|r| r.kind.clone()).collect();
        assert_eq!(kinds, vec![RuleKind::MaxAge(80), RuleKind::WindowHours(6)]);
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules(6);
        let kinds: Vec<_> = rules.iter().map(|r| r.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                RuleKind::MaxAge(80),
                RuleKind::WindowHours(6),
                RuleKind::RejectUnknownIdentity(true)
            ]
        );
    }
}
