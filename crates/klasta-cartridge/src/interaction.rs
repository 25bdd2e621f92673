use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CartridgeError;

/// A single button option within a button interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonChoice {
    pub label: String,
    pub target_phase: String,
    /// Recorded to session history for AI continuity in hybrid tasks.
    pub context_label: Option<String>,
}

/// How the student interacts within a phase.
///
/// Unknown interaction types are deliberately preserved as `Generic` with
/// their payload intact: a cartridge authored against a newer schema still
/// loads, and the platform decides how to render it.
#[derive(Debug, Clone)]
pub enum Interaction {
    Button {
        choices: Vec<ButtonChoice>,
    },
    /// Freeform AI dialogue: multi-turn conversation with the Trickster.
    ///
    /// An exchange is one student turn plus one Trickster turn.
    /// `min_exchanges` gates the transition tool; `max_exchanges` triggers
    /// the on_max_exchanges transition.
    Freeform {
        trickster_opening: String,
        min_exchanges: usize,
        max_exchanges: usize,
    },
    Investigation {
        starting_queries: Vec<String>,
        submit_target: String,
        min_key_findings: usize,
    },
    Generic {
        kind: String,
        config: serde_json::Map<String, serde_json::Value>,
    },
}

impl Serialize for Interaction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let value = match self {
            Interaction::Button { choices } => {
                serde_json::json!({ "type": "button", "choices": choices })
            }
            Interaction::Freeform {
                trickster_opening,
                min_exchanges,
                max_exchanges,
            } => serde_json::json!({
                "type": "freeform",
                "trickster_opening": trickster_opening,
                "min_exchanges": min_exchanges,
                "max_exchanges": max_exchanges,
            }),
            Interaction::Investigation {
                starting_queries,
                submit_target,
                min_key_findings,
            } => serde_json::json!({
                "type": "investigation",
                "starting_queries": starting_queries,
                "submit_target": submit_target,
                "min_key_findings": min_key_findings,
            }),
            // The original type string is restored so unknown interactions
            // survive a load/save cycle untouched.
            Interaction::Generic { kind, config } => {
                let mut map = config.clone();
                map.insert(
                    "type".to_string(),
                    serde_json::Value::String(kind.clone()),
                );
                serde_json::Value::Object(map)
            }
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Interaction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut value = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("interaction is missing a 'type' string"))?
            .to_string();

        match kind.as_str() {
            "button" => {
                let choices = match take_field(&mut value, "choices") {
                    Some(v) => parse_field(v, "choices")?,
                    None => Vec::new(),
                };
                Ok(Interaction::Button { choices })
            }
            "freeform" => {
                let trickster_opening: String = parse_field(
                    require_field(&mut value, "trickster_opening")?,
                    "trickster_opening",
                )?;
                let min_exchanges: usize =
                    parse_field(require_field(&mut value, "min_exchanges")?, "min_exchanges")?;
                let max_exchanges: usize =
                    parse_field(require_field(&mut value, "max_exchanges")?, "max_exchanges")?;

                if min_exchanges < 1 {
                    return Err(invalid("min_exchanges must be at least 1"));
                }
                if min_exchanges > max_exchanges {
                    return Err(invalid(format!(
                        "min_exchanges ({min_exchanges}) must not exceed max_exchanges ({max_exchanges})"
                    )));
                }

                Ok(Interaction::Freeform {
                    trickster_opening,
                    min_exchanges,
                    max_exchanges,
                })
            }
            "investigation" => {
                let starting_queries: Vec<String> = parse_field(
                    require_field(&mut value, "starting_queries")?,
                    "starting_queries",
                )?;
                if starting_queries.is_empty() {
                    return Err(invalid("starting_queries must not be empty"));
                }
                let submit_target: String =
                    parse_field(require_field(&mut value, "submit_target")?, "submit_target")?;
                let min_key_findings: usize = match take_field(&mut value, "min_key_findings") {
                    Some(v) => parse_field(v, "min_key_findings")?,
                    None => 0,
                };
                Ok(Interaction::Investigation {
                    starting_queries,
                    submit_target,
                    min_key_findings,
                })
            }
            _ => {
                // Everything except the type tag becomes the opaque config.
                value.remove("type");
                Ok(Interaction::Generic {
                    kind,
                    config: value,
                })
            }
        }
    }
}

/// Wrap a validation failure in the crate's typed error before handing it to
/// serde. The Deserialize contract forces the error type to `D::Error`, so
/// the `CartridgeError` travels through `custom()` and keeps its message.
fn invalid<E: DeError>(message: impl Into<String>) -> E {
    E::custom(CartridgeError::Validation(message.into()))
}

fn take_field(
    map: &mut serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Option<serde_json::Value> {
    map.remove(name)
}

fn require_field<E: DeError>(
    map: &mut serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Result<serde_json::Value, E> {
    map.remove(name)
        .ok_or_else(|| invalid(format!("interaction is missing '{name}'")))
}

fn parse_field<T: serde::de::DeserializeOwned, E: DeError>(
    value: serde_json::Value,
    name: &str,
) -> Result<T, E> {
    serde_json::from_value(value).map_err(|e| invalid(format!("invalid '{name}': {e}")))
}
