//! Ambiguity detection and interpretation generation.
//!
//! Two stages: fast heuristics over a Polish lexicon decide whether a
//! query is ambiguous at all, then the chat model proposes 2-3
//! declarative interpretations. When the model fails or returns too
//! little, interpretations are synthesized from the detected signals,
//! so a query flagged ambiguous always ends up with at least two.
//!
//! The lexicon is a data table rather than inline constants so another
//! language pack can be loaded at startup.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::analyzer::{ACRONYM_RE, ID_RE, TOKEN_RE, YEAR_RE};
use crate::llm::{ChatMessage, ChatModel, ChatOptions};
use crate::types::{Clarification, Interpretation};

static LINE_NUMBERING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\-\*\.]+\s*").expect("numbering regex is valid"));

const FALLBACK_INTERPRETATION: &str = "pytanie wymaga doprecyzowania kontekstu";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconEntry {
    /// Token that triggers the signal when present in the query.
    pub term: String,
    /// Short gloss of why the term is ambiguous; `" vs "` and `/`
    /// separate alternatives the fallback can turn into
    /// interpretations.
    pub gloss: String,
}

fn entry(term: &str, gloss: &str) -> LexiconEntry {
    LexiconEntry {
        term: term.to_string(),
        gloss: gloss.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarifierLexicon {
    pub ambiguous_entities: Vec<LexiconEntry>,
    pub abstract_concepts: Vec<LexiconEntry>,
    /// Wh-words that already qualify an entity ("który instytut?").
    pub qualifier_words: Vec<String>,
    /// Phrases that anchor an abstract concept in a context.
    pub context_markers: Vec<String>,
    /// How-to openings that need a scope to be answerable.
    pub howto_templates: Vec<String>,
    pub scope_markers: Vec<String>,
}

impl Default for ClarifierLexicon {
    fn default() -> Self {
        Self {
            ambiguous_entities: vec![
                entry("pan", "PAN (instytucja) vs pan (osoba/grzecznościowe)"),
                entry("rada", "która rada? (ministrów, nadzorcza, etc.)"),
                entry("instytut", "który instytut?"),
                entry("komisja", "która komisja?"),
                entry("program", "jaki program? (komputerowy, polityczny, edukacyjny)"),
                entry("organizacja", "która organizacja?"),
            ],
            abstract_concepts: vec![
                entry("sens", "sens moralny/praktyczny/egzystencjalny?"),
                entry("znaczenie", "znaczenie słowa/wydarzenia/symboliczne?"),
                entry("odpowiedzialność", "moralna/prawna/społeczna/zawodowa?"),
                entry("sukces", "sukces finansowy/osobisty/zawodowy?"),
                entry("kryzys", "kryzys ekonomiczny/polityczny/osobisty/zdrowotny?"),
                entry("efektywność", "efektywność czego dokładnie?"),
                entry("rozwój", "rozwój osobisty/zawodowy/gospodarczy?"),
                entry("zarządzanie", "zarządzanie czym? (ludźmi/projektem/firmą/czasem)"),
            ],
            qualifier_words: ["który", "jaki", "która", "jakie"]
                .map(String::from)
                .to_vec(),
            context_markers: [
                "w kontekście",
                "w zakresie",
                "odnośnie",
                "dotycząc",
                "w przypadku",
                "dla",
                "przy",
            ]
            .map(String::from)
            .to_vec(),
            howto_templates: ["jak zarządzać", "jak poprawić", "jak zwiększyć"]
                .map(String::from)
                .to_vec(),
            scope_markers: [
                "w firmie",
                "w zespole",
                "w projekcie",
                "w organizacji",
                "w przypadku",
                "dla",
                "przy",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl ClarifierLexicon {
    /// Load a lexicon override from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lexicon file {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse lexicon file")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalKind {
    Entity,
    Abstract,
    Scope,
}

#[derive(Debug, Clone)]
struct AmbiguitySignal {
    kind: SignalKind,
    term: String,
    gloss: String,
}

pub struct Clarifier {
    lexicon: ClarifierLexicon,
}

impl Clarifier {
    pub fn new(lexicon: ClarifierLexicon) -> Self {
        Self { lexicon }
    }

    /// Heuristic ambiguity signals for a query. Empty means the query
    /// is specific enough to run as-is.
    fn detect(&self, query: &str) -> Vec<AmbiguitySignal> {
        let text_lower = query.to_lowercase();
        let tokens: Vec<&str> = TOKEN_RE.find_iter(&text_lower).map(|m| m.as_str()).collect();

        // Stage 1: high-precision exclusions. Identifiers, acronyms,
        // and short numeric/dated queries are concrete by definition.
        let has_digit_token = tokens
            .iter()
            .any(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()));
        if ID_RE.is_match(query)
            || ACRONYM_RE.is_match(query.trim())
            || (YEAR_RE.is_match(query) && tokens.len() <= 8)
            || (has_digit_token && tokens.len() <= 6)
        {
            return Vec::new();
        }

        // Stage 2: high-recall signals.
        let mut signals = Vec::new();

        let has_qualifier = self
            .lexicon
            .qualifier_words
            .iter()
            .any(|w| text_lower.contains(w.as_str()));
        for entry in &self.lexicon.ambiguous_entities {
            if text_lower.contains(entry.term.as_str()) && !has_qualifier {
                signals.push(AmbiguitySignal {
                    kind: SignalKind::Entity,
                    term: entry.term.clone(),
                    gloss: entry.gloss.clone(),
                });
            }
        }

        let has_context = self
            .lexicon
            .context_markers
            .iter()
            .any(|m| text_lower.contains(m.as_str()));
        for entry in &self.lexicon.abstract_concepts {
            if text_lower.contains(entry.term.as_str()) && !has_context {
                signals.push(AmbiguitySignal {
                    kind: SignalKind::Abstract,
                    term: entry.term.clone(),
                    gloss: entry.gloss.clone(),
                });
            }
        }

        let is_howto = self
            .lexicon
            .howto_templates
            .iter()
            .any(|t| text_lower.contains(t.as_str()));
        if is_howto {
            let has_scope = self
                .lexicon
                .scope_markers
                .iter()
                .any(|m| text_lower.contains(m.as_str()));
            if !has_scope {
                signals.push(AmbiguitySignal {
                    kind: SignalKind::Scope,
                    term: "brak zakresu".to_string(),
                    gloss: "nie określono kontekstu/zakresu".to_string(),
                });
            }
        }

        signals
    }

    /// Detect ambiguity and produce interpretations for it.
    pub async fn clarify(&self, query: &str, chat: &dyn ChatModel) -> Clarification {
        let signals = self.detect(query);
        if signals.is_empty() {
            return Clarification {
                needs_clarification: false,
                original_query: query.to_string(),
                interpretations: Vec::new(),
            };
        }

        let mut interpretations = match self.ask_for_interpretations(query, &signals, chat).await {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Interpretation call failed, using heuristics");
                Vec::new()
            }
        };

        if interpretations.len() < 2 {
            interpretations = synthesize_interpretations(&signals);
        }
        if interpretations.len() < 2 {
            interpretations.push(Interpretation {
                label: format!("Interpretacja {}", interpretations.len() + 1),
                clarification: FALLBACK_INTERPRETATION.to_string(),
            });
        }
        interpretations.truncate(3);

        Clarification {
            needs_clarification: true,
            original_query: query.to_string(),
            interpretations,
        }
    }

    async fn ask_for_interpretations(
        &self,
        query: &str,
        signals: &[AmbiguitySignal],
        chat: &dyn ChatModel,
    ) -> Result<Vec<Interpretation>> {
        let signal_desc = signals
            .first()
            .map(|s| {
                format!(
                    "\n\nWykryto niejednoznaczność w terminie '{}': {}",
                    s.term, s.gloss
                )
            })
            .unwrap_or_default();

        let prompt = format!(
            r#"Zapytanie użytkownika jest niejednoznaczne.
TWOJE ZADANIE:
Napisz 2-3 interpretacje W FORMIE ZDAŃ TWIERDZĄCYCH (nie pytań!).
Każda interpretacja powinna zaczynać się od "pytanie dotyczy" lub podobnego sformułowania.

PRZYKŁADY:

Zapytanie: "Co mówi PAN o kryzysie?"
Interpretacje:
pytanie dotyczy Polskiej Akademii Nauk (instytucja)
pytanie dotyczy wypowiedzi konkretnej osoby (pan jako osoba)

Zapytanie: "Jaki ma sens odpowiedzialność?"
Interpretacje:
pytanie dotyczy odpowiedzialności w kontekście moralnym
pytanie dotyczy odpowiedzialności w kontekście praktycznym (biznes, zarządzanie)
pytanie dotyczy odpowiedzialności w kontekście egzystencjalnym (filozofia życia)

ZAPYTANIE: "{}"{}

Napisz tylko interpretacje w formie zdań twierdzących, każda w nowej linii."#,
            query, signal_desc
        );

        let options = ChatOptions {
            temperature: 0.3,
            top_p: Some(0.9),
            format: None,
        };
        let content = chat.chat(&[ChatMessage::user(prompt)], &options).await?;
        Ok(parse_interpretation_lines(&content))
    }
}

/// One interpretation per non-empty line, numbering stripped, headers
/// and too-short lines dropped.
fn parse_interpretation_lines(content: &str) -> Vec<Interpretation> {
    let mut interpretations = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line = LINE_NUMBERING_RE.replace(line, "").to_string();
        if line.chars().count() > 10 && !line.starts_with("Interpretacje") {
            interpretations.push(Interpretation {
                label: format!("Interpretacja {}", interpretations.len() + 1),
                clarification: line,
            });
        }
    }
    interpretations
}

/// Turn detected signals into interpretations when the model cannot.
fn synthesize_interpretations(signals: &[AmbiguitySignal]) -> Vec<Interpretation> {
    fn push(interpretations: &mut Vec<Interpretation>, clarification: String) {
        if interpretations.len() < 3 {
            interpretations.push(Interpretation {
                label: format!("Interpretacja {}", interpretations.len() + 1),
                clarification,
            });
        }
    }

    let mut interpretations: Vec<Interpretation> = Vec::new();

    for signal in signals.iter().take(3) {
        match signal.kind {
            SignalKind::Entity => {
                let parts: Vec<&str> = signal.gloss.split(" vs ").collect();
                if parts.len() == 2 {
                    push(
                        &mut interpretations,
                        format!("pytanie dotyczy {}", parts[0].trim()),
                    );
                    push(
                        &mut interpretations,
                        format!("pytanie dotyczy {}", parts[1].trim()),
                    );
                } else {
                    push(
                        &mut interpretations,
                        format!("pytanie dotyczy {}", signal.term),
                    );
                }
            }
            SignalKind::Abstract => {
                let clean = signal.gloss.replace('?', "");
                let clean = clean.trim();
                if clean.contains('/') {
                    for variant in clean.split('/').take(2) {
                        push(
                            &mut interpretations,
                            format!("pytanie dotyczy {} - {}", signal.term, variant.trim()),
                        );
                    }
                } else {
                    push(&mut interpretations, format!("pytanie dotyczy {}", clean));
                }
            }
            SignalKind::Scope => {
                let clean = signal.gloss.replace('?', "");
                push(
                    &mut interpretations,
                    format!("pytanie dotyczy {}", clean.trim()),
                );
            }
        }
    }
    interpretations
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ScriptedChat(Option<String>);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<String> {
            self.0.clone().ok_or_else(|| anyhow!("model unavailable"))
        }
    }

    fn clarifier() -> Clarifier {
        Clarifier::new(ClarifierLexicon::default())
    }

    #[tokio::test]
    async fn test_id_query_is_not_ambiguous() {
        let result = clarifier()
            .clarify("co zawiera dokument AB-123", &ScriptedChat(None))
            .await;
        assert!(!result.needs_clarification);
        assert!(result.interpretations.is_empty());
    }

    #[tokio::test]
    async fn test_acronym_is_not_ambiguous() {
        let result = clarifier().clarify("PAN", &ScriptedChat(None)).await;
        assert!(!result.needs_clarification);
    }

    #[tokio::test]
    async fn test_short_year_query_is_not_ambiguous() {
        let result = clarifier()
            .clarify("inflacja w 2023 roku", &ScriptedChat(None))
            .await;
        assert!(!result.needs_clarification);
    }

    #[tokio::test]
    async fn test_abstract_query_yields_at_least_two_interpretations() {
        let chat = ScriptedChat(Some(
            "pytanie dotyczy odpowiedzialności w kontekście moralnym\npytanie dotyczy odpowiedzialności w kontekście prawnym"
                .into(),
        ));
        let result = clarifier()
            .clarify("jaki jest sens odpowiedzialności", &chat)
            .await;
        assert!(result.needs_clarification);
        assert!(result.interpretations.len() >= 2);
        assert!(result.interpretations.len() <= 3);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_lexicon_synthesis() {
        let result = clarifier()
            .clarify("jaki jest sens odpowiedzialności", &ScriptedChat(None))
            .await;
        assert!(result.needs_clarification);
        assert!(result.interpretations.len() >= 2);
        for interp in &result.interpretations {
            assert!(interp.clarification.starts_with("pytanie dotyczy"));
        }
    }

    #[tokio::test]
    async fn test_numbered_lines_are_cleaned() {
        let chat = ScriptedChat(Some(
            "1. pytanie dotyczy Polskiej Akademii Nauk\n2. pytanie dotyczy osoby mówiącej".into(),
        ));
        let result = clarifier().clarify("co mówi pan o kryzysie", &chat).await;
        assert!(result.needs_clarification);
        assert!(result.interpretations[0]
            .clarification
            .starts_with("pytanie dotyczy"));
    }

    #[tokio::test]
    async fn test_howto_without_scope_is_ambiguous() {
        let result = clarifier()
            .clarify("jak poprawić komunikację", &ScriptedChat(None))
            .await;
        assert!(result.needs_clarification);
    }

    #[tokio::test]
    async fn test_howto_with_scope_is_not_ambiguous() {
        let result = clarifier()
            .clarify("jak poprawić komunikację w zespole", &ScriptedChat(None))
            .await;
        assert!(!result.needs_clarification);
    }

    #[tokio::test]
    async fn test_qualified_entity_is_not_flagged() {
        let result = clarifier()
            .clarify("która rada wydała uchwałę", &ScriptedChat(None))
            .await;
        assert!(!result.needs_clarification);
    }

    #[test]
    fn test_lexicon_roundtrips_through_json() {
        let lexicon = ClarifierLexicon::default();
        let json = serde_json::to_string(&lexicon).unwrap();
        let parsed: ClarifierLexicon = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.ambiguous_entities.len(),
            lexicon.ambiguous_entities.len()
        );
    }
}
