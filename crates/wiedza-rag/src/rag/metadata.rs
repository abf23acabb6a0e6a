//! Query and document metadata enrichment.
//!
//! Entities and places come straight from NER. Dates go through the
//! hybrid extractor: strict regexes for the common Polish formats, NER
//! `date` entities, and a structured LLM pass that is shown what the
//! first two already found. Only strings carrying a four-digit year
//! survive, and each is reduced to its years.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::llm::{strip_code_fences, ChatMessage, ChatModel, ChatOptions};
use crate::nlp::{Annotation, EntityLabel, NlpPipeline};
use crate::types::QueryMetadata;

static STRICT_DATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b\d{4}\.\d{2}\.\d{2}\b",
        r"\b\d{4}/\d{2}/\d{2}\b",
        r"\b\d{2}-\d{2}-\d{4}\b",
        r"\b\d{2}\.\d{2}\.\d{4}\b",
        r"\b\d{2}/\d{2}/\d{4}\b",
        r"\bw \d{4}\b",
        r"(?:o|O)d \d{4} do \d{4}\b",
        r"\d{4}-\d{4}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("strict date regex is valid"))
    .collect()
});

static FOUR_DIGIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\b").expect("four digit regex is valid"));

static CONTAINS_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}").expect("year presence regex is valid"));

const DATE_PARSE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%Y.%m.%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d/%m/%Y",
];

#[derive(Debug, Default, Deserialize)]
struct DatesPayload {
    #[serde(default)]
    dates: Vec<String>,
    #[serde(default)]
    years: Vec<String>,
    #[serde(default)]
    ranges: Vec<String>,
    #[serde(default)]
    other: Vec<String>,
}

fn dates_schema() -> serde_json::Value {
    let string_array = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "object",
        "properties": {
            "dates": string_array,
            "years": string_array,
            "ranges": string_array,
            "other": string_array,
        },
        "required": ["dates", "years", "ranges", "other"],
    })
}

fn match_strict_dates(text: &str) -> Vec<String> {
    let mut results = Vec::new();
    for regex in STRICT_DATE_RES.iter() {
        for m in regex.find_iter(text) {
            results.push(m.as_str().to_string());
        }
    }
    results
}

fn ner_dates(annotation: &Annotation) -> Vec<String> {
    annotation
        .entities
        .iter()
        .filter(|e| e.label == EntityLabel::Date)
        .map(|e| e.text.clone())
        .collect()
}

async fn llm_dates(text: &str, known: &[String], chat: &dyn ChatModel) -> DatesPayload {
    let prompt = format!(
        r#"Wyodrębnij z poniższego tekstu tylko nietypowe daty i zakresy, których nie wykryły standardowe metody.
Oto daty już znalezione: {}

TEKST:
{}

Zwróć wynik w formacie JSON:
{{
  "dates": [],
  "years": [],
  "ranges": [],
  "other": []
}}"#,
        known.join(", "),
        text
    );

    let options = ChatOptions {
        temperature: 0.0,
        top_p: None,
        format: Some(dates_schema()),
    };
    match chat.chat(&[ChatMessage::user(prompt)], &options).await {
        Ok(content) => serde_json::from_str(&strip_code_fences(&content)).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Date extraction output was not valid JSON");
            DatesPayload::default()
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Date extraction call failed");
            DatesPayload::default()
        }
    }
}

/// Union of regex, NER, and LLM date findings, restricted to strings
/// that carry a four-digit year. Deduplicated and sorted.
pub async fn hybrid_date_extraction(
    text: &str,
    annotation: &Annotation,
    chat: &dyn ChatModel,
) -> Vec<String> {
    let mut known = match_strict_dates(text);
    known.extend(ner_dates(annotation));

    let llm_found = llm_dates(text, &known, chat).await;
    known.extend(llm_found.dates);
    known.extend(llm_found.years);
    known.extend(llm_found.ranges);
    known.extend(llm_found.other);

    let unique: BTreeSet<String> = known
        .into_iter()
        .filter(|d| CONTAINS_YEAR_RE.is_match(d))
        .collect();
    unique.into_iter().collect()
}

/// Reduce date strings to the years they mention. Strict formats are
/// parsed as calendar dates; everything else falls back to collecting
/// every four-digit group.
pub fn years_from_dates(dates: &[String]) -> Vec<i32> {
    let mut years: BTreeSet<i32> = BTreeSet::new();
    for date in dates {
        let parsed = DATE_PARSE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(date.trim(), format).ok());
        match parsed {
            Some(d) => {
                years.insert(d.year());
            }
            None => {
                for m in FOUR_DIGIT_RE.find_iter(date) {
                    if let Ok(year) = m.as_str().parse::<i32>() {
                        years.insert(year);
                    }
                }
            }
        }
    }
    years.into_iter().collect()
}

/// Extract entity, place, and year hints from a query, for matching
/// against future documents.
pub async fn extract_metadata_from_query(
    text: &str,
    nlp: &dyn NlpPipeline,
    chat: &dyn ChatModel,
) -> Result<QueryMetadata> {
    let annotation = nlp.annotate(text).await?;

    let entities: BTreeSet<String> = annotation
        .entities
        .iter()
        .filter(|e| e.label.is_person_or_org())
        .map(|e| e.text.clone())
        .collect();
    let places: BTreeSet<String> = annotation
        .entities
        .iter()
        .filter(|e| e.label.is_place())
        .map(|e| e.text.clone())
        .collect();

    let dates = hybrid_date_extraction(text, &annotation, chat).await;
    let years = years_from_dates(&dates);

    Ok(QueryMetadata {
        entities: entities.into_iter().collect(),
        places: places.into_iter().collect(),
        years,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::NlpEntity;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ScriptedChat(Option<String>);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<String> {
            self.0.clone().ok_or_else(|| anyhow!("model unavailable"))
        }
    }

    struct FixedNlp(Annotation);

    #[async_trait]
    impl NlpPipeline for FixedNlp {
        async fn annotate(&self, _: &str) -> Result<Annotation> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_strict_regexes_find_iso_and_polish_formats() {
        let text = "Raport z 2021-05-10 oraz okres od 2010 do 2015, a także w 1999.";
        let found = match_strict_dates(text);
        assert!(found.iter().any(|d| d == "2021-05-10"));
        assert!(found.iter().any(|d| d == "od 2010 do 2015"));
        assert!(found.iter().any(|d| d == "w 1999"));
    }

    #[test]
    fn test_years_from_parseable_dates() {
        let dates = vec!["2021-05-10".to_string(), "12.03.1995".to_string()];
        assert_eq!(years_from_dates(&dates), vec![1995, 2021]);
    }

    #[test]
    fn test_years_fall_back_to_digit_groups() {
        let dates = vec!["od 2010 do 2015".to_string(), "w 1999".to_string()];
        assert_eq!(years_from_dates(&dates), vec![1999, 2010, 2015]);
    }

    #[tokio::test]
    async fn test_hybrid_extraction_keeps_only_dated_strings() {
        let annotation = Annotation {
            entities: vec![
                NlpEntity {
                    text: "maj 2020".into(),
                    label: EntityLabel::Date,
                },
                NlpEntity {
                    text: "wczoraj".into(),
                    label: EntityLabel::Date,
                },
            ],
            ..Default::default()
        };
        let chat = ScriptedChat(Some(
            "{\"dates\": [], \"years\": [\"rok 2005\"], \"ranges\": [], \"other\": [\"bez roku\"]}"
                .into(),
        ));
        let dates = hybrid_date_extraction("tekst bez dat", &annotation, &chat).await;
        assert!(dates.contains(&"maj 2020".to_string()));
        assert!(dates.contains(&"rok 2005".to_string()));
        assert!(!dates.iter().any(|d| d == "wczoraj"));
        assert!(!dates.iter().any(|d| d == "bez roku"));
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_regex_and_ner_findings() {
        let annotation = Annotation::default();
        let chat = ScriptedChat(None);
        let dates = hybrid_date_extraction("spotkanie 2023-01-15", &annotation, &chat).await;
        assert_eq!(dates, vec!["2023-01-15".to_string()]);
    }

    #[tokio::test]
    async fn test_query_metadata_separates_entities_and_places() {
        let annotation = Annotation {
            entities: vec![
                NlpEntity {
                    text: "Adam Mickiewicz".into(),
                    label: EntityLabel::PersName,
                },
                NlpEntity {
                    text: "Warszawa".into(),
                    label: EntityLabel::PlaceName,
                },
                NlpEntity {
                    text: "PAN".into(),
                    label: EntityLabel::OrgName,
                },
            ],
            ..Default::default()
        };
        let nlp = FixedNlp(annotation);
        let chat = ScriptedChat(Some(
            "{\"dates\": [], \"years\": [], \"ranges\": [], \"other\": []}".into(),
        ));
        let metadata =
            extract_metadata_from_query("co napisał Mickiewicz w Warszawie w 1830", &nlp, &chat)
                .await
                .unwrap();
        assert_eq!(metadata.entities, vec!["Adam Mickiewicz", "PAN"]);
        assert_eq!(metadata.places, vec!["Warszawa"]);
        assert_eq!(metadata.years, vec![1830]);
    }
}
