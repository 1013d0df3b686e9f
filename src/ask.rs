//! Preguntas en lenguaje natural sobre el grafo de hashtags.
//!
//! Flujo:
//!   1. Se buscan los hashtags que aparecen en la pregunta.
//!   2. Se recuperan los ficheros con esos hashtags (resumen + resto de etiquetas).
//!   3. El LLM responde usando sólo ese contexto.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::TaggedFile;
use crate::store::GraphStore;

const NO_MATCH_ANSWER: &str =
    "No se encontraron hashtags relacionados con la pregunta en el grafo.";

/// Modelo que responde una pregunta a partir de un contexto.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn answer(&self, question: &str, context: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Hashtags de la pregunta encontrados en el grafo.
    pub hashtags: Vec<String>,
    /// Otros hashtags que comparten fichero con los anteriores.
    pub related_hashtags: Vec<String>,
    pub files: Vec<String>,
}

/// Términos de la pregunta: palabras de 3 o más caracteres, en minúsculas.
fn terms(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Un hashtag encaja si coincide con algún término o uno contiene al otro
/// ("loan" encaja con "loans").
fn matching_tags(question: &str, tags: &[String]) -> Vec<String> {
    let terms = terms(question);
    tags.iter()
        .filter(|tag| {
            let tag = tag.to_lowercase();
            tag.chars().count() >= 3
                && terms
                    .iter()
                    .any(|term| term == &tag || term.contains(&tag) || tag.contains(term.as_str()))
        })
        .cloned()
        .collect()
}

fn build_context(files: &[TaggedFile]) -> String {
    files
        .iter()
        .map(|f| {
            let tags: Vec<String> = f.hashtags.iter().map(|t| format!("#{t}")).collect();
            format!("- {} [{}]: {}", f.name, tags.join(" "), f.summary)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn ask(
    store: &dyn GraphStore,
    model: &dyn AnswerModel,
    question: &str,
    limit: usize,
) -> Result<Answer> {
    let all_tags = store.list_hashtags().await?;
    let hashtags = matching_tags(question, &all_tags);
    debug!("Hashtags de la pregunta: {hashtags:?}");

    if hashtags.is_empty() {
        return Ok(Answer {
            answer: NO_MATCH_ANSWER.to_string(),
            hashtags,
            related_hashtags: Vec::new(),
            files: Vec::new(),
        });
    }

    let files = store.find_tagged_files(&hashtags, limit).await?;
    let related_hashtags: Vec<String> = files
        .iter()
        .flat_map(|f| f.hashtags.iter())
        .filter(|t| !hashtags.contains(t))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let context = format!(
        "Hashtags encontrados: {}\nHashtags relacionados: {}\n\nFicheros:\n{}",
        hashtags.join(", "),
        related_hashtags.join(", "),
        build_context(&files)
    );
    let answer = model.answer(question, &context).await?;
    info!("Pregunta respondida con {} ficheros de contexto", files.len());

    Ok(Answer {
        answer,
        hashtags,
        related_hashtags,
        files: files.into_iter().map(|f| f.name).collect(),
    })
}
