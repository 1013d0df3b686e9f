//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts

use crate::analysis::{extract_hashtags, ContentModel};
use crate::ask::AnswerModel;
use crate::config::{AppConfig, LlmProvider};

const SUMMARY_PROMPT: &str = r#"
# ROL
Eres un experto en resumir documentos. Ser conciso es un arte.

# TAREA
Revisa el documento y escribe un resumen breve.

# NOTAS
- No inventes nada.
- El resumen debe ser claro, conciso y analítico.
- Responde sólo con el resumen, sin comentarios adicionales.
"#;

const HASHTAG_PROMPT: &str = r#"
# ROL
Eres un experto en encontrar los hashtags que mejor describen un documento.

# TAREA
Revisa el documento y devuelve una lista de hashtags.

# NOTAS
- No inventes nada.
- Los hashtags deben ser significativos y clasificar el documento de forma útil.
- Responde sólo con los hashtags (cada uno empezando por '#'), sin comentarios adicionales.
"#;

const ANSWER_PROMPT: &str = r#"
Eres un asistente que responde preguntas sobre un sistema de archivos indexado.
Respondes en español, de forma clara y concisa.
Sólo puedes usar la información del contexto: hashtags y resúmenes de ficheros.
Si el contexto no contiene la respuesta, di explícitamente que no la sabes.
"#;

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

fn document(text: &str) -> String {
    format!("Documento:\n{text}")
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    fn chat_model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, text: &str) -> Result<Vec<f64>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };

        let embedding_model = client.embedding_model(model_name);
        let embeddings = embedding_model.embed_texts(vec![text.to_string()]).await?;

        embeddings
            .into_iter()
            .next()
            .map(|e| e.vec)
            .ok_or_else(|| anyhow!("El proveedor no devolvió ningún embedding"))
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Envía `prompt` a un agente con el `preamble` indicado y devuelve la respuesta.
    async fn prompt_with_openai(&self, preamble: &str, prompt: &str, temperature: f64) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        let agent = client
            .agent(self.chat_model_name())
            .preamble(preamble)
            .temperature(temperature)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    fn unsupported(&self, what: &str) -> anyhow::Error {
        anyhow!(
            "Proveedor LLM {:?} aún no implementado para {what}",
            self.provider
        )
    }
}

#[async_trait]
impl ContentModel for LlmManager {
    async fn summarise(&self, text: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => {
                let summary = self.prompt_with_openai(SUMMARY_PROMPT, &document(text), 0.4).await?;
                Ok(summary.trim().to_string())
            }
            _ => Err(self.unsupported("resúmenes")),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(text).await,
            _ => Err(self.unsupported("embeddings")),
        }
    }

    async fn hashtags(&self, text: &str) -> Result<Vec<String>> {
        match self.provider {
            LlmProvider::OpenAI => {
                let raw = self.prompt_with_openai(HASHTAG_PROMPT, &document(text), 0.2).await?;
                Ok(extract_hashtags(&raw))
            }
            _ => Err(self.unsupported("hashtags")),
        }
    }
}

#[async_trait]
impl AnswerModel for LlmManager {
    async fn answer(&self, question: &str, context: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => {
                let prompt = format!("Contexto:\n{context}\n\nPregunta del usuario:\n{question}");
                let answer = self.prompt_with_openai(ANSWER_PROMPT, &prompt, 0.2).await?;
                Ok(answer.trim().to_string())
            }
            _ => Err(self.unsupported("chat")),
        }
    }
}
