//! Translation stage: pending translation rows → translated/failed.
//!
//! - `HttpTranslator` calls an OpenAI-style chat-completions endpoint. This
//!   is the production provider.
//! - `EchoTranslator` tags the source text with the target language for
//!   development and tests.
//!
//! Failures are isolated per record: one failed call marks that row `failed`
//! and the batch continues.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lexica_core::config::TranslationConfig;
use lexica_core::error::{LexicaError, Result};
use lexica_core::types::EntityKind;
use lexica_storage::{Database, TranslationRepository};

const SYSTEM_PROMPT: &str = "You are a professional software localization translator. \
Translate the given UI label or help text into clear, concise text in the target language. \
Do not add explanations. Preserve placeholders like {name} or %(count)s. \
Return the translation only.";

/// Service for translating batches of text between two languages.
pub trait Translator: Send + Sync {
    /// Translate each text from `src` to `tgt`, preserving order.
    fn translate(
        &self,
        texts: &[String],
        src: &str,
        tgt: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
}

/// Object-safe version of [`Translator`] for dynamic dispatch.
///
/// Because `Translator::translate` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Box<dyn DynTranslator>` to be chosen from configuration at runtime.
pub trait DynTranslator: Send + Sync {
    fn translate_boxed<'a>(
        &'a self,
        texts: &'a [String],
        src: &'a str,
        tgt: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>>> + Send + 'a>>;
}

/// Blanket impl: any `Translator` automatically implements `DynTranslator`.
impl<T: Translator> DynTranslator for T {
    fn translate_boxed<'a>(
        &'a self,
        texts: &'a [String],
        src: &'a str,
        tgt: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>>> + Send + 'a>>
    {
        Box::pin(self.translate(texts, src, tgt))
    }
}

impl Translator for Box<dyn DynTranslator> {
    async fn translate(
        &self,
        texts: &[String],
        src: &str,
        tgt: &str,
    ) -> Result<Vec<String>> {
        (**self).translate_boxed(texts, src, tgt).await
    }
}

/// Build the configured provider.
pub fn build_translator(config: &TranslationConfig) -> Result<Box<dyn DynTranslator>> {
    match config.provider.as_str() {
        "http" => Ok(Box::new(HttpTranslator::new(config)?)),
        "echo" => Ok(Box::new(EchoTranslator)),
        other => Err(LexicaError::Config(format!(
            "unknown translation provider: {}",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// EchoTranslator - development/test provider
// ---------------------------------------------------------------------------

/// Development provider: prefixes the source text with the uppercased target
/// language. Deterministic and offline.
#[derive(Debug, Clone, Default)]
pub struct EchoTranslator;

impl Translator for EchoTranslator {
    async fn translate(&self, texts: &[String], _src: &str, tgt: &str) -> Result<Vec<String>> {
        Ok(texts
            .iter()
            .map(|t| format!("({}){}", tgt.to_uppercase(), t))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// HttpTranslator - chat-completions provider
// ---------------------------------------------------------------------------

/// Chat-completions-backed translation provider.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpTranslator {
    /// Build the provider from configuration. The API key is read from the
    /// environment variable named in the config, never from the config file.
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LexicaError::Translation(format!("{} is not set", config.api_key_env))
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| LexicaError::Translation(format!("Failed to build client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn translate_one(&self, text: &str, src: &str, tgt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": format!("Source language: {}\nTarget language: {}\nText:\n{}", src, tgt, text),
                },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LexicaError::Translation(format!("Request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| LexicaError::Translation(format!("Provider returned error: {}", e)))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LexicaError::Translation(format!("Invalid response body: {}", e)))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if content.is_empty() {
            return Err(LexicaError::Translation(
                "Provider returned empty translation".to_string(),
            ));
        }
        Ok(content)
    }
}

impl Translator for HttpTranslator {
    async fn translate(&self, texts: &[String], src: &str, tgt: &str) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate_one(text, src, tgt).await?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// TranslateStage
// ---------------------------------------------------------------------------

/// A sample entry carried in the run report for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateSample {
    pub natural_key: String,
    pub entity: EntityKind,
    pub status: String,
}

/// Result of one translation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslateReport {
    /// Rows selected for this batch.
    pub picked: u64,
    /// Rows successfully translated.
    pub processed: u64,
    /// Rows that failed and were recorded as such.
    pub failed: u64,
    /// Up to five per-record samples.
    pub samples: Vec<TranslateSample>,
}

const SAMPLES_MAX: usize = 5;

/// The translation stage.
pub struct TranslateStage<T: Translator> {
    translations: TranslationRepository,
    translator: T,
    text_limit: usize,
    max_attempts: u32,
}

impl<T: Translator> TranslateStage<T> {
    pub fn new(db: Arc<Database>, translator: T, text_limit: usize, max_attempts: u32) -> Self {
        Self {
            translations: TranslationRepository::new(db),
            translator,
            text_limit,
            max_attempts,
        }
    }

    /// Run one bounded translation batch for a language pair.
    ///
    /// Selects up to `limit` eligible rows, translates each, and transitions
    /// its state with a single atomic update per record. A killed run leaves
    /// finished records finalized and the rest untouched.
    pub async fn run(
        &self,
        limit: u32,
        src_lang: &str,
        tgt_lang: &str,
        entities: Option<&[EntityKind]>,
    ) -> Result<TranslateReport> {
        let rows = self
            .translations
            .pick_pending(limit, entities, src_lang, tgt_lang, self.max_attempts)?;

        let mut report = TranslateReport {
            picked: rows.len() as u64,
            ..Default::default()
        };
        if rows.is_empty() {
            return Ok(report);
        }

        for row in rows {
            let trimmed = trim_chars(&row.source_text, self.text_limit);
            match self
                .translator
                .translate(std::slice::from_ref(&trimmed), src_lang, tgt_lang)
                .await
            {
                Ok(texts) if !texts.is_empty() => {
                    self.translations.mark_translated(row.id, &texts[0])?;
                    report.processed += 1;
                    debug!(natural_key = %row.natural_key, "Row translated");
                    if report.samples.len() < SAMPLES_MAX {
                        report.samples.push(TranslateSample {
                            natural_key: row.natural_key.clone(),
                            entity: row.entity,
                            status: "translated".to_string(),
                        });
                    }
                }
                Ok(_) => {
                    self.translations
                        .mark_failed(row.id, "provider returned no output")?;
                    report.failed += 1;
                    warn!(natural_key = %row.natural_key, "Provider returned no output");
                }
                Err(e) => {
                    self.translations.mark_failed(row.id, &e.to_string())?;
                    report.failed += 1;
                    warn!(natural_key = %row.natural_key, error = %e, "Translation failed");
                    if report.samples.len() < SAMPLES_MAX {
                        report.samples.push(TranslateSample {
                            natural_key: row.natural_key.clone(),
                            entity: row.entity,
                            status: "failed".to_string(),
                        });
                    }
                }
            }
        }

        info!(
            picked = report.picked,
            processed = report.processed,
            failed = report.failed,
            src = src_lang,
            tgt = tgt_lang,
            "Translation run complete"
        );
        Ok(report)
    }
}

/// Trim to at most `limit` characters, marking truncation with an ellipsis.
fn trim_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit).collect();
    out.push('…');
    out
}
