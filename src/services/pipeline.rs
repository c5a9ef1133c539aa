use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::models::image::ImageData;
use crate::models::receipt::{PipelineResult, QaPair};
use crate::services::extraction::{
    clean_answer, structure_document, DocumentParser, ExtractionError, QuestionAnswering,
};
use crate::services::normalizer::Normalizer;

/// Runs both extractors and the normalizer for one receipt image.
pub struct Pipeline {
    qa: Arc<dyn QuestionAnswering>,
    documents: Arc<dyn DocumentParser>,
    normalizer: Normalizer,
    default_questions: Vec<String>,
}

impl Pipeline {
    pub fn new(
        qa: Arc<dyn QuestionAnswering>,
        documents: Arc<dyn DocumentParser>,
        normalizer: Normalizer,
        default_questions: Vec<String>,
    ) -> Self {
        Self {
            qa,
            documents,
            normalizer,
            default_questions,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn default_questions(&self) -> &[String] {
        &self.default_questions
    }

    /// Extract and normalize one receipt.
    ///
    /// Fails only when both extraction stages fail. A failing normalizer
    /// yields an all-null receipt with `receipt_meta` set instead.
    pub async fn run(
        &self,
        image: &ImageData,
        questions: Option<&[String]>,
    ) -> Result<PipelineResult, ExtractionError> {
        let custom = questions.filter(|q| !q.is_empty());
        let questions = custom.unwrap_or(&self.default_questions);

        let start = Instant::now();
        let (qa, document) = tokio::join!(
            self.ask_all(image, questions),
            self.documents.parse(image)
        );

        let document = match (&qa, document) {
            (Err(qa_err), Err(doc_err)) => {
                return Err(ExtractionError::BothStagesFailed {
                    qa: qa_err.to_string(),
                    document: doc_err.to_string(),
                });
            }
            (_, Ok(output)) => structure_document(output),
            (_, Err(e)) => {
                warn!(parser = self.documents.name(), error = %e, "Document parsing failed");
                json!({ "_error": e.to_string() })
            }
        };

        let qa = match qa {
            Ok(pairs) => pairs,
            Err(StageFailure { pairs, error }) => {
                warn!(extractor = self.qa.name(), error = %error, "Question answering failed");
                pairs
            }
        };

        info!(
            questions = qa.len(),
            extraction_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );

        let (receipt, receipt_meta) = self
            .normalizer
            .normalize(&qa, &document, custom, image)
            .await;

        Ok(PipelineResult {
            receipt,
            receipt_meta,
            raw_extraction_a: qa,
            raw_extraction_b: document,
        })
    }

    /// Ask every question in order. Failed questions keep an `[Error: …]`
    /// answer; the stage fails only when none succeeded.
    async fn ask_all(
        &self,
        image: &ImageData,
        questions: &[String],
    ) -> Result<Vec<QaPair>, StageFailure> {
        let mut pairs = Vec::with_capacity(questions.len());
        let mut first_error: Option<String> = None;
        let mut failures = 0usize;

        for question in questions {
            let answer = match self.qa.answer(image, question).await {
                Ok(raw) => clean_answer(&raw),
                Err(e) => {
                    failures += 1;
                    let message = e.to_string();
                    let answer = format!("[Error: {message}]");
                    first_error.get_or_insert(message);
                    answer
                }
            };
            pairs.push(QaPair {
                question: question.clone(),
                answer,
            });
        }

        if !questions.is_empty() && failures == questions.len() {
            return Err(StageFailure {
                pairs,
                error: ExtractionError::AllQuestionsFailed {
                    count: failures,
                    first: first_error.unwrap_or_default(),
                },
            });
        }
        Ok(pairs)
    }
}

/// A failed QA stage still carries its per-question error answers.
struct StageFailure {
    pairs: Vec<QaPair>,
    error: ExtractionError,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}
