use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::PipelineMode;
use crate::models::job::{JobInput, JobStatus};
use crate::models::payload::{
    JobStatusResponse, ProcessRequest, ResultPayload, SubmissionOptions, SubmitResponse,
};
use crate::routes::ApiError;
use crate::services::intake::{self, ImageSource, ValidationError};
use crate::services::submission;

/// Form field names that may carry a server-side image path.
const PATH_FIELDS: [&str; 4] = ["image_path", "image", "file", "path"];

/// `/api/process` input, from either a multipart form or a JSON body.
#[derive(Debug, Default)]
pub struct ProcessForm {
    pub source: Option<ImageSource>,
    pub questions: Option<Vec<String>>,
    pub callback_url: Option<String>,
}

impl<S> FromRequest<S> for ProcessForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| invalid(e.body_text()))?;
            return read_multipart(multipart).await;
        }

        let Json(body) = Json::<ProcessRequest>::from_request(req, state)
            .await
            .map_err(|e| invalid(e.body_text()))?;
        Ok(ProcessForm::from(body))
    }
}

impl From<ProcessRequest> for ProcessForm {
    fn from(body: ProcessRequest) -> Self {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let source = non_blank(body.image_path)
            .map(ImageSource::Path)
            .or_else(|| non_blank(body.image_base64).map(ImageSource::Base64));

        Self {
            source,
            questions: body.questions.filter(|q| !q.is_empty()),
            callback_url: non_blank(body.callback_url),
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<ProcessForm, ApiError> {
    let mut form = ProcessForm::default();
    let mut upload: Option<ImageSource> = None;
    let mut text_fields: Vec<(String, String)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);

        if matches!(name.as_str(), "image" | "file") && filename.is_some() {
            let bytes = field.bytes().await.map_err(|e| invalid(e.body_text()))?;
            // An empty file part counts as "no file"; a path may follow.
            if !bytes.is_empty() && upload.is_none() {
                upload = Some(ImageSource::Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field.text().await.map_err(|e| invalid(e.body_text()))?;
        match name.as_str() {
            "questions" => form.questions = intake::parse_questions(&value),
            "callback_url" if !value.trim().is_empty() => {
                form.callback_url = Some(value.trim().to_string())
            }
            _ => text_fields.push((name, value)),
        }
    }

    form.source = upload.or_else(|| path_from_fields(&text_fields));
    Ok(form)
}

/// Known path fields first, then any field whose value looks like a path.
fn path_from_fields(fields: &[(String, String)]) -> Option<ImageSource> {
    let named = PATH_FIELDS.iter().find_map(|key| {
        fields
            .iter()
            .find(|(name, value)| name == key && !value.trim().is_empty())
    });
    let guessed = || fields.iter().find(|(_, value)| intake::looks_like_path(value));

    named
        .or_else(guessed)
        .map(|(_, value)| ImageSource::Path(value.clone()))
}

fn invalid(message: String) -> ApiError {
    ApiError::Validation(ValidationError::InvalidOptions(message))
}

/// POST /api/process: submit a receipt image.
///
/// Async mode answers `202` with the job id. Sync mode waits in the same
/// queue and answers with the result payload.
pub async fn process_receipt(
    State(state): State<AppState>,
    form: ProcessForm,
) -> Result<Response, ApiError> {
    let image = intake::resolve_image(form.source).await?;

    let has_questions = form.questions.is_some();
    let options = SubmissionOptions::new(form.questions.unwrap_or_default(), form.callback_url);
    options
        .validate()
        .map_err(|e| invalid(e.to_string()))?;

    let input = JobInput {
        image,
        questions: has_questions.then(|| options.questions.clone()),
    };

    match state.config.pipeline_mode {
        PipelineMode::Async => {
            let job_id = submission::submit(&state, input, options.callback_url)?;
            let body = SubmitResponse {
                job_id,
                status: JobStatus::Queued,
                message: "Receipt accepted for processing".to_string(),
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        PipelineMode::Sync => {
            if options.callback_url.is_some() {
                tracing::debug!("Ignoring callback_url in sync mode");
            }
            let job = submission::submit_and_wait(&state, input).await?;
            let payload = ResultPayload::from_job(&job, state.config.include_raw)
                .ok_or_else(|| ApiError::Internal(format!("job {} has no result", job.id)))?;
            let status = match payload {
                ResultPayload::Completed { .. } => StatusCode::OK,
                ResultPayload::Failed { .. } => StatusCode::BAD_GATEWAY,
            };
            Ok((status, Json(payload)).into_response())
        }
    }
}

/// GET /api/jobs/{job_id}: current state of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.store.get(job_id).ok_or(ApiError::NotFound(job_id))?;
    Ok(Json(JobStatusResponse::from_job(
        &job,
        state.config.include_raw,
    )))
}
