use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{Response, StatusCode};
use serde::Serialize;

use kimichat_core::config::ModelOverrides;
use kimichat_core::message::{data_url, ChatMessage};
use kimichat_core::retry::run_with_retry;

use crate::envelope::{json_error, json_success, now_rfc3339};
use crate::{prompts, AppState};

const MAX_IMAGES: usize = 10;
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Whole-request budget for the multipart route: the per-file limits plus
/// slack for form boilerplate.
pub(crate) const UPLOAD_BODY_LIMIT_BYTES: usize = MAX_IMAGES * MAX_IMAGE_BYTES + 1024 * 1024;

const ANALYSIS_TEMPERATURE: f32 = 0.7;
const ANALYSIS_MAX_TOKENS: u32 = 2000;
const DEFAULT_ANALYSIS_TYPE: &str = "relationship";

const FIELD_IMAGES: &str = "images";
const FIELD_ANALYSIS_TYPE: &str = "analysisType";
const FIELD_CUSTOM_PROMPT: &str = "customPrompt";

struct UploadedImage {
    name: String,
    data_url: String,
}

struct UploadForm {
    images: Vec<UploadedImage>,
    analysis_type: String,
    custom_prompt: Option<String>,
}

enum UploadError {
    NoImages,
    TooManyImages,
    ImageTooLarge { name: String },
    NotAnImage { name: String, content_type: String },
    Malformed(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoImages => write!(f, "at least one image file is required"),
            Self::TooManyImages => write!(f, "at most {MAX_IMAGES} images are accepted"),
            Self::ImageTooLarge { name } => {
                write!(f, "{name} exceeds the {MAX_IMAGE_BYTES} byte limit")
            }
            Self::NotAnImage { name, content_type } => {
                write!(f, "{name} is {content_type}, only image/* files are accepted")
            }
            Self::Malformed(detail) => write!(f, "malformed multipart request: {detail}"),
        }
    }
}

/// Reads the multipart form into memory. Uploads live only for this
/// request; nothing is written to disk, so there is no cleanup path.
async fn collect_upload(multipart: &mut Multipart) -> Result<UploadForm, UploadError> {
    let mut form = UploadForm {
        images: Vec::new(),
        analysis_type: DEFAULT_ANALYSIS_TYPE.to_string(),
        custom_prompt: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::Malformed(err.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            FIELD_IMAGES => {
                if form.images.len() >= MAX_IMAGES {
                    return Err(UploadError::TooManyImages);
                }
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !content_type.starts_with("image/") {
                    return Err(UploadError::NotAnImage { name, content_type });
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| UploadError::Malformed(err.to_string()))?;
                if bytes.len() > MAX_IMAGE_BYTES {
                    return Err(UploadError::ImageTooLarge { name });
                }
                form.images.push(UploadedImage {
                    name,
                    data_url: data_url(&content_type, &bytes),
                });
            }
            FIELD_ANALYSIS_TYPE => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| UploadError::Malformed(err.to_string()))?;
                let value = value.trim();
                if !value.is_empty() {
                    form.analysis_type = value.to_string();
                }
            }
            FIELD_CUSTOM_PROMPT => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| UploadError::Malformed(err.to_string()))?;
                let value = value.trim();
                if !value.is_empty() {
                    form.custom_prompt = Some(value.to_string());
                }
            }
            _ => {
                // Unknown fields are drained so the stream stays well-formed.
                let _ = field.bytes().await;
            }
        }
    }

    if form.images.is_empty() {
        return Err(UploadError::NoImages);
    }
    Ok(form)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisData {
    analysis: String,
    image_count: usize,
    image_names: Vec<String>,
    analysis_type: String,
    custom_prompt_used: bool,
    timestamp: String,
}

/// `POST /api/ai/analyze-multi-images` — inlines each upload as a data
/// URL part of one multimodal turn and runs a single-shot analysis
/// through the retrying executor.
pub(crate) async fn analyze_multi_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response<Body> {
    let form = match collect_upload(&mut multipart).await {
        Ok(form) => form,
        Err(err) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid upload", err.to_string())
        }
    };

    let prompts::AnalysisPrompt {
        text: prompt_text,
        custom: custom_prompt_used,
    } = prompts::analysis_prompt(
        &form.analysis_type,
        form.images.len(),
        form.custom_prompt.as_deref(),
    );
    let image_names: Vec<String> = form.images.iter().map(|image| image.name.clone()).collect();
    let image_urls: Vec<String> = form
        .images
        .into_iter()
        .map(|image| image.data_url)
        .collect();
    let messages = vec![ChatMessage::multimodal(prompt_text, image_urls)];

    let overrides = ModelOverrides {
        temperature: Some(ANALYSIS_TEMPERATURE),
        max_tokens: Some(ANALYSIS_MAX_TOKENS),
        ..ModelOverrides::default()
    };
    let client = match state.chat_client(&overrides) {
        Ok(client) => client,
        Err(err) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "analysis service unavailable",
                err.to_string(),
            )
        }
    };
    let policy = client.config().retry_policy();

    match run_with_retry(&policy, || client.invoke(&messages)).await {
        Ok(analysis) => json_success(AnalysisData {
            analysis,
            image_count: image_names.len(),
            image_names,
            analysis_type: form.analysis_type,
            custom_prompt_used,
            timestamp: now_rfc3339(),
        }),
        Err(err) => {
            log::error!("event=image_analysis_failed err={err}");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "image analysis failed",
                err.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{UploadError, MAX_IMAGES};

    #[test]
    fn upload_errors_name_the_offending_file() {
        let err = UploadError::NotAnImage {
            name: "notes.pdf".to_string(),
            content_type: "application/pdf".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("notes.pdf"));
        assert!(text.contains("application/pdf"));
    }

    #[test]
    fn too_many_images_error_states_the_limit() {
        assert!(UploadError::TooManyImages
            .to_string()
            .contains(&MAX_IMAGES.to_string()));
    }
}
