//! Upload, match and clear endpoints.

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::matching::{MatchFailure, MatchOutcome, UploadedFile};
use crate::server::state::{GuardedMatchCoordinator, ServerState};
use crate::staging::{StagingError, StagingKind};

/// Multipart field carrying the recorded clip.
pub const AUDIO_CHUNK_FIELD: &str = "audio_chunk";
/// Multipart field carrying the fingerprint database.
pub const ADX_FILE_FIELD: &str = "adx_file";

const MISSING_FILES_ERROR: &str = "Missing audio chunk or .adx file";

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub match_timecode: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'static str>,
}

/// Body of `POST /match`: names of previously uploaded files.
#[derive(Debug, Deserialize)]
pub struct MatchBody {
    #[serde(default)]
    pub audio_chunk: Option<String>,
    #[serde(default)]
    pub adx_file: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            cause: None,
        }),
    )
        .into_response()
}

fn staging_error_response(e: &StagingError) -> Response {
    match e {
        StagingError::InvalidFilename(_) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Oversized uploads keep the 413 of the body limit, anything else is a 400.
fn multipart_error_response(e: &MultipartError) -> Response {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => {
            error_response(StatusCode::PAYLOAD_TOO_LARGE, "Upload is too large")
        }
        _ => error_response(StatusCode::BAD_REQUEST, "Failed to read upload"),
    }
}

/// POST /upload - store a clip and a fingerprint database (multipart/form-data)
async fn upload_files(
    State(coordinator): State<GuardedMatchCoordinator>,
    mut multipart: Multipart,
) -> Response {
    debug!("Received upload request");

    let mut audio_chunk: Option<UploadedFile> = None;
    let mut adx_file: Option<UploadedFile> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read multipart body: {}", e);
                return multipart_error_response(&e);
            }
        };

        let kind = match field.name() {
            Some(AUDIO_CHUNK_FIELD) => StagingKind::Sample,
            Some(ADX_FILE_FIELD) => StagingKind::Database,
            _ => continue,
        };

        let filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        let data = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                warn!("Failed to read file data: {}", e);
                return multipart_error_response(&e);
            }
        };

        let file = UploadedFile {
            kind,
            filename,
            data,
        };
        match kind {
            StagingKind::Sample => audio_chunk = Some(file),
            StagingKind::Database => adx_file = Some(file),
        }
    }

    let (audio_chunk, adx_file) = match (audio_chunk, adx_file) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            warn!("Upload is missing the audio chunk or the .adx file");
            return error_response(StatusCode::BAD_REQUEST, MISSING_FILES_ERROR);
        }
    };

    match coordinator.store_uploads(&[audio_chunk, adx_file]).await {
        Ok(paths) => {
            for path in &paths {
                info!("Saved upload to {:?}", path);
            }
            Json(MessageResponse {
                message: "Files uploaded successfully".to_string(),
            })
            .into_response()
        }
        Err(e) => {
            warn!("Failed to store upload: {}", e);
            staging_error_response(&e)
        }
    }
}

fn outcome_response(outcome: &MatchOutcome) -> Response {
    let cause = Some(outcome.cause());
    match outcome {
        MatchOutcome::Matched { timecode_secs } => Json(MatchResponse {
            match_timecode: Some(*timecode_secs),
            cause: None,
        })
        .into_response(),
        MatchOutcome::NotMatched => Json(MatchResponse {
            match_timecode: None,
            cause,
        })
        .into_response(),
        MatchOutcome::TimedOut => (
            StatusCode::REQUEST_TIMEOUT,
            Json(ErrorResponse {
                error: "Unable to match the audio in the given time".to_string(),
                cause,
            }),
        )
            .into_response(),
        MatchOutcome::Failed(failure) => {
            let (status, error) = match failure {
                MatchFailure::Staging(StagingError::InvalidFilename(_)) => {
                    (StatusCode::BAD_REQUEST, failure.to_string())
                }
                MatchFailure::Conversion(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to convert audio file".to_string(),
                ),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, failure.to_string()),
            };
            (status, Json(ErrorResponse { error, cause })).into_response()
        }
    }
}

/// POST /match - run one match attempt for previously uploaded files
async fn match_audio(
    State(coordinator): State<GuardedMatchCoordinator>,
    body: Result<Json<MatchBody>, JsonRejection>,
) -> Response {
    debug!("Received match request");

    let (audio_chunk, adx_file) = match body {
        Ok(Json(MatchBody {
            audio_chunk: Some(a),
            adx_file: Some(b),
        })) if !a.is_empty() && !b.is_empty() => (a, b),
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, MISSING_FILES_ERROR),
        Err(rejection) => {
            debug!("Rejected match body: {}", rejection);
            return error_response(StatusCode::BAD_REQUEST, MISSING_FILES_ERROR);
        }
    };

    info!("Matching audio chunk {} with .adx file {}", audio_chunk, adx_file);
    let attempt = coordinator.run(&audio_chunk, &adx_file).await;
    debug!(
        "Match attempt {} finished as {} in {}ms",
        attempt.id,
        attempt.outcome.cause(),
        attempt.elapsed.as_millis()
    );

    outcome_response(&attempt.outcome)
}

/// POST /clear_files - empty both staging directories
async fn clear_files(State(coordinator): State<GuardedMatchCoordinator>) -> Response {
    match coordinator.clear().await {
        Ok(report) => {
            info!(
                "Cleared staging directories via /clear_files ({} files)",
                report.removed.len()
            );
            Json(MessageResponse {
                message: "Directories cleared successfully".to_string(),
            })
            .into_response()
        }
        Err(e) => {
            warn!("Error clearing directories: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Build the match routes.
///
/// - POST /upload - Store `audio_chunk` and `adx_file`
/// - POST /match - Match a stored clip against a stored database
/// - POST /clear_files - Empty the staging area
pub fn match_routes(max_upload_bytes: usize) -> Router<ServerState> {
    let upload_route = Router::new()
        .route("/upload", post(upload_files))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .merge(upload_route)
        .route("/match", post(match_audio))
        .route("/clear_files", post(clear_files))
}
