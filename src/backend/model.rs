//! Wire shapes of the remote service, parsed once at the boundary.
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::{PersistError, UploadError};
use crate::model::MediaAsset;

/// Upload response body. Accepts both `{"url": ..}` and the enveloped
/// `{"success": false, "message": ..}` form.
#[derive(Deserialize, Debug)]
struct UploadBody {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Tagged result of an upload round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResponse {
    Uploaded { url: String },
    Rejected { status: u16, message: String },
}

impl UploadResponse {
    pub fn parse(status: StatusCode, body: &str) -> Result<Self, UploadError> {
        if !status.is_success() {
            return Ok(UploadResponse::Rejected {
                status: status.as_u16(),
                message: error_message(status, body),
            });
        }
        let parsed: UploadBody = serde_json::from_str(body)
            .map_err(|e| UploadError::decode(format!("{e}: {}", truncate(body))))?;
        if parsed.success == Some(false) {
            let message = parsed
                .message
                .or(parsed.error)
                .unwrap_or_else(|| "upload rejected".to_string());
            return Ok(UploadResponse::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let url = parsed
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| UploadError::decode("response carries no url"))?;
        Url::parse(&url).map_err(|e| UploadError::decode(format!("url {url:?} is not absolute: {e}")))?;
        Ok(UploadResponse::Uploaded { url })
    }

    pub fn into_result(self) -> Result<String, UploadError> {
        match self {
            UploadResponse::Uploaded { url } => Ok(url),
            UploadResponse::Rejected { status, message } => Err(UploadError::RemoteRejection {
                status: Some(status),
                message,
            }),
        }
    }
}

pub fn parse_gallery_response(status: StatusCode, body: &str) -> Result<Vec<MediaAsset>, PersistError> {
    check_persist_status(status, body)?;
    serde_json::from_str::<Vec<MediaAsset>>(body)
        .map_err(|e| PersistError::Decode(format!("{e}: {}", truncate(body))))
}

pub fn check_persist_status(status: StatusCode, body: &str) -> Result<(), PersistError> {
    if status.is_success() {
        return Ok(());
    }
    Err(PersistError::RemoteRejection {
        status: status.as_u16(),
        message: error_message(status, body),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            let text = body.trim();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                truncate(text)
            }
        })
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_body_is_uploaded() {
        let res = UploadResponse::parse(StatusCode::OK, r#"{"url":"https://cdn/a.jpg"}"#).unwrap();
        assert_eq!(
            res,
            UploadResponse::Uploaded {
                url: "https://cdn/a.jpg".into()
            }
        );
    }

    #[test]
    fn envelope_failure_is_rejection() {
        let res = UploadResponse::parse(
            StatusCode::OK,
            r#"{"success":false,"message":"bucket full"}"#,
        )
        .unwrap();
        assert_eq!(
            res.into_result().unwrap_err(),
            UploadError::RemoteRejection {
                status: Some(200),
                message: "bucket full".into()
            }
        );
    }

    #[test]
    fn error_status_uses_message_field_or_body() {
        let res = UploadResponse::parse(StatusCode::PAYLOAD_TOO_LARGE, r#"{"error":"too big"}"#).unwrap();
        assert_eq!(
            res,
            UploadResponse::Rejected {
                status: 413,
                message: "too big".into()
            }
        );
        let res = UploadResponse::parse(StatusCode::BAD_GATEWAY, "").unwrap();
        assert_eq!(
            res,
            UploadResponse::Rejected {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
    }

    #[test]
    fn malformed_success_is_decode_error() {
        assert!(matches!(
            UploadResponse::parse(StatusCode::OK, "<html>"),
            Err(UploadError::Decode { .. })
        ));
        assert!(matches!(
            UploadResponse::parse(StatusCode::OK, r#"{"url":""}"#),
            Err(UploadError::Decode { .. })
        ));
        assert!(matches!(
            UploadResponse::parse(StatusCode::OK, r#"{"url":"relative/a.jpg"}"#),
            Err(UploadError::Decode { .. })
        ));
    }

    #[test]
    fn gallery_response_parses_assets() {
        let assets = parse_gallery_response(
            StatusCode::OK,
            r#"[{"id":"1","url":"https://cdn/a","altText":"a","isPrimary":true,"displayOrder":0}]"#,
        )
        .unwrap();
        assert_eq!(assets.len(), 1);
        assert!(matches!(
            parse_gallery_response(StatusCode::CONFLICT, "stale"),
            Err(PersistError::RemoteRejection { status: 409, .. })
        ));
        assert!(matches!(
            parse_gallery_response(StatusCode::OK, "{}"),
            Err(PersistError::Decode(_))
        ));
    }
}
