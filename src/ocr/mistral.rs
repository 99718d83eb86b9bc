//! Mistral OCR API client.
//!
//! Uploads the image inline as a base64 data URL to `POST /v1/ocr` and joins
//! the markdown of every returned page.

use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::ImageFormat;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{OcrError, OcrResult, Recognize};
use crate::config::Config;

/// Formats the service accepts as `image_url` documents.
const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::Avif,
];

/// Error bodies are echoed into messages; keep them short.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: Document,
}

#[derive(Serialize)]
struct Document {
    #[serde(rename = "type")]
    kind: &'static str,
    image_url: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<Page>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage_info: Option<UsageInfo>,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    dimensions: Option<Dimensions>,
}

#[derive(Deserialize)]
struct Dimensions {
    #[serde(default)]
    dpi: Option<u32>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Deserialize)]
struct UsageInfo {
    #[serde(default)]
    doc_size_bytes: Option<u64>,
}

pub struct MistralOcrClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
    max_image_bytes: u64,
}

impl MistralOcrClient {
    pub fn new(config: &Config) -> Result<Self, OcrError> {
        Self::with_builder(config, reqwest::blocking::Client::builder())
    }

    fn with_builder(config: &Config, builder: reqwest::blocking::ClientBuilder) -> Result<Self, OcrError> {
        let http = builder
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OcrError::Client(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.ocr_endpoint.clone(),
            model: config.ocr_model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            max_image_bytes: config.max_image_bytes,
        })
    }
}

/// Reads the image and returns it as a `data:` URL, failing fast on size or format.
fn encode_image(path: &Path, max_bytes: u64) -> Result<String, OcrError> {
    let read_error = |source| OcrError::ReadImage {
        path: path.to_path_buf(),
        source,
    };

    let bytes_on_disk = fs::metadata(path).map_err(read_error)?.len();
    if bytes_on_disk > max_bytes {
        return Err(OcrError::ImageTooLarge {
            bytes: bytes_on_disk,
            limit: max_bytes,
        });
    }

    let data = fs::read(path).map_err(read_error)?;
    let format = image::guess_format(&data)
        .map_err(|_| OcrError::UnsupportedImage("not a recognized raster image".to_string()))?;
    if !ACCEPTED_FORMATS.contains(&format) {
        return Err(OcrError::UnsupportedImage(format!("{format:?}")));
    }

    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(&data)
    ))
}

/// Pulls a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|json| {
        json["message"]
            .as_str()
            .or_else(|| json["detail"].as_str())
            .or_else(|| json["detail"][0]["msg"].as_str())
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "no details".to_string()
        } else {
            trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
        }
    })
}

/// Maps an HTTP status and body to a result. Pure, so it can be tested offline.
fn parse_response(status: StatusCode, body: &str) -> Result<OcrResult, OcrError> {
    if !status.is_success() {
        let message = error_message(body);
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OcrError::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => OcrError::RateLimited(message),
            StatusCode::BAD_REQUEST
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNSUPPORTED_MEDIA_TYPE
            | StatusCode::UNPROCESSABLE_ENTITY => OcrError::InvalidInput(message),
            _ => OcrError::Server {
                status: status.as_u16(),
                message,
            },
        });
    }

    let response: OcrResponse =
        serde_json::from_str(body).map_err(|e| OcrError::MalformedResponse(e.to_string()))?;

    for page in &response.pages {
        let dims = page.dimensions.as_ref();
        debug!(
            index = page.index,
            chars = page.markdown.as_deref().map_or(0, str::len),
            width = ?dims.and_then(|d| d.width),
            height = ?dims.and_then(|d| d.height),
            dpi = ?dims.and_then(|d| d.dpi),
            "OCR page"
        );
    }

    let text = response
        .pages
        .iter()
        .filter_map(|page| page.markdown.as_deref())
        .map(str::trim)
        .filter(|markdown| !markdown.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(OcrResult::new(
        &text,
        response.pages.len(),
        response.model,
        response.usage_info.and_then(|usage| usage.doc_size_bytes),
    ))
}

impl Recognize for MistralOcrClient {
    fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let image_url = encode_image(image_path, self.max_image_bytes)?;
        info!(
            path = %image_path.display(),
            encoded_bytes = image_url.len(),
            model = %self.model,
            "Sending image to Mistral OCR"
        );

        let request = OcrRequest {
            model: &self.model,
            document: Document {
                kind: "image_url",
                image_url,
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| {
                warn!(error = %e, "Failed to reach Mistral OCR");
                if e.is_timeout() {
                    OcrError::Timeout(self.timeout)
                } else {
                    OcrError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                OcrError::Timeout(self.timeout)
            } else {
                OcrError::MalformedResponse(format!("failed to read body: {e}"))
            }
        })?;

        let result = parse_response(status, &body).inspect_err(|e| {
            warn!(status = status.as_u16(), error = %e, "Mistral OCR request failed");
        })?;
        info!(
            chars = result.raw_text.len(),
            pages = result.pages,
            contains_math = result.contains_math,
            "OCR completed"
        );
        debug!(text = %result.raw_text, "Extracted text");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Overrides, RawConfig, API_KEY_ENV};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    const SAMPLE_RESPONSE: &str = r#"{
        "pages": [
            {"index": 0, "markdown": "  Solve: $x^2 + 2x + 1 = 0$  ", "images": [],
             "dimensions": {"dpi": 200, "height": 90, "width": 400}},
            {"index": 1, "markdown": "   ", "images": []}
        ],
        "model": "mistral-ocr-2505-completion",
        "usage_info": {"pages_processed": 1, "doc_size_bytes": 5120}
    }"#;

    #[test]
    fn test_parse_success_joins_pages() {
        let result = parse_response(StatusCode::OK, SAMPLE_RESPONSE).unwrap();
        assert_eq!(result.raw_text, "Solve: $x^2 + 2x + 1 = 0$");
        assert_eq!(result.pages, 2);
        assert_eq!(result.model.as_deref(), Some("mistral-ocr-2505-completion"));
        assert_eq!(result.doc_size_bytes, Some(5120));
        assert!(result.contains_math);
    }

    #[test]
    fn test_parse_multiple_pages_joined_by_newline() {
        let body = r#"{"pages": [{"markdown": "first"}, {"markdown": null}, {"markdown": "second"}]}"#;
        let result = parse_response(StatusCode::OK, body).unwrap();
        assert_eq!(result.raw_text, "first\nsecond");
    }

    #[test]
    fn test_parse_no_pages_is_empty_text() {
        let result = parse_response(StatusCode::OK, r#"{"pages": []}"#).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_unauthorized() {
        let err = parse_response(StatusCode::UNAUTHORIZED, r#"{"message": "Unauthorized"}"#).unwrap_err();
        assert!(matches!(err, OcrError::Unauthorized(ref m) if m == "Unauthorized"));
    }

    #[test]
    fn test_rate_limited() {
        let err = parse_response(StatusCode::TOO_MANY_REQUESTS, "").unwrap_err();
        assert!(matches!(err, OcrError::RateLimited(_)));
    }

    #[test]
    fn test_invalid_input_reads_detail_array() {
        let body = r#"{"detail": [{"loc": ["body", "document"], "msg": "Field required"}]}"#;
        let err = parse_response(StatusCode::UNPROCESSABLE_ENTITY, body).unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput(ref m) if m == "Field required"));
    }

    #[test]
    fn test_server_error_keeps_status() {
        let err = parse_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, OcrError::Server { status: 502, .. }));
    }

    #[test]
    fn test_malformed_success_body() {
        let err = parse_response(StatusCode::OK, r#"{"text": "no pages key"}"#).unwrap_err();
        assert!(matches!(err, OcrError::MalformedResponse(_)));
    }

    #[test]
    fn test_encode_image_png_data_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shot.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();

        let url = encode_image(&path, 1024 * 1024).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_encode_image_rejects_oversized() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shot.png");
        image::RgbImage::new(64, 64).save(&path).unwrap();

        let err = encode_image(&path, 16).unwrap_err();
        assert!(matches!(err, OcrError::ImageTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_encode_image_rejects_non_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "plain text, not pixels").unwrap();

        let err = encode_image(&path, 1024).unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedImage(_)));
    }

    fn client_for(endpoint: String, timeout: Duration) -> MistralOcrClient {
        let raw = RawConfig {
            ocr_endpoint: Some(endpoint),
            ..RawConfig::default()
        };
        let env = |key: &str| (key == API_KEY_ENV).then(|| "test-key".to_string());
        let overrides = Overrides {
            output_dir: Some(PathBuf::from("/tmp/latexsnip-test")),
            ..Overrides::default()
        };
        let mut config = Config::resolve(raw, env, &overrides).unwrap();
        config.request_timeout = timeout;
        MistralOcrClient::with_builder(&config, reqwest::blocking::Client::builder().no_proxy()).unwrap()
    }

    /// Reads one HTTP request, headers and body, and returns the header block.
    fn read_request(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut headers = String::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
            headers.push_str(&line);
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();
        headers
    }

    fn sample_png(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("shot.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();
        path
    }

    #[test]
    fn test_recognize_maps_http_401_to_unauthorized() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/v1/ocr", listener.local_addr().unwrap());
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let headers = read_request(&stream);
            let body = r#"{"message": "Unauthorized"}"#;
            write!(
                stream,
                "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .unwrap();
            headers
        });

        let dir = tempfile::TempDir::new().unwrap();
        let client = client_for(endpoint, Duration::from_secs(5));
        let err = client.recognize(&sample_png(&dir)).unwrap_err();
        assert!(matches!(err, OcrError::Unauthorized(ref m) if m == "Unauthorized"));

        let headers = server.join().unwrap().to_ascii_lowercase();
        assert!(headers.starts_with("post /v1/ocr"));
        assert!(headers.contains("authorization: bearer test-key"));
    }

    #[test]
    fn test_recognize_times_out_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/v1/ocr", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                let stream = stream.unwrap();
                seen.fetch_add(1, Ordering::SeqCst);
                read_request(&stream);
                // Never answer.
                held.push(stream);
            }
        });

        let dir = tempfile::TempDir::new().unwrap();
        let client = client_for(endpoint, Duration::from_secs(1));
        let started = Instant::now();
        let err = client.recognize(&sample_png(&dir)).unwrap_err();
        assert!(matches!(err, OcrError::Timeout(t) if t == Duration::from_secs(1)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));

        thread::sleep(Duration::from_millis(300));
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_shape() {
        let request = OcrRequest {
            model: "mistral-ocr-latest",
            document: Document {
                kind: "image_url",
                image_url: "data:image/png;base64,AAAA".to_string(),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "mistral-ocr-latest");
        assert_eq!(json["document"]["type"], "image_url");
        assert_eq!(json["document"]["image_url"], "data:image/png;base64,AAAA");
    }
}
