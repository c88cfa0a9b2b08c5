//! Multipart upload of spectrogram images to the labeling service.

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::dsp::ByteImage;

/// Outcome of one upload. `http_code` is 0 when no response arrived.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadResponse {
    pub http_code: u16,
    pub body: String,
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.http_code)
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Encode an 8-bit grayscale raster as PNG.
pub fn encode_png_gray(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let img = GrayImage::from_raw(width, height, data.to_vec())
        .with_context(|| format!("Buffer of {} bytes does not fit {}x{}", data.len(), width, height))?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(out.into_inner())
}

/// Anything that can ship a spectrogram image to the labeling service.
pub trait SpectrogramUploader: Send + Sync {
    fn upload_spectrogram_png(&self, image: &ByteImage, user: &str, filename: &str) -> UploadResponse;
}

pub struct Uploader {
    client: Client,
    url: String,
}

impl Uploader {
    pub fn new(url: &str, connect_timeout: Duration, total_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn from_config(config: &RemoteConfig, url: &str) -> Result<Self> {
        Self::new(
            url,
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.total_timeout_ms),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn upload_file(&self, path: &Path, user: &str) -> UploadResponse {
        if !path.is_file() {
            return UploadResponse::failed(format!("File not found: {}", path.display()));
        }
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => return UploadResponse::failed(format!("Failed to read {}: {}", path.display(), e)),
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".into());
        self.upload_memory(data, &filename, "application/octet-stream", user)
    }

    pub fn upload_memory(&self, data: Vec<u8>, filename: &str, mime: &str, user: &str) -> UploadResponse {
        if data.is_empty() {
            return UploadResponse::failed("empty buffer");
        }
        let part = match Part::bytes(data).file_name(filename.to_string()).mime_str(mime) {
            Ok(part) => part,
            Err(e) => return UploadResponse::failed(e.to_string()),
        };
        let form = Form::new().part("file", part).text("user", user.to_string());

        let response = match self.client.post(&self.url).multipart(form).send() {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Upload to {} failed: {}", self.url, e);
                return UploadResponse::failed(e.to_string());
            }
        };
        let http_code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        let error = (!(200..300).contains(&http_code)).then(|| format!("HTTP {}", http_code));
        log::debug!("Uploaded {} to {}: HTTP {}", filename, self.url, http_code);
        UploadResponse { http_code, body, error }
    }
}

impl SpectrogramUploader for Uploader {
    fn upload_spectrogram_png(&self, image: &ByteImage, user: &str, filename: &str) -> UploadResponse {
        if image.width == 0 || image.height == 0 {
            return UploadResponse::failed("invalid image size");
        }
        if image.data.len() != image.width * image.height {
            return UploadResponse::failed("data size mismatch");
        }
        match encode_png_gray(image.width as u32, image.height as u32, &image.data) {
            Ok(png) => self.upload_memory(png, filename, "image/png", user),
            Err(e) => UploadResponse::failed(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn uploader(url: &str) -> Uploader {
        Uploader::new(url, Duration::from_millis(500), Duration::from_secs(5)).unwrap()
    }

    /// Accept one request, reply with `status`, and hand back the raw request.
    fn one_shot_server(status: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                let closing = text
                    .split("boundary=")
                    .nth(1)
                    .and_then(|rest| rest.split("\r\n").next())
                    .map(|b| format!("--{}--", b));
                if closing.is_some_and(|c| text.contains(&c)) {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok", status);
            stream.write_all(reply.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    #[test]
    fn png_encoding_keeps_pixels() {
        let data: Vec<u8> = (0..12).map(|i| i * 20).collect();
        let png = encode_png_gray(4, 3, &data).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.into_raw(), data);
        assert!(encode_png_gray(4, 4, &data).is_err());
    }

    #[test]
    fn validation_happens_before_network() {
        let up = uploader("http://127.0.0.1:9/never");
        let bad = ByteImage {
            width: 0,
            height: 3,
            data: Vec::new(),
        };
        assert_eq!(up.upload_spectrogram_png(&bad, "u", "spec.png").error.as_deref(), Some("invalid image size"));
        let mismatch = ByteImage {
            width: 2,
            height: 2,
            data: vec![0; 3],
        };
        let resp = up.upload_spectrogram_png(&mismatch, "u", "spec.png");
        assert_eq!(resp.error.as_deref(), Some("data size mismatch"));
        assert!(!resp.success());

        assert_eq!(up.upload_memory(Vec::new(), "a", "b/c", "u").error.as_deref(), Some("empty buffer"));
        let missing = up.upload_file(Path::new("/no/such/file.png"), "u");
        assert_eq!(missing.error.as_deref(), Some("File not found: /no/such/file.png"));
    }

    #[test]
    fn posts_multipart_and_reports_success() {
        let (url, server) = one_shot_server("201 Created");
        let img = ByteImage {
            width: 2,
            height: 2,
            data: vec![0, 64, 128, 255],
        };
        let resp = uploader(&url).upload_spectrogram_png(&img, "tester", "spec.png");
        let request = server.join().unwrap();
        assert!(resp.success(), "{:?}", resp);
        assert_eq!(resp.http_code, 201);
        assert_eq!(resp.body, "ok");
        assert!(request.contains("name=\"user\""));
        assert!(request.contains("tester"));
        assert!(request.contains("filename=\"spec.png\""));
    }

    #[test]
    fn non_2xx_is_an_error() {
        let (url, server) = one_shot_server("500 Internal Server Error");
        let resp = uploader(&url).upload_memory(vec![1, 2, 3], "x.bin", "application/octet-stream", "u");
        server.join().unwrap();
        assert!(!resp.success());
        assert_eq!(resp.http_code, 500);
        assert_eq!(resp.error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn unreachable_server_fails_softly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);
        let resp = uploader(&url).upload_memory(vec![1], "x", "application/octet-stream", "u");
        assert_eq!(resp.http_code, 0);
        assert!(resp.error.is_some());
    }
}
