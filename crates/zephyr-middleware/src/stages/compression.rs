//! Response compression.
//!
//! A response-phase middleware that encodes bodies with gzip, brotli or
//! deflate according to the request's `Accept-Encoding` header.
//!
//! Compression is skipped when:
//!
//! - the client accepts no supported encoding (or only `identity`)
//! - the body is below the size threshold
//! - the content type is excluded or not in the compressible list
//! - the request path starts with an excluded prefix
//! - the response already carries `Content-Encoding`
//! - the encoded body would not be smaller
//!
//! ```
//! use zephyr_middleware::stages::{Algorithm, Compression};
//!
//! let compression = Compression::builder()
//!     .algorithms([Algorithm::Brotli, Algorithm::Gzip])
//!     .threshold(512)
//!     .exclude_path("/api/stream")
//!     .build();
//! # let _ = compression;
//! ```

use std::collections::HashSet;
use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{DeflateEncoder, GzEncoder};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::HeaderValue;
use http_body_util::Full;
use tracing::debug;
use zephyr_core::{body_bytes, BoxFuture, RequestContext, Response};

use crate::middleware::{Middleware, Next};

/// Content encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// gzip (RFC 1952).
    Gzip,
    /// Brotli (RFC 7932).
    Brotli,
    /// deflate (RFC 1951).
    Deflate,
    /// No encoding.
    Identity,
}

impl Algorithm {
    /// Returns the `Content-Encoding` token.
    #[must_use]
    pub fn encoding_name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
            Self::Deflate => "deflate",
            Self::Identity => "identity",
        }
    }

    /// Parses an `Accept-Encoding` token.
    #[must_use]
    pub fn from_encoding(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "br" | "brotli" => Some(Self::Brotli),
            "deflate" => Some(Self::Deflate),
            "identity" => Some(Self::Identity),
            _ => None,
        }
    }
}

/// Parses `Accept-Encoding` into known algorithms with their q-values,
/// highest preference first. Ties keep header order.
pub fn parse_accept_encoding(value: &str) -> Vec<(Algorithm, f32)> {
    let mut encodings: Vec<(Algorithm, f32)> = value
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let algorithm = Algorithm::from_encoding(pieces.next()?)?;
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .map_or(1.0, |q| q.clamp(0.0, 1.0));
            Some((algorithm, quality))
        })
        .collect();
    encodings.sort_by(|a, b| b.1.total_cmp(&a.1));
    encodings
}

/// Response compression middleware.
#[derive(Debug, Clone)]
pub struct Compression {
    algorithms: Vec<Algorithm>,
    threshold: usize,
    level: u32,
    content_types: Option<HashSet<String>>,
    excluded_types: HashSet<String>,
    excluded_paths: Vec<String>,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::Brotli, Algorithm::Gzip, Algorithm::Deflate],
            threshold: 1024,
            level: 6,
            content_types: None,
            excluded_types: default_excluded_types(),
            excluded_paths: Vec::new(),
        }
    }
}

fn default_compressible(base_type: &str) -> bool {
    base_type.starts_with("text/")
        || base_type.ends_with("+json")
        || base_type.ends_with("+xml")
        || matches!(
            base_type,
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "application/x-www-form-urlencoded"
                | "application/graphql"
                | "image/svg+xml"
                | "font/ttf"
                | "font/otf"
        )
}

fn default_excluded_types() -> HashSet<String> {
    [
        "application/gzip",
        "application/zip",
        "application/pdf",
        "application/octet-stream",
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "audio/mpeg",
        "video/mp4",
        "text/event-stream",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Compression {
    /// Creates the middleware with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> CompressionBuilder {
        CompressionBuilder::default()
    }

    /// Picks the encoding for a request, if any.
    pub fn select_algorithm(&self, accept_encoding: &str) -> Option<Algorithm> {
        for (algorithm, quality) in parse_accept_encoding(accept_encoding) {
            if quality <= 0.0 {
                continue;
            }
            if algorithm == Algorithm::Identity {
                return None;
            }
            if self.algorithms.contains(&algorithm) {
                return Some(algorithm);
            }
        }
        None
    }

    /// Returns true if responses of `content_type` may be compressed.
    pub fn is_compressible(&self, content_type: &str) -> bool {
        let base_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if self.excluded_types.contains(&base_type) {
            return false;
        }
        match &self.content_types {
            Some(types) => types.contains(&base_type),
            None => default_compressible(&base_type),
        }
    }

    fn is_excluded_path(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Encodes `data`.
    pub fn compress(&self, data: &[u8], algorithm: Algorithm) -> io::Result<Vec<u8>> {
        let level = flate2::Compression::new(self.level.min(9));
        match algorithm {
            Algorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
            Algorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
            Algorithm::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: i32::try_from(self.level.min(11)).unwrap_or(6),
                    ..Default::default()
                };
                let mut output = Vec::new();
                brotli::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
                Ok(output)
            }
            Algorithm::Identity => Ok(data.to_vec()),
        }
    }

    async fn encode(&self, response: Response, algorithm: Algorithm) -> Response {
        let (mut parts, body) = response.into_parts();
        let body = body_bytes(body).await;

        if body.len() < self.threshold {
            return Response::from_parts(parts, Full::new(body));
        }

        let encoded = match self.compress(&body, algorithm) {
            Ok(encoded) if encoded.len() < body.len() => encoded,
            Ok(_) => return Response::from_parts(parts, Full::new(body)),
            Err(error) => {
                debug!(%error, encoding = algorithm.encoding_name(), "compression failed");
                return Response::from_parts(parts, Full::new(body));
            }
        };

        parts.headers.insert(
            CONTENT_ENCODING,
            HeaderValue::from_static(algorithm.encoding_name()),
        );
        parts.headers.remove(CONTENT_LENGTH);
        Response::from_parts(parts, Full::new(Bytes::from(encoded)))
    }
}

fn add_vary(response: &mut Response) {
    let present = response
        .headers()
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("accept-encoding"));
    if !present {
        response
            .headers_mut()
            .append(VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

impl Middleware for Compression {
    fn name(&self) -> &str {
        "compression"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let algorithm = ctx
                .header(ACCEPT_ENCODING.as_str())
                .and_then(|value| self.select_algorithm(value));
            let excluded_path = self.is_excluded_path(ctx.path());

            let mut response = next.run(ctx).await;
            if excluded_path {
                return response;
            }
            add_vary(&mut response);

            let Some(algorithm) = algorithm else {
                return response;
            };
            let already_encoded = response.headers().contains_key(CONTENT_ENCODING);
            let compressible = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| self.is_compressible(ct));
            if already_encoded || !compressible {
                return response;
            }

            self.encode(response, algorithm).await
        })
    }
}

/// Builder for [`Compression`].
#[derive(Debug, Clone, Default)]
pub struct CompressionBuilder {
    inner: Compression,
}

impl CompressionBuilder {
    /// Sets the accepted algorithms. The client's preference decides among them.
    #[must_use]
    pub fn algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.inner.algorithms = algorithms.into_iter().collect();
        self
    }

    /// Sets the minimum body size in bytes.
    #[must_use]
    pub fn threshold(mut self, bytes: usize) -> Self {
        self.inner.threshold = bytes;
        self
    }

    /// Sets the level: 0-9 for gzip and deflate, up to 11 for brotli.
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.inner.level = level;
        self
    }

    /// Restricts compression to these content types.
    #[must_use]
    pub fn content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.content_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Never compresses this content type.
    #[must_use]
    pub fn exclude_type(mut self, content_type: impl Into<String>) -> Self {
        self.inner.excluded_types.insert(content_type.into());
        self
    }

    /// Never compresses responses under this path prefix.
    #[must_use]
    pub fn exclude_path(mut self, prefix: impl Into<String>) -> Self {
        self.inner.excluded_paths.push(prefix.into());
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> Compression {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compose, SharedMiddleware};
    use http::{Method, StatusCode};
    use std::io::Read;
    use std::sync::Arc;
    use zephyr_core::{handler_fn, into_parts, ResponseExt};

    fn payload() -> String {
        "{\"message\":\"hello zephyr\"}".repeat(100)
    }

    #[test]
    fn test_parse_q_values() {
        let parsed = parse_accept_encoding("gzip;q=0.5, br;q=1.0, *;q=0.1");
        assert_eq!(parsed, vec![(Algorithm::Brotli, 1.0), (Algorithm::Gzip, 0.5)]);
    }

    #[test]
    fn test_select_algorithm() {
        let compression = Compression::builder().algorithms([Algorithm::Gzip]).build();
        assert_eq!(compression.select_algorithm("br, gzip"), Some(Algorithm::Gzip));
        assert_eq!(compression.select_algorithm("gzip;q=0"), None);
        assert_eq!(compression.select_algorithm("identity, gzip"), None);
    }

    #[test]
    fn test_content_types() {
        let compression = Compression::new();
        assert!(compression.is_compressible("application/json; charset=utf-8"));
        assert!(compression.is_compressible("application/problem+json"));
        assert!(compression.is_compressible("text/html"));
        assert!(!compression.is_compressible("image/png"));
        assert!(!compression.is_compressible("text/event-stream"));

        let custom = Compression::builder().content_types(["application/custom"]).build();
        assert!(custom.is_compressible("application/custom"));
        assert!(!custom.is_compressible("text/html"));
    }

    #[test]
    fn test_gzip_and_brotli_decode() {
        let compression = Compression::new();
        let data = payload();

        let gzip = compression.compress(data.as_bytes(), Algorithm::Gzip).unwrap();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&gzip[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);

        let br = compression.compress(data.as_bytes(), Algorithm::Brotli).unwrap();
        let mut decoded = Vec::new();
        brotli::BrotliDecompress(&mut std::io::Cursor::new(&br), &mut decoded).unwrap();
        assert_eq!(decoded, data.as_bytes());
    }

    async fn run(compression: Compression, accept: &str, path: &str, body: String) -> Response {
        let mw: SharedMiddleware = Arc::new(compression);
        let pipeline = compose([mw]);
        let handler = handler_fn(move |_ctx: RequestContext| {
            let body = body.clone();
            async move { Response::json(StatusCode::OK, &serde_json::json!({ "data": body })) }
        });
        let mut ctx = RequestContext::builder(Method::GET, path)
            .header("accept-encoding", accept)
            .build();
        pipeline.run(&mut ctx, &handler).await.unwrap()
    }

    #[tokio::test]
    async fn test_compresses_large_json() {
        let response = run(Compression::new(), "gzip", "/items", payload()).await;
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(VARY).unwrap(), "Accept-Encoding");
    }

    #[tokio::test]
    async fn test_small_body_untouched() {
        let response = run(Compression::new(), "gzip", "/items", "tiny".to_string()).await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(response.headers().get(VARY).unwrap(), "Accept-Encoding");
        let (_, body) = into_parts(response).await;
        assert_eq!(body, "{\"data\":\"tiny\"}");
    }

    #[tokio::test]
    async fn test_excluded_path_untouched() {
        let compression = Compression::builder().exclude_path("/raw").build();
        let response = run(compression, "gzip", "/raw/feed", payload()).await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert!(response.headers().get(VARY).is_none());
    }

    #[tokio::test]
    async fn test_vary_not_duplicated() {
        let mw: SharedMiddleware = Arc::new(Compression::new());
        let pipeline = compose([mw]);
        let handler = handler_fn(|_ctx: RequestContext| async {
            let mut response = Response::text(StatusCode::OK, "x");
            response
                .headers_mut()
                .insert(VARY, HeaderValue::from_static("Origin, Accept-Encoding"));
            response
        });
        let mut ctx = RequestContext::builder(Method::GET, "/")
            .header("accept-encoding", "br")
            .build();
        let response = pipeline.run(&mut ctx, &handler).await.unwrap();
        assert_eq!(response.headers().get_all(VARY).iter().count(), 1);
    }
}
