use crate::error::{Error, Result};
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};
use std::io::Read;

pub const ENC_NONE: &str = "identity";
pub const ENC_GZIP: &str = "gzip";
pub const ENC_DEFLATE: &str = "deflate";
pub const ENC_ZSTD: &str = "zstd";

/// Value sent as `Accept-Encoding` so the server only picks codecs we can undo.
pub const ACCEPTED_ENCODINGS: &str = "gzip, deflate, zstd";

fn decode_error(encoding: &str, e: std::io::Error) -> Error {
    Error::Client(format!("failed to decode {encoding} response body: {e}"))
}

pub fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| decode_error(ENC_GZIP, e))?;
    Ok(Bytes::from(decoded))
}

pub fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoder = DeflateDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| decode_error(ENC_DEFLATE, e))?;
    Ok(Bytes::from(decoded))
}

pub fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    let decoded = zstd::decode_all(data).map_err(|e| decode_error(ENC_ZSTD, e))?;
    Ok(Bytes::from(decoded))
}

/// Undoes the `Content-Encoding` of a response body and returns it as text.
/// The header value is matched case-insensitively; when several codings are
/// listed the last applied one is undone first.
pub fn decode_body(data: Bytes, content_encoding: Option<&str>) -> Result<String> {
    let mut body = data;
    let codings: Vec<String> = content_encoding
        .unwrap_or(ENC_NONE)
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    for coding in codings.iter().rev() {
        body = match coding.as_str() {
            ENC_GZIP | "x-gzip" => decode_gzip(&body)?,
            ENC_DEFLATE => decode_deflate(&body)?,
            ENC_ZSTD => decode_zstd(&body)?,
            ENC_NONE => body,
            other => {
                return Err(Error::Client(format!(
                    "unsupported content encoding: {other}"
                )))
            }
        };
    }

    String::from_utf8(body.to_vec())
        .map_err(|e| Error::Client(format!("response body is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder};
    use std::io::Write;

    fn gzip(data: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decode_gzip_should_return_correct_string() {
        let data = vec![
            31, 139, 8, 0, 0, 0, 0, 0, 0, 255, 43, 73, 45, 46, 137, 55, 52, 50, 6, 0, 21, 191, 53,
            241, 8, 0, 0, 0,
        ];
        let result = decode_gzip(&data).unwrap();
        assert_eq!(&result[..], b"test_123");
    }

    #[test]
    fn decode_deflate_should_return_correct_string() {
        let data = vec![43, 73, 45, 46, 137, 55, 52, 50, 6, 0];
        let result = decode_deflate(&data).unwrap();
        assert_eq!(&result[..], b"test_123");
    }

    #[test]
    fn decode_zstd_should_return_correct_string() {
        let data = vec![
            40, 181, 47, 253, 0, 88, 65, 0, 0, 116, 101, 115, 116, 95, 49, 50, 51,
        ];
        let result = decode_zstd(&data).unwrap();
        assert_eq!(&result[..], b"test_123");
    }

    #[test]
    fn test_decode_body_plain() {
        let body = Bytes::from_static("{\"status\":\"succeeded\"}".as_bytes());
        assert_eq!(
            decode_body(body, None).unwrap(),
            "{\"status\":\"succeeded\"}"
        );
    }

    #[test]
    fn test_decode_body_case_insensitive() {
        let body = Bytes::from(gzip("{\"output\":[\"hi\"]}"));
        assert_eq!(
            decode_body(body, Some(" GZip ")).unwrap(),
            "{\"output\":[\"hi\"]}"
        );
    }

    #[test]
    fn test_decode_body_stacked_encodings() {
        let mut deflater = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        deflater.write_all(&gzip("layered")).unwrap();
        let data = deflater.finish().unwrap();

        let result = decode_body(Bytes::from(data), Some("gzip, deflate")).unwrap();
        assert_eq!(result, "layered");
    }

    #[test]
    fn test_decode_body_unknown_encoding() {
        let err = decode_body(Bytes::from_static(b"x"), Some("br")).unwrap_err();
        assert!(err.to_string().contains("unsupported content encoding: br"));
    }

    #[test]
    fn test_decode_body_invalid_utf8() {
        let err = decode_body(Bytes::from_static(&[0xFF, 0xFE, 0xFD]), None).unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[test]
    fn test_decode_corrupted_gzip() {
        let corrupted_data = vec![31, 139, 8, 0, 0, 0, 0, 0, 0, 255, 1, 2, 3];
        assert!(decode_gzip(&corrupted_data).is_err());
    }

    #[test]
    fn test_decode_corrupted_zstd() {
        assert!(decode_zstd(&[1, 2, 3, 4, 5]).is_err());
    }
}
