//! Wire format of the resumable transfer protocol.

use axum::http::HeaderMap;

use crate::http::response::ApiError;
use crate::storage::validate_key;

/// Bytes received so far (response) or chunk start (PATCH request).
pub const UPLOAD_OFFSET: &str = "upload-offset";
/// Declared total size, fixed at creation.
pub const UPLOAD_LENGTH: &str = "upload-length";
/// `created`, `receiving`, `complete` or `aborted`.
pub const UPLOAD_STATE: &str = "upload-state";
/// `true` on the chunk that finalizes an upload of unknown length.
pub const UPLOAD_COMPLETE: &str = "upload-complete";
/// Name of the finished blob below the resource's `data/` directory.
pub const UPLOAD_FILENAME: &str = "upload-filename";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| ApiError::BadRequest(format!("{name} is not valid text"))),
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ApiError> {
    value
        .parse::<u64>()
        .map_err(|_| ApiError::BadRequest(format!("{name} must be a non-negative integer")))
}

/// Required chunk offset of an append.
pub fn offset(headers: &HeaderMap) -> Result<u64, ApiError> {
    let value = header_str(headers, UPLOAD_OFFSET)?
        .ok_or_else(|| ApiError::BadRequest(format!("missing {UPLOAD_OFFSET}")))?;
    parse_u64(UPLOAD_OFFSET, value)
}

pub fn length(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    header_str(headers, UPLOAD_LENGTH)?
        .map(|value| parse_u64(UPLOAD_LENGTH, value))
        .transpose()
}

pub fn complete(headers: &HeaderMap) -> Result<bool, ApiError> {
    match header_str(headers, UPLOAD_COMPLETE)? {
        None => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(_) => Err(ApiError::BadRequest(format!(
            "{UPLOAD_COMPLETE} must be true or false"
        ))),
    }
}

/// Optional target filename. Must be a single path segment.
pub fn filename(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(name) = header_str(headers, UPLOAD_FILENAME)? else {
        return Ok(None);
    };
    if name.contains('/') || name.starts_with('.') || validate_key(name).is_err() {
        return Err(ApiError::BadRequest(format!(
            "{UPLOAD_FILENAME} must be a plain file name"
        )));
    }
    Ok(Some(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_offset_required() {
        assert!(matches!(offset(&HeaderMap::new()), Err(ApiError::BadRequest(_))));
        assert!(matches!(
            offset(&headers(&[(UPLOAD_OFFSET, "-1")])),
            Err(ApiError::BadRequest(_))
        ));
        assert_eq!(offset(&headers(&[(UPLOAD_OFFSET, " 42 ")])).unwrap(), 42);
    }

    #[test]
    fn test_optional_headers() {
        let empty = HeaderMap::new();
        assert_eq!(length(&empty).unwrap(), None);
        assert!(!complete(&empty).unwrap());
        assert_eq!(filename(&empty).unwrap(), None);

        let set = headers(&[
            (UPLOAD_LENGTH, "10"),
            (UPLOAD_COMPLETE, "TRUE"),
            (UPLOAD_FILENAME, "train.csv"),
        ]);
        assert_eq!(length(&set).unwrap(), Some(10));
        assert!(complete(&set).unwrap());
        assert_eq!(filename(&set).unwrap().as_deref(), Some("train.csv"));
    }

    #[test]
    fn test_filename_must_be_single_segment() {
        for bad in ["../x", "a/b", ".uploads", ".."] {
            let mut map = HeaderMap::new();
            map.insert(UPLOAD_FILENAME, HeaderValue::from_str(bad).unwrap());
            assert!(filename(&map).is_err(), "{bad}");
        }
    }
}
