//! JSON marshalling between typed values and the engine's string payloads.
//!
//! Every engine endpoint takes a JSON array of ids (or typed records) and
//! answers with an envelope of the form `{"data": [...]}`. These helpers
//! cover all of them.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{LocalError, Result};

#[derive(serde::Deserialize)]
struct Envelope<T> {
    data: Option<Vec<T>>,
}

/// Encodes a list of ids as a JSON array.
pub fn encode_ids(ids: &[String]) -> Result<String> {
    encode("id list", ids)
}

/// Encodes any serializable value, labelling failures with `what`.
pub fn encode<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|cause| LocalError::Encode { what, cause }.into())
}

/// Decodes a single JSON object.
pub fn decode<T: DeserializeOwned>(what: &'static str, data: Option<&str>) -> Result<T> {
    let data = data.ok_or(LocalError::MissingData(what))?;
    serde_json::from_str(data).map_err(|cause| LocalError::Decode { what, cause }.into())
}

/// Decodes a `{"data": [...]}` envelope.
///
/// A missing payload is an error; a null or absent `data` array decodes to an
/// empty list.
pub fn decode_list<T: DeserializeOwned>(what: &'static str, data: Option<&str>) -> Result<Vec<T>> {
    let envelope: Envelope<T> = decode(what, data)?;
    Ok(envelope.data.unwrap_or_default())
}

/// Like [`decode_list`], but a reply without any payload also means "nothing".
pub fn decode_optional_list<T: DeserializeOwned>(
    what: &'static str,
    data: Option<&str>,
) -> Result<Vec<T>> {
    match data {
        None => Ok(Vec::new()),
        Some(_) => decode_list(what, data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkError;
    use crate::types::{Status, TssRequest};

    #[test]
    fn test_encode_ids() {
        let ids = vec!["a".to_string(), "b\"c".to_string()];
        assert_eq!(encode_ids(&ids).unwrap(), r#"["a","b\"c"]"#);
    }

    #[test]
    fn test_decode_list() {
        let data = r#"{"data":[{"tss_request_id":"r1","status":130}]}"#;
        let requests: Vec<TssRequest> = decode_list("TSS requests", Some(data)).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].status, Status::Approving);

        let empty: Vec<TssRequest> = decode_list("TSS requests", Some(r#"{"data":null}"#)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_missing_payload() {
        let err = decode_list::<TssRequest>("TSS requests", None).unwrap_err();
        assert!(matches!(
            err,
            SdkError::Local(LocalError::MissingData("TSS requests"))
        ));

        let pending = decode_optional_list::<TssRequest>("TSS requests", None).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_malformed_payload() {
        let err = decode_optional_list::<TssRequest>("TSS requests", Some("{\"data\": 7}")).unwrap_err();
        assert!(matches!(err, SdkError::Local(LocalError::Decode { .. })));
    }
}
