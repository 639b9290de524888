//! Request body serialisation driven by the declared content type.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Json,
    FormUrlEncoded,
    MultipartFormData,
    PlainText,
    Yaml,
    Xml,
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("{0} bodies must be objects")]
    NotAnObject(&'static str),

    #[error("form encoding failed: {0}")]
    Form(#[from] serde_urlencoded::ser::Error),

    #[error("yaml encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encoded body together with the content-type header to send with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ContentType {
    /// Parse a content-type header value, ignoring parameters such as charset.
    pub fn from_header(header: Option<&str>) -> ContentType {
        let Some(header) = header else {
            return ContentType::Json;
        };

        let essence = header
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        match essence.as_str() {
            "application/json" => ContentType::Json,
            "application/x-www-form-urlencoded" => ContentType::FormUrlEncoded,
            "multipart/form-data" => ContentType::MultipartFormData,
            "text/plain" => ContentType::PlainText,
            "text/yaml" | "application/yaml" | "application/x-yaml" => ContentType::Yaml,
            "text/xml" | "application/xml" => ContentType::Xml,
            _ => ContentType::Other(header.to_string()),
        }
    }

    fn header_value(&self) -> &str {
        match self {
            ContentType::Json => "application/json",
            ContentType::FormUrlEncoded => "application/x-www-form-urlencoded",
            ContentType::MultipartFormData => "multipart/form-data",
            ContentType::PlainText => "text/plain",
            ContentType::Yaml => "text/yaml",
            ContentType::Xml => "application/xml",
            ContentType::Other(header) => header,
        }
    }
}

/// Serialise a body value for the wire.
pub fn serialize(content_type: &ContentType, value: &Value) -> Result<EncodedBody, BodyError> {
    let boundary = format!("----ProbeBoundary{}", uuid::Uuid::new_v4().simple());
    serialize_with_boundary(content_type, value, &boundary)
}

/// Same as [`serialize`] with a caller-chosen multipart boundary.
pub fn serialize_with_boundary(
    content_type: &ContentType,
    value: &Value,
    boundary: &str,
) -> Result<EncodedBody, BodyError> {
    let bytes = match (content_type, value) {
        // pre-encoded string bodies go out untouched whatever the declared type
        (_, Value::String(text)) => text.clone().into_bytes(),

        (ContentType::Json | ContentType::Other(_), value) => serde_json::to_vec(value)?,
        (ContentType::PlainText, value) => raw_text(value).into_bytes(),
        (ContentType::Yaml, value) => serde_yaml::to_string(value)?.into_bytes(),
        (ContentType::Xml, value) => to_xml(value).into_bytes(),
        (ContentType::FormUrlEncoded, value) => {
            serde_urlencoded::to_string(form_pairs(value, "form-urlencoded")?)?.into_bytes()
        }
        (ContentType::MultipartFormData, value) => {
            let pairs = form_pairs(value, "multipart")?;
            return Ok(EncodedBody {
                bytes: multipart(&pairs, boundary).into_bytes(),
                content_type: format!("multipart/form-data; boundary={boundary}"),
            });
        }
    };

    Ok(EncodedBody {
        bytes,
        content_type: content_type.header_value().to_string(),
    })
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn form_pairs(value: &Value, kind: &'static str) -> Result<Vec<(String, String)>, BodyError> {
    let Value::Object(fields) = value else {
        return Err(BodyError::NotAnObject(kind));
    };

    Ok(fields
        .iter()
        .map(|(key, value)| (key.clone(), raw_text(value)))
        .collect())
}

fn multipart(pairs: &[(String, String)], boundary: &str) -> String {
    let mut out = String::new();
    for (name, value) in pairs {
        let name = disposition_escape(name);
        out.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}

/// Field names are quoted in the part header: `"`, CR and LF are
/// percent-encoded the way browsers encode form field names.
fn disposition_escape(name: &str) -> String {
    name.replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn to_xml(value: &Value) -> String {
    match value {
        Value::Object(fields) => fields
            .iter()
            .map(|(tag, inner)| xml_element(tag, inner))
            .collect(),
        other => xml_element("root", other),
    }
}

fn xml_element(tag: &str, value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(|item| xml_element(tag, item)).collect(),
        Value::Object(_) => format!("<{tag}>{}</{tag}>", to_xml(value)),
        Value::Null => format!("<{tag}/>"),
        other => format!("<{tag}>{}</{tag}>", xml_escape(&raw_text(other))),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
