use anyhow::anyhow;
pub use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
pub use sweetlatex::*;

pub mod pretty;

/// Represents fields/content specified on the command line.
///
/// Sort of like HTTPie. Query parameters are '==', body values (JSON) are '=', and file uploads
/// (multipart only) are '@'. Only single-level body values are allowed currently, not JSON
/// Pointer assignment.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ArgField {
    Query(String, Value),
    Body(String, Value),
    File(String, PathBuf),
}

impl FromStr for ArgField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref FIELD_RE: Regex =
                Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)(==|=|@)(.*)$").unwrap();
        }
        if let Some(captures) = FIELD_RE.captures(s) {
            let key = captures[1].to_string();
            if &captures[2] == "@" {
                if captures[3].is_empty() {
                    return Err(anyhow!("missing file path: {}", s));
                }
                return Ok(ArgField::File(key, PathBuf::from(&captures[3])));
            }
            let val =
                Value::from_str(&captures[3]).unwrap_or(Value::String(captures[3].to_string()));
            let val = match val {
                Value::String(s) if s.is_empty() => Value::Null,
                _ => val,
            };
            if &captures[2] == "==" {
                Ok(ArgField::Query(key, val))
            } else {
                Ok(ArgField::Body(key, val))
            }
        } else {
            Err(anyhow!("could not parse as a field assignment: {}", s))
        }
    }
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.to_string(),
        Value::Null => "".to_string(),
        _ => v.to_string(),
    }
}

pub fn query_from_fields(fields: &[ArgField]) -> Vec<(String, String)> {
    fields
        .iter()
        .filter_map(|f| match f {
            ArgField::Query(k, v) => Some((k.to_string(), value_to_text(v))),
            _ => None,
        })
        .collect()
}

/// JSON object of all body fields, or `null` if there are none (so no body gets sent).
pub fn value_from_fields(fields: &[ArgField]) -> Value {
    let map: serde_json::Map<String, Value> = fields
        .iter()
        .filter_map(|f| match f {
            ArgField::Body(k, v) => Some((k.to_string(), v.clone())),
            _ => None,
        })
        .collect();
    if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    }
}

/// Rough mime type from a file extension; the server sniffs images anyways.
fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        "json" => Some("application/json"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

pub fn form_from_fields(fields: &[ArgField]) -> Result<FormData> {
    let mut form = FormData::new();
    for f in fields.iter() {
        form = match f {
            ArgField::Body(k, v) => form.text(k, &value_to_text(v)),
            ArgField::File(k, path) => {
                let data = std::fs::read(path)
                    .map_err(|e| anyhow!("reading {}: {}", path.display(), e))?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or(anyhow!("not a file path: {}", path.display()))?;
                form.file(k, file_name, guess_mime(path), data)
            }
            ArgField::Query(..) => form,
        };
    }
    Ok(form)
}

/// Builds a request from a method, an API path (eg "/products") and command-line fields.
pub fn request_from_fields(
    method: Method,
    path: &str,
    fields: &[ArgField],
    multipart: bool,
) -> Result<ApiRequest> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let req = ApiRequest::new(method, &path).query_pairs(query_from_fields(fields));
    if multipart {
        Ok(req.form(form_from_fields(fields)?))
    } else {
        if fields.iter().any(|f| matches!(f, ArgField::File(..))) {
            return Err(anyhow!("file fields (key@path) require --form"));
        }
        Ok(req.json(value_from_fields(fields)))
    }
}

#[test]
fn test_argfield() {
    use serde_json::json;
    assert_eq!(
        ArgField::from_str("a=3").unwrap(),
        ArgField::Body("a".to_string(), json!(3)),
    );
    assert_eq!(
        ArgField::from_str("a==3").unwrap(),
        ArgField::Query("a".to_string(), json!(3)),
    );
    assert_eq!(
        ArgField::from_str("title==\"something\"").unwrap(),
        ArgField::Query("title".to_string(), Value::String("something".to_string()))
    );
    assert_eq!(
        ArgField::from_str("title==something").unwrap(),
        ArgField::Query("title".to_string(), Value::String("something".to_string()))
    );
    assert_eq!(
        ArgField::from_str("title=").unwrap(),
        ArgField::Body("title".to_string(), Value::Null),
    );
    assert_eq!(
        ArgField::from_str("image@./dress.png").unwrap(),
        ArgField::File("image".to_string(), PathBuf::from("./dress.png")),
    );
    assert_eq!(
        ArgField::from_str("artist_id2=7").unwrap(),
        ArgField::Body("artist_id2".to_string(), json!(7)),
    );

    assert!(ArgField::from_str("a").is_err());
    assert!(ArgField::from_str("").is_err());
    assert!(ArgField::from_str("asdf.fee").is_err());
    assert!(ArgField::from_str("image@").is_err());

    assert!(ArgField::from_str("text=\"other value\"").is_ok());
}

#[test]
fn test_fields_to_request() {
    use serde_json::json;
    let fields: Vec<ArgField> = vec!["limit==5", "title=Corset", "price=49.5"]
        .into_iter()
        .map(|s| ArgField::from_str(s).unwrap())
        .collect();

    assert_eq!(
        query_from_fields(&fields),
        vec![("limit".to_string(), "5".to_string())]
    );
    assert_eq!(
        value_from_fields(&fields),
        json!({"title": "Corset", "price": 49.5})
    );
    assert_eq!(value_from_fields(&fields[..1]), Value::Null);

    let req = request_from_fields(Method::Post, "products", &fields, false).unwrap();
    assert_eq!(req.path(), "/products");
    assert_eq!(req.encoding(), BodyEncoding::Json);

    let req = request_from_fields(Method::Put, "/products/3", &fields, true).unwrap();
    assert_eq!(req.encoding(), BodyEncoding::Form);
    match req.body() {
        Some(RequestBody::Form(form)) => assert_eq!(
            form.parts(),
            &[
                FormPart::Text {
                    name: "title".to_string(),
                    value: "Corset".to_string()
                },
                FormPart::Text {
                    name: "price".to_string(),
                    value: "49.5".to_string()
                },
            ]
        ),
        other => panic!("expected form body, got {other:?}"),
    }

    let with_file = vec![ArgField::File("image".to_string(), PathBuf::from("x.png"))];
    assert!(request_from_fields(Method::Post, "/products", &with_file, false).is_err());
}

#[test]
fn test_form_file_part() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dress.PNG");
    std::fs::write(&path, b"PNGDATA").unwrap();

    let form = form_from_fields(&[ArgField::File("image".to_string(), path)]).unwrap();
    assert_eq!(
        form.parts(),
        &[FormPart::Bytes {
            name: "image".to_string(),
            file_name: "dress.PNG".to_string(),
            mime: Some("image/png".to_string()),
            data: b"PNGDATA".to_vec(),
        }]
    );

    let missing = ArgField::File("image".to_string(), dir.path().join("nope.png"));
    assert!(form_from_fields(&[missing]).is_err());
}
