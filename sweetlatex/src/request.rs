use anyhow::anyhow;
use reqwest::blocking::multipart;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Path of the token endpoint. Requests against it are never retried after a 401.
pub const TOKENS_PATH: &str = "/tokens";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            _ => Err(anyhow!("unknown method: {}", s)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        write!(f, "{name}")
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BodyEncoding {
    Json,
    /// multipart/form-data; the transport picks the boundary and content type
    Form,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    Bytes {
        name: String,
        file_name: String,
        mime: Option<String>,
        data: Vec<u8>,
    },
}

/// Multipart payload.
///
/// The transport's form type is consumed on send, so the parts are kept here and a fresh form is
/// built for every attempt. That is what makes a replay after token refresh possible.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct FormData {
    parts: Vec<FormPart>,
}

impl FormData {
    pub fn new() -> Self {
        FormData::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.parts.push(FormPart::Text {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, mime: Option<&str>, data: Vec<u8>) -> Self {
        self.parts.push(FormPart::Bytes {
            name: name.to_string(),
            file_name: file_name.to_string(),
            mime: mime.map(|m| m.to_string()),
            data,
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn to_multipart(&self) -> anyhow::Result<multipart::Form> {
        let mut form = multipart::Form::new();
        for part in self.parts.iter() {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::Bytes {
                    name,
                    file_name,
                    mime,
                    data,
                } => {
                    let mut p = multipart::Part::bytes(data.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        p = p.mime_str(mime)?;
                    }
                    form.part(name.clone(), p)
                }
            };
        }
        Ok(form)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestBody {
    Json(Value),
    Form(FormData),
}

/// Describes one API call. Built fresh per call, and cloneable so the exact same call can be
/// re-issued after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    encoding: BodyEncoding,
    headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        ApiRequest {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
            encoding: BodyEncoding::Json,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// JSON body. A `null` value is treated as "no body".
    pub fn json(mut self, body: Value) -> Self {
        self.encoding = BodyEncoding::Json;
        self.body = if body.is_null() {
            None
        } else {
            Some(RequestBody::Json(body))
        };
        self
    }

    pub fn form(mut self, form: FormData) -> Self {
        self.encoding = BodyEncoding::Form;
        self.body = Some(RequestBody::Form(form));
        self
    }

    /// Extra header; replaces any default header of the same name (eg, `Authorization`).
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn encoding(&self) -> BodyEncoding {
        self.encoding
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn targets_token_endpoint(&self) -> bool {
        self.path == TOKENS_PATH
    }
}

#[test]
fn test_method() {
    assert_eq!(Method::from_str("get").unwrap(), Method::Get);
    assert_eq!(Method::from_str("DELETE").unwrap(), Method::Delete);
    assert!(Method::from_str("patch").is_err());
    assert_eq!(Method::Put.to_string(), "PUT");
    assert_eq!(reqwest::Method::from(Method::Post), reqwest::Method::POST);
}

#[test]
fn test_request_builder() {
    use serde_json::json;

    let req = ApiRequest::get("/products")
        .query("limit", 25)
        .query("offset", 0);
    assert_eq!(req.method(), Method::Get);
    assert_eq!(
        req.query_params(),
        &[
            ("limit".to_string(), "25".to_string()),
            ("offset".to_string(), "0".to_string())
        ]
    );
    assert!(req.body().is_none());
    assert_eq!(req.encoding(), BodyEncoding::Json);
    assert!(!req.targets_token_endpoint());

    let req = ApiRequest::post("/tokens").json(Value::Null);
    assert!(req.body().is_none());
    assert!(req.targets_token_endpoint());
    assert!(!ApiRequest::put("/tokens/reset").targets_token_endpoint());

    let req = ApiRequest::put("/products/3").json(json!({"title": "x"}));
    assert_eq!(req.body(), Some(&RequestBody::Json(json!({"title": "x"}))));

    let form = FormData::new()
        .text("title", "Latex Dress")
        .file("image", "dress.png", Some("image/png"), vec![1, 2, 3]);
    let req = ApiRequest::post("/products").form(form.clone());
    assert_eq!(req.encoding(), BodyEncoding::Form);
    assert_eq!(form.parts().len(), 2);
    assert!(form.to_multipart().is_ok());

    let bad = FormData::new().file("image", "x.bin", Some("not a mime"), vec![]);
    assert!(bad.to_multipart().is_err());
}
